//! Janus echo server.
//!
//! Serves a small echo service over gRPC and JSON/HTTP so a deployment can
//! be smoke-tested end to end.

use std::path::PathBuf;

use futures_util::stream;
use janus::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

const ECHO_SERVICE: &str = "janus.echo.v1.Echo";

/// Most messages `Repeat` streams back.
const MAX_REPEAT: u32 = 100;

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
struct EchoMessage {
    #[prost(string, tag = "1")]
    #[serde(default)]
    text: String,
    #[prost(uint32, tag = "2")]
    #[serde(default)]
    times: u32,
}

impl Message for EchoMessage {}

/// Command-line arguments.
struct Args {
    /// Path to configuration file.
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--config" | "-c" => {
                    config = args.next().map(PathBuf::from);
                }
                "--help" | "-h" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("janus-echo {}", janus::VERSION);
                    std::process::exit(0);
                }
                other => {
                    eprintln!("Unknown argument: {other}");
                    eprintln!("Use --help for usage information");
                    std::process::exit(1);
                }
            }
        }

        Self { config }
    }
}

fn print_help() {
    println!(
        r#"Janus echo server

USAGE:
    janus-echo [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file (TOML or JSON)
    -h, --help             Print help information
    -v, --version          Print version information

ENVIRONMENT VARIABLES:
    CONFIG_PATH                     Configuration file when --config is absent
    JANUS__SERVER__HTTP_ADDR        JSON/HTTP listener (default: 0.0.0.0:8080)
    JANUS__SERVER__GRPC_ADDR        gRPC listener (default: 0.0.0.0:8081)
    JANUS__SERVER__METRICS_ADDR     Prometheus listener (default: 0.0.0.0:9090)
    JANUS__SERVER__SHUTDOWN_TIMEOUT Drain deadline per listener (default: 30s)
    JANUS__TELEMETRY__LEVEL         Log filter (default: info)

EXAMPLES:
    janus-echo --config /etc/janus/echo.toml
    curl -d '{{"text":"hi","times":3}}' localhost:8080/janus.echo.v1.Echo/Repeat
"#
    );
}

fn load_config(path: Option<PathBuf>) -> Result<GatewayConfig, janus::config::ConfigError> {
    match path {
        Some(path) => ConfigLoader::new()
            .with_defaults()
            .with_dotenv()?
            .with_file(path)?
            .with_env_prefix(janus::config::ENV_PREFIX)
            .load(),
        None => ConfigLoader::from_env(),
    }
}

fn echo_services() -> Result<ServiceRegistry, janus::server::RegistrationError> {
    let mut services = ServiceRegistry::new();
    services
        .register_unary(ECHO_SERVICE, "Say", |_ctx: CallContext, req: EchoMessage| async move {
            Ok::<_, Status>(req)
        })?
        .register_server_stream(ECHO_SERVICE, "Repeat", |_ctx: CallContext, req: EchoMessage| async move {
            if req.times > MAX_REPEAT {
                return Err(Status::invalid_argument(format!(
                    "times must be at most {MAX_REPEAT}"
                )));
            }
            let replies = (0..req.times.max(1)).map(move |i| {
                Ok(EchoMessage {
                    text: req.text.clone(),
                    times: i + 1,
                })
            });
            let replies: MessageStream<EchoMessage> = Box::pin(stream::iter(replies));
            Ok(replies)
        })?;
    Ok(services)
}

fn pipeline(config: &GatewayConfig) -> Pipeline {
    let mut builder = Pipeline::builder()
        .validation()
        .metrics()
        .logging(config.logging.to_options());
    if !config.limits.disabled {
        builder = builder.rate_limit(RateLimitInterceptor::new(config.limits.clone()));
    }
    builder.recovery().build()
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_telemetry(&config.telemetry.to_telemetry_config()) {
        eprintln!("Failed to initialize telemetry: {e}");
        std::process::exit(1);
    }

    let services = match echo_services() {
        Ok(services) => services,
        Err(e) => {
            error!(error = %e, "failed to register echo service");
            std::process::exit(1);
        }
    };

    let server = match Server::builder()
        .config(ServerConfig::from_gateway(&config))
        .services(services)
        .pipeline(pipeline(&config))
        .build()
    {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, "failed to build server");
            std::process::exit(1);
        }
    };

    info!(
        version = janus::VERSION,
        http = %config.server.http_addr,
        grpc = %config.server.grpc_addr,
        "starting janus-echo"
    );

    if let Err(e) = server.run().await {
        error!(error = %e, "server stopped with error");
        std::process::exit(1);
    }

    info!("janus-echo stopped");
}
