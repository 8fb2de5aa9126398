//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, `.env` and environment variables.
//!
//! Layers are merged key by key: a file that only sets `server.http_addr`
//! keeps every other value of the layer below it.

use std::env;
use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::{ConfigError, GatewayConfig};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// File tried when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "configs/config.toml";

/// Default prefix for environment overrides.
pub const ENV_PREFIX: &str = "JANUS";

/// Configuration loader with layered approach.
///
/// Later layers override earlier ones:
/// 1. Default values (or a preset)
/// 2. Configuration file (TOML or JSON)
/// 3. Environment variables, including those from `.env`
///
/// # Example
///
/// ```no_run
/// use janus_config::ConfigLoader;
///
/// # fn main() -> Result<(), janus_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_production()
///     .with_file("config.toml")?
///     .with_dotenv()?
///     .with_env_prefix("JANUS")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: GatewayConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader starting from the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
            env_prefix: None,
        }
    }

    /// The usual process setup: `.env`, then the file named by
    /// `CONFIG_PATH` (or `configs/config.toml` if present), then `JANUS__*`
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any layer fails to load or the result is
    /// invalid.
    pub fn from_env() -> Result<GatewayConfig, ConfigError> {
        Self::new()
            .with_dotenv()?
            .with_discovered_file()?
            .with_env_prefix(ENV_PREFIX)
            .load()
    }

    /// Start with default configuration values.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = GatewayConfig::default();
        self
    }

    /// Start with the development preset.
    ///
    /// ```
    /// use janus_config::ConfigLoader;
    ///
    /// let config = ConfigLoader::new().with_development().load().unwrap();
    /// assert_eq!(config.telemetry.level, "debug");
    /// ```
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = GatewayConfig::development();
        self
    }

    /// Start with the production preset.
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = GatewayConfig::production();
        self
    }

    /// Load configuration from a file.
    ///
    /// The format follows the extension: `.toml` or `.json`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - The file does not exist or cannot be read
    /// - The file contains invalid TOML/JSON
    /// - The file contains unknown fields
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
        let layer = Self::parse_file(&content, path)?;
        self.merge_layer(layer)?;

        Ok(self)
    }

    /// Load configuration from a file if it exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file exists but cannot be loaded.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Load the file named by `CONFIG_PATH`, or `configs/config.toml` if it
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if `CONFIG_PATH` names a missing file or the
    /// file cannot be loaded.
    pub fn with_discovered_file(self) -> Result<Self, ConfigError> {
        match env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => self.with_file(path),
            _ => self.with_optional_file(DEFAULT_CONFIG_PATH),
        }
    }

    /// Load configuration from a string in `"toml"` or `"json"` format.
    ///
    /// ```
    /// use janus_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [server]
    ///     http_addr = "127.0.0.1:3000"
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.server.http_addr, "127.0.0.1:3000");
    /// assert_eq!(config.server.grpc_addr, "0.0.0.0:8081");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if parsing fails.
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        let layer = Self::parse(content, &format.to_lowercase())?;
        self.merge_layer(layer)?;
        Ok(self)
    }

    /// Set the prefix for environment overrides.
    ///
    /// Variables use the format `PREFIX__SECTION__KEY`, for example
    /// `JANUS__SERVER__HTTP_ADDR=0.0.0.0:9000` or
    /// `JANUS__LOGGING__MASK_FIELDS=password,pin`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load `.env` from the working directory into the process environment.
    ///
    /// A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Dotenv` if the file exists but cannot be parsed.
    pub fn with_dotenv(self) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(_) => Ok(self),
            Err(e) if e.not_found() => Ok(self),
            Err(e) => Err(ConfigError::Dotenv(e.to_string())),
        }
    }

    /// Load a specific `.env`-style file into the process environment.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Dotenv` if the file is missing or malformed.
    pub fn with_dotenv_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        dotenvy::from_path(path.as_ref()).map_err(|e| ConfigError::Dotenv(e.to_string()))?;
        Ok(self)
    }

    /// Apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if an override cannot be parsed or the final
    /// configuration is invalid.
    pub fn load(mut self) -> Result<GatewayConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            let mut tree = serde_json::to_value(&self.config)?;
            apply_overrides(&mut tree, &prefix, env::vars())?;
            self.config = serde_json::from_value(tree)?;
        }

        self.config.validate()?;

        Ok(self.config)
    }

    /// Finalize without environment overrides or validation.
    #[must_use]
    pub fn load_unvalidated(self) -> GatewayConfig {
        self.config
    }

    fn parse_file(content: &str, path: &Path) -> Result<Value, ConfigError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        Self::parse(content, &extension).map_err(|e| match e {
            ConfigError::UnsupportedFormat(_) => ConfigError::UnsupportedFormat(path.display().to_string()),
            other => other,
        })
    }

    fn parse(content: &str, format: &str) -> Result<Value, ConfigError> {
        match format {
            "toml" => Ok(serde_json::to_value(toml::from_str::<toml::Value>(content)?)?),
            "json" => Ok(serde_json::from_str(content)?),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    fn merge_layer(&mut self, layer: Value) -> Result<(), ConfigError> {
        let mut tree = serde_json::to_value(&self.config)?;
        merge(&mut tree, layer);
        self.config = serde_json::from_value(tree)?;
        Ok(())
    }
}

/// Deep merge; tables merge key by key, everything else replaces.
fn merge(base: &mut Value, layer: Value) {
    match (base, layer) {
        (Value::Object(base), Value::Object(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Writes `PREFIX__SECTION__KEY` variables into the configuration tree.
///
/// The existing value's type decides how the text is read. Keys that name
/// nothing in the tree are ignored.
fn apply_overrides<I>(tree: &mut Value, prefix: &str, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    let marker = format!("{prefix}__");
    for (key, text) in vars {
        let Some(path) = key.strip_prefix(&marker) else {
            continue;
        };
        let pointer: String = path.split("__").map(|part| format!("/{}", part.to_lowercase())).collect();
        if let Some(slot) = tree.pointer_mut(&pointer) {
            let value = coerce(&key, &*slot, &text)?;
            *slot = value;
        }
    }
    Ok(())
}

fn coerce(key: &str, current: &Value, text: &str) -> Result<Value, ConfigError> {
    match current {
        Value::Bool(_) => parse_bool(text)
            .map(Value::Bool)
            .ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean")),
        Value::Number(_) => text
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .or_else(|_| text.trim().parse::<f64>().map(Value::from))
            .map_err(|_| ConfigError::env_parse_error(key, "expected number")),
        Value::Array(_) if text.trim_start().starts_with('[') => {
            serde_json::from_str(text).map_err(|e| ConfigError::env_parse_error(key, e.to_string()))
        }
        Value::Array(_) => Ok(Value::Array(
            text.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(|item| Value::String(item.to_string()))
                .collect(),
        )),
        Value::Object(_) => {
            let value: Value =
                serde_json::from_str(text).map_err(|e| ConfigError::env_parse_error(key, e.to_string()))?;
            if value.is_object() {
                Ok(value)
            } else {
                Err(ConfigError::env_parse_error(key, "expected a JSON object"))
            }
        }
        Value::String(_) | Value::Null => Ok(Value::String(text.to_string())),
    }
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn overridden(pairs: &[(&str, &str)]) -> Result<GatewayConfig, ConfigError> {
        let mut tree = serde_json::to_value(GatewayConfig::default()).unwrap();
        apply_overrides(&mut tree, "JANUS", vars(pairs))?;
        Ok(serde_json::from_value(tree)?)
    }

    #[test]
    fn test_loader_defaults() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, GatewayConfig::default());
    }

    #[test]
    fn test_file_layer_keeps_preset() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[server]
grpc_addr = "127.0.0.1:50051"
shutdown_timeout = "45s"

[logging]
mask_fields = ["card_number"]

[[limits.limit]]
prefix = "/billing."
headers = ["x-client-id"]
quota = 100
duration = "1m"
"#
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_development()
            .with_file(file.path())
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.server.grpc_addr, "127.0.0.1:50051");
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(45));
        assert_eq!(config.server.http_addr, "0.0.0.0:8080");
        assert_eq!(config.logging.mask_fields, ["card_number"]);
        // preset values not named by the file survive
        assert!(config.logging.log_body);
        assert_eq!(config.telemetry.level, "debug");
        assert_eq!(config.limits.limit[0].quota, 100);
    }

    #[test]
    fn test_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"telemetry": {{"service_name": "billing", "format": "compact"}}}}"#).unwrap();
        let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
        assert_eq!(config.telemetry.service_name, "billing");
        assert_eq!(config.telemetry.format, janus_telemetry::LogFormat::Compact);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = ConfigLoader::new()
            .with_string("[server]\nhttp_port = 8080", "toml")
            .unwrap_err();
        assert!(err.to_string().contains("http_port"));
    }

    #[test]
    fn test_missing_and_optional_files() {
        let err = ConfigLoader::new().with_file("/nonexistent/janus.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
        assert!(ConfigLoader::new().with_optional_file("/nonexistent/janus.toml").is_ok());
    }

    #[test]
    fn test_unsupported_format() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let err = ConfigLoader::new().with_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_env_overrides_by_type() {
        let config = overridden(&[
            ("JANUS__SERVER__HTTP_ADDR", "127.0.0.1:9000"),
            ("JANUS__SERVER__KEEP_ALIVE", "off"),
            ("JANUS__SERVER__SHUTDOWN_TIMEOUT", "1m30s"),
            ("JANUS__LOGGING__MASK_FIELDS", "password, pin"),
            ("JANUS__LIMITS__DISABLED", "true"),
            ("JANUS__TELEMETRY__FORMAT", "pretty"),
            ("JANUS__NOT__A__KEY", "ignored"),
            ("OTHER__SERVER__HTTP_ADDR", "ignored"),
        ])
        .unwrap();

        assert_eq!(config.server.http_addr, "127.0.0.1:9000");
        assert!(!config.server.keep_alive);
        assert_eq!(config.server.shutdown_timeout, Duration::from_secs(90));
        assert_eq!(config.logging.mask_fields, ["password", "pin"]);
        assert!(config.limits.disabled);
        assert_eq!(config.telemetry.format, janus_telemetry::LogFormat::Pretty);
    }

    #[test]
    fn test_env_override_json_array() {
        let config = overridden(&[(
            "JANUS__LIMITS__BLOCK",
            r#"[{"key": "x-client-id", "value": "scraper"}]"#,
        )])
        .unwrap();
        assert_eq!(config.limits.block[0].value, "scraper");
    }

    #[test]
    fn test_env_override_bad_values() {
        let err = overridden(&[("JANUS__SERVER__CORS", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("JANUS__SERVER__CORS"));

        let err = overridden(&[("JANUS__SERVER__SHUTDOWN_TIMEOUT", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::JsonError(_)));
    }

    #[test]
    fn test_process_env_prefix() {
        env::set_var("JANUSTEST__TELEMETRY__SERVICE_NAME", "from-env");
        let config = ConfigLoader::new().with_env_prefix("janustest").load().unwrap();
        env::remove_var("JANUSTEST__TELEMETRY__SERVICE_NAME");
        assert_eq!(config.telemetry.service_name, "from-env");
    }

    #[test]
    fn test_invalid_after_layers() {
        let err = ConfigLoader::new()
            .with_string(r#"{"server": {"http_addr": "nowhere"}}"#, "json")
            .unwrap()
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
