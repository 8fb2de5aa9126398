//! Panic recovery stage.
//!
//! Innermost stage: a handler panic, whether while computing a unary
//! response or while producing a streamed message, becomes an `Internal`
//! status carrying the panic message. The call span gets a `stack` field
//! of the form `<dir>/<dir>/<file>:<line> <function>`, the process-wide
//! counter is incremented, and the server keeps serving.
//!
//! Set `PANIC_RECOVERY=false` to let panics propagate instead.

use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, Location};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use futures_util::{FutureExt, StreamExt};
use tracing::Span;

use janus_core::future::panic_message;
use janus_core::{BoxMessageStream, Status};

use crate::call::{CallRequest, CallResponse, CallResult, Payload};
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::stages::metrics::names;

/// Environment variable that disables recovery when set to `false`.
pub const PANIC_RECOVERY_ENV: &str = "PANIC_RECOVERY";

static PANICS_RECOVERED: AtomicU64 = AtomicU64::new(0);
static HOOK: OnceLock<()> = OnceLock::new();

thread_local! {
    static LAST_PANIC: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Number of panics recovered by this process.
pub fn panics_recovered() -> u64 {
    PANICS_RECOVERED.load(Ordering::Relaxed)
}

// Chains onto the existing hook so panics still reach stderr.
fn install_hook() {
    HOOK.get_or_init(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            if let Some(location) = info.location() {
                let fragment = stack_fragment(location, &Backtrace::force_capture().to_string());
                LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(fragment));
            }
            previous(info);
        }));
    });
}

/// `<last three path elements>:<line> <function>`.
fn stack_fragment(location: &Location<'_>, backtrace: &str) -> String {
    let file = location.file().replace('\\', "/");
    let parts: Vec<&str> = file.rsplit('/').take(3).collect();
    let short = parts.into_iter().rev().collect::<Vec<_>>().join("/");
    match function_at(backtrace, &file, location.line()) {
        Some(function) => format!("{short}:{} {function}", location.line()),
        None => format!("{short}:{}", location.line()),
    }
}

/// Finds the frame whose source position is `file:line` in a rendered backtrace.
fn function_at(backtrace: &str, file: &str, line: u32) -> Option<String> {
    let position = format!("{file}:{line}:");
    let mut frame: Option<&str> = None;
    for text in backtrace.lines().map(str::trim) {
        if let Some(at) = text.strip_prefix("at ") {
            if at.replace('\\', "/").contains(&position) {
                return frame.map(strip_hash);
            }
        } else if let Some((index, name)) = text.split_once(": ") {
            if index.chars().all(|c| c.is_ascii_digit()) {
                frame = Some(name);
            }
        }
    }
    None
}

fn strip_hash(symbol: &str) -> String {
    match symbol.rsplit_once("::h") {
        Some((head, hash)) if hash.len() == 16 && hash.chars().all(|c| c.is_ascii_hexdigit()) => {
            head.to_string()
        }
        _ => symbol.to_string(),
    }
}

fn recovered(payload: &(dyn std::any::Any + Send)) -> Status {
    let message = panic_message(payload);
    let stack = LAST_PANIC.with(|slot| slot.borrow_mut().take()).unwrap_or_default();
    Span::current().record("stack", stack.as_str());
    PANICS_RECOVERED.fetch_add(1, Ordering::Relaxed);
    metrics::counter!(names::PANICS_RECOVERED).increment(1);
    Status::internal(message)
}

fn recover_stream(stream: BoxMessageStream) -> BoxMessageStream {
    let span = Span::current();
    Box::pin(AssertUnwindSafe(stream).catch_unwind().map(move |item| match item {
        Ok(item) => item,
        Err(payload) => {
            let _entered = span.enter();
            Err(recovered(payload.as_ref()))
        }
    }))
}

/// Panic recovery interceptor.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryInterceptor {
    _private: (),
}

impl Default for RecoveryInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl RecoveryInterceptor {
    /// Creates the stage and installs the panic hook that captures stack fragments.
    pub fn new() -> Self {
        install_hook();
        Self { _private: () }
    }

    /// False when `PANIC_RECOVERY=false`.
    pub fn enabled_by_env() -> bool {
        std::env::var(PANIC_RECOVERY_ENV).map_or(true, |value| !value.trim().eq_ignore_ascii_case("false"))
    }
}

impl Interceptor for RecoveryInterceptor {
    fn name(&self) -> &'static str {
        "recovery"
    }

    fn intercept<'a>(&'a self, mut request: CallRequest, next: Next<'a>) -> BoxFuture<'a, CallResult> {
        Box::pin(async move {
            request.payload = match request.payload {
                Payload::Stream(stream) => Payload::Stream(recover_stream(stream)),
                unary => unary,
            };
            match AssertUnwindSafe(next.run(request)).catch_unwind().await {
                Ok(Ok(CallResponse {
                    payload: Payload::Stream(stream),
                })) => Ok(CallResponse::stream(recover_stream(stream))),
                Ok(result) => result,
                Err(payload) => Err(recovered(payload.as_ref())),
            }
        })
    }
}
