use strata_core::STRATA_LOG_VAR;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// Re-export tracing macros for convenience
pub use tracing::{debug, error, info, instrument, span, trace, warn, Level, Span};

/// Initialize the tracing system
///
/// The filter is read from `STRATA_LOG`, falling back to `RUST_LOG` and then `info`.
/// Events go to stderr in compact form; ANSI colors only when stderr is a terminal.
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = build_filter()?;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(is_tty())
        .compact()
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;

    Ok(())
}

/// Initialize tracing for tests; repeated calls are ignored
pub fn init_for_tests() {
    let filter = build_filter().unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_test_writer().compact())
        .try_init();
}

fn build_filter() -> Result<EnvFilter, tracing_subscriber::filter::ParseError> {
    match std::env::var(STRATA_LOG_VAR) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::try_new(directives),
        _ => EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")),
    }
}

/// Check if we're running in a TTY environment
fn is_tty() -> bool {
    std::io::IsTerminal::is_terminal(&std::io::stderr())
}

/// Span covering one block-level operation on a worker
pub fn block_span(operation: &'static str, block_id: u64) -> Span {
    span!(Level::DEBUG, "block_op", operation, block_id)
}

/// Span covering one client call against a worker
pub fn worker_call_span(operation: &'static str, endpoint: &str) -> Span {
    span!(Level::DEBUG, "worker_call", operation, endpoint = %endpoint)
}
