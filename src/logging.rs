use std::sync::Once;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Ensure initialization happens only once
static INIT: Once = Once::new();

/// Initialize the logging system.
///
/// Level comes from RUST_LOG (default `info`), e.g.
/// `RUST_LOG=debug,resilient_mesh=trace`. Set `MESH_LOG_FORMAT=json` for one
/// JSON object per event.
pub fn init() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let json = std::env::var("MESH_LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(json.then(|| fmt::layer().json().with_current_span(false)))
            .with((!json).then(|| {
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true) // breakers are shared across tasks
                    .with_line_number(true)
            }))
            .init();

        tracing::info!(json, "Logging initialized");
    });
}

/// Macro for logging the final outcome of a resilient call
#[macro_export]
macro_rules! call_outcome {
    ($call_id:expr, $service:expr, $method:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::info!(
            call_id = %$call_id,
            service = $service,
            method = $method,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "Resilient call finished"
        )
    };
}

/// Macro for logging registry operations with timing
#[macro_export]
macro_rules! registry_op {
    ($operation:expr, $service:expr, $result:expr, $elapsed_ms:expr) => {
        tracing::debug!(
            operation = $operation,
            service = $service,
            success = $result.is_ok(),
            elapsed_ms = $elapsed_ms,
            "Registry operation"
        )
    };
}
