use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "agora_client=debug,agora_hub=debug,agora_store=info,warn";

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter. Calling this twice is harmless; the second call does nothing.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
