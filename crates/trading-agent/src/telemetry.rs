use tracing_subscriber::EnvFilter;

/// Install the global subscriber: `RUST_LOG` filter (default `info`), JSON
/// lines when `RUST_LOG_FORMAT=json`. Later calls are no-ops.
pub fn init_tracing() {
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter())
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter()).try_init()
    };

    if installed.is_ok() {
        tracing::debug!("Tracing initialised (json: {})", json_logging);
    }
}
