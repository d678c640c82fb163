use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `VQSCE_LOG` first, then `RUST_LOG`, then a default.
///
/// Log field contract for the data pipeline:
/// - Index events carry `root`, `pairs` and `rejected`.
/// - Fold events carry `cv_folds`, `fold`, `training` and `validation`.
/// - Runtime events carry `epoch`; batch events add `batch_index` and `patches`.
/// - Per-sample failures are `warn` level with `example_id` and `error`.
pub fn init_tracing() {
    let filter = env_filter();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("VQSCE_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
