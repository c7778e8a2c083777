use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::EnvFilter;

/// Daily rolling file log under `dir`, filtered by `RUST_LOG` (default `info`).
/// Keep the guard alive for as long as logs should be flushed.
pub fn init(dir: &Path) -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = std::fs::create_dir_all(dir);
    let file_appender = rolling::daily(dir, "ouinet-tester.log");
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    // a second init (tests, embedding) keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(nb_writer)
        .compact()
        .try_init();
    guard
}
