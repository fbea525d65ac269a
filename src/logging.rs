use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Install the global subscriber.
///
/// Logs go to a daily rolling file under the data directory, and also to
/// stderr when `verbose` is set. Filtering follows `ASSEMBLE_LOG`, then
/// defaults to `info`. Keep the returned guard alive until exit so buffered
/// lines get flushed.
pub fn init(verbose: bool) -> Result<WorkerGuard> {
  let log_dir = log_dir()?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let (writer, guard) =
    tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "assemble.log"));

  let env_filter =
    EnvFilter::try_from_env("ASSEMBLE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  let file_layer = tracing_subscriber::fmt::layer()
    .with_writer(writer)
    .with_ansi(false);
  let stderr_layer = verbose.then(|| {
    tracing_subscriber::fmt::layer()
      .with_writer(std::io::stderr)
      .with_target(false)
      .boxed()
  });

  tracing_subscriber::registry()
    .with(env_filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to init logging: {}", e))?;

  Ok(guard)
}

fn log_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("lcc-assemble").join("logs"))
}
