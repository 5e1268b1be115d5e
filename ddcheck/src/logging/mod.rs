//! Logging setup.
//!
//! Console and daily-rolling file output with local-timezone timestamps, plus a
//! background task that prunes old log files.

use chrono::{Local, NaiveDate};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "ddcheck=info,live_probe=info";

/// Prefix of rolled log files (`ddcheck.log.YYYY-MM-DD`).
pub const LOG_FILE_PREFIX: &str = "ddcheck.log";

/// Log retention period in days.
const LOG_RETENTION_DAYS: i64 = 7;

const RETENTION_PASS_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Handle to the installed logging pipeline.
pub struct LoggingConfig {
    log_dir: PathBuf,
    filter: String,
}

impl LoggingConfig {
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Filter directive the subscriber was installed with.
    pub fn filter(&self) -> &str {
        &self.filter
    }

    /// Prune expired log files now and then once a day until cancelled.
    pub fn start_retention_cleanup(self: &Arc<Self>, cancel: CancellationToken) {
        let config = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(RETENTION_PASS_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = cleanup_old_logs(&config.log_dir, LOG_RETENTION_DAYS).await {
                            warn!(dir = %config.log_dir.display(), error = %e, "Log retention pass failed");
                        }
                    }
                }
            }
            debug!("Log retention task stopped");
        });
    }
}

/// Date suffix of a rolled log file, if `name` is one.
fn rolled_date(name: &str) -> Option<NaiveDate> {
    let suffix = name.strip_prefix(LOG_FILE_PREFIX)?.strip_prefix('.')?;
    NaiveDate::parse_from_str(suffix, "%Y-%m-%d").ok()
}

/// Delete rolled log files dated more than `retention_days` days ago.
///
/// Returns the number of files removed.
pub async fn cleanup_old_logs(log_dir: &Path, retention_days: i64) -> std::io::Result<usize> {
    let oldest_kept = Local::now().date_naive() - chrono::Duration::days(retention_days);

    let mut expired = Vec::new();
    let mut dir = tokio::fs::read_dir(log_dir).await?;
    while let Some(entry) = dir.next_entry().await? {
        let date = entry.file_name().to_str().and_then(rolled_date);
        if date.is_some_and(|d| d < oldest_kept) && entry.file_type().await?.is_file() {
            expired.push(entry.path());
        }
    }

    let mut removed = 0;
    for path in expired {
        if let Err(e) = tokio::fs::remove_file(&path).await {
            warn!(path = %path.display(), error = %e, "Could not remove expired log file");
            continue;
        }
        debug!(path = %path.display(), "Removed expired log file");
        removed += 1;
    }
    if removed > 0 {
        info!(removed, "Log retention pass finished");
    }
    Ok(removed)
}

/// Initialize console and file logging.
///
/// `filter` overrides `RUST_LOG`, which in turn overrides [`DEFAULT_LOG_FILTER`].
/// Keep the returned guard alive for the lifetime of the process.
pub fn init_logging(
    log_dir: &Path,
    filter: Option<&str>,
) -> crate::Result<(Arc<LoggingConfig>, WorkerGuard)> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = match filter {
        Some(directive) => EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::config(format!("Invalid filter directive: {e}")))?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    };
    let filter_string = env_filter.to_string();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| crate::Error::Other(format!("Failed to set global default subscriber: {e}")))?;

    let config = Arc::new(LoggingConfig {
        log_dir: log_dir.to_path_buf(),
        filter: filter_string,
    });

    Ok((config, guard))
}
