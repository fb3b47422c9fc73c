use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use core_lib::notify::{FilterHandle, History, LogLevelControl, NotificationLayer, Notifier};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter};

/// Filter directive for the global flags.
pub const fn directive(debug: bool, verbose: bool) -> &'static str {
    if verbose {
        "trace"
    } else if debug {
        "debug"
    } else {
        "info"
    }
}

fn filter(directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive))
}

/// Plain logging for the one-shot subcommands.
pub fn init_stderr(directive: &str) {
    let _ = fmt().with_env_filter(filter(directive)).with_writer(std::io::stderr).try_init();
}

/// Logging for a dashboard session. The terminal is in raw mode, so events go
/// to `log_file` and, from INFO up, to the notification history.
pub fn init_session(
    log_file: &Path,
    directive: &str,
    history: Arc<History>,
    notifier: Arc<dyn Notifier>,
) -> anyhow::Result<Arc<dyn LogLevelControl>> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file)
        .with_context(|| format!("Failed to open log file {}", log_file.display()))?;

    let (filter, handle) = reload::Layer::new(filter(directive));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .with(NotificationLayer::new(history, Some(notifier)))
        .try_init()
        .context("Failed to install the log subscriber")?;

    Ok(Arc::new(FilterHandle::new(handle, directive)))
}
