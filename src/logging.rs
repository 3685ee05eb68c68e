use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

const LOG_FILTER_ENV: &str = "SHOEBOX_LOG";

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Process log goes to `log_file`; stderr if the file cannot be opened.
pub fn init(log_file: &Path) {
    let opened = log_file
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|_| {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_file)
        });

    match opened {
        Ok(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false)
                .try_init();
        }
        Err(err) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .with_target(false)
                .try_init();
            tracing::warn!(
                path = %log_file.display(),
                error = %err,
                "process log unavailable; logging to stderr"
            );
        }
    }
}
