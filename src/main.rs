use anyhow::Result;
use std::{fs::OpenOptions, sync::Mutex};
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "TIDEMARK_LOG";

fn main() -> Result<()> {
    init_logging();
    tidemark::cli::run()
}

fn init_logging() {
    let directives = std::env::var(LOG_ENV).ok();
    let log_file = tidemark::cli::data_dir_from_args().ok().and_then(|dir| {
        std::fs::create_dir_all(&dir).ok()?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(tidemark::config::LOG_FILE))
            .ok()
    });
    match log_file {
        Some(file) => tracing_subscriber::fmt()
            .with_env_filter(log_filter(directives.as_deref(), "info"))
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init(),
        None => tracing_subscriber::fmt()
            .with_env_filter(log_filter(directives.as_deref(), "warn"))
            .with_writer(std::io::stderr)
            .init(),
    }
}

/// `TIDEMARK_LOG` when set and valid, else `default`.
fn log_filter(directives: Option<&str>, default: &str) -> EnvFilter {
    directives
        .filter(|value| !value.trim().is_empty())
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_directives_apply_to_every_writer() {
        assert_eq!(log_filter(Some("debug"), "warn").to_string(), "debug");
        assert_eq!(log_filter(Some("debug"), "info").to_string(), "debug");
    }

    #[test]
    fn missing_directives_fall_back() {
        assert_eq!(log_filter(None, "warn").to_string(), "warn");
        assert_eq!(log_filter(Some("  "), "info").to_string(), "info");
    }
}
