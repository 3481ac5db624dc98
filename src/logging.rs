//! stderr logging. stdout is reserved for command output.

use tracing_subscriber::{fmt, EnvFilter};

/// Env var that switches logging to JSON lines.
pub const LOG_JSON_ENV: &str = "BEEVAULT_LOG_JSON";

/// Used when `RUST_LOG` is unset; the electrum client is chatty at info.
const DEFAULT_FILTER: &str = "info,electrum_client=warn,rustls=warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var(LOG_JSON_ENV).as_deref() {
            Ok("1") | Ok("true") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

pub fn init_logging(format: LogFormat) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    match format {
        LogFormat::Json => {
            let _ = fmt::Subscriber::builder()
                .with_env_filter(env_filter)
                .json()
                .with_writer(std::io::stderr)
                .try_init();
        }
        LogFormat::Pretty => {
            let _ = fmt::Subscriber::builder()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}
