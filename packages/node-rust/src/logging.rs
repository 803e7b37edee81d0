//! Tracing subscriber setup.

use clap::{Args, ValueEnum};
use tracing_subscriber::EnvFilter;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable, colored output for development.
    Pretty,
    /// One JSON object per line for log shippers.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Args)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `warn` or `brokerlink_node=debug,info`.
    #[arg(long = "log-level", env = "LOG_LEVEL", default_value = "warn")]
    pub level: String,
    #[arg(long = "log-format", env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl LoggingConfig {
    /// Parses the configured level into a filter.
    ///
    /// # Errors
    ///
    /// Returns an error if `level` is not a valid filter directive.
    pub fn filter(&self) -> anyhow::Result<EnvFilter> {
        Ok(EnvFilter::try_new(&self.level)?)
    }
}

/// Installs the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if the level is invalid or a global subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = config.filter()?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
