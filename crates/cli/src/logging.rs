use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use when `RUST_LOG` does not say otherwise
    pub level: Level,
    /// Whether to enable JSON formatting
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log spans
    pub log_spans: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
        }
    }
}

impl LoggingConfig {
    /// Create a logging configuration at `level`
    pub fn new(level: Level) -> Self {
        LoggingConfig {
            level,
            ..Default::default()
        }
    }

    /// Enable JSON formatting
    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Enable file and line information in logs
    pub fn with_file_info(mut self, file_info: bool) -> Self {
        self.file_info = file_info;
        self
    }

    /// Log span enter and exit events
    pub fn with_log_spans(mut self, log_spans: bool) -> Self {
        self.log_spans = log_spans;
        self
    }

    fn span_events(&self) -> FmtSpan {
        if self.log_spans {
            FmtSpan::ACTIVE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Install the global subscriber
pub fn setup_logging(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(config.span_events())
        .with_file(config.file_info)
        .with_line_number(config.file_info)
        .with_writer(std::io::stderr);

    if config.json {
        subscriber
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .context("failed to install JSON log subscriber")?;
    } else {
        subscriber
            .try_init()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .context("failed to install log subscriber")?;
    }
    Ok(())
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level).with_context(|| format!("invalid log level: {}", level))
}
