//! Logging setup shared by the server and the offline binaries.
//!
//! Logs go to stderr so the offline binaries keep stdout for their run
//! summaries. A bare level such as `debug` only raises this crate; axum,
//! hyper and tokio stay at `warn` unless the directive names them.

use std::env;
use std::io::{self, IsTerminal};
use std::net::SocketAddr;
use std::path::Path;

use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

const CRATE_TARGET: &str = "delivery_eta";
const DEPENDENCY_LEVEL: &str = "warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    /// Single-line format; the default when stderr is redirected.
    Compact,
}

impl LogFormat {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "pretty" => Some(Self::Pretty),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }

    fn for_stderr(is_terminal: bool) -> Self {
        if is_terminal {
            Self::Pretty
        } else {
            Self::Compact
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Bare level (`info`) or a full `EnvFilter` directive.
    pub level: String,
    pub format: LogFormat,
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            include_target: false,
        }
    }
}

impl LoggingConfig {
    pub fn filter_directive(&self) -> String {
        let level = self.level.trim();
        if level.contains('=') || level.contains(',') {
            level.to_string()
        } else {
            format!("{DEPENDENCY_LEVEL},{CRATE_TARGET}={level}")
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingInitError {
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// Reads `ETA_LOG_LEVEL`, `ETA_LOG_FORMAT` and `ETA_LOG_TARGET`. Unset or
/// unparsable values keep the defaults; the format default follows whether
/// stderr is a terminal.
pub fn logging_config_from_env() -> LoggingConfig {
    config_from_lookup(|key| env::var(key).ok(), io::stderr().is_terminal())
}

fn config_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
    stderr_is_terminal: bool,
) -> LoggingConfig {
    let mut config = LoggingConfig {
        format: LogFormat::for_stderr(stderr_is_terminal),
        ..LoggingConfig::default()
    };

    if let Some(level) = lookup("ETA_LOG_LEVEL").filter(|raw| !raw.trim().is_empty()) {
        config.level = level.trim().to_string();
    }
    if let Some(format) = lookup("ETA_LOG_FORMAT").as_deref().and_then(LogFormat::parse) {
        config.format = format;
    }
    if let Some(include_target) = lookup("ETA_LOG_TARGET").as_deref().and_then(parse_flag) {
        config.include_target = include_target;
    }

    config
}

pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingInitError> {
    let env_filter = EnvFilter::try_new(config.filter_directive())
        .unwrap_or_else(|_| EnvFilter::new(format!("{DEPENDENCY_LEVEL},{CRATE_TARGET}=info")));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(config.include_target)
        .with_ansi(config.format == LogFormat::Pretty);

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Pretty => tracing::subscriber::set_global_default(builder.pretty().finish())?,
        LogFormat::Compact => {
            tracing::subscriber::set_global_default(builder.compact().finish())?
        }
    }

    Ok(())
}

/// First event of every binary: which one ran, at which crate version, and how it logs.
pub fn log_app_start(binary: &'static str, config: &LoggingConfig) {
    info!(
        component = binary,
        event = "app.start",
        crate_version = env!("CARGO_PKG_VERSION"),
        log_filter = %config.filter_directive(),
        log_format = ?config.format
    );
}

pub fn log_app_bind(bound_addr: SocketAddr) {
    info!(
        component = "eta_server",
        event = "app.bind",
        bind_addr = %bound_addr,
        routes = "/,/predict"
    );
}

pub fn log_bundle_loaded(path: &Path, model_name: &str, version: &str, schema_fingerprint: &str) {
    info!(
        component = "eta_server",
        event = "bundle.selected",
        path = %path.display(),
        model_name,
        version,
        schema_fingerprint
    );
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}
