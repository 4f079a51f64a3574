//! Structured logging via `tracing`
//!
//! - Level-based filtering, `RUST_LOG` wins when set
//! - Per-module overrides for the noisy parts (sqlx statement logging)
//! - Safe to call more than once; the first subscriber stays

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    pub default_level: LogLevel,
    pub module_filters: Vec<(String, LogLevel)>,
    pub show_targets: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_level: LogLevel::Info,
            module_filters: vec![
                ("sqlx".to_string(), LogLevel::Warn),
                ("playhub_server::storage".to_string(), LogLevel::Info),
                ("playhub_server::missions".to_string(), LogLevel::Info),
            ],
            show_targets: true,
        }
    }
}

impl TracingConfig {
    pub fn to_env_filter_string(&self) -> String {
        let mut parts = vec![self.default_level.as_str().to_string()];
        for (module, level) in &self.module_filters {
            parts.push(format!("{}={}", module, level.as_str()));
        }
        parts.join(",")
    }

    /// `RUST_LOG` when set and valid, otherwise this config's filter
    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(self.to_env_filter_string()))
            .unwrap_or_else(|_| EnvFilter::new(self.default_level.as_str()))
    }
}

/// Install the global subscriber. Returns false when one was already
/// installed (by an earlier call or a test harness), which is not an error.
pub fn init_tracing(config: &TracingConfig) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_target(config.show_targets)
        .compact()
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_string() {
        let config = TracingConfig {
            default_level: LogLevel::Debug,
            module_filters: vec![("sqlx".into(), LogLevel::Error)],
            show_targets: false,
        };
        assert_eq!(config.to_env_filter_string(), "debug,sqlx=error");
    }

    #[test]
    fn test_level_names() {
        assert_eq!(LogLevel::from_name("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_name(" info "), Some(LogLevel::Info));
        assert_eq!(LogLevel::from_name("loud"), None);
    }

    #[test]
    fn test_init_is_idempotent() {
        init_tracing(&TracingConfig::default());
        assert!(!init_tracing(&TracingConfig::default()));
    }
}
