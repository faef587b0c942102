//! Process-wide tracing subscriber.
//!
//! Built once in `main` from the config's logging section and the CLI
//! verbosity flags. Components only emit events and spans.

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;
use crate::error::{Error, Result};

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human oriented
    Pretty,
    /// One line per event
    #[default]
    Compact,
    /// Newline-delimited JSON
    Json,
}

/// Everything needed to build the subscriber.
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: String,
    format: LogFormat,
    ansi: bool,
    with_target: bool,
}

impl LoggingBuilder {
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        Self {
            level: settings.level.clone(),
            format: settings.format,
            ansi: true,
            with_target: false,
        }
    }

    /// Raise the level from `-d`/`-v` flags. `-d` means debug; each `-v`
    /// goes one step further (`-vv` is trace with targets).
    pub fn with_verbosity(mut self, debug: bool, verbose: u8) -> Self {
        let level = match (debug, verbose) {
            (_, v) if v >= 2 => "trace",
            (true, _) | (_, 1) => "debug",
            _ => return self,
        };
        self.level = level.to_string();
        self.with_target = verbose >= 2;
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// `RUST_LOG` wins over the configured level. Chatty dependencies are
    /// capped at warn.
    pub fn build_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let directives = format!(
                "{},hyper=warn,reqwest=warn,russh=warn,russh_sftp=warn",
                self.level
            );
            EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new("info"))
        })
    }

    /// Install the global subscriber. Fails if one is already installed.
    pub fn init(self) -> Result<()> {
        let filter = self.build_filter();
        let registry = tracing_subscriber::registry().with(filter);

        let installed = match self.format {
            LogFormat::Pretty => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .pretty()
                        .with_ansi(self.ansi)
                        .with_target(self.with_target)
                        .with_writer(std::io::stderr),
                )
                .try_init(),
            LogFormat::Compact => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .compact()
                        .with_ansi(self.ansi)
                        .with_target(self.with_target)
                        .with_writer(std::io::stderr),
                )
                .try_init(),
            LogFormat::Json => registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(true)
                        .with_span_events(FmtSpan::CLOSE)
                        .with_writer(std::io::stderr),
                )
                .try_init(),
        };

        installed.map_err(|e| Error::Config(format!("Failed to install logger: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_raises_level() {
        let base = LoggingBuilder::from_settings(&LoggingSettings::default());
        assert_eq!(base.level, "info");

        let debug = base.clone().with_verbosity(true, 0);
        assert_eq!(debug.level, "debug");
        assert!(!debug.with_target);

        let trace = base.clone().with_verbosity(false, 2);
        assert_eq!(trace.level, "trace");
        assert!(trace.with_target);

        let untouched = base.with_verbosity(false, 0);
        assert_eq!(untouched.level, "info");
    }

    #[test]
    fn test_log_format_serde_names() {
        let format: LogFormat = serde_json::from_str("\"json\"").unwrap();
        assert_eq!(format, LogFormat::Json);
        assert_eq!(serde_json::to_string(&LogFormat::Pretty).unwrap(), "\"pretty\"");
    }
}
