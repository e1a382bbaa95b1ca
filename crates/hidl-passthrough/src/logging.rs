//! Log verbosity and tracing setup.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable holding the module's log level.
pub const LOG_ENV: &str = "HIDL_PASSTHROUGH_LOG";

/// Module log verbosity.
///
/// Helper output is logged at debug severity when this is exactly
/// [`LogLevel::Debug`], and at info severity otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" | "e" | "0" => Some(Self::Error),
            "warn" | "warning" | "w" | "1" => Some(Self::Warn),
            "info" | "notice" | "i" | "n" | "2" | "3" => Some(Self::Info),
            "debug" | "d" | "4" => Some(Self::Debug),
            _ => None,
        }
    }

    /// Read [`LOG_ENV`], falling back to [`LogLevel::Error`].
    pub fn from_env() -> Self {
        std::env::var(LOG_ENV)
            .ok()
            .and_then(|v| Self::parse(&v))
            .unwrap_or_default()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

/// Initialize tracing with `RUST_LOG`, `HIDL_PASSTHROUGH_LOG` and `LOG_FORMAT` support.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing() {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = LogLevel::from_env().as_str();
        EnvFilter::new(format!(
            "hidl_passthrough={level},hidl_passthroughd={level}"
        ))
    };

    let use_json = std::env::var("LOG_FORMAT").as_deref() == Ok("json");

    if use_json {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    } else {
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr));
        let _ = subscriber.try_init();
    }
}
