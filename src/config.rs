use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("expected compact or json, got {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub connections: ConnectionSettings,
}

/// Per-connection transport limits.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub outbound_buffer: usize,
    pub send_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            outbound_buffer: 64,
            send_timeout: Duration::from_millis(5_000),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ConnectionSettings::default();
        let outbound_buffer =
            parse_or_default(&lookup, "WS_OUTBOUND_BUFFER", defaults.outbound_buffer)?;
        if outbound_buffer == 0 {
            return Err(AppError::Internal(
                "invalid WS_OUTBOUND_BUFFER: must be > 0".to_string(),
            ));
        }
        let send_timeout_ms = parse_or_default(&lookup, "WS_SEND_TIMEOUT_MS", 5_000u64)?;

        Ok(Self {
            http_port: parse_or_default(&lookup, "HTTP_PORT", 3000)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format: parse_or_default(&lookup, "LOG_FORMAT", LogFormat::Compact)?,
            connections: ConnectionSettings {
                outbound_buffer,
                send_timeout: Duration::from_millis(send_timeout_ms),
            },
        })
    }
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        None => Ok(default),
    }
}
