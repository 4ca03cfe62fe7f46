use std::env;
use std::time::Duration;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub dispatch_radius_km: f64,
    pub location_min_interval: Duration,
    pub location_min_displacement_m: f64,
    pub location_queue_size: usize,
    pub event_buffer_size: usize,
    pub connection_buffer_size: usize,
    /// Zero disables offer expiry entirely.
    pub offer_ttl: Duration,
    pub offer_sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            dispatch_radius_km: 10.0,
            location_min_interval: Duration::from_millis(5_000),
            location_min_displacement_m: 25.0,
            location_queue_size: 4096,
            event_buffer_size: 1024,
            connection_buffer_size: 64,
            offer_ttl: Duration::ZERO,
            offer_sweep_interval: Duration::from_secs(30),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let log_format = match env::var("LOG_FORMAT") {
            Ok(raw) => parse_log_format(&raw)?,
            Err(_) => defaults.log_format,
        };

        let dispatch_radius_km: f64 =
            parse_or_default("DISPATCH_RADIUS_KM", defaults.dispatch_radius_km)?;
        if !dispatch_radius_km.is_finite() || dispatch_radius_km <= 0.0 {
            return Err(AppError::Internal(
                "invalid DISPATCH_RADIUS_KM: must be a positive number".to_string(),
            ));
        }

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            log_format,
            dispatch_radius_km,
            location_min_interval: Duration::from_millis(parse_or_default(
                "LOCATION_MIN_INTERVAL_MS",
                5_000u64,
            )?),
            location_min_displacement_m: parse_or_default(
                "LOCATION_MIN_DISPLACEMENT_M",
                defaults.location_min_displacement_m,
            )?,
            location_queue_size: parse_or_default(
                "LOCATION_QUEUE_SIZE",
                defaults.location_queue_size,
            )?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            connection_buffer_size: parse_or_default(
                "CONNECTION_BUFFER_SIZE",
                defaults.connection_buffer_size,
            )?,
            offer_ttl: Duration::from_secs(parse_or_default("OFFER_TTL_SECS", 0u64)?),
            offer_sweep_interval: Duration::from_secs(parse_or_default(
                "OFFER_SWEEP_INTERVAL_SECS",
                30u64,
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !self.offer_ttl.is_zero() && self.offer_sweep_interval.is_zero() {
            return Err(AppError::Internal(
                "invalid OFFER_SWEEP_INTERVAL_SECS: must be positive when OFFER_TTL_SECS is set"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_log_format(raw: &str) -> Result<LogFormat, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "compact" => Ok(LogFormat::Compact),
        "json" => Ok(LogFormat::Json),
        other => Err(AppError::Internal(format!(
            "invalid LOG_FORMAT: {other}, expected compact or json"
        ))),
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{parse_log_format, Config, LogFormat};

    #[test]
    fn defaults_use_ten_km_radius_and_no_offer_expiry() {
        let config = Config::default();
        assert_eq!(config.dispatch_radius_km, 10.0);
        assert!(config.offer_ttl.is_zero());
    }

    #[test]
    fn log_format_is_case_insensitive() {
        assert_eq!(parse_log_format("JSON").unwrap(), LogFormat::Json);
        assert_eq!(parse_log_format(" compact ").unwrap(), LogFormat::Compact);
        assert!(parse_log_format("pretty").is_err());
    }

    #[test]
    fn zero_sweep_interval_is_rejected_only_when_offers_expire() {
        let expiring = Config {
            offer_ttl: Duration::from_secs(60),
            offer_sweep_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(expiring.validate().is_err());

        let never_expiring = Config {
            offer_sweep_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(never_expiring.validate().is_ok());
        assert!(Config::default().validate().is_ok());
    }
}
