use std::{path::PathBuf, str::FromStr, time::Duration};

use anyhow::{Context, Result};

use crate::{
    coordinator::DEFAULT_REFRESH_INTERVAL,
    poolsync::{PatchStyle, DEFAULT_PAIRING_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_REQUEST_TIMEOUT},
};

// ---------------------------------------------------------------------------
// TemperatureUnit
// ---------------------------------------------------------------------------

/// Unit the hub reports heat pump temperatures in. Selects the setpoint range
/// exposed by the heat pump number and climate entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    /// `(min, max, step)` accepted for a heat pump setpoint.
    pub fn setpoint_range(self) -> (f64, f64, f64) {
        match self {
            Self::Celsius => (5.0, 40.0, 0.5),
            Self::Fahrenheit => (40.0, 104.0, 1.0),
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Celsius => "°C",
            Self::Fahrenheit => "°F",
        }
    }
}

impl FromStr for TemperatureUnit {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" | "celsius" => Ok(Self::Celsius),
            "f" | "fahrenheit" => Ok(Self::Fahrenheit),
            other => Err(anyhow::anyhow!("unknown temperature unit: {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    /// Hub address, e.g. `http://10.0.0.5`. Trailing `/` removed.
    pub base_url: String,
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub mac_address: Option<String>,
    /// Refresh interval; the coordinator never polls faster than every 15 s.
    pub poll_interval: Duration,
    /// Total timeout applied to every HTTP request.
    pub request_timeout: Duration,
    pub pushlink_poll_interval: Duration,
    pub pushlink_timeout: Duration,
    pub patch_style: PatchStyle,
    pub temperature_unit: TemperatureUnit,
    /// Where pairing credentials are stored between runs.
    pub credentials_path: PathBuf,
    pub server_host: String,
    pub server_port: u16,
    pub unmask_logs: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            base_url: normalize_base_url(&required("POOLSYNC_BASE_URL")?)?,
            token: non_empty("POOLSYNC_TOKEN"),
            user_id: non_empty("POOLSYNC_USER_ID"),
            mac_address: non_empty("POOLSYNC_MAC"),
            poll_interval: Duration::from_secs(positive(
                "POLL_INTERVAL_SECS",
                DEFAULT_REFRESH_INTERVAL.as_secs(),
            )?),
            request_timeout: Duration::from_secs(positive(
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT.as_secs(),
            )?),
            pushlink_poll_interval: Duration::from_millis(positive(
                "PUSHLINK_POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL.as_millis() as u64,
            )?),
            pushlink_timeout: Duration::from_secs(positive(
                "PUSHLINK_TIMEOUT_SECS",
                DEFAULT_PAIRING_TIMEOUT.as_secs(),
            )?),
            patch_style: optional("POOLSYNC_PATCH_STYLE", "nested")
                .parse()
                .context("POOLSYNC_PATCH_STYLE must be 'nested' or 'flat'")?,
            temperature_unit: optional("TEMPERATURE_UNIT", "celsius")
                .parse()
                .context("TEMPERATURE_UNIT must be 'celsius' or 'fahrenheit'")?,
            credentials_path: PathBuf::from(optional(
                "CREDENTIALS_PATH",
                "poolsync_credentials.json",
            )),
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            unmask_logs: parse_flag(&optional("POOLSYNC_UNMASK_LOGS", "0")),
        })
    }
}

/// Trim whitespace and trailing slashes; require an `http(s)://` scheme.
fn normalize_base_url(raw: &str) -> Result<String> {
    let url = raw.trim().trim_end_matches('/');
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        anyhow::bail!("POOLSYNC_BASE_URL must start with http:// or https://, got: {raw:?}");
    }
    Ok(url.to_owned())
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Optional positive integer setting; zero is an error.
fn positive(key: &str, default: u64) -> Result<u64> {
    let value: u64 = optional(key, &default.to_string())
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a positive integer"))?;
    if value == 0 {
        anyhow::bail!("{key} must be a positive integer, got 0");
    }
    Ok(value)
}

fn non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_base_url_strips_trailing_slashes() {
        assert_eq!(
            normalize_base_url(" http://10.0.0.5// ").unwrap(),
            "http://10.0.0.5"
        );
    }

    #[test]
    fn normalize_base_url_requires_scheme() {
        let err = normalize_base_url("10.0.0.5").unwrap_err();
        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn parse_flag_accepts_common_truthy_values() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn positive_rejects_zero_and_garbage() {
        std::env::set_var("POOLSYNC_TEST_ZERO_TIMEOUT", "0");
        std::env::set_var("POOLSYNC_TEST_BAD_TIMEOUT", "soon");
        std::env::set_var("POOLSYNC_TEST_GOOD_TIMEOUT", " 45 ");

        let err = positive("POOLSYNC_TEST_ZERO_TIMEOUT", 30).unwrap_err();
        assert!(err.to_string().contains("POOLSYNC_TEST_ZERO_TIMEOUT"));
        assert!(positive("POOLSYNC_TEST_BAD_TIMEOUT", 30).is_err());
        assert_eq!(positive("POOLSYNC_TEST_GOOD_TIMEOUT", 30).unwrap(), 45);
        assert_eq!(positive("POOLSYNC_TEST_UNSET_TIMEOUT", 30).unwrap(), 30);
    }

    #[test]
    fn temperature_unit_parse_and_ranges() {
        assert_eq!(
            "fahrenheit".parse::<TemperatureUnit>().unwrap(),
            TemperatureUnit::Fahrenheit
        );
        assert_eq!("C".parse::<TemperatureUnit>().unwrap(), TemperatureUnit::Celsius);
        assert!("kelvin".parse::<TemperatureUnit>().is_err());
        assert_eq!(TemperatureUnit::Celsius.setpoint_range(), (5.0, 40.0, 0.5));
        assert_eq!(TemperatureUnit::Fahrenheit.setpoint_range(), (40.0, 104.0, 1.0));
    }
}
