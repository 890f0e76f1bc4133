//! Client configuration
//!
//! Every path the client touches (archive cache, cookie jar) is carried here
//! and handed to [`Smusher`](crate::orchestrator::Smusher) at construction.

use crate::{Error, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://www.smushit.com/ysmush.it/";
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:10.0) Gecko/20100101 Firefox/10.0";
const COOKIE_FILE_NAME: &str = ".smushit_cookies.json";
/// Largest accepted `concurrency`; bounded by the dispatch semaphore.
pub const MAX_CONCURRENCY: usize = tokio::sync::Semaphore::MAX_PERMITS;

#[derive(Debug, Clone)]
pub struct Config {
    /// Service root; endpoint paths (`ws.php`, `zip.php`) are appended to it.
    pub api_url: String,
    /// Directory holding one `<task>.zip` per built archive.
    pub cache_dir: PathBuf,
    /// Cookie jar file, deleted on reset and on teardown.
    pub cookie_path: PathBuf,
    /// Fetch source and optimized bytes into each record.
    pub request_binary_data: bool,
    pub connect_timeout: Duration,
    pub timeout: Duration,
    /// Maximum in-flight optimize calls within one source class.
    pub concurrency: usize,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        let tmp = std::env::temp_dir();
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            cookie_path: tmp.join(COOKIE_FILE_NAME),
            cache_dir: tmp,
            request_binary_data: true,
            connect_timeout: Duration::from_secs(20),
            timeout: Duration::from_secs(600),
            concurrency: 1,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the environment (and `.env` when present),
    /// falling back to [`Config::default`] for anything unset.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let config = Self {
            api_url: std::env::var("SMUSHIT_API_URL").unwrap_or(defaults.api_url),
            cache_dir: std::env::var("SMUSHIT_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            cookie_path: std::env::var("SMUSHIT_COOKIE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.cookie_path),
            request_binary_data: match std::env::var("SMUSHIT_REQUEST_BINARY") {
                Ok(value) => parse_bool("SMUSHIT_REQUEST_BINARY", &value)?,
                Err(_) => defaults.request_binary_data,
            },
            connect_timeout: env_parsed::<u64>("SMUSHIT_CONNECT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            timeout: env_parsed::<u64>("SMUSHIT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            concurrency: env_parsed::<usize>("SMUSHIT_CONCURRENCY")?
                .unwrap_or(defaults.concurrency),
            user_agent: defaults.user_agent,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        if self.concurrency > MAX_CONCURRENCY {
            return Err(Error::Config(format!(
                "concurrency must be at most {}: {}",
                MAX_CONCURRENCY, self.concurrency
            )));
        }
        if !self.api_url.ends_with('/') {
            return Err(Error::Config(format!(
                "api_url must end with '/': {}",
                self.api_url
            )));
        }
        Ok(())
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }
}

fn env_parsed<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} has an invalid value: {}", key, value))),
        Err(_) => Ok(None),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "{} has an invalid value: {}",
            key, value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_service_limits() {
        let config = Config::default();
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.connect_timeout, Duration::from_secs(20));
        assert_eq!(config.timeout, Duration::from_secs(600));
        assert_eq!(config.concurrency, 1);
        assert!(config.request_binary_data);
        assert!(config.cookie_path.ends_with(COOKIE_FILE_NAME));
    }

    #[test]
    fn test_endpoint_appends_path() {
        let config = Config::default();
        assert_eq!(
            config.endpoint("ws.php"),
            "http://www.smushit.com/ysmush.it/ws.php"
        );
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let config = Config {
            concurrency: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_concurrency_above_semaphore_limit() {
        let at_limit = Config {
            concurrency: MAX_CONCURRENCY,
            ..Config::default()
        };
        assert!(at_limit.validate().is_ok());

        let config = Config {
            concurrency: usize::MAX,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_api_url_without_trailing_slash() {
        let config = Config {
            api_url: "http://localhost:8080".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_parse_bool_variants() {
        assert!(parse_bool("K", "TRUE").unwrap());
        assert!(parse_bool("K", "1").unwrap());
        assert!(!parse_bool("K", "off").unwrap());
        assert!(parse_bool("K", "maybe").is_err());
    }
}
