use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Upper bound on a single hosting API request.
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 15;

/// Tunables for the supervisor. Every field has a built-in default, so an
/// empty `{}` config file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisorConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Pause after a group kill so the OS can release the ports the old
    /// tree held.
    #[serde(default = "default_port_release_pause_ms")]
    pub port_release_pause_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Hosting API base URL. Derived from the origin remote when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default = "default_shell")]
    pub shell: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            retry_delay_secs: default_retry_delay_secs(),
            port_release_pause_ms: default_port_release_pause_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            api_url: None,
            shell: default_shell(),
        }
    }
}

impl SupervisorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn port_release_pause(&self) -> Duration {
        Duration::from_millis(self.port_release_pause_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Reject values the supervisor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(Error::config_invalid_value(
                "poll_interval_secs",
                Some("0".to_string()),
                "must be at least 1 second",
            ));
        }
        if self.retry_delay_secs == 0 {
            return Err(Error::config_invalid_value(
                "retry_delay_secs",
                Some("0".to_string()),
                "must be at least 1 second",
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::config_invalid_value(
                "request_timeout_secs",
                Some("0".to_string()),
                "must be at least 1 second",
            ));
        }
        if self.request_timeout_secs > MAX_REQUEST_TIMEOUT_SECS {
            return Err(Error::config_invalid_value(
                "request_timeout_secs",
                Some(self.request_timeout_secs.to_string()),
                "must be at most 15 seconds",
            ));
        }
        if self.shell.trim().is_empty() {
            return Err(Error::config_invalid_value(
                "shell",
                Some(self.shell.clone()),
                "must name a shell binary",
            ));
        }
        if let Some(url) = &self.api_url {
            if !url.starts_with("https://") && !url.starts_with("http://") {
                return Err(Error::config_invalid_value(
                    "api_url",
                    Some(url.clone()),
                    "must be an http(s) URL",
                ));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_retry_delay_secs() -> u64 {
    10
}

fn default_port_release_pause_ms() -> u64 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_shell() -> String {
    "sh".to_string()
}

// =============================================================================
// Loading functions
// =============================================================================

/// Load config from an optional JSON file. Without a path the built-in
/// defaults apply. A named file that is missing or invalid is an error.
pub fn load_config(path: Option<&Path>) -> Result<SupervisorConfig> {
    let config = match path {
        Some(path) => load_config_from_file(path)?,
        None => SupervisorConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn load_config_from_file(path: &Path) -> Result<SupervisorConfig> {
    let content = fs::read_to_string(path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    serde_json::from_str(&content)
        .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::io::Write;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = load_config(None).unwrap();
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.retry_delay(), Duration::from_secs(10));
        assert_eq!(config.port_release_pause(), Duration::from_secs(2));
        assert_eq!(config.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.shell, "sh");
        assert!(config.api_url.is_none());
    }

    #[test]
    fn empty_object_uses_defaults() {
        let file = write_config("{}");
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config, SupervisorConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let file = write_config(r#"{"retry_delay_secs": 3, "api_url": "https://ghe.local/api/v3"}"#);
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.retry_delay_secs, 3);
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.api_url.as_deref(), Some("https://ghe.local/api/v3"));
    }

    #[test]
    fn unknown_key_is_invalid_json() {
        let file = write_config(r#"{"poll_every": 3}"#);
        let err = load_config(Some(file.path())).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidJson);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let file = write_config(r#"{"poll_interval_secs": 0}"#);
        let err = load_config(Some(file.path())).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidValue);
        assert_eq!(err.details["key"], "poll_interval_secs");
    }

    #[test]
    fn request_timeout_above_bound_is_rejected() {
        let file = write_config(r#"{"request_timeout_secs": 600}"#);
        let err = load_config(Some(file.path())).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigInvalidValue);
        assert_eq!(err.details["key"], "request_timeout_secs");

        let file = write_config(r#"{"request_timeout_secs": 15}"#);
        assert!(load_config(Some(file.path())).is_ok());
    }

    #[test]
    fn non_http_api_url_is_rejected() {
        let config = SupervisorConfig {
            api_url: Some("ftp://example".to_string()),
            ..SupervisorConfig::default()
        };
        assert_eq!(
            config.validate().unwrap_err().code,
            ErrorCode::ConfigInvalidValue
        );
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(Some(&dir.path().join("absent.json"))).unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalIoError);
    }
}
