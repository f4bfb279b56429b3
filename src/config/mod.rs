//! Configuration system (layered: code > env > config file > defaults).

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::auth::{AddressBinding, BackoffPolicy, RefreshPolicy, StoreConfig};
use crate::error::{ClientError, Result};

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// Settings for the auth controller and the authorized API client.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use langchef_auth::config::AuthConfig;
///
/// let config = AuthConfig::default()
///     .with_api_base_url("https://langchef.example.com/api")
///     .with_handshake_timeout(Duration::from_secs(300));
/// assert_eq!(config.api_base_url, "https://langchef.example.com/api");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct AuthConfig {
    pub api_base_url: String,
    pub request_timeout: Duration,
    pub store_dir: PathBuf,
    pub profile: String,
    /// Client-side ceiling on one device-code handshake.
    pub handshake_timeout: Duration,
    /// Session lifetime when the backend omits `expires_in`.
    pub default_session_ttl: Duration,
    pub backoff: BackoffPolicy,
    pub refresh: RefreshPolicy,
    pub address_binding: AddressBinding,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            store_dir: StoreConfig::default_dir(),
            profile: "default".to_string(),
            handshake_timeout: Duration::from_secs(10 * 60),
            default_session_ttl: Duration::from_secs(24 * 60 * 60),
            backoff: BackoffPolicy::default(),
            refresh: RefreshPolicy::default(),
            address_binding: AddressBinding::Disabled,
        }
    }
}

impl AuthConfig {
    /// Defaults overridden by environment variables (`.env` is loaded first).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env_with(|key| std::env::var(key).ok());
        config
    }

    /// Defaults, then the config file (`LANGCHEF_CONFIG` or
    /// `~/.langchef/config.toml`) if it exists, then environment variables.
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let path = std::env::var_os("LANGCHEF_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_config_path);
        let mut config = Self::default();
        config.apply_file(&path)?;
        config.apply_env_with(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Default config file path (`~/.langchef/config.toml`).
    pub fn default_config_path() -> PathBuf {
        StoreConfig::default_dir().join("config.toml")
    }

    /// Load defaults overridden by a TOML config file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        config.apply_file(path.as_ref())?;
        Ok(config)
    }

    /// Overlay values from a TOML file; a missing file is not an error.
    pub fn apply_file(&mut self, path: &Path) -> Result<()> {
        let raw = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(ClientError::Io(err)),
        };
        self.apply_toml(&raw).map_err(|e| {
            ClientError::Configuration(format!("Invalid config file {}: {e}", path.display()))
        })
    }

    fn apply_toml(&mut self, raw: &str) -> std::result::Result<(), toml::de::Error> {
        let file: ConfigFile = toml::from_str(raw)?;
        if let Some(url) = file.api_base_url {
            self.api_base_url = url;
        }
        if let Some(dir) = file.store_dir {
            self.store_dir = dir;
        }
        if let Some(profile) = file.profile {
            self.profile = profile;
        }
        if let Some(secs) = file.request_timeout_secs {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.handshake_timeout_secs {
            self.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(minutes) = file.session_ttl_minutes {
            self.default_session_ttl = minutes_to_duration(minutes);
        }
        if let Some(binding) = file.address_binding {
            self.address_binding = binding;
        }
        if let Some(refresh) = file.refresh {
            if let Some(attempts) = refresh.max_attempts {
                self.refresh.max_attempts = attempts.max(1);
            }
            if let Some(secs) = refresh.retry_delay_secs {
                self.refresh.retry_delay = Duration::from_secs(secs);
            }
            if let Some(minutes) = refresh.lead_minutes {
                self.refresh.lead = minutes_to_duration(minutes);
            }
            if let Some(minutes) = refresh.liveness_interval_minutes {
                self.refresh.liveness_interval = minutes_to_duration(minutes);
            }
        }
        Ok(())
    }

    /// Overlay values from an environment lookup.
    ///
    /// Unparseable values are logged and ignored.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("LANGCHEF_API_URL") {
            self.api_base_url = url;
        }
        if let Some(dir) = lookup("LANGCHEF_AUTH_DIR") {
            self.store_dir = PathBuf::from(dir);
        }
        if let Some(profile) = lookup("LANGCHEF_AUTH_PROFILE") {
            self.profile = profile;
        }
        if let Some(secs) = parse_env::<u64>(&lookup, "LANGCHEF_REQUEST_TIMEOUT_SECS") {
            self.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_env::<u64>(&lookup, "LANGCHEF_HANDSHAKE_TIMEOUT_SECS") {
            self.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(minutes) = parse_env::<u64>(&lookup, "LANGCHEF_SESSION_TTL_MINUTES") {
            self.default_session_ttl = minutes_to_duration(minutes);
        }
        if let Some(binding) = parse_env::<AddressBinding>(&lookup, "LANGCHEF_ADDRESS_BINDING") {
            self.address_binding = binding;
        }
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_store_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.store_dir = dir.into();
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_default_session_ttl(mut self, ttl: Duration) -> Self {
        self.default_session_ttl = ttl;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_refresh(mut self, refresh: RefreshPolicy) -> Self {
        self.refresh = refresh;
        self
    }

    pub fn with_address_binding(mut self, binding: AddressBinding) -> Self {
        self.address_binding = binding;
        self
    }

    /// Store location derived from `store_dir` and `profile`.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig::new(self.store_dir.clone()).with_profile(self.profile.clone())
    }

    /// Shared HTTP client honoring `request_timeout`.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()?)
    }
}

fn parse_env<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment value");
            None
        }
    }
}

fn minutes_to_duration(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    api_base_url: Option<String>,
    store_dir: Option<PathBuf>,
    profile: Option<String>,
    request_timeout_secs: Option<u64>,
    handshake_timeout_secs: Option<u64>,
    session_ttl_minutes: Option<u64>,
    address_binding: Option<AddressBinding>,
    refresh: Option<RefreshSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RefreshSection {
    max_attempts: Option<u32>,
    retry_delay_secs: Option<u64>,
    lead_minutes: Option<u64>,
    liveness_interval_minutes: Option<u64>,
}
