use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

// Default configuration values
const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_REFRESH_PATH: &str = "/api/auth/refresh";
const DEFAULT_LOGIN_PATH: &str = "/api/auth/login";
const DEFAULT_LOGIN_REDIRECT: &str = "/admin/login";
const DEFAULT_REFRESH_TIMEOUT_SECONDS: u64 = 10;
const DEFAULT_REQUEST_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_TOKEN_FILE: &str = "iris-tokens.json";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the Iris backend; request paths are appended to it
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Path of the token refresh endpoint
    #[serde(default = "default_refresh_path")]
    pub refresh_path: String,
    /// Path of the login endpoint
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Where the host application should send the user when the session expires
    #[serde(default = "default_login_redirect")]
    pub login_redirect: String,
    /// Upper bound on a single refresh call, in seconds
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_seconds: u64,
    /// Upper bound on any single HTTP exchange, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Where tokens are kept
    #[serde(default)]
    pub token_store: TokenStoreConfig,
}

/// Token persistence backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenStoreConfig {
    /// Tokens live only as long as the process
    Memory,
    /// Tokens are persisted to a JSON file
    File {
        #[serde(default = "default_token_file")]
        path: PathBuf,
    },
}

// Default functions
fn default_base_url() -> String {
    std::env::var("IRIS_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
}

fn default_refresh_path() -> String {
    std::env::var("IRIS_REFRESH_PATH").unwrap_or_else(|_| DEFAULT_REFRESH_PATH.to_string())
}

fn default_login_path() -> String {
    std::env::var("IRIS_LOGIN_PATH").unwrap_or_else(|_| DEFAULT_LOGIN_PATH.to_string())
}

fn default_login_redirect() -> String {
    std::env::var("IRIS_LOGIN_REDIRECT").unwrap_or_else(|_| DEFAULT_LOGIN_REDIRECT.to_string())
}

fn default_refresh_timeout() -> u64 {
    std::env::var("IRIS_REFRESH_TIMEOUT_SECONDS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_REFRESH_TIMEOUT_SECONDS)
}

fn default_request_timeout() -> u64 {
    std::env::var("IRIS_REQUEST_TIMEOUT_SECONDS")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECONDS)
}

fn default_token_file() -> PathBuf {
    std::env::var("IRIS_TOKEN_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_TOKEN_FILE))
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            refresh_path: default_refresh_path(),
            login_path: default_login_path(),
            login_redirect: default_login_redirect(),
            refresh_timeout_seconds: default_refresh_timeout(),
            request_timeout_seconds: default_request_timeout(),
            token_store: TokenStoreConfig::default(),
        }
    }
}

impl Default for TokenStoreConfig {
    fn default() -> Self {
        TokenStoreConfig::File {
            path: default_token_file(),
        }
    }
}

impl ClientConfig {
    /// Defaults pointed at a specific backend
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Resolve a request path against the base URL. Absolute URLs pass through.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }

    /// Check the configuration for values the client cannot work with
    pub fn validate(&self) -> Result<()> {
        let base = self.base_url.trim();
        if base.is_empty() {
            return Err(anyhow!("base_url must not be empty"));
        }
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(anyhow!(
                "base_url must start with http:// or https://, got '{}'",
                base
            ));
        }

        for (key, value) in [
            ("refresh_path", &self.refresh_path),
            ("login_path", &self.login_path),
            ("login_redirect", &self.login_redirect),
        ] {
            if !value.starts_with('/') {
                return Err(anyhow!("{} must start with '/', got '{}'", key, value));
            }
        }

        if self.refresh_timeout_seconds == 0 {
            return Err(anyhow!("refresh_timeout_seconds must be greater than zero"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(anyhow!("request_timeout_seconds must be greater than zero"));
        }

        Ok(())
    }

    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config {}: {}", path.display(), e))?;
        let config: ClientConfig = serde_json::from_str(&config_str)
            .map_err(|e| anyhow!("Invalid config {}: {}", path.display(), e))?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to file
    pub async fn save(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let config_str = serde_json::to_string_pretty(self)?;
        fs::write(path, config_str).await?;
        debug!("Saved configuration to {}", path.display());
        Ok(())
    }
}

/// Get the path to the configuration file, if one was named
pub fn config_path_from_env() -> Option<PathBuf> {
    std::env::var("IRIS_CONFIG_PATH").ok().map(PathBuf::from)
}

/// Load the explicit config file if given, otherwise fall back to defaults
pub async fn load_config(path: Option<&Path>) -> Result<ClientConfig> {
    let path = path.map(Path::to_path_buf).or_else(config_path_from_env);

    match path {
        Some(path) => ClientConfig::load(&path).await,
        None => {
            info!("No config file given, using defaults and IRIS_* environment variables");
            let config = ClientConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}
