//! Tap configuration
//!
//! Loaded from a JSON or YAML file and optionally overridden from the
//! environment (after a dotenv file has been sourced by the CLI).
//!
//! Example format:
//! ```yaml
//! authentication:
//!   auth_type: access_token
//!   access_token: shpat_xxx
//! store: my-store
//! start_date: 2024-01-01T00:00:00Z
//! is_plus_account: false
//! streams: [products, locations]
//! sync:
//!   page_size: 250
//!   max_concurrent_streams: 2
//!   checkpoint: per_page
//! ```

use crate::client::{Auth, RetryConfig};
use crate::error::{Result, TapError};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Shopify's maximum `limit` for REST list endpoints.
pub const MAX_PAGE_SIZE: u32 = 250;

#[derive(Debug, Clone, Deserialize)]
pub struct TapConfig {
    pub authentication: Auth,
    /// Store id, the prefix of `https://[store].myshopify.com/admin`
    #[serde(default)]
    pub store: String,
    /// Earliest record date to sync when no bookmark exists
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    /// Admin URL of the store, overrides `store`
    #[serde(default)]
    pub admin_url: Option<Url>,
    /// Enables Shopify Plus endpoints (the `users` stream)
    #[serde(default)]
    pub is_plus_account: bool,
    /// Enables streams gated behind protected customer data access
    #[serde(default)]
    pub protected_data: bool,
    /// Restrict the sync to these streams
    #[serde(default)]
    pub streams: Option<Vec<String>>,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default)]
    pub sync: SyncSettings,
}

fn default_api_version() -> String {
    "2024-01".to_string()
}

/// When bookmarks are committed to the replication state.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointMode {
    /// Only when a stream reaches `Done`
    #[default]
    PerStream,
    /// After every page, for streams sorted by their replication key
    PerPage,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncSettings {
    pub page_size: u32,
    pub max_concurrent_streams: usize,
    pub max_concurrent_requests: usize,
    pub requests_per_second: u32,
    pub max_retries: usize,
    pub min_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub request_timeout_secs: u64,
    pub max_pages: usize,
    pub page_retry_limit: usize,
    pub checkpoint: CheckpointMode,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            max_concurrent_streams: 1,
            max_concurrent_requests: 4,
            requests_per_second: 2,
            max_retries: 5,
            min_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
            request_timeout_secs: 30,
            max_pages: 10_000,
            page_retry_limit: 1,
            checkpoint: CheckpointMode::PerStream,
        }
    }
}

impl SyncSettings {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            Duration::from_millis(self.min_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
            self.max_retries,
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(TapError::Config(format!(
                "sync.page_size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.page_size
            )));
        }
        let non_zero = [
            ("max_concurrent_streams", self.max_concurrent_streams as u64),
            ("max_concurrent_requests", self.max_concurrent_requests as u64),
            ("requests_per_second", self.requests_per_second as u64),
            ("request_timeout_secs", self.request_timeout_secs),
            ("max_pages", self.max_pages as u64),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(TapError::Config(format!("sync.{} must be non-zero", name)));
            }
        }
        if self.min_backoff_ms > self.max_backoff_ms {
            return Err(TapError::Config(
                "sync.min_backoff_ms must not exceed sync.max_backoff_ms".to_string(),
            ));
        }
        Ok(())
    }
}

impl TapConfig {
    /// Minimal config for a store and token, everything else defaulted.
    pub fn new(store: impl Into<String>, authentication: Auth) -> Self {
        Self {
            authentication,
            store: store.into(),
            start_date: None,
            admin_url: None,
            is_plus_account: false,
            protected_data: false,
            streams: None,
            api_version: default_api_version(),
            sync: SyncSettings::default(),
        }
    }

    /// Read a config file, choosing the format by extension (`.yml`/`.yaml`
    /// for YAML, anything else JSON). Validation waits for
    /// [`apply_env_overrides`](Self::apply_env_overrides), since the
    /// environment may fill in what the file leaves out.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => Self::from_yaml(&content)?,
            _ => Self::from_json(&content)?,
        };
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| TapError::Config(format!("failed to parse JSON config: {}", e)))?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)
            .map_err(|e| TapError::Config(format!("failed to parse YAML config: {}", e)))?;
        Ok(config)
    }

    /// Apply overrides from the process environment:
    /// - SHOPIFY_STORE
    /// - SHOPIFY_ACCESS_TOKEN
    /// - SHOPIFY_START_DATE (RFC 3339)
    /// - SHOPIFY_ADMIN_URL
    ///
    /// The result is validated.
    pub fn apply_env_overrides(mut self) -> Result<Self> {
        if let Ok(store) = std::env::var("SHOPIFY_STORE") {
            log::debug!("Using store from SHOPIFY_STORE");
            self.store = store;
        }
        if let Ok(token) = std::env::var("SHOPIFY_ACCESS_TOKEN") {
            log::debug!("Using access token from SHOPIFY_ACCESS_TOKEN");
            self.authentication = self.authentication.with_access_token(token);
        }
        if let Ok(start) = std::env::var("SHOPIFY_START_DATE") {
            let parsed = DateTime::parse_from_rfc3339(&start)
                .map_err(|e| TapError::Config(format!("invalid SHOPIFY_START_DATE: {}", e)))?;
            self.start_date = Some(parsed.with_timezone(&Utc));
        }
        if let Ok(admin) = std::env::var("SHOPIFY_ADMIN_URL") {
            let url = Url::parse(&admin)
                .map_err(|e| TapError::Config(format!("invalid SHOPIFY_ADMIN_URL: {}", e)))?;
            self.admin_url = Some(url);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.authentication.validate().map_err(TapError::Config)?;
        if self.admin_url.is_none() && self.store.trim().is_empty() {
            return Err(TapError::Config(
                "either store or admin_url must be set".to_string(),
            ));
        }
        if self.api_version.trim().is_empty() {
            return Err(TapError::Config("api_version is empty".to_string()));
        }
        self.sync.validate()
    }

    /// The store's admin URL, with a trailing slash.
    pub fn admin_base(&self) -> Result<Url> {
        let raw = match &self.admin_url {
            Some(url) => url.to_string(),
            None => format!("https://{}.myshopify.com/admin", self.store.trim()),
        };
        let with_slash = if raw.ends_with('/') {
            raw
        } else {
            format!("{}/", raw)
        };
        Url::parse(&with_slash)
            .map_err(|e| TapError::Config(format!("invalid admin url '{}': {}", with_slash, e)))
    }

    /// Root of the versioned REST API, e.g. `.../admin/api/2024-01/`.
    pub fn api_base(&self) -> Result<Url> {
        self.admin_base()?
            .join(&format!("api/{}/", self.api_version))
            .map_err(|e| TapError::Config(format!("invalid api version: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON_CONFIG: &str = r#"{
        "authentication": {"auth_type": "access_token", "access_token": "shpat_abc"},
        "store": "acme",
        "start_date": "2024-01-01T00:00:00Z",
        "is_plus_account": true
    }"#;

    #[test]
    fn test_parse_json_with_defaults() {
        let config = TapConfig::from_json(JSON_CONFIG).unwrap();
        assert_eq!(config.store, "acme");
        assert!(config.is_plus_account);
        assert!(!config.protected_data);
        assert_eq!(config.api_version, "2024-01");
        assert_eq!(config.sync, SyncSettings::default());
        assert_eq!(
            config.start_date.unwrap().to_rfc3339(),
            "2024-01-01T00:00:00+00:00"
        );
    }

    #[test]
    fn test_parse_yaml_with_sync_block() {
        let yaml = r#"
authentication:
  auth_type: oauth
  client_id: id
  client_secret: secret
  access_token: shpat_abc
store: acme
sync:
  page_size: 50
  checkpoint: per_page
  max_concurrent_streams: 3
"#;
        let config = TapConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.sync.page_size, 50);
        assert_eq!(config.sync.checkpoint, CheckpointMode::PerPage);
        assert_eq!(config.sync.max_concurrent_streams, 3);
        assert_eq!(config.sync.max_retries, 5);
        assert_eq!(config.authentication.to_string(), "OAuth");
    }

    #[test]
    fn test_api_base_from_store() {
        let config = TapConfig::from_json(JSON_CONFIG).unwrap();
        assert_eq!(
            config.api_base().unwrap().as_str(),
            "https://acme.myshopify.com/admin/api/2024-01/"
        );
    }

    #[test]
    fn test_admin_url_overrides_store() {
        let mut config = TapConfig::new("ignored", Auth::bare("t"));
        config.admin_url = Some(Url::parse("https://admin.example.com/store/admin").unwrap());
        assert_eq!(
            config.api_base().unwrap().as_str(),
            "https://admin.example.com/store/admin/api/2024-01/"
        );
    }

    #[test]
    fn test_admin_url_from_file() {
        let json = r#"{
            "authentication": {"auth_type": "access_token", "access_token": "t"},
            "admin_url": "https://proxy.example.com/acme/admin"
        }"#;
        let config = TapConfig::from_json(json).unwrap();
        assert_eq!(
            config.admin_url.as_ref().map(Url::as_str),
            Some("https://proxy.example.com/acme/admin")
        );
        config.validate().unwrap();
        assert_eq!(
            config.api_base().unwrap().as_str(),
            "https://proxy.example.com/acme/admin/api/2024-01/"
        );

        let bad = r#"{
            "authentication": {"auth_type": "access_token", "access_token": "t"},
            "admin_url": "not a url"
        }"#;
        assert!(TapConfig::from_json(bad).is_err());
    }

    #[test]
    fn test_missing_store_and_admin_url() {
        let config = TapConfig::new("", Auth::bare("t"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("store or admin_url"));
    }

    #[test]
    fn test_page_size_out_of_range() {
        let json = r#"{
            "authentication": {"auth_type": "access_token", "access_token": "t"},
            "store": "acme",
            "sync": {"page_size": 500}
        }"#;
        let config = TapConfig::from_json(json).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("page_size"));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = TapConfig::new("acme", Auth::bare("t"));
        config.sync.max_concurrent_streams = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_picks_format_by_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, JSON_CONFIG).unwrap();
        let config = TapConfig::from_file(&path).unwrap();
        assert_eq!(config.store, "acme");

        let yaml_path = dir.path().join("config.yml");
        std::fs::write(&yaml_path, JSON_CONFIG).unwrap();
        // JSON is valid YAML
        assert!(TapConfig::from_file(&yaml_path).is_ok());
    }

    #[test]
    fn test_retry_config_from_settings() {
        let settings = SyncSettings {
            min_backoff_ms: 10,
            max_backoff_ms: 100,
            max_retries: 2,
            ..SyncSettings::default()
        };
        let retry = settings.retry_config();
        assert_eq!(retry.min_delay, Duration::from_millis(10));
        assert_eq!(retry.max_delay, Duration::from_millis(100));
        assert_eq!(retry.max_retries, 2);
    }
}
