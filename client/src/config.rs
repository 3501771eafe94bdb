//! Client configuration.

use std::time::Duration;

use sandbar_types::ListSelector;

/// Production endpoint of the Safe Browsing service.
pub const DEFAULT_BASE_URL: &str = "https://safebrowsing.googleapis.com";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings for a [`Client`](crate::Client). Only the API key is required;
/// everything else has service defaults.
#[derive(Debug, Clone)]
pub struct Config {
    api_key: String,
    lists: Vec<ListSelector>,
    base_url: String,
    timeout: Duration,
    compression: bool,
    client_id: String,
    client_version: String,
}

impl Config {
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            lists: Vec::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            compression: true,
            client_id: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Default threat-list selectors for `update` and `lookup` calls that
    /// pass none. Empty means the whole catalog.
    #[must_use]
    pub fn with_lists(mut self, lists: Vec<ListSelector>) -> Self {
        self.lists = lists;
        self
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether to request gzip-compressed responses.
    #[must_use]
    pub fn with_compression(mut self, compression: bool) -> Self {
        self.compression = compression;
        self
    }

    /// Override how this client identifies itself to the service.
    #[must_use]
    pub fn with_client_id(mut self, id: impl Into<String>, version: impl Into<String>) -> Self {
        self.client_id = id.into();
        self.client_version = version.into();
        self
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    #[must_use]
    pub fn lists(&self) -> &[ListSelector] {
        &self.lists
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    #[must_use]
    pub fn compression(&self) -> bool {
        self.compression
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_version(&self) -> &str {
        &self.client_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_the_service() {
        let config = Config::new("key");
        assert_eq!(config.base_url(), DEFAULT_BASE_URL);
        assert_eq!(config.timeout(), Duration::from_secs(60));
        assert!(config.compression());
        assert!(config.lists().is_empty());
        assert_eq!(config.client_id(), "sandbar");
    }

    #[test]
    fn builder_overrides_stick() {
        let config = Config::new("key")
            .with_base_url("http://localhost:1")
            .with_timeout(Duration::from_secs(5))
            .with_compression(false)
            .with_client_id("custom", "9.9");
        assert_eq!(config.base_url(), "http://localhost:1");
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert!(!config.compression());
        assert_eq!(config.client_id(), "custom");
        assert_eq!(config.client_version(), "9.9");
    }
}
