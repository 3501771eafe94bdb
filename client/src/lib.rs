//! Client for the Google Safe Browsing v4 "Update API".
//!
//! The client keeps a local database of hash prefixes grouped by threat
//! list, synchronizes it with the service through incremental updates
//! ([`Client::update`]), and answers "is this URL dangerous?" by combining
//! local prefix matches with on-demand full-hash confirmations
//! ([`Client::lookup`]).
//!
//! ```no_run
//! use sandbar::{Client, Config, LookupRequest, MemoryStore, UpdateRequest};
//!
//! # async fn run() -> Result<(), sandbar::Error> {
//! let config = Config::new("API_KEY")
//!     .with_lists(vec!["MALWARE/ANY_PLATFORM/URL".parse().unwrap()]);
//! let mut client = Client::new(config, MemoryStore::new())?;
//!
//! client.update(&UpdateRequest::default()).await?;
//! let matches = client
//!     .lookup(&LookupRequest::new("http://testsafebrowsing.appspot.com/s/malware.html"))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! The client is single-threaded by contract: `update` and `lookup` take
//! `&mut self`, and embedders with multiple workers must serialize calls
//! (or give each worker its own client and store).

use std::collections::BTreeSet;

use tracing::debug;

mod backoff;
mod config;
mod lookup;
mod update;

pub use config::{Config, DEFAULT_BASE_URL};
pub use lookup::LookupRequest;
pub use update::UpdateRequest;

pub use sandbar_api::{ApiClient, ApiError, ClientInfo};
pub use sandbar_storage::{MemoryStore, SqliteStore, StorageError, Store};
pub use sandbar_types::{
    FullHash, FullHashEntry, HashPrefix, ListSelector, Metadata, PrefixMatch, ThreatList,
    UpdateStatus, UpdateTally,
};
pub use sandbar_urls::{CanonicalUrl, Expression, UrlError, canonicalize, expressions};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Unix seconds now.
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// The engine: owns the store, the HTTP client, and the lazily fetched
/// catalog of lists the service serves.
pub struct Client<S: Store> {
    api: ApiClient,
    store: S,
    lists: Vec<ListSelector>,
    catalog: Option<Vec<ThreatList>>,
}

impl<S: Store> Client<S> {
    pub fn new(config: Config, store: S) -> Result<Self, Error> {
        let api = ApiClient::new(
            config.base_url(),
            config.api_key(),
            ClientInfo {
                client_id: config.client_id().to_string(),
                client_version: config.client_version().to_string(),
            },
            config.timeout(),
            config.compression(),
        )?;
        Ok(Self {
            api,
            store,
            lists: config.lists().to_vec(),
            catalog: None,
        })
    }

    /// The catalog of threat lists the service serves, fetched on first
    /// use and cached for the client's lifetime.
    pub async fn list_catalog(&mut self) -> Result<Vec<ThreatList>, Error> {
        Ok(self.catalog().await?.to_vec())
    }

    /// Read access to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    async fn catalog(&mut self) -> Result<&[ThreatList], ApiError> {
        if self.catalog.is_none() {
            let catalog = self.api.threat_lists().await?;
            debug!(lists = catalog.len(), "cached threat list catalog");
            self.catalog = Some(catalog);
        }
        Ok(self.catalog.as_deref().unwrap_or_default())
    }

    /// Resolve selectors to concrete lists: the request's selectors, or
    /// the configured defaults, or (when both are empty) the whole
    /// catalog. The catalog is only fetched when a wildcard needs it.
    pub(crate) async fn resolve_lists(
        &mut self,
        requested: &[ListSelector],
    ) -> Result<Vec<ThreatList>, ApiError> {
        let selectors = if requested.is_empty() {
            self.lists.clone()
        } else {
            requested.to_vec()
        };

        let mut resolved = BTreeSet::new();
        if selectors.is_empty() {
            resolved.extend(self.catalog().await?.iter().cloned());
        } else if selectors.iter().all(ListSelector::is_exact) {
            resolved.extend(selectors.iter().filter_map(ListSelector::as_exact));
        } else {
            let catalog = self.catalog().await?.to_vec();
            for selector in &selectors {
                match selector.as_exact() {
                    Some(exact) => {
                        resolved.insert(exact);
                    }
                    None => resolved.extend(selector.expand(&catalog).into_iter().cloned()),
                }
            }
        }
        Ok(resolved.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_against(server: &MockServer) -> Client<MemoryStore> {
        let config = Config::new("test-key").with_base_url(server.uri());
        Client::new(config, MemoryStore::new()).unwrap()
    }

    fn catalog_json() -> serde_json::Value {
        serde_json::json!({
            "threatLists": [
                {"threatType": "MALWARE", "platformType": "ANY_PLATFORM", "threatEntryType": "URL"},
                {"threatType": "MALWARE", "platformType": "WINDOWS", "threatEntryType": "URL"},
                {"threatType": "SOCIAL_ENGINEERING", "platformType": "WINDOWS", "threatEntryType": "URL"}
            ]
        })
    }

    #[tokio::test]
    async fn catalog_is_fetched_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/threatLists"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_json()))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client_against(&server);
        let first = client.list_catalog().await.unwrap();
        let second = client.list_catalog().await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn catalog_fetch_failure_surfaces_as_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/threatLists"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut client = client_against(&server);
        assert!(matches!(
            client.list_catalog().await.unwrap_err(),
            Error::Api(ApiError::Status { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn exact_selectors_resolve_without_the_catalog() {
        // No catalog mock mounted: an exact selector must not need it.
        let server = MockServer::start().await;
        let mut client = client_against(&server);

        let selector: ListSelector = "MALWARE/WINDOWS/URL".parse().unwrap();
        let lists = client.resolve_lists(&[selector]).await.unwrap();
        assert_eq!(lists, vec![ThreatList::new("MALWARE", "WINDOWS", "URL").unwrap()]);
    }

    #[tokio::test]
    async fn wildcards_expand_and_dedupe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/threatLists"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_json()))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client_against(&server);
        let selectors: Vec<ListSelector> = vec![
            "*/WINDOWS/*".parse().unwrap(),
            "MALWARE/WINDOWS/URL".parse().unwrap(),
        ];
        let lists = client.resolve_lists(&selectors).await.unwrap();
        assert_eq!(
            lists,
            vec![
                ThreatList::new("MALWARE", "WINDOWS", "URL").unwrap(),
                ThreatList::new("SOCIAL_ENGINEERING", "WINDOWS", "URL").unwrap(),
            ]
        );
    }

    #[tokio::test]
    async fn empty_selectors_mean_the_whole_catalog() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/threatLists"))
            .respond_with(ResponseTemplate::new(200).set_body_json(catalog_json()))
            .mount(&server)
            .await;

        let mut client = client_against(&server);
        let lists = client.resolve_lists(&[]).await.unwrap();
        assert_eq!(lists.len(), 3);
    }
}
