//! HTTP client for the Safe Browsing v4 endpoints.
//!
//! This crate handles the request/response contract only: JSON bodies,
//! the `?key=` query parameter, error-status classification, and capped
//! error-body reads. What to do with the payloads is the engine's job.

use std::time::Duration;

use tracing::{debug, warn};

use sandbar_types::ThreatList;

pub mod wire;

pub use wire::{
    Checksum, ClientInfo, FULL_UPDATE, FetchRequest, FetchResponse, FindRequest, FindResponse,
    IndexSet, ListUpdateRequest, ListUpdateResponse, MetadataEntry, RawHashes, RawIndices,
    ThreatEntry, ThreatEntryMetadata, ThreatEntrySet, ThreatInfo, ThreatListsResponse,
    ThreatMatch, UpdateConstraints, parse_duration_secs,
};

/// Connection timeout for service requests.
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Maximum bytes for error body reads (32 KiB).
/// Prevents memory spikes from large error responses.
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    #[error("service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("undecodable response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Strip the request URL from a reqwest error before it can reach logs or
/// error text: the URL carries the API key.
fn redact(error: reqwest::Error) -> ApiError {
    ApiError::Transport(error.without_url())
}

/// Read an HTTP error response body with size limits.
async fn read_capped_error_body(mut response: reqwest::Response) -> String {
    let mut body = Vec::new();
    while let Ok(Some(chunk)) = response.chunk().await {
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            return format!("{}...(truncated)", String::from_utf8_lossy(&body));
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Client for the three v4 endpoints.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    client: ClientInfo,
}

impl ApiClient {
    /// Build a client against `base_url` (no trailing `/v4`).
    ///
    /// `timeout` bounds the total request time; `compression` controls
    /// whether responses are requested gzip-compressed.
    pub fn new(
        base_url: &str,
        api_key: &str,
        client: ClientInfo,
        timeout: Duration,
        compression: bool,
    ) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::none());
        if !compression {
            builder = builder.no_gzip();
        }
        let http = builder.build().map_err(redact)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client,
        })
    }

    #[must_use]
    pub fn client_info(&self) -> &ClientInfo {
        &self.client
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/v4/{}?key={}", self.base_url, name, self.api_key)
    }

    /// `GET /v4/threatLists`: the catalog of lists the service serves.
    pub async fn threat_lists(&self) -> Result<Vec<ThreatList>, ApiError> {
        debug!("fetching threat list catalog");
        let response = self
            .http
            .get(self.endpoint("threatLists"))
            .send()
            .await
            .map_err(redact)?;
        let parsed: ThreatListsResponse = self.decode("threatLists", response).await?;
        Ok(parsed.threat_lists)
    }

    /// `POST /v4/threatListUpdates:fetch`: incremental updates for the
    /// given lists.
    pub async fn fetch_updates(
        &self,
        requests: Vec<ListUpdateRequest>,
    ) -> Result<FetchResponse, ApiError> {
        debug!(lists = requests.len(), "fetching threat list updates");
        let body = FetchRequest {
            client: self.client.clone(),
            list_update_requests: requests,
        };
        let response = self
            .http
            .post(self.endpoint("threatListUpdates:fetch"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(redact)?;
        self.decode("threatListUpdates:fetch", response).await
    }

    /// `POST /v4/fullHashes:find`: full hashes behind the given prefixes.
    pub async fn find_full_hashes(
        &self,
        client_states: Vec<String>,
        threat_info: ThreatInfo,
    ) -> Result<FindResponse, ApiError> {
        debug!(
            prefixes = threat_info.threat_entries.len(),
            "requesting full hashes"
        );
        let body = FindRequest {
            client: self.client.clone(),
            client_states,
            threat_info,
        };
        let response = self
            .http
            .post(self.endpoint("fullHashes:find"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(redact)?;
        self.decode("fullHashes:find", response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        &self,
        name: &str,
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = read_capped_error_body(response).await;
            warn!(endpoint = name, status = status.as_u16(), "service error");
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        let bytes = response.bytes().await.map_err(redact)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
