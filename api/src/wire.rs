//! JSON wire model for the v4 endpoints.
//!
//! Field names follow the service's camelCase JSON; arrays the server may
//! omit default to empty. Binary payloads (`rawHashes`, checksums, threat
//! entry hashes, metadata) travel base64-encoded; durations travel as
//! protobuf-JSON strings like `"593.44s"`.

use serde::{Deserialize, Serialize};

use sandbar_types::ThreatList;

/// Identifies this client implementation to the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub client_id: String,
    pub client_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConstraints {
    pub supported_compressions: Vec<String>,
}

impl UpdateConstraints {
    /// The only transport encoding this client negotiates.
    #[must_use]
    pub fn raw() -> Self {
        Self {
            supported_compressions: vec!["RAW".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUpdateRequest {
    #[serde(flatten)]
    pub list: ThreatList,
    pub state: String,
    pub constraints: UpdateConstraints,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchRequest {
    pub client: ClientInfo,
    pub list_update_requests: Vec<ListUpdateRequest>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawHashes {
    /// Width of every prefix in `raw_hashes`, in bytes.
    pub prefix_size: usize,
    /// Base64 of the concatenated fixed-width prefixes.
    pub raw_hashes: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatEntrySet {
    #[serde(default)]
    pub raw_hashes: Option<RawHashes>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawIndices {
    #[serde(default)]
    pub indices: Vec<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexSet {
    #[serde(default)]
    pub raw_indices: Option<RawIndices>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checksum {
    /// Base64 SHA-256 over the concatenated post-update sorted table.
    #[serde(default)]
    pub sha256: String,
}

/// `responseType` value selecting FULL_UPDATE semantics.
pub const FULL_UPDATE: &str = "FULL_UPDATE";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListUpdateResponse {
    #[serde(flatten)]
    pub list: ThreatList,
    /// `FULL_UPDATE` or `PARTIAL_UPDATE`; kept verbatim so unknown values
    /// degrade to partial semantics instead of failing the whole response.
    #[serde(default)]
    pub response_type: String,
    #[serde(default)]
    pub additions: Vec<ThreatEntrySet>,
    #[serde(default)]
    pub removals: Vec<IndexSet>,
    #[serde(default)]
    pub new_client_state: String,
    #[serde(default)]
    pub checksum: Option<Checksum>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResponse {
    #[serde(default)]
    pub list_update_responses: Vec<ListUpdateResponse>,
    #[serde(default)]
    pub minimum_wait_duration: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatEntry {
    /// Base64 of a hash prefix (requests) or a full 32-byte hash
    /// (responses).
    pub hash: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatInfo {
    pub threat_types: Vec<String>,
    pub platform_types: Vec<String>,
    pub threat_entry_types: Vec<String>,
    pub threat_entries: Vec<ThreatEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FindRequest {
    pub client: ClientInfo,
    pub client_states: Vec<String>,
    pub threat_info: ThreatInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatEntryMetadata {
    #[serde(default)]
    pub entries: Vec<MetadataEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatMatch {
    #[serde(flatten)]
    pub list: ThreatList,
    pub threat: ThreatEntry,
    #[serde(default)]
    pub cache_duration: Option<String>,
    #[serde(default)]
    pub threat_entry_metadata: Option<ThreatEntryMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindResponse {
    #[serde(default)]
    pub matches: Vec<ThreatMatch>,
    #[serde(default)]
    pub minimum_wait_duration: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreatListsResponse {
    #[serde(default)]
    pub threat_lists: Vec<ThreatList>,
}

/// Parse a protobuf-JSON duration (`"593.44s"`) into seconds.
#[must_use]
pub fn parse_duration_secs(value: &str) -> Option<f64> {
    let number = value.trim().strip_suffix('s')?;
    let seconds: f64 = number.parse().ok()?;
    (seconds.is_finite() && seconds >= 0.0).then_some(seconds)
}
