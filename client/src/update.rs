//! The update engine: fetch per-list deltas, apply them to the store,
//! verify checksums, and keep the update schedule.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use sandbar_api::{
    Checksum, FULL_UPDATE, ListUpdateRequest, ListUpdateResponse, ThreatEntrySet,
    UpdateConstraints, parse_duration_secs,
};
use sandbar_storage::{StorageError, Store};
use sandbar_types::{HashPrefix, ListSelector, UpdateStatus};

use crate::{Client, Error, backoff, unix_now};

/// Parameters for one [`Client::update`] run.
#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    /// Selectors overriding the configured lists; empty keeps the
    /// configured defaults.
    pub lists: Vec<ListSelector>,
    /// Run even when the update window has not opened yet.
    pub force: bool,
}

impl UpdateRequest {
    /// A forced update of the default lists.
    #[must_use]
    pub fn forced() -> Self {
        Self {
            lists: Vec::new(),
            force: true,
        }
    }
}

/// Outcome of applying one list's response.
enum Applied {
    Additions,
    NoAdditions,
    ChecksumMismatch,
}

enum ListUpdateError {
    /// The payload for this list was undecodable or inconsistent; other
    /// lists can still proceed.
    Decode(String),
    /// The store failed; the whole call is over.
    Storage(StorageError),
}

impl<S: Store> Client<S> {
    /// Synchronize the local database with the service.
    ///
    /// Returns [`UpdateStatus::NoUpdate`] when called before the window
    /// recorded by the previous run opens (unless forced). Transport and
    /// protocol failures schedule a backoff and report
    /// [`UpdateStatus::ServerError`]; a checksum mismatch resets the
    /// affected list and reports [`UpdateStatus::DatabaseReset`]. One bad
    /// list never stops the others.
    pub async fn update(&mut self, request: &UpdateRequest) -> Result<UpdateStatus, Error> {
        let now = unix_now();
        if !request.force && self.store.next_update_time()? > now {
            debug!("update window not open yet");
            return Ok(UpdateStatus::NoUpdate);
        }

        let lists = match self.resolve_lists(&request.lists).await {
            Ok(lists) => lists,
            Err(error) => {
                warn!(%error, "could not resolve threat lists");
                self.record_failure(now)?;
                return Ok(UpdateStatus::ServerError);
            }
        };
        if lists.is_empty() {
            warn!("no threat lists to update");
            return Ok(UpdateStatus::InternalError);
        }

        let mut requests = Vec::with_capacity(lists.len());
        for list in &lists {
            requests.push(ListUpdateRequest {
                list: list.clone(),
                state: self.store.state(list)?,
                constraints: UpdateConstraints::raw(),
            });
        }

        let response = match self.api.fetch_updates(requests).await {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "threat list update fetch failed");
                self.record_failure(now)?;
                return Ok(UpdateStatus::ServerError);
            }
        };

        let mut status = UpdateStatus::NoData;
        for entry in &response.list_update_responses {
            match self.apply_list_update(entry) {
                Ok(Applied::Additions) => status = status.worst(UpdateStatus::Successful),
                Ok(Applied::NoAdditions) => {}
                Ok(Applied::ChecksumMismatch) => {
                    status = status.worst(UpdateStatus::DatabaseReset);
                }
                Err(ListUpdateError::Decode(reason)) => {
                    warn!(list = %entry.list, %reason, "skipping undecodable list update");
                    status = status.worst(UpdateStatus::ServerError);
                }
                Err(ListUpdateError::Storage(error)) => return Err(Error::Storage(error)),
            }
        }

        let wait = response
            .minimum_wait_duration
            .as_deref()
            .and_then(parse_duration_secs)
            .unwrap_or(0.0);
        self.store.record_update(now, now + wait as i64)?;
        debug!(%status, wait, "update complete");
        Ok(status)
    }

    fn apply_list_update(&mut self, entry: &ListUpdateResponse) -> Result<Applied, ListUpdateError> {
        let additions = decode_additions(&entry.additions).map_err(ListUpdateError::Decode)?;
        let had_additions = !additions.is_empty();
        let removals: Vec<usize> = entry
            .removals
            .iter()
            .filter_map(|set| set.raw_indices.as_ref())
            .flat_map(|raw| raw.indices.iter().copied())
            .collect();
        let replace = entry.response_type == FULL_UPDATE;

        let table = match self.store.apply_update(
            &entry.list,
            &entry.new_client_state,
            additions,
            &removals,
            replace,
        ) {
            Ok(table) => table,
            // A bad index is server-sent inconsistency, not local damage:
            // the merge rejects it before anything is written.
            Err(error @ StorageError::RemovalIndexOutOfRange { .. }) => {
                return Err(ListUpdateError::Decode(error.to_string()));
            }
            Err(error) => return Err(ListUpdateError::Storage(error)),
        };

        if checksum_matches(&table, entry.checksum.as_ref()) {
            debug!(list = %entry.list, prefixes = table.len(), "list update applied");
            if had_additions {
                Ok(Applied::Additions)
            } else {
                Ok(Applied::NoAdditions)
            }
        } else {
            warn!(list = %entry.list, "checksum mismatch, resetting list");
            self.store.reset(&entry.list).map_err(ListUpdateError::Storage)?;
            Ok(Applied::ChecksumMismatch)
        }
    }

    /// Record a failed attempt and its backoff window.
    fn record_failure(&mut self, now: i64) -> Result<(), Error> {
        let errors = self.store.last_update()?.errors.saturating_add(1);
        let wait = backoff::wait_secs(errors, &mut rand::rng());
        warn!(errors, wait, "scheduling update backoff");
        self.store.record_update_error(now, now + wait as i64, errors)?;
        Ok(())
    }
}

/// Decode the base64 `rawHashes` blobs into fixed-width prefixes.
fn decode_additions(sets: &[ThreatEntrySet]) -> Result<Vec<HashPrefix>, String> {
    let mut additions = Vec::new();
    for set in sets {
        let Some(raw) = &set.raw_hashes else {
            continue;
        };
        let bytes = BASE64
            .decode(&raw.raw_hashes)
            .map_err(|e| format!("rawHashes base64: {e}"))?;
        let width = raw.prefix_size;
        if width == 0 || bytes.len() % width != 0 {
            return Err(format!(
                "rawHashes length {} is not a multiple of prefixSize {width}",
                bytes.len()
            ));
        }
        for chunk in bytes.chunks(width) {
            additions.push(HashPrefix::new(chunk.to_vec()).map_err(|e| e.to_string())?);
        }
    }
    Ok(additions)
}

/// The server's checksum is SHA-256 over the concatenation of the sorted
/// post-update table. A missing checksum cannot be verified and counts as
/// a mismatch.
fn checksum_matches(table: &[HashPrefix], checksum: Option<&Checksum>) -> bool {
    let Some(checksum) = checksum else {
        return false;
    };
    let mut hasher = Sha256::new();
    for prefix in table {
        hasher.update(prefix.as_bytes());
    }
    BASE64.encode(hasher.finalize()) == checksum.sha256
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandbar_storage::MemoryStore;
    use sandbar_types::ThreatList;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::Config;

    fn malware_list() -> ThreatList {
        ThreatList::new("MALWARE", "ANY_PLATFORM", "URL").unwrap()
    }

    fn malware_selector() -> ListSelector {
        "MALWARE/ANY_PLATFORM/URL".parse().unwrap()
    }

    fn prefix(bytes: &[u8]) -> HashPrefix {
        HashPrefix::new(bytes.to_vec()).unwrap()
    }

    /// Base64 SHA-256 over the given prefixes in the given order.
    fn checksum_of(prefixes: &[&[u8]]) -> String {
        let mut hasher = Sha256::new();
        for p in prefixes {
            hasher.update(p);
        }
        BASE64.encode(hasher.finalize())
    }

    fn client_with(server: &MockServer, store: MemoryStore) -> Client<MemoryStore> {
        let config = Config::new("test-key")
            .with_base_url(server.uri())
            .with_lists(vec![malware_selector()]);
        Client::new(config, store).unwrap()
    }

    fn update_response(body: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(body)
    }

    #[tokio::test]
    async fn full_update_sorts_additions_and_verifies_checksum() {
        let server = MockServer::start().await;
        // Additions arrive unsorted: h1, h3, h2.
        let raw = BASE64.encode(b"aaaaccccbbbb");
        Mock::given(method("POST"))
            .and(path("/v4/threatListUpdates:fetch"))
            .respond_with(update_response(serde_json::json!({
                "listUpdateResponses": [{
                    "threatType": "MALWARE",
                    "platformType": "ANY_PLATFORM",
                    "threatEntryType": "URL",
                    "responseType": "FULL_UPDATE",
                    "additions": [{"rawHashes": {"prefixSize": 4, "rawHashes": raw}}],
                    "newClientState": "state-1",
                    "checksum": {"sha256": checksum_of(&[b"aaaa", b"bbbb", b"cccc"])}
                }],
                "minimumWaitDuration": "1800s"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut client = client_with(&server, MemoryStore::new());
        let status = client.update(&UpdateRequest::default()).await.unwrap();
        assert_eq!(status, UpdateStatus::Successful);

        let list = malware_list();
        assert_eq!(
            client.store().prefix_table(&list).unwrap(),
            vec![prefix(b"aaaa"), prefix(b"bbbb"), prefix(b"cccc")]
        );
        assert_eq!(client.store().state(&list).unwrap(), "state-1");

        // Success resets the error counter and schedules the next window.
        let tally = client.store().last_update().unwrap();
        assert_eq!(tally.errors, 0);
        let next = client.store().next_update_time().unwrap();
        assert_eq!(next - tally.time, 1800);
    }

    #[tokio::test]
    async fn partial_update_removes_by_index() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v4/threatListUpdates:fetch"))
            .respond_with(update_response(serde_json::json!({
                "listUpdateResponses": [{
                    "threatType": "MALWARE",
                    "platformType": "ANY_PLATFORM",
                    "threatEntryType": "URL",
                    "responseType": "PARTIAL_UPDATE",
                    "removals": [{"rawIndices": {"indices": [0]}}],
                    "newClientState": "state-2",
                    "checksum": {"sha256": checksum_of(&[b"h2h2", b"h3h3"])}
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut store = MemoryStore::new();
        store
            .apply_update(
                &malware_list(),
                "state-1",
                vec![prefix(b"h1h1"), prefix(b"h2h2"), prefix(b"h3h3")],
                &[],
                true,
            )
            .unwrap();

        let mut client = client_with(&server, store);
        let status = client.update(&UpdateRequest::default()).await.unwrap();
        // Removal-only updates carry no new data.
        assert_eq!(status, UpdateStatus::NoData);
        assert_eq!(
            client.store().prefix_table(&malware_list()).unwrap(),
            vec![prefix(b"h2h2"), prefix(b"h3h3")]
        );
        assert_eq!(client.store().state(&malware_list()).unwrap(), "state-2");
    }

    #[tokio::test]
    async fn checksum_mismatch_resets_the_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v4/threatListUpdates:fetch"))
            .respond_with(update_response(serde_json::json!({
                "listUpdateResponses": [{
                    "threatType": "MALWARE",
                    "platformType": "ANY_PLATFORM",
                    "threatEntryType": "URL",
                    "responseType": "PARTIAL_UPDATE",
                    "removals": [{"rawIndices": {"indices": [0]}}],
                    "newClientState": "state-2",
                    "checksum": {"sha256": "bm90IGEgcmVhbCBjaGVja3N1bQ=="}
                }]
            })))
            .mount(&server)
            .await;

        let mut store = MemoryStore::new();
        store
            .apply_update(
                &malware_list(),
                "state-1",
                vec![prefix(b"h1h1"), prefix(b"h2h2"), prefix(b"h3h3")],
                &[],
                true,
            )
            .unwrap();

        let mut client = client_with(&server, store);
        let status = client.update(&UpdateRequest::default()).await.unwrap();
        assert_eq!(status, UpdateStatus::DatabaseReset);
        assert!(client.store().prefix_table(&malware_list()).unwrap().is_empty());
        assert_eq!(client.store().state(&malware_list()).unwrap(), "");
    }

    #[tokio::test]
    async fn consecutive_failures_back_off() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v4/threatListUpdates:fetch"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let mut client = client_with(&server, MemoryStore::new());
        assert_eq!(
            client.update(&UpdateRequest::default()).await.unwrap(),
            UpdateStatus::ServerError
        );
        // The first failure closed the window; only force may retry.
        assert_eq!(
            client.update(&UpdateRequest::default()).await.unwrap(),
            UpdateStatus::NoUpdate
        );
        assert_eq!(
            client.update(&UpdateRequest::forced()).await.unwrap(),
            UpdateStatus::ServerError
        );

        let tally = client.store().last_update().unwrap();
        assert_eq!(tally.errors, 2);
        let wait = client.store().next_update_time().unwrap() - tally.time;
        assert!((30 * 60..=60 * 60).contains(&wait), "wait was {wait}s");
    }

    #[tokio::test]
    async fn update_before_the_window_is_a_no_op() {
        // No mock mounted: a NoUpdate run must not touch the network.
        let server = MockServer::start().await;
        let mut store = MemoryStore::new();
        let now = unix_now();
        store.record_update(now, now + 3600).unwrap();

        let mut client = client_with(&server, store);
        assert_eq!(
            client.update(&UpdateRequest::default()).await.unwrap(),
            UpdateStatus::NoUpdate
        );
    }

    #[tokio::test]
    async fn one_bad_list_does_not_stop_the_others() {
        let server = MockServer::start().await;
        let raw = BASE64.encode(b"aaaa");
        Mock::given(method("POST"))
            .and(path("/v4/threatListUpdates:fetch"))
            .respond_with(update_response(serde_json::json!({
                "listUpdateResponses": [
                    {
                        "threatType": "SOCIAL_ENGINEERING",
                        "platformType": "ANY_PLATFORM",
                        "threatEntryType": "URL",
                        "responseType": "FULL_UPDATE",
                        "additions": [{"rawHashes": {"prefixSize": 4, "rawHashes": "!!!not-base64!!!"}}],
                        "newClientState": "bad",
                        "checksum": {"sha256": "AAAA"}
                    },
                    {
                        "threatType": "MALWARE",
                        "platformType": "ANY_PLATFORM",
                        "threatEntryType": "URL",
                        "responseType": "FULL_UPDATE",
                        "additions": [{"rawHashes": {"prefixSize": 4, "rawHashes": raw}}],
                        "newClientState": "good",
                        "checksum": {"sha256": checksum_of(&[b"aaaa"])}
                    }
                ]
            })))
            .mount(&server)
            .await;

        let mut client = client_with(&server, MemoryStore::new());
        let status = client.update(&UpdateRequest::default()).await.unwrap();
        // The undecodable list downgrades the run, the good one still lands.
        assert_eq!(status, UpdateStatus::ServerError);
        assert_eq!(
            client.store().prefix_table(&malware_list()).unwrap(),
            vec![prefix(b"aaaa")]
        );
    }

    #[tokio::test]
    async fn empty_expansion_is_an_internal_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v4/threatLists"))
            .respond_with(update_response(serde_json::json!({"threatLists": []})))
            .mount(&server)
            .await;

        let config = Config::new("test-key").with_base_url(server.uri());
        let mut client = Client::new(config, MemoryStore::new()).unwrap();
        assert_eq!(
            client.update(&UpdateRequest::default()).await.unwrap(),
            UpdateStatus::InternalError
        );
    }

    #[test]
    fn decode_additions_splits_fixed_width_chunks() {
        let sets = vec![ThreatEntrySet {
            raw_hashes: Some(sandbar_api::RawHashes {
                prefix_size: 4,
                raw_hashes: BASE64.encode(b"aaaabbbb"),
            }),
        }];
        let additions = decode_additions(&sets).unwrap();
        assert_eq!(additions, vec![prefix(b"aaaa"), prefix(b"bbbb")]);
    }

    #[test]
    fn decode_additions_rejects_ragged_payloads() {
        let sets = vec![ThreatEntrySet {
            raw_hashes: Some(sandbar_api::RawHashes {
                prefix_size: 4,
                raw_hashes: BASE64.encode(b"aaaab"),
            }),
        }];
        assert!(decode_additions(&sets).is_err());
    }

    #[test]
    fn missing_checksum_counts_as_mismatch() {
        assert!(!checksum_matches(&[prefix(b"aaaa")], None));
    }
}
