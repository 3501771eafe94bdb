//! The lookup pipeline: expressions, local prefix probe, cache check,
//! remote full-hash confirmation.

use std::collections::BTreeSet;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, warn};

use sandbar_api::{FindResponse, ThreatEntry, ThreatInfo, parse_duration_secs};
use sandbar_storage::Store;
use sandbar_types::{FullHash, FullHashEntry, ListSelector, Metadata, PrefixMatch};
use sandbar_urls::{Expression, canonicalize, expressions};

use crate::{Client, Error, unix_now};

/// Parameters for one [`Client::lookup`] call.
#[derive(Debug, Clone)]
pub struct LookupRequest {
    pub url: String,
    /// Selectors overriding the configured lists; empty keeps the
    /// configured defaults.
    pub lists: Vec<ListSelector>,
}

impl LookupRequest {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            lists: Vec::new(),
        }
    }
}

impl<S: Store> Client<S> {
    /// Check a URL against the selected threat lists.
    ///
    /// Returns the confirmed full-hash entries matching the URL's
    /// expressions, or empty when the URL is clean. A URL that does not
    /// canonicalize and a service that cannot be reached both yield empty:
    /// lookup never fails on bad input or bad network, only on storage.
    pub async fn lookup(&mut self, request: &LookupRequest) -> Result<Vec<FullHashEntry>, Error> {
        let canonical = match canonicalize(&request.url) {
            Ok(canonical) => canonical,
            Err(error) => {
                debug!(%error, "URL does not canonicalize");
                return Ok(Vec::new());
            }
        };
        let hashes: Vec<FullHash> = expressions(&canonical)
            .iter()
            .map(Expression::full_hash)
            .collect();

        let lists = match self.resolve_lists(&request.lists).await {
            Ok(lists) => lists,
            Err(error) => {
                warn!(%error, "could not resolve threat lists for lookup");
                return Ok(Vec::new());
            }
        };
        if lists.is_empty() {
            return Ok(Vec::new());
        }

        let prefix_matches = self.store.matching_prefixes(&hashes, &lists)?;
        if prefix_matches.is_empty() {
            return Ok(Vec::new());
        }
        debug!(hits = prefix_matches.len(), "local prefix match, confirming");

        let now = unix_now();
        let mut cached = Vec::new();
        for hash in &hashes {
            cached.extend(self.store.cached_full_hashes(hash, &lists, now)?);
        }
        if !cached.is_empty() {
            debug!(hits = cached.len(), "served from full-hash cache");
            return Ok(cached);
        }

        let (client_states, threat_info) = self.full_hash_query(&prefix_matches)?;
        let response = match self.api.find_full_hashes(client_states, threat_info).await {
            Ok(response) => response,
            Err(error) => {
                warn!(%error, "full-hash request failed");
                return Ok(Vec::new());
            }
        };

        let confirmed = confirm_matches(&response, &hashes, now);
        if !confirmed.is_empty() {
            self.store.cache_full_hashes(&confirmed, now)?;
        }
        Ok(confirmed)
    }

    /// Assemble the `fullHashes:find` body: per-list client states, the
    /// distinct type components across the matched lists, and the distinct
    /// matched prefixes.
    fn full_hash_query(
        &self,
        matches: &[PrefixMatch],
    ) -> Result<(Vec<String>, ThreatInfo), Error> {
        let lists: BTreeSet<_> = matches.iter().map(|m| &m.list).collect();

        let mut client_states = Vec::with_capacity(lists.len());
        let mut threat_types = BTreeSet::new();
        let mut platform_types = BTreeSet::new();
        let mut threat_entry_types = BTreeSet::new();
        for list in lists {
            client_states.push(self.store.state(list)?);
            threat_types.insert(list.threat_type().to_string());
            platform_types.insert(list.platform_type().to_string());
            threat_entry_types.insert(list.threat_entry_type().to_string());
        }

        let threat_entries: BTreeSet<String> = matches
            .iter()
            .map(|m| BASE64.encode(m.prefix.as_bytes()))
            .collect();

        let threat_info = ThreatInfo {
            threat_types: threat_types.into_iter().collect(),
            platform_types: platform_types.into_iter().collect(),
            threat_entry_types: threat_entry_types.into_iter().collect(),
            threat_entries: threat_entries
                .into_iter()
                .map(|hash| ThreatEntry { hash })
                .collect(),
        };
        Ok((client_states, threat_info))
    }
}

/// Keep only matches whose decoded hash is one of the URL's expression
/// hashes, stamped with their cache expiry.
fn confirm_matches(response: &FindResponse, hashes: &[FullHash], now: i64) -> Vec<FullHashEntry> {
    let known: BTreeSet<&FullHash> = hashes.iter().collect();
    let mut confirmed = Vec::new();
    for threat_match in &response.matches {
        let Ok(bytes) = BASE64.decode(&threat_match.threat.hash) else {
            debug!("skipping match with undecodable hash");
            continue;
        };
        let Ok(hash) = FullHash::try_from(bytes.as_slice()) else {
            debug!(len = bytes.len(), "skipping match with wrong hash length");
            continue;
        };
        if !known.contains(&hash) {
            continue;
        }

        let duration = threat_match
            .cache_duration
            .as_deref()
            .and_then(parse_duration_secs)
            .unwrap_or(0.0);
        let mut metadata = Metadata::new();
        if let Some(wire) = &threat_match.threat_entry_metadata {
            for entry in &wire.entries {
                if let (Ok(key), Ok(value)) = (BASE64.decode(&entry.key), BASE64.decode(&entry.value))
                {
                    metadata.insert(key, value);
                }
            }
        }
        confirmed.push(FullHashEntry {
            hash,
            list: threat_match.list.clone(),
            metadata,
            expires_at: now + duration as i64,
        });
    }
    confirmed
}
