//! Lookup expressions: the host-suffix/path-prefix fan-out of a canonical
//! URL.
//!
//! A canonical URL probes the database under several expressions: up to 5
//! host suffixes crossed with up to 6 path prefixes, 30 expressions at
//! most. The SHA-256 of each expression is the lookup key.

use std::collections::BTreeSet;
use std::fmt;

use sha2::{Digest, Sha256};

use sandbar_types::FullHash;

use crate::canonical::CanonicalUrl;

/// One `host_suffix/path_prefix[?query]` lookup expression.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Expression(String);

impl Expression {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SHA-256 of the expression bytes, the database lookup key.
    #[must_use]
    pub fn full_hash(&self) -> FullHash {
        let digest: [u8; 32] = Sha256::digest(self.0.as_bytes()).into();
        FullHash::from(digest)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Enumerate the deduplicated lookup expressions for a canonical URL, in
/// lexicographic order.
#[must_use]
pub fn expressions(url: &CanonicalUrl) -> Vec<Expression> {
    let mut set = BTreeSet::new();
    for host in host_suffixes(url.host()) {
        for path in path_prefixes(url.path(), url.query()) {
            set.insert(format!("{host}{path}"));
        }
    }
    set.into_iter().map(Expression).collect()
}

/// The exact host plus, for a non-IP host of at least 3 labels, the
/// suffixes of the last 2..=5 labels (never the whole host again).
fn host_suffixes(host: &str) -> Vec<String> {
    let mut suffixes = vec![host.to_string()];
    if is_dotted_quad(host) {
        return suffixes;
    }
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() >= 3 {
        for n in 2..=5.min(labels.len() - 1) {
            suffixes.push(labels[labels.len() - n..].join("."));
        }
    }
    suffixes
}

/// The exact path with and without its query, plus at most 4 directory
/// prefixes built from the root.
fn path_prefixes(path: &str, query: Option<&str>) -> Vec<String> {
    let mut prefixes = Vec::with_capacity(6);
    if let Some(query) = query {
        prefixes.push(format!("{path}?{query}"));
    }
    prefixes.push(path.to_string());

    let components: Vec<&str> = path
        .strip_prefix('/')
        .unwrap_or(path)
        .split('/')
        .collect();
    let mut directory = String::from("/");
    prefixes.push(directory.clone());
    // The final component is the file name (or empty after a trailing
    // slash); everything before it is a directory level.
    for component in components.iter().take(components.len().saturating_sub(1)).take(3) {
        directory.push_str(component);
        directory.push('/');
        prefixes.push(directory.clone());
    }
    prefixes
}

/// A canonical IPv4 host: exactly four decimal octets.
fn is_dotted_quad(host: &str) -> bool {
    let octets: Vec<&str> = host.split('.').collect();
    octets.len() == 4
        && octets.iter().all(|octet| {
            !octet.is_empty()
                && octet.len() <= 3
                && octet.bytes().all(|b| b.is_ascii_digit())
                && octet.parse::<u16>().map_or(false, |v| v <= 255)
        })
}
