//! Threat-list identity and wildcard selectors.
//!
//! A [`ThreatList`] is the (threatType, platformType, threatEntryType)
//! triple that identifies one channel of hash prefixes on the service. A
//! [`ListSelector`] is the user-facing `"MALWARE/WINDOWS/URL"` form where
//! any component may be `*`; selectors expand against the catalog of lists
//! the service advertises.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListError {
    #[error("threat list component must not be empty")]
    EmptyComponent,
    #[error("selector must have exactly three '/'-separated components: {0:?}")]
    MalformedSelector(String),
}

/// Uppercase a validated list component.
fn component(value: &str) -> Result<String, ListError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ListError::EmptyComponent);
    }
    Ok(trimmed.to_ascii_uppercase())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawThreatList {
    threat_type: String,
    platform_type: String,
    threat_entry_type: String,
}

/// Identity of one threat list: the (threatType, platformType,
/// threatEntryType) triple. Two lists are equal iff all three components
/// match.
///
/// Serializes to the wire object `{threatType, platformType,
/// threatEntryType}`; components are validated non-empty and uppercased at
/// the deserialization boundary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawThreatList")]
pub struct ThreatList {
    threat_type: String,
    platform_type: String,
    threat_entry_type: String,
}

impl ThreatList {
    pub fn new(
        threat_type: &str,
        platform_type: &str,
        threat_entry_type: &str,
    ) -> Result<Self, ListError> {
        Ok(Self {
            threat_type: component(threat_type)?,
            platform_type: component(platform_type)?,
            threat_entry_type: component(threat_entry_type)?,
        })
    }

    #[must_use]
    pub fn threat_type(&self) -> &str {
        &self.threat_type
    }

    #[must_use]
    pub fn platform_type(&self) -> &str {
        &self.platform_type
    }

    #[must_use]
    pub fn threat_entry_type(&self) -> &str {
        &self.threat_entry_type
    }
}

impl TryFrom<RawThreatList> for ThreatList {
    type Error = ListError;

    fn try_from(raw: RawThreatList) -> Result<Self, Self::Error> {
        Self::new(&raw.threat_type, &raw.platform_type, &raw.threat_entry_type)
    }
}

impl fmt::Display for ThreatList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.threat_type, self.platform_type, self.threat_entry_type
        )
    }
}

/// A parsed `"MALWARE/WINDOWS/URL"` selector. `None` components are
/// wildcards (`*`); a selector with no wildcard converts directly into a
/// [`ThreatList`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListSelector {
    threat_type: Option<String>,
    platform_type: Option<String>,
    threat_entry_type: Option<String>,
}

impl ListSelector {
    /// True when no component is a wildcard.
    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.threat_type.is_some() && self.platform_type.is_some() && self.threat_entry_type.is_some()
    }

    /// The exact list this selector names, when it has no wildcard.
    #[must_use]
    pub fn as_exact(&self) -> Option<ThreatList> {
        match (&self.threat_type, &self.platform_type, &self.threat_entry_type) {
            (Some(threat), Some(platform), Some(entry)) => Some(ThreatList {
                threat_type: threat.clone(),
                platform_type: platform.clone(),
                threat_entry_type: entry.clone(),
            }),
            _ => None,
        }
    }

    /// True when `list` is covered by this selector.
    #[must_use]
    pub fn matches(&self, list: &ThreatList) -> bool {
        fn covers(component: Option<&String>, value: &str) -> bool {
            component.is_none_or(|c| c.as_str() == value)
        }
        covers(self.threat_type.as_ref(), &list.threat_type)
            && covers(self.platform_type.as_ref(), &list.platform_type)
            && covers(self.threat_entry_type.as_ref(), &list.threat_entry_type)
    }

    /// The catalog entries this selector covers.
    #[must_use]
    pub fn expand<'a>(&self, catalog: &'a [ThreatList]) -> Vec<&'a ThreatList> {
        catalog.iter().filter(|list| self.matches(list)).collect()
    }
}

impl FromStr for ListSelector {
    type Err = ListError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.split('/').collect();
        let [threat, platform, entry] = parts.as_slice() else {
            return Err(ListError::MalformedSelector(value.to_string()));
        };
        let parse = |part: &str| -> Result<Option<String>, ListError> {
            if part.trim() == "*" {
                Ok(None)
            } else {
                component(part).map(Some)
            }
        };
        Ok(Self {
            threat_type: parse(threat)?,
            platform_type: parse(platform)?,
            threat_entry_type: parse(entry)?,
        })
    }
}

impl From<ThreatList> for ListSelector {
    fn from(list: ThreatList) -> Self {
        Self {
            threat_type: Some(list.threat_type),
            platform_type: Some(list.platform_type),
            threat_entry_type: Some(list.threat_entry_type),
        }
    }
}

impl fmt::Display for ListSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let star = |component: &Option<String>| match component {
            Some(value) => value.clone(),
            None => "*".to_string(),
        };
        write!(
            f,
            "{}/{}/{}",
            star(&self.threat_type),
            star(&self.platform_type),
            star(&self.threat_entry_type)
        )
    }
}
