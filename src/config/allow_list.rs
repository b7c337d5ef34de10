//! Upstream host allow-list

use crate::config::settings::AllowListConfig;
use crate::error::{Error, Result};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Hosts every deployment may reach
pub const STATIC_ALLOW_LIST: &[&str] = &[
    "api.example.com",
    "assets.example.com",
    "cdn.example.com",
    "api.openai.com",
    "maps.googleapis.com",
    "fonts.googleapis.com",
    "fonts.gstatic.com",
    "raw.githubusercontent.com",
    "githubusercontent.com",
    "api.github.com",
    "firebase.googleapis.com",
    "firestore.googleapis.com",
    "storage.googleapis.com",
    "jsonplaceholder.typicode.com",
    "dummyjson.com",
];

/// Immutable set of permitted upstream hostnames.
///
/// A hostname is allowed when it equals an entry or ends with `"." + entry`.
/// Entries are plain lowercase hostnames: no scheme, port, path or wildcard.
#[derive(Debug, Clone)]
pub struct AllowList {
    entries: HashSet<String>,
}

impl AllowList {
    /// Build from the static set plus operator entries. Malformed entries are
    /// dropped; only an empty result is an error.
    pub fn new<S: AsRef<str>>(static_entries: &[&str], extra_entries: &[S]) -> Result<Self> {
        let mut entries = HashSet::new();

        let candidates = static_entries
            .iter()
            .copied()
            .chain(extra_entries.iter().map(|entry| entry.as_ref()));
        for raw in candidates {
            match normalize_entry(raw) {
                Some(entry) => {
                    entries.insert(entry);
                }
                None => warn!("Ignoring malformed allow-list entry '{}'", raw.trim()),
            }
        }

        if entries.is_empty() {
            return Err(Error::AllowList("no usable allow-list entries".to_string()));
        }

        debug!("Allow-list built with {} entries", entries.len());
        Ok(Self { entries })
    }

    pub fn from_config(config: &AllowListConfig) -> Result<Self> {
        Self::new(STATIC_ALLOW_LIST, &config.extra_domains)
    }

    pub fn is_allowed(&self, hostname: &str) -> bool {
        let hostname = hostname.to_ascii_lowercase();
        let mut candidate = hostname.as_str();
        loop {
            if candidate.is_empty() {
                return false;
            }
            if self.entries.contains(candidate) {
                return true;
            }
            // Step to the parent domain, keeping the dot boundary
            match candidate.find('.') {
                Some(dot) => candidate = &candidate[dot + 1..],
                None => return false,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in sorted order
    pub fn entries(&self) -> Vec<&str> {
        let mut entries: Vec<&str> = self.entries.iter().map(String::as_str).collect();
        entries.sort_unstable();
        entries
    }
}

fn normalize_entry(raw: &str) -> Option<String> {
    let entry = raw.trim().to_ascii_lowercase();
    if entry.is_empty() || entry.starts_with('.') || entry.ends_with('.') || entry.contains("..") {
        return None;
    }
    let valid = entry
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.');
    valid.then_some(entry)
}
