//! Deduplicated collection of links across all processed messages.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedLink {
    pub canonical_url: String,
    pub timestamp: DateTime<Utc>,
    pub sender: String,
}

/// One entry per canonical URL, holding the most recent sighting.
#[derive(Debug, Default, Clone)]
pub struct LinkRegistry {
    entries: HashMap<String, NormalizedLink>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting. Returns true when the stored entry changed.
    ///
    /// A newer timestamp replaces the stored entry. On equal timestamps the
    /// lexicographically smaller sender is kept, so the final state does not
    /// depend on merge order. A tie therefore does not simply keep the first
    /// sighting.
    pub fn merge(&mut self, url: &str, timestamp: DateTime<Utc>, sender: &str) -> bool {
        match self.entries.get_mut(url) {
            Some(existing) => {
                let newer = timestamp > existing.timestamp;
                let tie_wins = timestamp == existing.timestamp && sender < existing.sender.as_str();
                if newer || tie_wins {
                    existing.timestamp = timestamp;
                    existing.sender = sender.to_string();
                    true
                } else {
                    false
                }
            }
            None => {
                self.entries.insert(
                    url.to_string(),
                    NormalizedLink {
                        canonical_url: url.to_string(),
                        timestamp,
                        sender: sender.to_string(),
                    },
                );
                true
            }
        }
    }

    pub fn get(&self, url: &str) -> Option<&NormalizedLink> {
        self.entries.get(url)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest first; ties ordered by URL.
    pub fn snapshot(&self) -> Vec<NormalizedLink> {
        let mut links: Vec<NormalizedLink> = self.entries.values().cloned().collect();
        links.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| a.canonical_url.cmp(&b.canonical_url))
        });
        links
    }
}

/// Registry shared between worker threads. Merges are serialized by the lock.
#[derive(Debug, Default)]
pub struct SharedRegistry {
    inner: Mutex<LinkRegistry>,
}

impl SharedRegistry {
    pub fn new(registry: LinkRegistry) -> Self {
        Self { inner: Mutex::new(registry) }
    }

    pub fn merge(&self, url: &str, timestamp: DateTime<Utc>, sender: &str) -> bool {
        self.lock().merge(url, timestamp, sender)
    }

    pub fn into_inner(self) -> LinkRegistry {
        self.inner.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock(&self) -> MutexGuard<'_, LinkRegistry> {
        // merge() has no panicking path, so a poisoned registry is still consistent
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
