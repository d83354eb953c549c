//! MAC-pair correlation.
//!
//! A network function is attached to a pod through two interfaces, each
//! announced by its own CNI ADD. The correlator pairs the two MACs seen for
//! one network namespace so the dataplane function is created once, when the
//! second interface arrives, and deleted once, when the first of the pair is
//! torn down.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tracing::debug;

/// The two MACs of a completed pair, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacPair {
    pub first: String,
    pub second: String,
}

/// Per-namespace MAC sequences, keyed by network namespace path.
#[derive(Debug, Default)]
pub struct MacPairCorrelator {
    entries: Mutex<HashMap<String, Vec<String>>>,
}

impl MacPairCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `mac` for `key`. Returns the pair iff this call completes it.
    pub async fn add(&self, key: &str, mac: &str) -> Option<MacPair> {
        let mut entries = self.entries.lock().await;
        let macs = entries.entry(key.to_string()).or_default();
        macs.push(mac.to_string());
        debug!(netns = %key, count = macs.len(), "Recorded MAC");

        (macs.len() == 2).then(|| MacPair {
            first: macs[0].clone(),
            second: macs[1].clone(),
        })
    }

    /// Returns the pair iff `key` currently holds exactly two MACs, then
    /// drops the most recently recorded MAC.
    ///
    /// The removed entry is always the last one, whichever interface the DEL
    /// was for.
    pub async fn del(&self, key: &str) -> Option<MacPair> {
        let mut entries = self.entries.lock().await;
        let macs = entries.get_mut(key)?;

        let pair = (macs.len() == 2).then(|| MacPair {
            first: macs[0].clone(),
            second: macs[1].clone(),
        });

        macs.pop();
        debug!(netns = %key, count = macs.len(), "Released MAC");
        if macs.is_empty() {
            entries.remove(key);
        }
        pair
    }

    /// Number of MACs currently recorded for `key`.
    pub async fn len(&self, key: &str) -> usize {
        self.entries.lock().await.get(key).map_or(0, Vec::len)
    }

    /// Copy of every non-empty sequence.
    pub async fn snapshot(&self) -> HashMap<String, Vec<String>> {
        self.entries.lock().await.clone()
    }
}
