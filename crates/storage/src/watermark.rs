//! Watermark persistence for incremental distribution.
//!
//! Tracks, per product (and optionally per target topic), the timestamp of the
//! last data point already distributed. The file layout is
//! `{ "<product_id>": <timestamp> | { "<topic>": <timestamp> } }`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use distribution_common::{DistributionError, DistributionResult};

/// Watermark of a single product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WatermarkEntry {
    /// Distributed to the run-level topic
    At(i64),
    /// Distributed to topic-specific routes
    ByTopic(BTreeMap<String, i64>),
}

/// In-memory watermark mapping backed by a JSON file.
///
/// Loaded once at run start, mutated during the run and rewritten in full by
/// [`WatermarkStore::persist`].
#[derive(Debug)]
pub struct WatermarkStore {
    path: PathBuf,
    entries: BTreeMap<i64, WatermarkEntry>,
}

impl WatermarkStore {
    /// Load watermarks from `path`. A missing file yields an empty store.
    pub fn load(path: impl Into<PathBuf>) -> DistributionResult<Self> {
        let path = path.into();

        let entries = if path.is_file() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).map_err(|e| {
                    DistributionError::Configuration(format!(
                        "Corrupt watermark file {}: {}",
                        path.display(),
                        e
                    ))
                })?
            }
        } else {
            debug!(path = %path.display(), "No watermark file yet, starting empty");
            BTreeMap::new()
        };

        info!(path = %path.display(), products = entries.len(), "Loaded watermarks");
        Ok(Self { path, entries })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Full mapping, keyed by product id.
    pub fn entries(&self) -> &BTreeMap<i64, WatermarkEntry> {
        &self.entries
    }

    /// Last distributed timestamp of a product, optionally for a specific topic.
    pub fn get(&self, product_id: i64, topic: Option<&str>) -> Option<i64> {
        match (self.entries.get(&product_id)?, topic) {
            (WatermarkEntry::At(ts), None) => Some(*ts),
            (WatermarkEntry::ByTopic(topics), Some(topic)) => topics.get(topic).copied(),
            // Route changed between runs: nothing known for the new shape
            _ => None,
        }
    }

    /// Advance the watermark of a product (and topic).
    ///
    /// Watermarks never move backwards: a lower timestamp is ignored with a warning.
    /// Switching between the plain and topic-keyed shape replaces the entry.
    pub fn set(&mut self, product_id: i64, topic: Option<&str>, timestamp: i64) {
        if let Some(current) = self.get(product_id, topic) {
            if timestamp < current {
                warn!(
                    product_id,
                    topic = ?topic,
                    current,
                    requested = timestamp,
                    "Refusing to move watermark backwards"
                );
                return;
            }
        }

        match topic {
            None => {
                self.entries.insert(product_id, WatermarkEntry::At(timestamp));
            }
            Some(topic) => {
                let entry = self
                    .entries
                    .entry(product_id)
                    .or_insert_with(|| WatermarkEntry::ByTopic(BTreeMap::new()));
                if let WatermarkEntry::At(_) = entry {
                    *entry = WatermarkEntry::ByTopic(BTreeMap::new());
                }
                if let WatermarkEntry::ByTopic(topics) = entry {
                    topics.insert(topic.to_string(), timestamp);
                }
            }
        }
    }

    /// Rewrite the backing file with the current mapping.
    ///
    /// Writes to a sibling temporary file and renames it over the target so a
    /// crash never leaves a truncated file behind.
    pub fn persist(&self) -> DistributionResult<()> {
        let json = serde_json::to_string(&self.entries)?;
        let tmp_path = self.path.with_extension("json.tmp");

        fs::write(&tmp_path, json)
            .and_then(|_| fs::rename(&tmp_path, &self.path))
            .map_err(|e| {
                DistributionError::PersistenceFailure(format!("{}: {}", self.path.display(), e))
            })?;

        debug!(path = %self.path.display(), products = self.entries.len(), "Persisted watermarks");
        Ok(())
    }
}
