use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::FeedError;
use crate::types::Record;

/// One sync tick of the remote feed, partitioned into added, modified and
/// removed records.
///
/// A key appears at most once across the three sets.  A `full_snapshot`
/// batch lists every record of the subscription scope; anything missing from
/// it no longer exists remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "R: Record", rename_all = "camelCase")]
pub struct ChangeBatch<R: Record> {
    #[serde(default)]
    pub added: Vec<R>,
    #[serde(default)]
    pub modified: Vec<R>,
    #[serde(default)]
    pub removed: Vec<R::Key>,
    #[serde(default)]
    pub full_snapshot: bool,
}

impl<R: Record> Default for ChangeBatch<R> {
    fn default() -> Self {
        Self {
            added: Vec::new(),
            modified: Vec::new(),
            removed: Vec::new(),
            full_snapshot: false,
        }
    }
}

impl<R: Record> ChangeBatch<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reconnect batch carrying the complete remote state of a scope.
    pub fn snapshot(records: Vec<R>) -> Self {
        Self {
            added: records,
            full_snapshot: true,
            ..Self::default()
        }
    }

    pub fn with_added(mut self, records: impl IntoIterator<Item = R>) -> Self {
        self.added.extend(records);
        self
    }

    pub fn with_modified(mut self, records: impl IntoIterator<Item = R>) -> Self {
        self.modified.extend(records);
        self
    }

    pub fn with_removed(mut self, keys: impl IntoIterator<Item = R::Key>) -> Self {
        self.removed.extend(keys);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Total number of entries across the three sets.
    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    /// Check that no key is listed twice, within one set or across sets,
    /// and that every upserted record carries a storable timestamp.
    pub fn validate(&self) -> Result<(), FeedError> {
        let mut seen = HashSet::with_capacity(self.len());
        let upserted = self.added.iter().chain(self.modified.iter()).map(Record::key);
        for key in upserted.chain(self.removed.iter().cloned()) {
            if !seen.insert(key.clone()) {
                return Err(FeedError::Decode(format!(
                    "{} key {key} listed more than once",
                    R::KIND
                )));
            }
        }
        for record in self.added.iter().chain(self.modified.iter()) {
            record.check_timestamps()?;
        }
        Ok(())
    }

    /// Split into the records to upsert (`added` then `modified`) and the
    /// keys to remove.
    pub fn partition(self) -> (Vec<R>, Vec<R::Key>) {
        let mut upserts = self.added;
        upserts.extend(self.modified);
        (upserts, self.removed)
    }

    /// Serialize to a binary feed frame (bincode).
    pub fn to_bytes(&self) -> Result<Vec<u8>, FeedError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode and validate a binary feed frame.
    pub fn from_bytes(data: &[u8]) -> Result<Self, FeedError> {
        let batch: Self = bincode::deserialize(data)?;
        batch.validate()?;
        Ok(batch)
    }

    pub fn to_json(&self) -> Result<String, FeedError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode and validate a JSON feed document.
    pub fn from_json(doc: &str) -> Result<Self, FeedError> {
        let batch: Self = serde_json::from_str(doc)?;
        batch.validate()?;
        Ok(batch)
    }
}
