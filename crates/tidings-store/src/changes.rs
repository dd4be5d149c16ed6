use std::collections::BTreeMap;

use tidings_shared::EntityKind;

/// Net effect of one committed write transaction on one entity kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet<K> {
    pub kind: EntityKind,
    pub inserted: Vec<K>,
    pub updated: Vec<K>,
    pub removed: Vec<K>,
}

impl<K> ChangeSet<K> {
    pub fn empty(kind: EntityKind) -> Self {
        Self {
            kind,
            inserted: Vec::new(),
            updated: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.removed.len()
    }

    /// Every key touched by the transaction.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.inserted
            .iter()
            .chain(self.updated.iter())
            .chain(self.removed.iter())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Net {
    Inserted,
    Updated,
    Removed,
}

/// Folds individual row mutations inside a transaction into one net change
/// per key.
#[derive(Debug)]
pub(crate) struct NetChanges<K: Ord> {
    entries: BTreeMap<K, Net>,
}

impl<K: Ord + Clone> NetChanges<K> {
    pub(crate) fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// A row that did not exist was written.
    pub(crate) fn row_created(&mut self, key: K) {
        let net = match self.entries.get(&key) {
            // Deleted and recreated within the same transaction.
            Some(Net::Removed) => Net::Updated,
            _ => Net::Inserted,
        };
        self.entries.insert(key, net);
    }

    /// An existing row was overwritten with different values.
    pub(crate) fn row_changed(&mut self, key: K) {
        self.entries.entry(key).or_insert(Net::Updated);
    }

    /// An existing row was deleted.
    pub(crate) fn row_deleted(&mut self, key: K) {
        match self.entries.get(&key) {
            Some(Net::Inserted) => {
                self.entries.remove(&key);
            }
            _ => {
                self.entries.insert(key, Net::Removed);
            }
        }
    }

    pub(crate) fn into_change_set(self, kind: EntityKind) -> ChangeSet<K> {
        let mut changes = ChangeSet::empty(kind);
        for (key, net) in self.entries {
            match net {
                Net::Inserted => changes.inserted.push(key),
                Net::Updated => changes.updated.push(key),
                Net::Removed => changes.removed.push(key),
            }
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_then_delete_cancels_out() {
        let mut net = NetChanges::new();
        net.row_created("a");
        net.row_changed("a");
        net.row_deleted("a");
        assert!(net.into_change_set(EntityKind::Channels).is_empty());
    }

    #[test]
    fn test_delete_then_recreate_is_an_update() {
        let mut net = NetChanges::new();
        net.row_deleted("a");
        net.row_created("a");
        let changes = net.into_change_set(EntityKind::Channels);
        assert_eq!(changes.updated, vec!["a"]);
        assert!(changes.removed.is_empty());
    }

    #[test]
    fn test_update_then_delete_is_a_removal() {
        let mut net = NetChanges::new();
        net.row_changed("a");
        net.row_deleted("a");
        net.row_created("b");
        let changes = net.into_change_set(EntityKind::Messages);
        assert_eq!(changes.removed, vec!["a"]);
        assert_eq!(changes.inserted, vec!["b"]);
        assert_eq!(changes.len(), 2);
    }
}
