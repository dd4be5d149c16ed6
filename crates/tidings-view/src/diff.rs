//! Positional diff between two snapshots of the same query.

use std::collections::{HashMap, HashSet};

use tidings_shared::Record;
use tidings_store::{IndexPath, SectionKey, Snapshot};

/// Ordered list-view operations turning one snapshot into the next.
///
/// Removed and updated rows are addressed in the previous snapshot, inserted
/// rows in the new one.  Rows that live in an inserted or removed section
/// are covered by the section operation and not listed again.  A record that
/// changes position shows up as a removal plus an insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateDescription {
    pub sections_inserted: Vec<usize>,
    pub sections_removed: Vec<usize>,
    pub rows_inserted: Vec<IndexPath>,
    pub rows_removed: Vec<IndexPath>,
    pub rows_updated: Vec<IndexPath>,
    /// A record that was not there before became the last row.
    pub scroll_to_tail: bool,
}

impl UpdateDescription {
    pub fn is_empty(&self) -> bool {
        self.sections_inserted.is_empty()
            && self.sections_removed.is_empty()
            && self.rows_inserted.is_empty()
            && self.rows_removed.is_empty()
            && self.rows_updated.is_empty()
    }
}

struct Row<K> {
    key: K,
    path: IndexPath,
}

fn locate<R: Record>(snapshot: &Snapshot<R>) -> Vec<Row<R::Key>> {
    let paths = snapshot
        .sections()
        .iter()
        .enumerate()
        .flat_map(|(s, section)| (0..section.len()).map(move |row| IndexPath::new(s, row)));

    snapshot
        .records()
        .iter()
        .zip(paths)
        .map(|(record, path)| Row {
            key: record.key(),
            path,
        })
        .collect()
}

fn section_key<R: Record>(snapshot: &Snapshot<R>, path: IndexPath) -> Option<&SectionKey> {
    snapshot.sections().get(path.section).map(|s| &s.key)
}

pub fn diff_snapshots<R: Record>(old: &Snapshot<R>, new: &Snapshot<R>) -> UpdateDescription {
    let old_section_keys: HashSet<&SectionKey> = old.sections().iter().map(|s| &s.key).collect();
    let new_section_keys: HashSet<&SectionKey> = new.sections().iter().map(|s| &s.key).collect();

    let sections_removed: Vec<usize> = old
        .sections()
        .iter()
        .enumerate()
        .filter(|(_, s)| !new_section_keys.contains(&s.key))
        .map(|(i, _)| i)
        .collect();
    let sections_inserted: Vec<usize> = new
        .sections()
        .iter()
        .enumerate()
        .filter(|(_, s)| !old_section_keys.contains(&s.key))
        .map(|(i, _)| i)
        .collect();

    let old_rows = locate(old);
    let new_rows = locate(new);
    let old_index: HashMap<R::Key, usize> = old_rows
        .iter()
        .enumerate()
        .map(|(i, row)| (row.key.clone(), i))
        .collect();

    // Rows present on both sides that stay in the same section; the longest
    // run of them already in relative order keeps its place.
    let mut candidates: Vec<(usize, usize)> = Vec::new();
    for (j, row) in new_rows.iter().enumerate() {
        let Some(&i) = old_index.get(&row.key) else {
            continue;
        };
        if section_key(old, old_rows[i].path) == section_key(new, row.path) {
            candidates.push((i, j));
        }
    }
    let order: Vec<usize> = candidates.iter().map(|&(i, _)| i).collect();
    let stable: Vec<(usize, usize)> = longest_increasing(&order)
        .into_iter()
        .map(|c| candidates[c])
        .collect();

    let stable_old: HashSet<usize> = stable.iter().map(|&(i, _)| i).collect();
    let stable_new: HashSet<usize> = stable.iter().map(|&(_, j)| j).collect();

    let rows_removed = old_rows
        .iter()
        .enumerate()
        .filter(|(i, row)| {
            !stable_old.contains(i) && !sections_removed.contains(&row.path.section)
        })
        .map(|(_, row)| row.path)
        .collect();

    let rows_inserted = new_rows
        .iter()
        .enumerate()
        .filter(|(j, row)| {
            !stable_new.contains(j) && !sections_inserted.contains(&row.path.section)
        })
        .map(|(_, row)| row.path)
        .collect();

    let rows_updated = stable
        .iter()
        .filter(|&&(i, j)| old.records()[i] != new.records()[j])
        .map(|&(i, _)| old_rows[i].path)
        .collect();

    let scroll_to_tail = match (old.last(), new.last()) {
        (_, None) => false,
        (previous, Some(tail)) => {
            let key = tail.key();
            previous.map_or(true, |p| p.key() != key) && !old_index.contains_key(&key)
        }
    };

    UpdateDescription {
        sections_inserted,
        sections_removed,
        rows_inserted,
        rows_removed,
        rows_updated,
        scroll_to_tail,
    }
}

/// Indices into `seq` of one longest strictly increasing subsequence.
fn longest_increasing(seq: &[usize]) -> Vec<usize> {
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; seq.len()];

    for (i, &value) in seq.iter().enumerate() {
        let pos = tails.partition_point(|&t| seq[t] < value);
        if pos > 0 {
            prev[i] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(i);
        } else {
            tails[pos] = i;
        }
    }

    let mut out = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        out.push(i);
        cursor = prev[i];
    }
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tidings_shared::ChannelRecord;
    use tidings_store::Sectioning;

    fn channel(id: &str, activity: i64) -> ChannelRecord {
        ChannelRecord::new(id, id).with_activity(None, Utc.timestamp_opt(activity, 0).unwrap())
    }

    fn snapshot(records: Vec<ChannelRecord>) -> Snapshot<ChannelRecord> {
        Snapshot::build(records, Sectioning::None)
    }

    #[test]
    fn test_lis_picks_longest_run() {
        let picked = longest_increasing(&[3, 1, 2, 5, 4]);
        assert_eq!(picked.len(), 3);
        assert_eq!(picked, vec![1, 2, 4]);
        assert!(longest_increasing(&[]).is_empty());
    }

    #[test]
    fn test_identical_snapshots_produce_nothing() {
        let a = snapshot(vec![channel("a", 3), channel("b", 2)]);
        let diff = diff_snapshots(&a, &a.clone());
        assert!(diff.is_empty());
        assert!(!diff.scroll_to_tail);
    }

    #[test]
    fn test_first_record_inserts_the_section() {
        let diff = diff_snapshots(&snapshot(vec![]), &snapshot(vec![channel("a", 1)]));
        assert_eq!(diff.sections_inserted, vec![0]);
        assert!(diff.rows_inserted.is_empty());
        assert!(diff.scroll_to_tail);
    }

    #[test]
    fn test_last_record_removes_the_section() {
        let diff = diff_snapshots(&snapshot(vec![channel("a", 1)]), &snapshot(vec![]));
        assert_eq!(diff.sections_removed, vec![0]);
        assert!(diff.rows_removed.is_empty());
        assert!(!diff.scroll_to_tail);
    }

    #[test]
    fn test_bumped_record_moves_to_the_top() {
        let old = snapshot(vec![channel("a", 3), channel("b", 2), channel("c", 1)]);
        let new = snapshot(vec![channel("c", 9), channel("a", 3), channel("b", 2)]);

        let diff = diff_snapshots(&old, &new);
        assert_eq!(diff.rows_removed, vec![IndexPath::new(0, 2)]);
        assert_eq!(diff.rows_inserted, vec![IndexPath::new(0, 0)]);
        assert!(diff.rows_updated.is_empty());
        assert!(!diff.scroll_to_tail);
    }

    #[test]
    fn test_edit_in_place_is_an_update() {
        let old = snapshot(vec![channel("a", 3), channel("b", 2)]);
        let mut renamed = channel("b", 2);
        renamed.name = "bee".into();
        let new = snapshot(vec![channel("a", 3), renamed]);

        let diff = diff_snapshots(&old, &new);
        assert_eq!(diff.rows_updated, vec![IndexPath::new(0, 1)]);
        assert!(diff.rows_inserted.is_empty() && diff.rows_removed.is_empty());
        assert!(!diff.scroll_to_tail);
    }

    #[test]
    fn test_appended_record_scrolls() {
        let old = snapshot(vec![channel("a", 3), channel("b", 2)]);
        let new = snapshot(vec![channel("a", 3), channel("b", 2), channel("c", 1)]);

        let diff = diff_snapshots(&old, &new);
        assert_eq!(diff.rows_inserted, vec![IndexPath::new(0, 2)]);
        assert!(diff.scroll_to_tail);
    }

    #[test]
    fn test_removing_the_tail_does_not_scroll() {
        let old = snapshot(vec![channel("a", 3), channel("b", 2)]);
        let new = snapshot(vec![channel("a", 3)]);

        let diff = diff_snapshots(&old, &new);
        assert_eq!(diff.rows_removed, vec![IndexPath::new(0, 1)]);
        assert!(!diff.scroll_to_tail);
    }
}
