//! Point-in-time, ordered and optionally sectioned reads of the cache.
//!
//! Sections are never stored: [`Snapshot::build`] derives them from the
//! ordered records every time a query runs.

use std::collections::HashMap;

use chrono::{FixedOffset, NaiveDate};

use tidings_shared::constants::{DEFAULT_FETCH_BATCH_SIZE, SECTION_DATE_FORMAT};
use tidings_shared::{Record, Scope};

/// Direction relative to the kind's display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Natural,
    Reversed,
}

/// How a snapshot groups its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sectioning {
    /// One section holding every row (zero sections when empty).
    #[default]
    None,
    /// One section per calendar day of the record's section timestamp, with
    /// days computed at the given UTC offset.
    CalendarDay(FixedOffset),
}

/// Parameters of [`crate::LocalStore::query`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub scope: Scope,
    pub sort: SortOrder,
    pub sections: Sectioning,
    /// Upper bound on rows materialized per read page.
    pub batch_size: usize,
    /// When set, the snapshot is kept under this name and stays readable
    /// through [`crate::LocalStore::cached_snapshot`] if later queries fail.
    pub cache_name: Option<String>,
}

impl QueryRequest {
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            sort: SortOrder::Natural,
            sections: Sectioning::None,
            batch_size: DEFAULT_FETCH_BATCH_SIZE,
            cache_name: None,
        }
    }

    pub fn sorted(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    pub fn sectioned(mut self, sections: Sectioning) -> Self {
        self.sections = sections;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn cached_as(mut self, name: impl Into<String>) -> Self {
        self.cache_name = Some(name.into());
        self
    }
}

impl Default for QueryRequest {
    fn default() -> Self {
        Self::new(Scope::All)
    }
}

/// Address of a row inside a sectioned snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexPath {
    pub section: usize,
    pub row: usize,
}

impl IndexPath {
    pub fn new(section: usize, row: usize) -> Self {
        Self { section, row }
    }
}

/// Identity of a section, used to match sections across snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SectionKey {
    /// The single section of an unsectioned snapshot.
    All,
    Day(NaiveDate),
    /// Records without a section timestamp.
    Undated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub key: SectionKey,
    /// Header text, e.g. "5 March 2024".  Empty for [`SectionKey::All`].
    pub label: String,
    start: usize,
    len: usize,
}

impl Section {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Immutable ordered view of the records a query matched.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<R: Record> {
    records: Vec<R>,
    sections: Vec<Section>,
}

impl<R: Record> Snapshot<R> {
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            sections: Vec::new(),
        }
    }

    /// Group already ordered records into contiguous sections.
    pub fn build(records: Vec<R>, sectioning: Sectioning) -> Self {
        let mut sections: Vec<Section> = Vec::new();

        for (index, record) in records.iter().enumerate() {
            let key = section_key(record, sectioning);
            match sections.last_mut() {
                Some(last) if last.key == key => last.len += 1,
                _ => sections.push(Section {
                    label: section_label(&key),
                    key,
                    start: index,
                    len: 1,
                }),
            }
        }

        Self { records, sections }
    }

    pub fn records(&self) -> &[R] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn rows_in_section(&self, section: usize) -> usize {
        self.sections.get(section).map_or(0, Section::len)
    }

    /// Rows of one section, in display order.
    pub fn section_records(&self, section: usize) -> &[R] {
        match self.sections.get(section) {
            Some(s) => &self.records[s.start..s.start + s.len],
            None => &[],
        }
    }

    pub fn record_at(&self, path: IndexPath) -> Option<&R> {
        let section = self.sections.get(path.section)?;
        if path.row >= section.len {
            return None;
        }
        self.records.get(section.start + path.row)
    }

    pub fn first(&self) -> Option<&R> {
        self.records.first()
    }

    pub fn last(&self) -> Option<&R> {
        self.records.last()
    }

    /// Position of the trailing row, the target of "scroll to bottom".
    pub fn last_index_path(&self) -> Option<IndexPath> {
        let section = self.sections.len().checked_sub(1)?;
        let row = self.sections[section].len.checked_sub(1)?;
        Some(IndexPath::new(section, row))
    }

    pub fn keys(&self) -> impl Iterator<Item = R::Key> + '_ {
        self.records.iter().map(Record::key)
    }

    /// Map every key to its index path.
    pub fn index_paths(&self) -> HashMap<R::Key, IndexPath> {
        let mut paths = HashMap::with_capacity(self.records.len());
        for (section_index, section) in self.sections.iter().enumerate() {
            for row in 0..section.len {
                let record = &self.records[section.start + row];
                paths.insert(record.key(), IndexPath::new(section_index, row));
            }
        }
        paths
    }

    pub fn position_of(&self, key: &R::Key) -> Option<IndexPath> {
        let index = self.records.iter().position(|r| &r.key() == key)?;
        let section = self
            .sections
            .iter()
            .position(|s| index >= s.start && index < s.start + s.len)?;
        Some(IndexPath::new(section, index - self.sections[section].start))
    }
}

impl<R: Record> Default for Snapshot<R> {
    fn default() -> Self {
        Self::empty()
    }
}

fn section_key<R: Record>(record: &R, sectioning: Sectioning) -> SectionKey {
    match sectioning {
        Sectioning::None => SectionKey::All,
        Sectioning::CalendarDay(offset) => match record.section_time() {
            Some(at) => SectionKey::Day(at.with_timezone(&offset).date_naive()),
            None => SectionKey::Undated,
        },
    }
}

fn section_label(key: &SectionKey) -> String {
    match key {
        SectionKey::All => String::new(),
        SectionKey::Day(day) => day.format(SECTION_DATE_FORMAT).to_string(),
        SectionKey::Undated => "Undated".to_string(),
    }
}
