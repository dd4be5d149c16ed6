use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;

use chrono::{DateTime, Datelike, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::constants::{MAX_TIMESTAMP_YEAR, MIN_TIMESTAMP_YEAR};
use crate::error::FeedError;

/// The two record families kept in the local cache.  Writes are serialized
/// per kind; different kinds never wait on each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Channels,
    Messages,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Channels => write!(f, "channels"),
            EntityKind::Messages => write!(f, "messages"),
        }
    }
}

/// Slice of a kind covered by a feed subscription, a query or a view.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Scope {
    /// Every record of the kind.
    #[default]
    All,
    /// Records belonging to one channel: its messages, or the channel itself.
    Channel(String),
}

/// Behaviour shared by every cached record type.
///
/// The display order defined by [`Record::display_cmp`] must be total: two
/// records compare `Equal` only when their keys are equal.
pub trait Record:
    Clone + PartialEq + fmt::Debug + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// Identity of the record within its kind.
    type Key: Clone
        + Ord
        + Hash
        + fmt::Debug
        + fmt::Display
        + Send
        + Sync
        + Serialize
        + DeserializeOwned
        + 'static;

    const KIND: EntityKind;

    fn key(&self) -> Self::Key;

    /// Order in which list views present the records.
    fn display_cmp(&self, other: &Self) -> Ordering;

    /// Timestamp used to group records into calendar-day sections.
    fn section_time(&self) -> Option<DateTime<Utc>>;

    fn in_scope(&self, scope: &Scope) -> bool;

    fn key_in_scope(key: &Self::Key, scope: &Scope) -> bool;

    /// Reject timestamps the cache cannot store in sortable form.  The
    /// section time is the only timestamp a record carries.
    fn check_timestamps(&self) -> Result<(), FeedError> {
        match self.section_time() {
            Some(at) if !timestamp_in_range(&at) => Err(FeedError::Decode(format!(
                "{} key {} has out-of-range timestamp {at}",
                Self::KIND,
                self.key()
            ))),
            _ => Ok(()),
        }
    }
}

/// Whether `at` falls in the four-digit years the cache can order.
pub fn timestamp_in_range(at: &DateTime<Utc>) -> bool {
    (MIN_TIMESTAMP_YEAR..=MAX_TIMESTAMP_YEAR).contains(&at.year())
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// A conversation channel as listed on the conversations screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub last_message: Option<String>,
    #[serde(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
}

impl ChannelRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            last_message: None,
            last_activity_at: None,
        }
    }

    /// Set the preview line and the time of the latest activity.
    pub fn with_activity(mut self, last_message: Option<String>, at: DateTime<Utc>) -> Self {
        self.last_message = last_message;
        self.last_activity_at = Some(at);
        self
    }
}

impl Record for ChannelRecord {
    type Key = String;

    const KIND: EntityKind = EntityKind::Channels;

    fn key(&self) -> String {
        self.id.clone()
    }

    /// Most recent activity first, channels without activity last, then id.
    fn display_cmp(&self, other: &Self) -> Ordering {
        let by_activity = match (self.last_activity_at, other.last_activity_at) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_activity.then_with(|| self.id.cmp(&other.id))
    }

    fn section_time(&self) -> Option<DateTime<Utc>> {
        self.last_activity_at
    }

    fn in_scope(&self, scope: &Scope) -> bool {
        Self::key_in_scope(&self.id, scope)
    }

    fn key_in_scope(key: &String, scope: &Scope) -> bool {
        match scope {
            Scope::All => true,
            Scope::Channel(channel_id) => key == channel_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Message identity: ids are only unique within their channel.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub channel_id: String,
    pub id: String,
}

impl MessageKey {
    pub fn new(channel_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.channel_id, self.id)
    }
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub channel_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Record for MessageRecord {
    type Key = MessageKey;

    const KIND: EntityKind = EntityKind::Messages;

    fn key(&self) -> MessageKey {
        MessageKey::new(self.channel_id.clone(), self.id.clone())
    }

    /// Oldest first; ties broken by id, then channel for cross-channel reads.
    fn display_cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
            .then_with(|| self.channel_id.cmp(&other.channel_id))
    }

    fn section_time(&self) -> Option<DateTime<Utc>> {
        Some(self.created_at)
    }

    fn in_scope(&self, scope: &Scope) -> bool {
        match scope {
            Scope::All => true,
            Scope::Channel(channel_id) => &self.channel_id == channel_id,
        }
    }

    fn key_in_scope(key: &MessageKey, scope: &Scope) -> bool {
        match scope {
            Scope::All => true,
            Scope::Channel(channel_id) => &key.channel_id == channel_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_channels_sort_by_activity_with_nulls_last() {
        let a = ChannelRecord::new("A", "a").with_activity(None, at(10));
        let b = ChannelRecord::new("B", "b").with_activity(None, at(20));
        let c = ChannelRecord::new("C", "c");

        let mut channels = vec![a, c, b];
        channels.sort_by(|x, y| x.display_cmp(y));
        let ids: Vec<_> = channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["B", "A", "C"]);
    }

    #[test]
    fn test_channel_ties_break_on_id() {
        let x = ChannelRecord::new("x", "same").with_activity(None, at(5));
        let y = ChannelRecord::new("y", "same").with_activity(None, at(5));
        assert_eq!(x.display_cmp(&y), Ordering::Less);
        assert_eq!(ChannelRecord::new("n2", "").display_cmp(&ChannelRecord::new("n1", "")), Ordering::Greater);
    }

    #[test]
    fn test_message_scope_follows_channel() {
        let key = MessageKey::new("c1", "m1");
        assert!(MessageRecord::key_in_scope(&key, &Scope::All));
        assert!(MessageRecord::key_in_scope(&key, &Scope::Channel("c1".into())));
        assert!(!MessageRecord::key_in_scope(&key, &Scope::Channel("c2".into())));
        assert_eq!(key.to_string(), "c1/m1");
    }
}
