//! Flat, serializable rows for list presenters.

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;

use tidings_shared::{ChannelRecord, MessageRecord};
use tidings_store::Snapshot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRow {
    pub id: String,
    pub name: String,
    pub last_message: String,
    /// Empty when the channel has no messages yet.
    pub date: String,
}

impl ChannelRow {
    pub fn from_record(channel: &ChannelRecord, now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let last_message = channel.last_message.clone().unwrap_or_default();
        let date = match channel.last_activity_at {
            Some(at) if !last_message.is_empty() => activity_label(at, now, offset),
            _ => String::new(),
        };
        Self {
            id: channel.id.clone(),
            name: channel.name.clone(),
            last_message,
            date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRow {
    pub id: String,
    pub sender_name: String,
    pub text: String,
    pub time: String,
    pub outgoing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSection {
    pub title: String,
    pub rows: Vec<MessageRow>,
}

pub fn channel_rows(
    snapshot: &Snapshot<ChannelRecord>,
    now: DateTime<Utc>,
    offset: FixedOffset,
) -> Vec<ChannelRow> {
    snapshot
        .records()
        .iter()
        .map(|c| ChannelRow::from_record(c, now, offset))
        .collect()
}

/// One entry per day section; `own_sender_id` marks outgoing rows.
pub fn message_sections(
    snapshot: &Snapshot<MessageRecord>,
    own_sender_id: &str,
    offset: FixedOffset,
) -> Vec<MessageSection> {
    snapshot
        .sections()
        .iter()
        .enumerate()
        .map(|(index, section)| MessageSection {
            title: section.label.clone(),
            rows: snapshot
                .section_records(index)
                .iter()
                .map(|m| MessageRow {
                    id: m.id.clone(),
                    sender_name: m.sender_name.clone(),
                    text: m.text.clone(),
                    time: m.created_at.with_timezone(&offset).format("%H:%M").to_string(),
                    outgoing: m.sender_id == own_sender_id,
                })
                .collect(),
        })
        .collect()
}

/// Time of day for today's activity, day and month otherwise.
fn activity_label(at: DateTime<Utc>, now: DateTime<Utc>, offset: FixedOffset) -> String {
    let local = at.with_timezone(&offset);
    if local.date_naive() == now.with_timezone(&offset).date_naive() {
        local.format("%H:%M").to_string()
    } else {
        local.format("%-d %b").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tidings_store::Sectioning;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn test_channel_row_dates() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 18, 0, 0).unwrap();
        let today = ChannelRecord::new("c1", "one")
            .with_activity(Some("hi".into()), Utc.with_ymd_and_hms(2024, 3, 5, 9, 7, 0).unwrap());
        let older = ChannelRecord::new("c2", "two")
            .with_activity(Some("yo".into()), Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap());
        let silent = ChannelRecord::new("c3", "three");

        assert_eq!(ChannelRow::from_record(&today, now, utc()).date, "09:07");
        assert_eq!(ChannelRow::from_record(&older, now, utc()).date, "1 Feb");
        let row = ChannelRow::from_record(&silent, now, utc());
        assert_eq!(row.date, "");
        assert_eq!(row.last_message, "");
    }

    #[test]
    fn test_message_sections() {
        let message = |id: &str, sender: &str, at: DateTime<Utc>| MessageRecord {
            id: id.into(),
            channel_id: "c1".into(),
            sender_id: sender.into(),
            sender_name: sender.into(),
            text: "hi".into(),
            created_at: at,
        };
        let snapshot = Snapshot::build(
            vec![
                message("m1", "me", Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap()),
                message("m2", "ana", Utc.with_ymd_and_hms(2024, 3, 5, 11, 30, 0).unwrap()),
            ],
            Sectioning::CalendarDay(utc()),
        );

        let sections = message_sections(&snapshot, "me", utc());
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "4 March 2024");
        assert!(sections[0].rows[0].outgoing);
        assert_eq!(sections[1].rows[0].time, "11:30");
        assert!(!sections[1].rows[0].outgoing);
    }

    #[test]
    fn test_rows_serialize_camel_case() {
        let row = ChannelRow::from_record(&ChannelRecord::new("c1", "one"), Utc::now(), utc());
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["lastMessage"], "");
    }
}
