use chrono::{DateTime, Local, TimeZone};
use serde::Serialize;
use std::fmt::Display;

use super::chat_types::{DeliveryState, Message};

pub const TODAY: &str = "Today";
pub const YESTERDAY: &str = "Yesterday";

/// Header for a message list, in the local timezone.
///
/// Only the first message is inspected, so a list spanning several days
/// carries the label of its first day.
pub fn group_header(messages: &[Message]) -> Option<String> {
    group_header_at(messages, Local::now())
}

/// [`group_header`] relative to an explicit `now`, in `now`'s timezone.
pub fn group_header_at<Tz>(messages: &[Message], now: DateTime<Tz>) -> Option<String>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let first = messages.first()?;
    let day = first.timestamp.with_timezone(&now.timezone()).date_naive();
    let today = now.date_naive();

    if day == today {
        Some(TODAY.to_string())
    } else if Some(day) == today.pred_opt() {
        Some(YESTERDAY.to_string())
    } else {
        Some(format_date(&first.timestamp.with_timezone(&now.timezone())))
    }
}

/// `"Oct 6"`.
pub fn format_date<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    at.format("%b %-d").to_string()
}

/// 24h `HH:MM`.
pub fn format_time<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    at.format("%H:%M").to_string()
}

/// One rendered message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRow {
    pub id: String,
    pub text: String,
    pub time: String,
    /// Set for incoming messages only.
    pub sender_label: Option<String>,
    pub is_outgoing: bool,
    pub delivery_state: DeliveryState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub header: Option<String>,
    pub rows: Vec<MessageRow>,
}

/// Build the view of `messages` as seen by `viewer_id`.
pub fn present<Tz>(messages: &[Message], viewer_id: &str, now: DateTime<Tz>) -> ConversationView
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let tz = now.timezone();
    let rows = messages
        .iter()
        .filter(|m| m.delivery_state != DeliveryState::Failed)
        .map(|m| {
            let is_outgoing = m.sender_id == viewer_id;
            MessageRow {
                id: m.id.clone(),
                text: m.text.clone(),
                time: format_time(&m.timestamp.with_timezone(&tz)),
                sender_label: (!is_outgoing).then(|| m.sender_display_name.clone()),
                is_outgoing,
                delivery_state: m.delivery_state,
            }
        })
        .collect();

    ConversationView {
        header: group_header_at(messages, now),
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::chat_types::ConversationKey;
    use chrono::{Duration, FixedOffset, Utc};
    use rstest::rstest;

    fn msg(id: &str, sender: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: id.into(),
            conversation_key: ConversationKey::direct("admin", "bob"),
            sender_id: sender.into(),
            sender_display_name: sender.to_uppercase(),
            text: format!("text {}", id),
            timestamp: at,
            delivery_state: DeliveryState::Confirmed,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 16, 15, 30, 0).unwrap()
    }

    #[rstest]
    #[case::now(Duration::zero(), "Today")]
    #[case::earlier_today(Duration::hours(15), "Today")]
    #[case::yesterday(Duration::hours(24), "Yesterday")]
    #[case::start_of_yesterday(Duration::hours(39), "Yesterday")]
    #[case::two_days(Duration::hours(40), "Oct 14")]
    #[case::ten_days(Duration::days(10), "Oct 6")]
    fn test_group_header_labels(#[case] ago: Duration, #[case] expected: &str) {
        let messages = vec![msg("m1", "bob", now() - ago)];
        assert_eq!(group_header_at(&messages, now()).as_deref(), Some(expected));
    }

    #[test]
    fn test_group_header_empty() {
        assert_eq!(group_header_at(&[], now()), None);
        assert_eq!(group_header(&[]), None);
    }

    #[test]
    fn test_group_header_uses_first_message_only() {
        let messages = vec![
            msg("old", "bob", now() - Duration::days(10)),
            msg("new", "bob", now()),
        ];
        assert_eq!(group_header_at(&messages, now()).as_deref(), Some("Oct 6"));
    }

    #[test]
    fn test_group_header_respects_timezone() {
        // 23:30 UTC on the 15th is already the 16th at UTC+2.
        let east = FixedOffset::east_opt(2 * 3600).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 10, 15, 23, 30, 0).unwrap();
        let messages = vec![msg("m1", "bob", at)];

        assert_eq!(
            group_header_at(&messages, now().with_timezone(&east)).as_deref(),
            Some("Today")
        );
        assert_eq!(group_header_at(&messages, now()).as_deref(), Some("Yesterday"));
    }

    #[test]
    fn test_format_time_and_date() {
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 9, 5, 0).unwrap();
        assert_eq!(format_time(&at), "09:05");
        assert_eq!(format_date(&at), "Mar 4");
    }

    #[test]
    fn test_present_marks_outgoing_and_labels_incoming() {
        let mut pending = msg("local-1", "admin", now());
        pending.delivery_state = DeliveryState::Pending;
        let mut failed = msg("local-2", "admin", now());
        failed.delivery_state = DeliveryState::Failed;
        let messages = vec![msg("m1", "bob", now() - Duration::minutes(5)), pending, failed];

        let view = present(&messages, "admin", now());
        assert_eq!(view.header.as_deref(), Some("Today"));
        assert_eq!(view.rows.len(), 2);

        assert!(!view.rows[0].is_outgoing);
        assert_eq!(view.rows[0].sender_label.as_deref(), Some("BOB"));
        assert_eq!(view.rows[0].time, "15:25");

        assert!(view.rows[1].is_outgoing);
        assert_eq!(view.rows[1].sender_label, None);
        assert_eq!(view.rows[1].delivery_state, DeliveryState::Pending);
    }
}
