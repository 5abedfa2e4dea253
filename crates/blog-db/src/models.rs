//! Database row types. These map directly to SQLite rows.
//! Distinct from blog-types API models to keep the DB layer independent.
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use rusqlite::types::Type;

#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub about_me: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_message_read_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostRow {
    pub id: i64,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub user_id: i64,
    pub author_username: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub id: i64,
    pub sender_id: i64,
    pub sender_username: String,
    pub recipient_id: i64,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NotificationRow {
    pub id: i64,
    pub name: String,
    pub user_id: i64,
    pub timestamp: f64,
    pub payload_json: String,
}

pub(crate) const USER_COLUMNS: &str =
    "id, username, email, password_hash, about_me, last_seen, last_message_read_time, created_at";

pub(crate) const POST_COLUMNS: &str =
    "p.id, p.body, p.timestamp, p.user_id, u.username, p.language";

pub(crate) const MESSAGE_COLUMNS: &str =
    "m.id, m.sender_id, u.username, m.recipient_id, m.body, m.timestamp";

impl UserRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            about_me: row.get(4)?,
            last_seen: opt_timestamp(row, 5)?,
            last_message_read_time: opt_timestamp(row, 6)?,
            created_at: timestamp(row, 7)?,
        })
    }
}

impl PostRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            body: row.get(1)?,
            timestamp: timestamp(row, 2)?,
            user_id: row.get(3)?,
            author_username: row.get(4)?,
            language: row.get(5)?,
        })
    }
}

impl MessageRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            sender_id: row.get(1)?,
            sender_username: row.get(2)?,
            recipient_id: row.get(3)?,
            body: row.get(4)?,
            timestamp: timestamp(row, 5)?,
        })
    }
}

impl NotificationRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            user_id: row.get(2)?,
            timestamp: row.get(3)?,
            payload_json: row.get(4)?,
        })
    }
}

/// Fixed-width UTC encoding, so that lexical order on the TEXT column is
/// chronological order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Seconds since the epoch with microsecond precision, used by notifications.
pub fn epoch_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_timestamp(idx, &raw)
}

fn opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| parse_timestamp(idx, &s)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_text_sorts_chronologically() {
        let early = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let later = early + chrono::Duration::microseconds(1);
        let a = format_timestamp(early);
        let b = format_timestamp(later);
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(parse_timestamp(0, &a).unwrap(), early);
    }

    #[test]
    fn test_epoch_seconds() {
        let ts = Utc.timestamp_opt(10, 500_000_000).unwrap();
        assert_eq!(epoch_seconds(ts), 10.5);
    }
}
