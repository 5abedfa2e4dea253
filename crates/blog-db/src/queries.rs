use crate::Database;
use crate::models::{
    MESSAGE_COLUMNS, MessageRow, NotificationRow, USER_COLUMNS, UserRow, format_timestamp,
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use blog_types::models::{Page, PageRequest};
use rusqlite::{Connection, OptionalExtension};

impl Database {
    // -- Users --

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by(conn, "username", username))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    // -- Follows --

    pub fn is_following(&self, follower_id: i64, followed_id: i64) -> Result<bool> {
        self.with_conn(|conn| query_is_following(conn, follower_id, followed_id))
    }

    /// Returns (followers, followed) counts for a user.
    pub fn follow_counts(&self, user_id: i64) -> Result<(u64, u64)> {
        self.with_conn(|conn| {
            let followers: i64 = conn.query_row(
                "SELECT COUNT(*) FROM followers WHERE followed_id = ?1",
                [user_id],
                |r| r.get(0),
            )?;
            let followed: i64 = conn.query_row(
                "SELECT COUNT(*) FROM followers WHERE follower_id = ?1",
                [user_id],
                |r| r.get(0),
            )?;
            Ok((followers as u64, followed as u64))
        })
    }

    // -- Messages --

    /// Messages received by a user, newest first.
    pub fn received_messages(&self, user_id: i64, req: PageRequest) -> Result<Page<MessageRow>> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE recipient_id = ?1",
                [user_id],
                |r| r.get(0),
            )?;

            let sql = format!(
                "SELECT {MESSAGE_COLUMNS}
                 FROM messages m
                 JOIN users u ON u.id = m.sender_id
                 WHERE m.recipient_id = ?1
                 ORDER BY m.timestamp DESC, m.id DESC
                 LIMIT ?2 OFFSET ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    rusqlite::params![user_id, req.per_page, req.offset() as i64],
                    MessageRow::from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(Page::new(rows, req.page, req.per_page, total as u64))
        })
    }

    pub fn new_message_count(&self, user_id: i64) -> Result<u64> {
        self.with_conn(|conn| query_new_message_count(conn, user_id))
    }

    // -- Notifications --

    /// Notifications newer than `since` (epoch seconds), oldest first.
    pub fn notifications_since(&self, user_id: i64, since: f64) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, user_id, timestamp, payload_json
                 FROM notifications
                 WHERE user_id = ?1 AND timestamp > ?2
                 ORDER BY timestamp ASC, id ASC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, since], NotificationRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

pub(crate) fn query_user_by(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // column is always one of a fixed set of identifiers, never user input
    debug_assert!(matches!(column, "username" | "email"));
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1");
    let row = conn
        .query_row(&sql, [value], UserRow::from_row)
        .optional()?;
    Ok(row)
}

pub(crate) fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    let row = conn.query_row(&sql, [id], UserRow::from_row).optional()?;
    Ok(row)
}

pub(crate) fn query_is_following(conn: &Connection, follower_id: i64, followed_id: i64) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM followers WHERE follower_id = ?1 AND followed_id = ?2",
            [follower_id, followed_id],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Messages newer than the recipient's last read marker.
pub(crate) fn query_new_message_count(conn: &Connection, user_id: i64) -> Result<u64> {
    let last_read: Option<String> = conn
        .query_row(
            "SELECT last_message_read_time FROM users WHERE id = ?1",
            [user_id],
            |r| r.get(0),
        )
        .optional()?
        .flatten();

    let floor = last_read.unwrap_or_else(|| format_timestamp(DateTime::<Utc>::UNIX_EPOCH));
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE recipient_id = ?1 AND timestamp > ?2",
        rusqlite::params![user_id, floor],
        |r| r.get(0),
    )?;
    Ok(count as u64)
}
