//! Write path: a transaction plus the set of entities it touched.
//!
//! The change set is only meaningful while the transaction is open. Once
//! [`Database::transaction`](crate::Database::transaction) commits, the
//! session is gone; anything that must react to the committed changes has to
//! snapshot [`Session::changes`] as the last step inside the closure.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction};
use tracing::debug;

use crate::feed::query_post_by_id;
use crate::models::{
    MESSAGE_COLUMNS, MessageRow, NotificationRow, PostRow, UserRow, epoch_seconds,
    format_timestamp,
};
use crate::queries::{query_is_following, query_new_message_count, query_user_by, query_user_by_id};

/// A persisted record affected by a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    User(UserRow),
    Post(PostRow),
    Message(MessageRow),
    Notification(NotificationRow),
}

impl Entity {
    fn key(&self) -> (&'static str, i64) {
        match self {
            Entity::User(u) => ("user", u.id),
            Entity::Post(p) => ("post", p.id),
            Entity::Message(m) => ("message", m.id),
            Entity::Notification(n) => ("notification", n.id),
        }
    }
}

/// Net new/dirty/deleted entities of one transaction.
///
/// An entity lives in at most one set: updating a new entity keeps it new
/// with the latest state, deleting a new or dirty entity moves it to
/// `deleted`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub new: Vec<Entity>,
    pub dirty: Vec<Entity>,
    pub deleted: Vec<Entity>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.new.is_empty() && self.dirty.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.new.len() + self.dirty.len() + self.deleted.len()
    }

    fn track_new(&mut self, entity: Entity) {
        self.new.push(entity);
    }

    fn track_dirty(&mut self, entity: Entity) {
        let key = entity.key();
        if let Some(slot) = self.new.iter_mut().find(|e| e.key() == key) {
            *slot = entity;
        } else if let Some(slot) = self.dirty.iter_mut().find(|e| e.key() == key) {
            *slot = entity;
        } else {
            self.dirty.push(entity);
        }
    }

    fn track_deleted(&mut self, entity: Entity) {
        let key = entity.key();
        self.new.retain(|e| e.key() != key);
        self.dirty.retain(|e| e.key() != key);
        self.deleted.push(entity);
    }
}

pub struct Session<'c> {
    tx: Transaction<'c>,
    changes: ChangeSet,
}

impl<'c> Session<'c> {
    pub(crate) fn new(tx: Transaction<'c>) -> Self {
        Self {
            tx,
            changes: ChangeSet::default(),
        }
    }

    pub(crate) fn commit(self) -> Result<()> {
        let touched = self.changes.len();
        self.tx.commit()?;
        debug!("Transaction committed ({} tracked entities)", touched);
        Ok(())
    }

    /// Entities touched so far in this transaction.
    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }

    fn conn(&self) -> &Connection {
        &self.tx
    }

    // -- Reads inside the transaction --

    pub fn user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        query_user_by_id(self.conn(), id)
    }

    pub fn user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        query_user_by(self.conn(), "username", username)
    }

    pub fn user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        query_user_by(self.conn(), "email", email)
    }

    pub fn post_by_id(&self, id: i64) -> Result<Option<PostRow>> {
        query_post_by_id(self.conn(), id)
    }

    pub fn is_following(&self, follower_id: i64, followed_id: i64) -> Result<bool> {
        query_is_following(self.conn(), follower_id, followed_id)
    }

    pub fn new_message_count(&self, user_id: i64) -> Result<u64> {
        query_new_message_count(self.conn(), user_id)
    }

    // -- Users --

    pub fn create_user(&mut self, username: &str, email: &str, password_hash: &str) -> Result<UserRow> {
        self.tx.execute(
            "INSERT INTO users (username, email, password_hash) VALUES (?1, ?2, ?3)",
            (username, email, password_hash),
        )?;
        let user = self.require_user(self.tx.last_insert_rowid())?;
        self.changes.track_new(Entity::User(user.clone()));
        Ok(user)
    }

    pub fn update_profile(&mut self, user_id: i64, username: &str, about_me: Option<&str>) -> Result<UserRow> {
        self.tx.execute(
            "UPDATE users SET username = ?1, about_me = ?2 WHERE id = ?3",
            rusqlite::params![username, about_me, user_id],
        )?;
        self.mark_user_dirty(user_id)
    }

    pub fn set_password(&mut self, user_id: i64, password_hash: &str) -> Result<UserRow> {
        self.tx.execute(
            "UPDATE users SET password_hash = ?1 WHERE id = ?2",
            rusqlite::params![password_hash, user_id],
        )?;
        self.mark_user_dirty(user_id)
    }

    pub fn touch_last_seen(&mut self, user_id: i64, now: DateTime<Utc>) -> Result<UserRow> {
        self.tx.execute(
            "UPDATE users SET last_seen = ?1 WHERE id = ?2",
            rusqlite::params![format_timestamp(now), user_id],
        )?;
        self.mark_user_dirty(user_id)
    }

    // -- Posts --

    pub fn create_post(
        &mut self,
        user_id: i64,
        body: &str,
        language: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<PostRow> {
        self.tx.execute(
            "INSERT INTO posts (body, timestamp, user_id, language) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![body, format_timestamp(timestamp), user_id, language],
        )?;
        let id = self.tx.last_insert_rowid();
        let post = self
            .post_by_id(id)?
            .ok_or_else(|| anyhow!("Post vanished after insert: {}", id))?;
        self.changes.track_new(Entity::Post(post.clone()));
        Ok(post)
    }

    pub fn update_post(&mut self, post_id: i64, body: &str) -> Result<Option<PostRow>> {
        let updated = self.tx.execute(
            "UPDATE posts SET body = ?1 WHERE id = ?2",
            rusqlite::params![body, post_id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        let post = self.post_by_id(post_id)?;
        if let Some(post) = &post {
            self.changes.track_dirty(Entity::Post(post.clone()));
        }
        Ok(post)
    }

    /// Deletes a post, returning the row as it was before deletion.
    pub fn delete_post(&mut self, post_id: i64) -> Result<Option<PostRow>> {
        let Some(post) = self.post_by_id(post_id)? else {
            return Ok(None);
        };
        self.tx.execute("DELETE FROM posts WHERE id = ?1", [post_id])?;
        self.changes.track_deleted(Entity::Post(post.clone()));
        Ok(Some(post))
    }

    // -- Follows --

    /// Returns true if a new edge was created.
    pub fn follow(&mut self, follower_id: i64, followed_id: i64) -> Result<bool> {
        let inserted = self.tx.execute(
            "INSERT OR IGNORE INTO followers (follower_id, followed_id) VALUES (?1, ?2)",
            [follower_id, followed_id],
        )?;
        Ok(inserted > 0)
    }

    /// Returns true if an edge was removed.
    pub fn unfollow(&mut self, follower_id: i64, followed_id: i64) -> Result<bool> {
        let removed = self.tx.execute(
            "DELETE FROM followers WHERE follower_id = ?1 AND followed_id = ?2",
            [follower_id, followed_id],
        )?;
        Ok(removed > 0)
    }

    // -- Messages --

    pub fn send_message(
        &mut self,
        sender_id: i64,
        recipient_id: i64,
        body: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<MessageRow> {
        self.tx.execute(
            "INSERT INTO messages (sender_id, recipient_id, body, timestamp) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![sender_id, recipient_id, body, format_timestamp(timestamp)],
        )?;
        let id = self.tx.last_insert_rowid();
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages m JOIN users u ON u.id = m.sender_id WHERE m.id = ?1"
        );
        let message = self.tx.query_row(&sql, [id], MessageRow::from_row)?;
        self.changes.track_new(Entity::Message(message.clone()));
        Ok(message)
    }

    pub fn mark_messages_read(&mut self, user_id: i64, now: DateTime<Utc>) -> Result<UserRow> {
        self.tx.execute(
            "UPDATE users SET last_message_read_time = ?1 WHERE id = ?2",
            rusqlite::params![format_timestamp(now), user_id],
        )?;
        self.mark_user_dirty(user_id)
    }

    // -- Notifications --

    /// Replaces the user's notification of the same name.
    pub fn add_notification(
        &mut self,
        user_id: i64,
        name: &str,
        payload_json: &str,
        now: DateTime<Utc>,
    ) -> Result<NotificationRow> {
        let previous: Option<NotificationRow> = self
            .tx
            .query_row(
                "SELECT id, name, user_id, timestamp, payload_json FROM notifications WHERE user_id = ?1 AND name = ?2",
                rusqlite::params![user_id, name],
                NotificationRow::from_row,
            )
            .optional()?;

        if let Some(previous) = previous {
            self.tx.execute("DELETE FROM notifications WHERE id = ?1", [previous.id])?;
            self.changes.track_deleted(Entity::Notification(previous));
        }

        self.tx.execute(
            "INSERT INTO notifications (name, user_id, timestamp, payload_json) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![name, user_id, epoch_seconds(now), payload_json],
        )?;
        let notification = NotificationRow {
            id: self.tx.last_insert_rowid(),
            name: name.to_string(),
            user_id,
            timestamp: epoch_seconds(now),
            payload_json: payload_json.to_string(),
        };
        self.changes.track_new(Entity::Notification(notification.clone()));
        Ok(notification)
    }

    fn require_user(&self, id: i64) -> Result<UserRow> {
        self.user_by_id(id)?
            .ok_or_else(|| anyhow!("User not found: {}", id))
    }

    fn mark_user_dirty(&mut self, user_id: i64) -> Result<UserRow> {
        let user = self.require_user(user_id)?;
        self.changes.track_dirty(Entity::User(user.clone()));
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;
    use blog_types::models::PageRequest;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn test_session_tracks_new_dirty_deleted() {
        let db = Database::open_in_memory().unwrap();
        let changes = db
            .transaction(|s| {
                let u = s.create_user("alice", "alice@example.com", "h")?;
                let keep = s.create_post(u.id, "keep", "", t(1))?;
                let gone = s.create_post(u.id, "gone", "", t(2))?;
                s.update_post(keep.id, "kept")?;
                s.delete_post(gone.id)?;
                Ok(s.changes().clone())
            })
            .unwrap();

        let new_posts: Vec<&str> = changes
            .new
            .iter()
            .filter_map(|e| match e {
                Entity::Post(p) => Some(p.body.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(new_posts, vec!["kept"]);
        assert!(changes.dirty.is_empty());
        assert_eq!(changes.deleted.len(), 1);
        assert!(matches!(&changes.deleted[0], Entity::Post(p) if p.body == "gone"));
    }

    #[test]
    fn test_failed_closure_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let res: Result<()> = db.transaction(|s| {
            let u = s.create_user("alice", "alice@example.com", "h")?;
            s.create_post(u.id, "never", "", t(1))?;
            Err(anyhow!("abort"))
        });
        assert!(res.is_err());
        assert!(db.get_user_by_username("alice").unwrap().is_none());
        assert!(db.all_posts().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let db = Database::open_in_memory().unwrap();
        db.transaction(|s| s.create_user("alice", "a@example.com", "h"))
            .unwrap();
        let dup = db.transaction(|s| s.create_user("alice", "b@example.com", "h"));
        assert!(dup.is_err());
    }

    #[test]
    fn test_follow_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = db
            .transaction(|s| {
                let a = s.create_user("alice", "a@example.com", "h")?;
                let b = s.create_user("bob", "b@example.com", "h")?;
                Ok((a.id, b.id))
            })
            .unwrap();

        assert!(db.transaction(|s| s.follow(a, b)).unwrap());
        assert!(!db.transaction(|s| s.follow(a, b)).unwrap());
        assert!(db.is_following(a, b).unwrap());
        assert!(!db.is_following(b, a).unwrap());
        assert_eq!(db.follow_counts(b).unwrap(), (1, 0));

        assert!(db.transaction(|s| s.unfollow(a, b)).unwrap());
        assert!(!db.transaction(|s| s.unfollow(a, b)).unwrap());
        assert_eq!(db.follow_counts(a).unwrap(), (0, 0));
    }

    #[test]
    fn test_messages_and_unread_count() {
        let db = Database::open_in_memory().unwrap();
        let (a, b) = db
            .transaction(|s| {
                let a = s.create_user("alice", "a@example.com", "h")?;
                let b = s.create_user("bob", "b@example.com", "h")?;
                Ok((a.id, b.id))
            })
            .unwrap();

        db.transaction(|s| {
            s.send_message(a, b, "hi", t(1))?;
            s.send_message(a, b, "again", t(2))
        })
        .unwrap();
        assert_eq!(db.new_message_count(b).unwrap(), 2);

        let inbox = db.received_messages(b, PageRequest::new(1, 10)).unwrap();
        let bodies: Vec<&str> = inbox.items.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["again", "hi"]);
        assert_eq!(inbox.items[0].sender_username, "alice");

        db.transaction(|s| s.mark_messages_read(b, t(3))).unwrap();
        assert_eq!(db.new_message_count(b).unwrap(), 0);

        db.transaction(|s| s.send_message(a, b, "later", t(4)))
            .unwrap();
        assert_eq!(db.new_message_count(b).unwrap(), 1);
    }

    #[test]
    fn test_notification_replaces_same_name() {
        let db = Database::open_in_memory().unwrap();
        let u = db
            .transaction(|s| s.create_user("alice", "a@example.com", "h"))
            .unwrap();

        db.transaction(|s| s.add_notification(u.id, "unread_message_count", "1", t(1)))
            .unwrap();
        let changes = db
            .transaction(|s| {
                s.add_notification(u.id, "unread_message_count", "2", t(2))?;
                Ok(s.changes().clone())
            })
            .unwrap();
        assert_eq!(changes.deleted.len(), 1);
        assert_eq!(changes.new.len(), 1);

        let all = db.notifications_since(u.id, 0.0).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].payload_json, "2");

        let since = epoch_seconds(t(2));
        assert!(db.notifications_since(u.id, since).unwrap().is_empty());
    }
}
