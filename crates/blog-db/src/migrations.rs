use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (users, posts, followers)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                      INTEGER PRIMARY KEY AUTOINCREMENT,
                username                TEXT NOT NULL UNIQUE,
                email                   TEXT NOT NULL UNIQUE,
                password_hash           TEXT NOT NULL,
                about_me                TEXT,
                last_seen               TEXT,
                created_at              TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE posts (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                body        TEXT NOT NULL,
                timestamp   TEXT NOT NULL,
                user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                language    TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX idx_posts_timestamp ON posts(timestamp);
            CREATE INDEX idx_posts_user ON posts(user_id, timestamp);

            CREATE TABLE followers (
                follower_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                followed_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                PRIMARY KEY (follower_id, followed_id),
                CHECK (follower_id <> followed_id)
            );

            CREATE INDEX idx_followers_followed ON followers(followed_id);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    if version < 2 {
        info!("Running migration v2 (messages, notifications)");
        conn.execute_batch(
            "
            ALTER TABLE users ADD COLUMN last_message_read_time TEXT;

            CREATE TABLE messages (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_id       INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                recipient_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                body            TEXT NOT NULL,
                timestamp       TEXT NOT NULL
            );

            CREATE INDEX idx_messages_recipient ON messages(recipient_id, timestamp);

            CREATE TABLE notifications (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                name            TEXT NOT NULL,
                user_id         INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                timestamp       REAL NOT NULL,
                payload_json    TEXT NOT NULL,
                UNIQUE(user_id, name)
            );

            CREATE INDEX idx_notifications_user ON notifications(user_id, timestamp);

            INSERT INTO schema_version (version) VALUES (2);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_rerunnable() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 2);
    }

    #[test]
    fn test_self_follow_rejected_by_schema() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        conn.execute(
            "INSERT INTO users (username, email, password_hash) VALUES ('a', 'a@x.io', 'h')",
            [],
        )
        .unwrap();

        let res = conn.execute(
            "INSERT INTO followers (follower_id, followed_id) VALUES (1, 1)",
            [],
        );
        assert!(res.is_err());
    }
}
