//! Keeps the search index in step with committed database changes.
//!
//! The database commit path calls in twice: [`IndexSync::before_commit`]
//! while the transaction is still open, to snapshot what it touched, and
//! [`IndexSync::after_commit`] once the commit is durable. A transaction
//! that rolls back never hands its snapshot back, so the index only ever
//! reflects committed state.

use std::sync::Arc;

use blog_db::{ChangeSet, Entity, Session};
use tracing::{debug, warn};

use crate::backend::{SearchBackend, SearchError};
use crate::searchable::Searchable;

/// Change set captured from an open session, waiting for its commit.
#[derive(Debug, Clone, Default)]
#[must_use = "pass captured changes to IndexSync::after_commit once the transaction commits"]
pub struct PendingChanges {
    changes: ChangeSet,
}

impl PendingChanges {
    pub fn changes(&self) -> &ChangeSet {
        &self.changes
    }
}

/// Outcome of a bulk reindex. Rows that failed are listed, not dropped.
#[derive(Debug, Default)]
pub struct ReindexReport {
    pub indexed: usize,
    pub failures: Vec<(i64, SearchError)>,
}

impl ReindexReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Index writer and query front-end. With no backend configured every
/// write is a no-op and every query is empty.
#[derive(Clone, Default)]
pub struct IndexSync {
    backend: Option<Arc<dyn SearchBackend>>,
}

impl IndexSync {
    pub fn new(backend: Option<Arc<dyn SearchBackend>>) -> Self {
        Self { backend }
    }

    pub fn disabled() -> Self {
        Self { backend: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub async fn add_to_index<T: Searchable>(&self, entity: &T) -> Result<(), SearchError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        backend
            .index(T::INDEX, entity.search_id(), &entity.document())
            .await
    }

    pub async fn remove_from_index<T: Searchable>(&self, entity: &T) -> Result<(), SearchError> {
        let Some(backend) = &self.backend else {
            return Ok(());
        };
        backend.delete(T::INDEX, entity.search_id()).await
    }

    /// Ranked ids for one page plus the total match count.
    ///
    /// Pages are 1-indexed; page 0 is treated as page 1.
    pub async fn query_index(
        &self,
        index: &str,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> Result<(Vec<i64>, u64), SearchError> {
        let Some(backend) = &self.backend else {
            return Ok((vec![], 0));
        };
        let from = u64::from(page.max(1) - 1) * u64::from(per_page);
        let hits = backend.search(index, query, from, u64::from(per_page)).await?;
        Ok((hits.ids, hits.total))
    }

    /// Snapshot the session's pending new/dirty/deleted sets.
    pub fn before_commit(session: &Session<'_>) -> PendingChanges {
        PendingChanges {
            changes: session.changes().clone(),
        }
    }

    /// Apply a committed transaction's changes to the index: searchable
    /// entities that are new or dirty are upserted, deleted ones removed.
    pub async fn after_commit(&self, pending: PendingChanges) -> Result<(), SearchError> {
        if self.backend.is_none() || pending.changes.is_empty() {
            return Ok(());
        }

        let ChangeSet { new, dirty, deleted } = pending.changes;
        for entity in new.iter().chain(dirty.iter()) {
            if let Entity::Post(post) = entity {
                self.add_to_index(post).await?;
            }
        }
        for entity in &deleted {
            if let Entity::Post(post) = entity {
                self.remove_from_index(post).await?;
            }
        }

        debug!(
            "Index synchronized ({} new, {} dirty, {} deleted entities)",
            new.len(),
            dirty.len(),
            deleted.len()
        );
        Ok(())
    }

    /// Upsert every row. Keeps going past failures and reports them.
    pub async fn reindex_all<T, I>(&self, rows: I) -> ReindexReport
    where
        T: Searchable,
        I: IntoIterator<Item = T>,
    {
        let mut report = ReindexReport::default();
        if self.backend.is_none() {
            return report;
        }

        for row in rows {
            match self.add_to_index(&row).await {
                Ok(()) => report.indexed += 1,
                Err(e) => {
                    warn!("Failed to index {}/{}: {}", T::INDEX, row.search_id(), e);
                    report.failures.push((row.search_id(), e));
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryIndex;
    use crate::searchable::Searchable;
    use crate::backend::SearchHits;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use blog_db::Database;
    use blog_db::models::PostRow;
    use chrono::Utc;
    use std::collections::BTreeMap;

    /// Memory index that refuses to write or delete one document id.
    struct Flaky {
        bad_id: i64,
        inner: MemoryIndex,
    }

    fn refused(id: i64) -> SearchError {
        SearchError::Backend {
            status: 500,
            body: format!("refused {}", id),
        }
    }

    #[async_trait]
    impl SearchBackend for Flaky {
        async fn index(
            &self,
            index: &str,
            id: i64,
            fields: &BTreeMap<String, String>,
        ) -> Result<(), SearchError> {
            if id == self.bad_id {
                return Err(refused(id));
            }
            self.inner.index(index, id, fields).await
        }

        async fn delete(&self, index: &str, id: i64) -> Result<(), SearchError> {
            if id == self.bad_id {
                return Err(refused(id));
            }
            self.inner.delete(index, id).await
        }

        async fn search(
            &self,
            index: &str,
            query: &str,
            from: u64,
            size: u64,
        ) -> Result<SearchHits, SearchError> {
            self.inner.search(index, query, from, size).await
        }
    }

    fn flaky(bad_id: i64) -> (Arc<Flaky>, IndexSync) {
        let backend = Arc::new(Flaky {
            bad_id,
            inner: MemoryIndex::new(),
        });
        (backend.clone(), IndexSync::new(Some(backend)))
    }

    fn setup() -> (Database, Arc<MemoryIndex>, IndexSync, i64) {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .transaction(|s| s.create_user("alice", "alice@example.com", "h"))
            .unwrap();
        let memory = Arc::new(MemoryIndex::new());
        let sync = IndexSync::new(Some(memory.clone()));
        (db, memory, sync, user.id)
    }

    fn post_and_capture(db: &Database, user_id: i64, body: &str) -> (PostRow, PendingChanges) {
        db.transaction(|s| {
            let post = s.create_post(user_id, body, "", Utc::now())?;
            Ok((post, IndexSync::before_commit(s)))
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_commit_then_query_sees_document() {
        let (db, _memory, sync, uid) = setup();
        let (post, pending) = post_and_capture(&db, uid, "hello search");
        sync.after_commit(pending).await.unwrap();

        let (ids, total) = sync
            .query_index(PostRow::INDEX, "search", 1, 10)
            .await
            .unwrap();
        assert_eq!(ids, vec![post.id]);
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_rollback_leaves_index_untouched() {
        let (db, memory, sync, uid) = setup();
        let res: anyhow::Result<PendingChanges> = db.transaction(|s| {
            s.create_post(uid, "doomed", "", Utc::now())?;
            let _pending = IndexSync::before_commit(s);
            Err(anyhow!("validation failed late"))
        });
        assert!(res.is_err());

        assert!(memory.is_empty(PostRow::INDEX));
        let (ids, total) = sync.query_index(PostRow::INDEX, "doomed", 1, 10).await.unwrap();
        assert!(ids.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_update_and_delete_propagate() {
        let (db, memory, sync, uid) = setup();
        let (post, pending) = post_and_capture(&db, uid, "original words");
        sync.after_commit(pending).await.unwrap();

        let pending = db
            .transaction(|s| {
                s.update_post(post.id, "edited words")?;
                Ok(IndexSync::before_commit(s))
            })
            .unwrap();
        sync.after_commit(pending).await.unwrap();
        assert_eq!(memory.len(PostRow::INDEX), 1);
        assert_eq!(
            memory.get(PostRow::INDEX, post.id).unwrap()["body"],
            "edited words"
        );

        let pending = db
            .transaction(|s| {
                s.delete_post(post.id)?;
                Ok(IndexSync::before_commit(s))
            })
            .unwrap();
        sync.after_commit(pending).await.unwrap();
        assert!(memory.is_empty(PostRow::INDEX));
    }

    #[tokio::test]
    async fn test_non_searchable_entities_are_skipped() {
        let (db, memory, sync, uid) = setup();
        let pending = db
            .transaction(|s| {
                let bob = s.create_user("bob", "bob@example.com", "h")?;
                s.send_message(uid, bob.id, "private hello", Utc::now())?;
                s.add_notification(bob.id, "unread_message_count", "1", Utc::now())?;
                Ok(IndexSync::before_commit(s))
            })
            .unwrap();
        assert!(!pending.changes().is_empty());

        sync.after_commit(pending).await.unwrap();
        assert!(memory.is_empty(PostRow::INDEX));
        assert!(memory.is_empty("messages"));
        assert!(memory.is_empty("users"));
    }

    #[tokio::test]
    async fn test_add_twice_is_idempotent() {
        let (db, memory, sync, uid) = setup();
        let (mut post, _pending) = post_and_capture(&db, uid, "first");
        sync.add_to_index(&post).await.unwrap();
        post.body = "second".into();
        sync.add_to_index(&post).await.unwrap();

        assert_eq!(memory.len(PostRow::INDEX), 1);
        assert_eq!(memory.get(PostRow::INDEX, post.id).unwrap()["body"], "second");
    }

    #[tokio::test]
    async fn test_disabled_backend_degrades() {
        let (db, _memory, _sync, uid) = setup();
        let sync = IndexSync::disabled();
        assert!(!sync.is_enabled());

        let (post, pending) = post_and_capture(&db, uid, "anything");
        sync.after_commit(pending).await.unwrap();
        sync.add_to_index(&post).await.unwrap();
        sync.remove_from_index(&post).await.unwrap();

        assert_eq!(
            sync.query_index(PostRow::INDEX, "anything", 1, 10).await.unwrap(),
            (vec![], 0)
        );
        let report = sync.reindex_all(vec![post]).await;
        assert_eq!(report.indexed, 0);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_reindex_all_restores_lost_index() {
        let (db, memory, sync, uid) = setup();
        for body in ["one rust", "two rust", "three"] {
            let _ = post_and_capture(&db, uid, body);
        }
        assert!(memory.is_empty(PostRow::INDEX));

        let report = sync.reindex_all(db.all_posts().unwrap()).await;
        assert_eq!(report.indexed, 3);
        assert!(report.is_complete());

        let again = sync.reindex_all(db.all_posts().unwrap()).await;
        assert_eq!(again.indexed, 3);
        assert_eq!(memory.len(PostRow::INDEX), 3);

        let (ids, total) = sync.query_index(PostRow::INDEX, "rust", 2, 1).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn test_reindex_reports_failures_and_keeps_going() {
        let (db, _memory, _sync, uid) = setup();
        let posts: Vec<PostRow> = ["one", "two", "three"]
            .into_iter()
            .map(|body| post_and_capture(&db, uid, body).0)
            .collect();
        let bad = posts[1].id;
        let (backend, sync) = flaky(bad);

        let report = sync.reindex_all(posts.clone()).await;
        assert!(!report.is_complete());
        assert_eq!(report.indexed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, bad);
        assert!(matches!(
            report.failures[0].1,
            SearchError::Backend { status: 500, .. }
        ));

        assert_eq!(backend.inner.len(PostRow::INDEX), 2);
        assert!(backend.inner.get(PostRow::INDEX, posts[0].id).is_some());
        assert!(backend.inner.get(PostRow::INDEX, bad).is_none());
        assert!(backend.inner.get(PostRow::INDEX, posts[2].id).is_some());
    }

    #[tokio::test]
    async fn test_after_commit_propagates_backend_failure() {
        let (db, _memory, _sync, uid) = setup();
        let (first, pending) = post_and_capture(&db, uid, "fine");
        let (backend, sync) = flaky(first.id + 1);
        sync.after_commit(pending).await.unwrap();

        let (second, pending) = post_and_capture(&db, uid, "refused");
        assert_eq!(second.id, first.id + 1);
        let err = sync.after_commit(pending).await.unwrap_err();
        assert!(matches!(err, SearchError::Backend { status: 500, .. }));

        // the row is committed regardless; only the index lags
        assert_eq!(db.all_posts().unwrap().len(), 2);
        assert_eq!(backend.inner.len(PostRow::INDEX), 1);

        let pending = db
            .transaction(|s| {
                s.delete_post(second.id)?;
                Ok(IndexSync::before_commit(s))
            })
            .unwrap();
        assert!(sync.after_commit(pending).await.is_err());
    }
}
