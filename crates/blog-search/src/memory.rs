use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::backend::{SearchBackend, SearchError, SearchHits};

type Documents = BTreeMap<i64, BTreeMap<String, String>>;

/// In-process index for development and tests.
///
/// Scores a document by how many times the query's terms occur across all
/// of its fields (case-insensitive, whitespace tokenized). Higher scores rank
/// first, equal scores by ascending id.
#[derive(Default)]
pub struct MemoryIndex {
    indexes: Mutex<HashMap<String, Documents>>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents currently held in `index`.
    pub fn len(&self, index: &str) -> usize {
        self.indexes
            .lock()
            .map(|idx| idx.get(index).map_or(0, BTreeMap::len))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, index: &str) -> bool {
        self.len(index) == 0
    }

    pub fn get(&self, index: &str, id: i64) -> Option<BTreeMap<String, String>> {
        self.indexes
            .lock()
            .ok()?
            .get(index)?
            .get(&id)
            .cloned()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Documents>>, SearchError> {
        self.indexes
            .lock()
            .map_err(|e| SearchError::Malformed(format!("memory index lock poisoned: {}", e)))
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn score(terms: &[String], fields: &BTreeMap<String, String>) -> usize {
    fields
        .values()
        .flat_map(|value| tokenize(value))
        .filter(|token| terms.contains(token))
        .count()
}

#[async_trait]
impl SearchBackend for MemoryIndex {
    async fn index(
        &self,
        index: &str,
        id: i64,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), SearchError> {
        self.lock()?
            .entry(index.to_string())
            .or_default()
            .insert(id, fields.clone());
        Ok(())
    }

    async fn delete(&self, index: &str, id: i64) -> Result<(), SearchError> {
        if let Some(docs) = self.lock()?.get_mut(index) {
            docs.remove(&id);
        }
        Ok(())
    }

    async fn search(
        &self,
        index: &str,
        query: &str,
        from: u64,
        size: u64,
    ) -> Result<SearchHits, SearchError> {
        let terms = tokenize(query);
        let guard = self.lock()?;
        let Some(docs) = guard.get(index) else {
            return Ok(SearchHits::default());
        };

        let mut scored: Vec<(usize, i64)> = docs
            .iter()
            .map(|(id, fields)| (score(&terms, fields), *id))
            .filter(|(s, _)| *s > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let total = scored.len() as u64;
        let ids = scored
            .into_iter()
            .skip(from as usize)
            .take(size as usize)
            .map(|(_, id)| id)
            .collect();

        Ok(SearchHits { ids, total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(body: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("body".to_string(), body.to_string())])
    }

    #[tokio::test]
    async fn test_upsert_keeps_single_latest_document() {
        let idx = MemoryIndex::new();
        idx.index("posts", 1, &doc("first draft")).await.unwrap();
        idx.index("posts", 1, &doc("final text")).await.unwrap();

        assert_eq!(idx.len("posts"), 1);
        assert_eq!(idx.get("posts", 1), Some(doc("final text")));
        assert_eq!(idx.search("posts", "draft", 0, 10).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_ranking_and_paging() {
        let idx = MemoryIndex::new();
        idx.index("posts", 1, &doc("rust")).await.unwrap();
        idx.index("posts", 2, &doc("Rust rust RUST")).await.unwrap();
        idx.index("posts", 3, &doc("go")).await.unwrap();
        idx.index("posts", 4, &doc("rust, again")).await.unwrap();

        let hits = idx.search("posts", "rust", 0, 10).await.unwrap();
        assert_eq!(hits.ids, vec![2, 1, 4]);
        assert_eq!(hits.total, 3);

        let second = idx.search("posts", "rust", 2, 2).await.unwrap();
        assert_eq!(second.ids, vec![4]);
        assert_eq!(second.total, 3);
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let idx = MemoryIndex::new();
        idx.delete("posts", 99).await.unwrap();
        assert!(idx.is_empty("posts"));
        assert_eq!(
            idx.search("nothing", "x", 0, 10).await.unwrap(),
            SearchHits::default()
        );
    }
}
