use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("search backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search backend returned {status}: {body}")]
    Backend { status: u16, body: String },

    #[error("malformed search response: {0}")]
    Malformed(String),
}

/// Ranked ids for one page of results plus the total match count.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchHits {
    pub ids: Vec<i64>,
    pub total: u64,
}

/// A document index keyed by primary key.
///
/// `index` is an upsert: writing the same id twice leaves one document with
/// the latest fields.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn index(
        &self,
        index: &str,
        id: i64,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), SearchError>;

    async fn delete(&self, index: &str, id: i64) -> Result<(), SearchError>;

    async fn search(
        &self,
        index: &str,
        query: &str,
        from: u64,
        size: u64,
    ) -> Result<SearchHits, SearchError>;
}
