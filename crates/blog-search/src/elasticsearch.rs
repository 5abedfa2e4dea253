use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::backend::{SearchBackend, SearchError, SearchHits};

/// Elasticsearch over its REST API.
///
/// Writes use `refresh=wait_for` so a search issued right after a commit
/// already sees the change.
pub struct ElasticsearchBackend {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    total: TotalHits,
    hits: Vec<Hit>,
}

#[derive(Debug, Deserialize)]
struct TotalHits {
    value: u64,
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
}

impl ElasticsearchBackend {
    pub fn new(base_url: &str) -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn doc_url(&self, index: &str, id: i64) -> String {
        format!("{}/{}/_doc/{}?refresh=wait_for", self.base_url, index, id)
    }
}

#[async_trait]
impl SearchBackend for ElasticsearchBackend {
    async fn index(
        &self,
        index: &str,
        id: i64,
        fields: &BTreeMap<String, String>,
    ) -> Result<(), SearchError> {
        let response = self
            .client
            .put(self.doc_url(index, id))
            .json(fields)
            .send()
            .await?;

        check_status(response).await?;
        debug!("Indexed {}/{}", index, id);
        Ok(())
    }

    async fn delete(&self, index: &str, id: i64) -> Result<(), SearchError> {
        let response = self.client.delete(self.doc_url(index, id)).send().await?;

        // Deleting a document that was never indexed is not a failure.
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Delete of missing document {}/{}", index, id);
            return Ok(());
        }

        check_status(response).await?;
        debug!("Removed {}/{}", index, id);
        Ok(())
    }

    async fn search(
        &self,
        index: &str,
        query: &str,
        from: u64,
        size: u64,
    ) -> Result<SearchHits, SearchError> {
        let response = self
            .client
            .post(format!("{}/{}/_search", self.base_url, index))
            .json(&search_body(query, from, size))
            .send()
            .await?;

        // The index is created by the first write; until then nothing matches.
        if response.status() == StatusCode::NOT_FOUND {
            debug!("Search on missing index {}", index);
            return Ok(SearchHits::default());
        }

        let response = check_status(response).await?;
        let body = response.bytes().await?;
        parse_search_response(&body)
    }
}

fn search_body(query: &str, from: u64, size: u64) -> serde_json::Value {
    json!({
        "query": { "multi_match": { "query": query, "fields": ["*"] } },
        "from": from,
        "size": size,
    })
}

fn parse_search_response(body: &[u8]) -> Result<SearchHits, SearchError> {
    let parsed: SearchResponse =
        serde_json::from_slice(body).map_err(|e| SearchError::Malformed(e.to_string()))?;

    let ids = parsed
        .hits
        .hits
        .iter()
        .map(|hit| {
            hit.id
                .parse::<i64>()
                .map_err(|_| SearchError::Malformed(format!("non-numeric document id '{}'", hit.id)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SearchHits {
        ids,
        total: parsed.hits.total.value,
    })
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, SearchError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SearchError::Backend {
        status: status.as_u16(),
        body,
    })
}
