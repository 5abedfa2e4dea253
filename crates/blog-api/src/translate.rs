use std::time::Duration;

use axum::{Extension, Json, extract::State};
use serde::Deserialize;
use tracing::{error, warn};
use uuid::Uuid;

use blog_types::api::{Claims, TranslateRequest, TranslateResponse};

use crate::auth::AppState;
use crate::error::ApiError;

const TRANSLATOR_URL: &str = "https://api.cognitive.microsofttranslator.com";

/// Microsoft Translator v3 client. Without a subscription key every call
/// fails with `ServiceUnavailable`.
pub struct Translator {
    key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TranslationResult {
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
struct Translation {
    text: String,
}

impl Translator {
    pub fn new(key: Option<String>) -> anyhow::Result<Self> {
        Self::with_base_url(key, TRANSLATOR_URL)
    }

    pub fn with_base_url(key: Option<String>, base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            key,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub async fn translate(&self, text: &str, dest_language: &str) -> Result<String, ApiError> {
        let Some(key) = &self.key else {
            return Err(ApiError::ServiceUnavailable(
                "the translation key is not configured".into(),
            ));
        };

        let response = self
            .client
            .post(format!("{}/translate", self.base_url))
            .query(&[("api-version", "3.0"), ("to", dest_language)])
            .header("Ocp-Apim-Subscription-Key", key)
            .header("X-ClientTraceId", Uuid::new_v4().to_string())
            .json(&serde_json::json!([{ "Text": text }]))
            .send()
            .await
            .map_err(|e| {
                error!("Translation request failed: {}", e);
                service_failed()
            })?;

        if !response.status().is_success() {
            warn!("Translation service returned {}", response.status());
            return Err(service_failed());
        }

        let results: Vec<TranslationResult> = response.json().await.map_err(|e| {
            error!("Malformed translation response: {}", e);
            service_failed()
        })?;

        results
            .into_iter()
            .next()
            .and_then(|r| r.translations.into_iter().next())
            .map(|t| t.text)
            .ok_or_else(service_failed)
    }
}

fn service_failed() -> ApiError {
    ApiError::BadGateway("the translation service failed".into())
}

pub async fn translate_text(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
    Json(req): Json<TranslateRequest>,
) -> Result<Json<TranslateResponse>, ApiError> {
    if req.dest_language.trim().is_empty() {
        return Err(ApiError::BadRequest("dest_language is required".into()));
    }
    let text = state
        .translator
        .translate(&req.text, req.dest_language.trim())
        .await?;
    Ok(Json(TranslateResponse { text }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_translator_is_unavailable() {
        let translator = Translator::new(None).unwrap();
        let err = translator.translate("hola", "en").await.unwrap_err();
        assert!(matches!(err, ApiError::ServiceUnavailable(_)));
    }

    async fn mock_service(status: axum::http::StatusCode) -> String {
        use axum::{Router, http::HeaderMap, routing::post};

        let app = Router::new().route(
            "/translate",
            post(move |headers: HeaderMap| async move {
                assert_eq!(headers["Ocp-Apim-Subscription-Key"], "test-key");
                assert!(headers.contains_key("X-ClientTraceId"));
                (
                    status,
                    Json(serde_json::json!([{ "translations": [{ "text": "hello", "to": "en" }] }])),
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_translate_reads_first_translation() {
        let url = mock_service(axum::http::StatusCode::OK).await;
        let translator = Translator::with_base_url(Some("test-key".into()), &url).unwrap();
        assert_eq!(translator.translate("hola", "en").await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_translate_service_error_is_bad_gateway() {
        let url = mock_service(axum::http::StatusCode::INTERNAL_SERVER_ERROR).await;
        let translator = Translator::with_base_url(Some("test-key".into()), &url).unwrap();
        let err = translator.translate("hola", "en").await.unwrap_err();
        assert!(matches!(err, ApiError::BadGateway(_)));
    }
}
