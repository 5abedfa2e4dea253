use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;
use whatlang::Lang;

use blog_db::models::PostRow;
use blog_search::Searchable;
use blog_types::api::{Claims, CreatePostRequest, PageQuery, PostResponse, SearchQuery, SearchResponse};
use blog_types::models::{Page, PageRequest};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::store;

pub(crate) const MAX_BODY: usize = 140;

/// Language tags longer than this are treated as undetected.
const MAX_LANGUAGE: usize = 5;

pub(crate) fn post_response(row: PostRow) -> PostResponse {
    PostResponse {
        id: row.id,
        body: row.body,
        timestamp: row.timestamp,
        language: row.language,
        author_id: row.user_id,
        author_username: row.author_username,
    }
}

/// Trimmed body, or a 400 if it is empty or too long.
pub(crate) fn validate_body(body: &str) -> Result<String, ApiError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(ApiError::BadRequest("body must not be empty".into()));
    }
    if body.chars().count() > MAX_BODY {
        return Err(ApiError::BadRequest(format!(
            "body must be at most {} characters",
            MAX_BODY
        )));
    }
    Ok(body.to_string())
}

fn normalize_language(lang: &str) -> String {
    let lang = lang.trim();
    if lang == "UNKNOWN" || lang.len() > MAX_LANGUAGE {
        return String::new();
    }
    lang.to_string()
}

/// The caller's tag when one is given, otherwise the tag detected from the
/// body. Either way it goes through `normalize_language`.
fn post_language(requested: Option<&str>, body: &str) -> String {
    match requested {
        Some(lang) => normalize_language(lang),
        None => normalize_language(detect_language(body)),
    }
}

fn detect_language(body: &str) -> &'static str {
    whatlang::detect(body).map_or("UNKNOWN", |info| language_tag(info.lang()))
}

/// ISO 639-1 for common languages, whatlang's ISO 639-3 code otherwise.
fn language_tag(lang: Lang) -> &'static str {
    match lang {
        Lang::Eng => "en",
        Lang::Spa => "es",
        Lang::Fra => "fr",
        Lang::Deu => "de",
        Lang::Ita => "it",
        Lang::Por => "pt",
        Lang::Nld => "nl",
        Lang::Pol => "pl",
        Lang::Swe => "sv",
        Lang::Tur => "tr",
        Lang::Rus => "ru",
        Lang::Ukr => "uk",
        Lang::Ara => "ar",
        Lang::Cmn => "zh",
        Lang::Jpn => "ja",
        Lang::Kor => "ko",
        other => other.code(),
    }
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let body = validate_body(&req.body)?;
    let language = post_language(req.language.as_deref(), &body);
    let author = claims.sub;

    let post = store::transact(&state, move |session| {
        session.create_post(author, &body, &language, chrono::Utc::now())
    })
    .await?;

    debug!("Post {} created by {}", post.id, claims.username);
    Ok((StatusCode::CREATED, Json(post_response(post))))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = claims.sub;
    store::transact(&state, move |session| {
        let post = session
            .post_by_id(post_id)?
            .ok_or_else(|| ApiError::NotFound(format!("post {} not found", post_id)))?;
        if post.user_id != caller {
            return Err(ApiError::Forbidden("you can only delete your own posts".into()).into());
        }
        session.delete_post(post_id)
    })
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// The caller's timeline: their own posts and those of everyone they follow.
pub async fn feed(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Page<PostResponse>>, ApiError> {
    let req = PageRequest::new(query.page, state.config.posts_per_page);
    let user_id = claims.sub;
    let page = store::read(&state, move |db| db.followed_posts(user_id, req)).await?;
    Ok(Json(page.map(post_response)))
}

pub async fn explore(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
    Extension(_claims): Extension<Claims>,
) -> Result<Json<Page<PostResponse>>, ApiError> {
    let req = PageRequest::new(query.page, state.config.posts_per_page);
    let page = store::read(&state, move |db| db.explore_posts(req)).await?;
    Ok(Json(page.map(post_response)))
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Extension(_claims): Extension<Claims>,
) -> Result<Json<SearchResponse>, ApiError> {
    let q = query.q.trim().to_string();
    if q.is_empty() {
        return Err(ApiError::BadRequest("search query must not be empty".into()));
    }
    let req = PageRequest::new(query.page, state.config.posts_per_page);

    let (ids, total) = state
        .search
        .query_index(PostRow::INDEX, &q, req.page, req.per_page)
        .await?;

    let rows = store::read(&state, move |db| db.get_posts_by_ids(&ids)).await?;
    let results = Page::new(rows, req.page, req.per_page, total).map(post_response);

    Ok(Json(SearchResponse { query: q, results }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_body() {
        assert_eq!(validate_body("  hi  ").unwrap(), "hi");
        assert!(validate_body("   ").is_err());
        assert!(validate_body(&"x".repeat(140)).is_ok());
        assert!(validate_body(&"x".repeat(141)).is_err());
        // limit counts characters, not bytes
        assert!(validate_body(&"é".repeat(140)).is_ok());
    }

    #[test]
    fn test_normalize_language() {
        assert_eq!(normalize_language("en"), "en");
        assert_eq!(normalize_language(" zh-TW "), "zh-TW");
        assert_eq!(normalize_language("UNKNOWN"), "");
        assert_eq!(normalize_language("english"), "");
    }

    #[test]
    fn test_post_language_detects_when_not_given() {
        let english = "The weather is lovely today and I am going for a long walk in the park with my friends";
        assert_eq!(post_language(None, english), "en");
        let spanish = "Hoy hace muy buen tiempo y voy a dar un largo paseo por el parque con mis amigos";
        assert_eq!(post_language(None, spanish), "es");

        // the caller's tag wins, but is still normalized
        assert_eq!(post_language(Some("fr"), english), "fr");
        assert_eq!(post_language(Some("UNKNOWN"), english), "");

        // nothing to detect
        assert_eq!(post_language(None, "12345 !!!"), "");
    }
}
