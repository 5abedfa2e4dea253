use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use tracing::info;

use blog_types::api::{
    Claims, EditProfileRequest, FollowResponse, PageQuery, ProfileResponse, UserProfile,
};
use blog_types::models::PageRequest;

use crate::auth::{AppState, validate_username};
use crate::error::ApiError;
use crate::posts::post_response;
use crate::store;

const MAX_ABOUT_ME: usize = 140;

pub async fn get_profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let req = PageRequest::new(query.page, state.config.posts_per_page);
    let viewer = claims.sub;

    let (user, counts, is_following, posts) = store::read(&state, move |db| {
        let user = db
            .get_user_by_username(&username)?
            .ok_or_else(|| ApiError::NotFound(format!("user {} not found", username)))?;
        let counts = db.follow_counts(user.id)?;
        let is_following = db.is_following(viewer, user.id)?;
        let posts = db.user_posts(user.id, req)?;
        Ok((user, counts, is_following, posts))
    })
    .await?;

    let (followers, following) = counts;
    Ok(Json(ProfileResponse {
        user: UserProfile {
            id: user.id,
            username: user.username,
            about_me: user.about_me,
            last_seen: user.last_seen,
            followers,
            following,
        },
        is_following,
        posts: posts.map(post_response),
    }))
}

pub async fn edit_profile(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EditProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    validate_username(&username)?;
    let about_me = req.about_me.map(|s| s.trim().to_string());
    if about_me.as_ref().is_some_and(|s| s.chars().count() > MAX_ABOUT_ME) {
        return Err(ApiError::BadRequest(format!(
            "about me must be at most {} characters",
            MAX_ABOUT_ME
        )));
    }

    let user_id = claims.sub;
    let user = store::transact(&state, move |session| {
        if let Some(existing) = session.user_by_username(&username)? {
            if existing.id != user_id {
                return Err(ApiError::Conflict("please use a different username".into()).into());
            }
        }
        session.update_profile(user_id, &username, about_me.as_deref())
    })
    .await?;

    let (followers, following) = store::read(&state, move |db| db.follow_counts(user_id)).await?;
    Ok(Json(UserProfile {
        id: user.id,
        username: user.username,
        about_me: user.about_me,
        last_seen: user.last_seen,
        followers,
        following,
    }))
}

pub async fn follow(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    set_following(state, username, claims, true).await
}

pub async fn unfollow(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    set_following(state, username, claims, false).await
}

async fn set_following(
    state: AppState,
    username: String,
    claims: Claims,
    follow: bool,
) -> Result<Json<FollowResponse>, ApiError> {
    let follower_id = claims.sub;
    let target = username.clone();

    store::transact(&state, move |session| {
        let user = session
            .user_by_username(&target)?
            .ok_or_else(|| ApiError::NotFound(format!("user {} not found", target)))?;
        if user.id == follower_id {
            let verb = if follow { "follow" } else { "unfollow" };
            return Err(ApiError::BadRequest(format!("you cannot {} yourself", verb)).into());
        }
        if follow {
            session.follow(follower_id, user.id)
        } else {
            session.unfollow(follower_id, user.id)
        }
    })
    .await?;

    info!(
        "{} {} {}",
        claims.username,
        if follow { "followed" } else { "unfollowed" },
        username
    );
    Ok(Json(FollowResponse {
        username,
        following: follow,
    }))
}
