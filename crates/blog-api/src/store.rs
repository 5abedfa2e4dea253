//! Bridges async handlers to the blocking database.
//!
//! Writes go through [`transact`], which is the only place the search index
//! is fed: the change set is captured inside the transaction and applied to
//! the index after the commit returns, before the handler responds.

use blog_db::{Database, Session};
use blog_search::IndexSync;

use crate::auth::AppState;
use crate::error::ApiError;

/// Run a read-only closure off the async runtime.
pub async fn read<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let st = state.clone();
    let out = tokio::task::spawn_blocking(move || f(&st.db)).await??;
    Ok(out)
}

/// Run `f` in a transaction, then synchronize the search index with what it
/// committed. An error from `f` rolls back and leaves the index untouched.
pub async fn transact<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&mut Session<'_>) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let st = state.clone();
    let (out, pending) = tokio::task::spawn_blocking(move || {
        st.db.transaction(|session| {
            let out = f(session)?;
            Ok((out, IndexSync::before_commit(session)))
        })
    })
    .await??;

    state.search.after_commit(pending).await?;
    Ok(out)
}
