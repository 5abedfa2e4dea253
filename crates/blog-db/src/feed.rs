//! Post timelines: the follower feed, explore, profile pages and the
//! rank-preserving re-fetch used by search.
//!
//! Every listing is ordered `timestamp DESC, id DESC`. The id tie-break keeps
//! repeated reads stable when several posts share a timestamp.

use std::collections::HashMap;

use anyhow::Result;
use blog_types::models::{Page, PageRequest};
use rusqlite::{Connection, OptionalExtension, ToSql};

use crate::Database;
use crate::models::{POST_COLUMNS, PostRow};

/// Posts authored by the user or by anyone the user follows.
///
/// A single author predicate rather than a UNION of two queries, so a post
/// can never appear twice even if a self-edge existed.
const FOLLOWED_FILTER: &str = "p.user_id = ?1
    OR p.user_id IN (SELECT followed_id FROM followers WHERE follower_id = ?1)";

impl Database {
    pub fn followed_posts(&self, user_id: i64, req: PageRequest) -> Result<Page<PostRow>> {
        self.with_conn(|conn| query_post_page(conn, Some(FOLLOWED_FILTER), &[&user_id], req))
    }

    pub fn explore_posts(&self, req: PageRequest) -> Result<Page<PostRow>> {
        self.with_conn(|conn| query_post_page(conn, None, &[], req))
    }

    pub fn user_posts(&self, user_id: i64, req: PageRequest) -> Result<Page<PostRow>> {
        self.with_conn(|conn| query_post_page(conn, Some("p.user_id = ?1"), &[&user_id], req))
    }

    pub fn get_post(&self, id: i64) -> Result<Option<PostRow>> {
        self.with_conn(|conn| query_post_by_id(conn, id))
    }

    /// Re-fetch posts by id, returned in the order of `ids`.
    ///
    /// Ids with no matching row are dropped.
    pub fn get_posts_by_ids(&self, ids: &[i64]) -> Result<Vec<PostRow>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON u.id = p.user_id WHERE p.id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();
            let mut rows = stmt
                .query_map(params.as_slice(), PostRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let rank: HashMap<i64, usize> = ids
                .iter()
                .enumerate()
                .map(|(pos, id)| (*id, pos))
                .rev()
                .collect();
            rows.sort_by_key(|row| rank.get(&row.id).copied().unwrap_or(usize::MAX));

            Ok(rows)
        })
    }

    /// Every post, oldest id first. Used for bulk reindexing.
    pub fn all_posts(&self) -> Result<Vec<PostRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON u.id = p.user_id ORDER BY p.id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], PostRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

pub(crate) fn query_post_by_id(conn: &Connection, id: i64) -> Result<Option<PostRow>> {
    let sql = format!("SELECT {POST_COLUMNS} FROM posts p JOIN users u ON u.id = p.user_id WHERE p.id = ?1");
    let row = conn.query_row(&sql, [id], PostRow::from_row).optional()?;
    Ok(row)
}

fn query_post_page(
    conn: &Connection,
    filter: Option<&str>,
    filter_params: &[&dyn ToSql],
    req: PageRequest,
) -> Result<Page<PostRow>> {
    let where_clause = filter.map(|f| format!("WHERE {f}")).unwrap_or_default();

    let count_sql = format!("SELECT COUNT(*) FROM posts p {where_clause}");
    let total: i64 = conn.query_row(&count_sql, filter_params, |r| r.get(0))?;

    // LIMIT/OFFSET are numbered after the filter's own parameters
    let limit_idx = filter_params.len() + 1;
    let sql = format!(
        "SELECT {POST_COLUMNS}
         FROM posts p
         JOIN users u ON u.id = p.user_id
         {where_clause}
         ORDER BY p.timestamp DESC, p.id DESC
         LIMIT ?{} OFFSET ?{}",
        limit_idx,
        limit_idx + 1
    );

    let per_page = i64::from(req.per_page);
    let offset = req.offset() as i64;
    let mut params: Vec<&dyn ToSql> = filter_params.to_vec();
    params.push(&per_page);
    params.push(&offset);

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params.as_slice(), PostRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(Page::new(rows, req.page, req.per_page, total as u64))
}
