//! Full-text search over committed item text.
//!
//! # Responsibility
//! - Match item names and string attribute values through SQLite FTS5.
//! - Restrict hits to items visible and live at a given repository version.
//!
//! # Invariants
//! - Uncommitted changes are never searched; callers see the committed
//!   state of their view's version.
//! - Result ordering is deterministic by rank, then item id.

use crate::model::item::{ItemId, Version};
use crate::query::QueryError;
use crate::repo::store::{parse_uuid, version_to_db, VISIBLE_ITEMS_CTE};
use crate::repo::{RepoError, RepoResult};
use log::{error, info};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, Row};
use std::time::Instant;

/// Default number of hits returned by a search.
pub const DEFAULT_SEARCH_LIMIT: u32 = 20;

/// Options for one full-text search.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub text: String,
    /// Exact kind path filter.
    pub kind: Option<String>,
    pub limit: u32,
    /// Pass `text` to FTS5 unchanged instead of quoting each term.
    ///
    /// Off by default so arbitrary user input never fails to parse.
    pub raw_fts_syntax: bool,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: None,
            limit: DEFAULT_SEARCH_LIMIT,
            raw_fts_syntax: false,
        }
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn raw(mut self) -> Self {
        self.raw_fts_syntax = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub item_id: ItemId,
    /// Kind path of the matched item.
    pub kind: String,
    /// Matched text with hits wrapped in `[` `]`.
    pub snippet: String,
}

/// Runs `query` against items committed at or before `at`.
///
/// Blank queries and a zero limit return no hits.
///
/// # Errors
/// - `QueryError::InvalidSearch` when a raw expression is rejected by FTS5.
pub fn search_committed(
    conn: &Connection,
    query: &SearchQuery,
    at: Version,
) -> RepoResult<Vec<SearchHit>> {
    let Some(match_expr) = build_match_expression(query) else {
        return Ok(Vec::new());
    };
    if query.limit == 0 {
        return Ok(Vec::new());
    }

    let started_at = Instant::now();
    let result = run_search(conn, query, &match_expr, at);
    match &result {
        Ok(hits) => info!(
            "event=search_run module=query status=ok version={at} hits={} duration_ms={}",
            hits.len(),
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=search_run module=query status=error version={at} duration_ms={} error={err}",
            started_at.elapsed().as_millis()
        ),
    }
    result
}

fn run_search(
    conn: &Connection,
    query: &SearchQuery,
    match_expr: &str,
    at: Version,
) -> RepoResult<Vec<SearchHit>> {
    let mut sql = format!(
        "{VISIBLE_ITEMS_CTE}
         SELECT
            visible.uuid AS uuid,
            visible.kind AS kind,
            snippet(item_text, 0, '[', ']', ' ... ', 10) AS snippet
         FROM item_text
         JOIN visible ON visible.row_id = item_text.rowid
         WHERE item_text MATCH ?2
           AND visible.is_deleted = 0"
    );
    let mut bind_values = vec![
        SqlValue::Integer(version_to_db(at)),
        SqlValue::Text(match_expr.to_string()),
    ];

    if let Some(kind) = &query.kind {
        bind_values.push(SqlValue::Text(kind.clone()));
        sql.push_str(&format!(" AND visible.kind = ?{}", bind_values.len()));
    }

    bind_values.push(SqlValue::Integer(i64::from(query.limit)));
    sql.push_str(&format!(
        " ORDER BY bm25(item_text), visible.uuid ASC LIMIT ?{}",
        bind_values.len()
    ));

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt
        .query(params_from_iter(bind_values))
        .map_err(|err| map_query_error(err, match_expr))?;
    let mut hits = Vec::new();
    while let Some(row) = rows.next().map_err(|err| map_query_error(err, match_expr))? {
        hits.push(parse_search_hit(row)?);
    }
    Ok(hits)
}

fn parse_search_hit(row: &Row<'_>) -> RepoResult<SearchHit> {
    let uuid_text: String = row.get("uuid")?;
    Ok(SearchHit {
        item_id: parse_uuid(&uuid_text, "uuid")?,
        kind: row.get("kind")?,
        snippet: row.get("snippet")?,
    })
}

/// Builds the FTS5 expression; every plain-text term must match.
fn build_match_expression(query: &SearchQuery) -> Option<String> {
    let text = query.text.trim();
    if text.is_empty() {
        return None;
    }
    if query.raw_fts_syntax {
        return Some(text.to_string());
    }
    let terms: Vec<String> = text.split_whitespace().map(quote_term).collect();
    (!terms.is_empty()).then(|| terms.join(" AND "))
}

fn quote_term(raw: &str) -> String {
    format!("\"{}\"", raw.replace('"', "\"\""))
}

fn map_query_error(err: rusqlite::Error, query: &str) -> RepoError {
    if is_match_syntax_error(&err) {
        return QueryError::InvalidSearch {
            query: query.to_string(),
            message: err.to_string(),
        }
        .into();
    }
    err.into()
}

fn is_match_syntax_error(err: &rusqlite::Error) -> bool {
    let rusqlite::Error::SqliteFailure(_, Some(message)) = err else {
        return false;
    };
    let message = message.to_lowercase();
    (message.contains("fts5") && message.contains("syntax"))
        || message.contains("malformed match expression")
        || message.contains("unterminated")
}

#[cfg(test)]
mod tests {
    use super::{build_match_expression, SearchQuery};

    #[test]
    fn plain_terms_are_quoted_and_joined() {
        let expr = build_match_expression(&SearchQuery::new(r#" team "sync" "#));
        assert_eq!(expr.as_deref(), Some(r#""team" AND """sync""""#));
    }

    #[test]
    fn blank_text_builds_nothing() {
        assert_eq!(build_match_expression(&SearchQuery::new("   ")), None);
    }

    #[test]
    fn raw_syntax_is_passed_through() {
        let expr = build_match_expression(&SearchQuery::new("alpha OR beta").raw());
        assert_eq!(expr.as_deref(), Some("alpha OR beta"));
    }
}
