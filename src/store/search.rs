//! Episode full-text index and the queries against it
//!
//! `episode_search` is an FTS4 table whose `docid` is the episode id. It is
//! never updated incrementally; callers rebuild it after bulk episode writes.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use tracing::{debug, error};

use super::schema::EPISODE_SEARCH;
use crate::config::SearchConfig;
use crate::error::Result;

/// How much of the episode text made it into the rebuilt index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexRebuild {
    /// Titles and overviews
    Full,
    /// Overviews could not be read; titles only
    TitlesOnly,
    /// Nothing could be copied; the index exists but is empty
    Unpopulated,
}

const POPULATE_FULL: &str =
    "INSERT INTO episode_search (docid, title, overview) SELECT id, title, overview FROM episodes";

const POPULATE_TITLES: &str =
    "INSERT INTO episode_search (docid, title) SELECT id, title FROM episodes";

/// Drop and recreate the index, then fill it from `episodes`.
///
/// A failed recreate leaves the previous index in place and is returned as
/// an error. Failed inserts fall back to titles only, then to an empty index.
pub fn rebuild_search_index(conn: &Connection) -> Result<IndexRebuild> {
    recreate_index(conn)?;
    match conn.execute(POPULATE_FULL, []) {
        Ok(rows) => {
            debug!(rows, "indexed episode titles and overviews");
            return Ok(IndexRebuild::Full);
        }
        Err(e) => error!(error = %e, "indexing overviews failed, retrying with titles only"),
    }

    recreate_index(conn)?;
    match conn.execute(POPULATE_TITLES, []) {
        Ok(rows) => {
            debug!(rows, "indexed episode titles");
            Ok(IndexRebuild::TitlesOnly)
        }
        Err(e) => {
            error!(error = %e, "indexing episode titles failed, search index left empty");
            Ok(IndexRebuild::Unpopulated)
        }
    }
}

fn recreate_index(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {}; {};",
        EPISODE_SEARCH.name,
        EPISODE_SEARCH.create_sql()
    ))?;
    tx.commit()?;
    Ok(())
}

/// Quote a user term as a single FTS prefix phrase. Embedded quotes are
/// removed so the term cannot alter the match expression.
pub fn sanitize_term(term: &str) -> String {
    format!("\"{}*\"", term.replace('"', ""))
}

/// Typed restrictions applied on top of the text match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    pub show_id: Option<i64>,
    pub season: Option<i64>,
    pub watched: Option<bool>,
}

impl SearchFilter {
    fn clauses(&self, params: &mut Vec<Value>) -> Vec<String> {
        let mut clauses = Vec::new();
        if let Some(show_id) = self.show_id {
            params.push(Value::Integer(show_id));
            clauses.push(format!("e.show_id = ?{}", params.len()));
        }
        if let Some(season) = self.season {
            params.push(Value::Integer(season));
            clauses.push(format!("e.season = ?{}", params.len()));
        }
        if let Some(watched) = self.watched {
            params.push(Value::Integer(i64::from(watched)));
            clauses.push(format!("e.watched = ?{}", params.len()));
        }
        clauses
    }
}

/// Marker strings handed to FTS `snippet()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnippetMarkers {
    pub start: String,
    pub end: String,
    pub ellipsis: String,
}

impl From<&SearchConfig> for SnippetMarkers {
    fn from(config: &SearchConfig) -> Self {
        Self {
            start: config.snippet_start.clone(),
            end: config.snippet_end.clone(),
            ellipsis: config.snippet_ellipsis.clone(),
        }
    }
}

impl Default for SnippetMarkers {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub episode_id: i64,
    pub title: String,
    pub snippet: Option<String>,
    pub number: i64,
    pub season: i64,
    pub watched: bool,
    pub show_title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub episode_id: i64,
    pub title: String,
    pub show_title: String,
}

/// Episodes whose title or overview contains a word starting with `term`.
///
/// `None` means the query itself failed (already logged).
pub fn search(
    conn: &Connection,
    term: &str,
    filter: Option<&SearchFilter>,
    markers: &SnippetMarkers,
) -> Option<Vec<SearchResult>> {
    if term.trim().is_empty() {
        return Some(Vec::new());
    }
    match run_search(conn, term, filter, markers) {
        Ok(results) => Some(results),
        Err(e) => {
            error!(error = %e, term, "episode search failed");
            None
        }
    }
}

fn run_search(
    conn: &Connection,
    term: &str,
    filter: Option<&SearchFilter>,
    markers: &SnippetMarkers,
) -> Result<Vec<SearchResult>> {
    let mut params = vec![
        Value::Text(sanitize_term(term)),
        Value::Text(markers.start.clone()),
        Value::Text(markers.end.clone()),
        Value::Text(markers.ellipsis.clone()),
    ];
    let clauses = filter.map(|f| f.clauses(&mut params)).unwrap_or_default();
    let predicate = if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    };

    let sql = format!(
        r#"SELECT e.id, e.title, s.snippet, e.number, e.season, e.watched, sh.title
           FROM (SELECT docid, snippet(episode_search, ?2, ?3, ?4) AS snippet
                 FROM episode_search WHERE episode_search MATCH ?1) s
           JOIN episodes e ON e.id = s.docid
           JOIN shows sh ON sh.id = e.show_id{}
           ORDER BY sh.title, e.season, e.number"#,
        predicate
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(params), |row| {
        Ok(SearchResult {
            episode_id: row.get(0)?,
            title: row.get(1)?,
            snippet: row.get(2)?,
            number: row.get::<_, Option<i64>>(3)?.unwrap_or_default(),
            season: row.get::<_, Option<i64>>(4)?.unwrap_or_default(),
            watched: row.get::<_, Option<i64>>(5)?.unwrap_or_default() == 1,
            show_title: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

/// Episodes whose title or overview match `term`, ordered by show title.
pub fn suggest(conn: &Connection, term: &str) -> Option<Vec<Suggestion>> {
    if term.trim().is_empty() {
        return Some(Vec::new());
    }
    match run_suggest(conn, term) {
        Ok(suggestions) => Some(suggestions),
        Err(e) => {
            error!(error = %e, term, "episode suggestions failed");
            None
        }
    }
}

fn run_suggest(conn: &Connection, term: &str) -> Result<Vec<Suggestion>> {
    let mut stmt = conn.prepare(
        r#"SELECT e.id, e.title, sh.title
           FROM (SELECT docid FROM episode_search WHERE episode_search MATCH ?1) s
           JOIN episodes e ON e.id = s.docid
           JOIN shows sh ON sh.id = e.show_id
           ORDER BY sh.title, e.season, e.number"#,
    )?;
    let rows = stmt.query_map([sanitize_term(term)], |row| {
        Ok(Suggestion {
            episode_id: row.get(0)?,
            title: row.get(1)?,
            show_title: row.get(2)?,
        })
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}
