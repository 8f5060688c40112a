//! Watch-progress storage with SQLite - schema v38
//!
//! Opening a store brings the file to the current schema before the handle
//! is returned:
//! - a new file gets the full schema,
//! - versions 16..37 are upgraded step by step,
//! - anything else (unversioned tables, 1..15, newer than 38, a failed
//!   upgrade) is wiped and recreated.

#[cfg(test)]
mod legacy;
pub mod list_items;
pub mod migrations;
pub mod schema;
pub mod search;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::timetools::{self, StandardCalendar};

pub use list_items::{ListEntry, ListItemDetails, ListItemKind};
pub use migrations::{MigrationChain, MigrationContext};
pub use schema::{DATABASE_VERSION, OLDEST_UPGRADABLE_VERSION};
pub use search::{IndexRebuild, SearchFilter, SearchResult, SnippetMarkers, Suggestion};

/// What `open` had to do to make the schema current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OpenOutcome {
    Created,
    Current,
    Upgraded { from: i64 },
    Reset { reason: ResetReason },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetReason {
    /// Tables exist but no version was ever recorded
    Unversioned,
    TooOld { found: i64 },
    Downgrade { found: i64 },
    MigrationFailed { from: i64, failed_at: Option<i64> },
    IncompleteUpgrade { found: i64 },
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetReason::Unversioned => write!(f, "unversioned tables"),
            ResetReason::TooOld { found } => write!(f, "version {} is too old to upgrade", found),
            ResetReason::Downgrade { found } => write!(f, "version {} is newer than this build", found),
            ResetReason::MigrationFailed { from, failed_at: Some(v) } => {
                write!(f, "upgrade from {} failed at version {}", from, v)
            }
            ResetReason::MigrationFailed { from, failed_at: None } => {
                write!(f, "upgrade from {} failed", from)
            }
            ResetReason::IncompleteUpgrade { found } => {
                write!(f, "upgrade stopped at version {}", found)
            }
        }
    }
}

impl fmt::Display for OpenOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenOutcome::Created => write!(f, "created"),
            OpenOutcome::Current => write!(f, "current"),
            OpenOutcome::Upgraded { from } => write!(f, "upgraded from version {}", from),
            OpenOutcome::Reset { reason } => write!(f, "reset ({})", reason),
        }
    }
}

pub struct ShowStore {
    conn: Connection,
    markers: SnippetMarkers,
    outcome: OpenOutcome,
}

impl ShowStore {
    pub fn open(path: &Path, config: &Config) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::from_connection(conn, config)
    }

    pub fn open_in_memory(config: &Config) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, config)
    }

    fn from_connection(mut conn: Connection, config: &Config) -> Result<Self> {
        let calendar = StandardCalendar::from_config(&config.calendar)?;
        // enforcement stays off until the schema is current
        conn.pragma_update(None, "foreign_keys", false)?;
        let outcome = prepare_schema(&mut conn, &calendar)?;
        conn.pragma_update(None, "foreign_keys", config.database.enforce_foreign_keys)?;
        debug!(%outcome, "store ready");

        Ok(Self {
            conn,
            markers: SnippetMarkers::from(&config.search),
            outcome,
        })
    }

    pub fn open_outcome(&self) -> &OpenOutcome {
        &self.outcome
    }

    /// Borrow the connection for collaborators that run their own queries.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn schema_version(&self) -> Result<i64> {
        read_user_version(&self.conn)
    }

    pub fn schema_fingerprint(&self) -> Result<String> {
        schema::fingerprint(&self.conn)
    }

    pub fn table_row_counts(&self) -> Result<Vec<(&'static str, i64)>> {
        let mut counts = Vec::with_capacity(schema::TABLES.len());
        for table in schema::TABLES.iter() {
            let count: i64 = self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", table.name),
                [],
                |row| row.get(0),
            )?;
            counts.push((table.name, count));
        }
        Ok(counts)
    }

    // ============================================
    // SHOWS, SEASONS & EPISODES
    // ============================================

    pub fn insert_show(&self, show: &ShowRecord) -> Result<()> {
        self.conn.execute(
            r#"INSERT INTO shows
               (id, title, title_no_article, overview, network, status, release_time,
                release_weekday, release_timezone, release_country, poster, favorite,
                hidden, language, last_updated)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   title = excluded.title,
                   title_no_article = excluded.title_no_article,
                   overview = excluded.overview,
                   network = excluded.network,
                   status = excluded.status,
                   release_time = excluded.release_time,
                   release_weekday = excluded.release_weekday,
                   release_timezone = excluded.release_timezone,
                   release_country = excluded.release_country,
                   poster = excluded.poster,
                   favorite = excluded.favorite,
                   hidden = excluded.hidden,
                   language = excluded.language,
                   last_updated = excluded.last_updated"#,
            params![
                show.id,
                show.title,
                timetools::trim_leading_article(&show.title),
                show.overview,
                show.network,
                show.status.code(),
                show.release_time,
                show.release_weekday,
                show.release_timezone,
                show.release_country,
                show.poster,
                show.favorite,
                show.hidden,
                show.language,
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn insert_season(&self, season: &SeasonRecord) -> Result<()> {
        self.conn.execute(
            r#"INSERT INTO seasons (id, combined_number, show_id, total_count)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   combined_number = excluded.combined_number,
                   show_id = excluded.show_id,
                   total_count = excluded.total_count"#,
            params![season.id, season.number, season.show_id, season.total_count],
        )?;
        Ok(())
    }

    pub fn insert_episode(&self, episode: &EpisodeRecord) -> Result<()> {
        self.conn.execute(
            r#"INSERT INTO episodes
               (id, title, overview, number, season, season_id, show_id, first_aired_ms,
                absolute_number, last_edited)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   title = excluded.title,
                   overview = excluded.overview,
                   number = excluded.number,
                   season = excluded.season,
                   season_id = excluded.season_id,
                   show_id = excluded.show_id,
                   first_aired_ms = excluded.first_aired_ms,
                   absolute_number = excluded.absolute_number,
                   last_edited = excluded.last_edited"#,
            params![
                episode.id,
                episode.title,
                episode.overview,
                episode.number,
                episode.season,
                episode.season_id,
                episode.show_id,
                episode.first_aired_ms,
                episode.absolute_number,
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    /// Flag an episode watched or not. Watching also moves the show's last
    /// watched episode and records an activity entry.
    ///
    /// Returns `false` if the episode does not exist.
    pub fn set_episode_watched(&self, episode_id: i64, watched: bool) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let show_id: Option<Option<i64>> = tx
            .query_row(
                "SELECT show_id FROM episodes WHERE id = ?",
                params![episode_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(show_id) = show_id else {
            return Ok(false);
        };

        tx.execute(
            "UPDATE episodes SET watched = ? WHERE id = ?",
            params![watched, episode_id],
        )?;
        if let (true, Some(show_id)) = (watched, show_id) {
            tx.execute(
                "UPDATE shows SET last_watched_id = ? WHERE id = ?",
                params![episode_id, show_id],
            )?;
            tx.execute(
                "INSERT INTO activity (episode_tvdb_id, show_tvdb_id, timestamp_ms) VALUES (?, ?, ?)",
                params![episode_id, show_id, Utc::now().timestamp_millis()],
            )?;
        }
        tx.commit()?;
        Ok(true)
    }

    /// Watched/total counts plus the last watched and next episode, if the
    /// show exists. Either episode is `None` when its reference dangles.
    pub fn show_progress(&self, show_id: i64) -> Result<Option<ShowProgress>> {
        let last = self
            .conn
            .query_row(
                &format!(
                    "SELECT shows.title, episodes.id, episodes.title, episodes.season, episodes.number
                     FROM {} WHERE shows.id = ?",
                    schema::SHOWS_JOIN_EPISODES_ON_LAST_EPISODE
                ),
                params![show_id],
                |row| Ok((row.get::<_, String>(0)?, read_episode_ref(row, 1)?)),
            )
            .optional()?;
        let Some((title, last_watched)) = last else {
            return Ok(None);
        };

        let next_episode = self.conn.query_row(
            &format!(
                "SELECT episodes.id, episodes.title, episodes.season, episodes.number
                 FROM {} WHERE shows.id = ?",
                schema::SHOWS_JOIN_EPISODES_ON_NEXT_EPISODE
            ),
            params![show_id],
            |row| read_episode_ref(row, 0),
        )?;

        let (total, watched): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(watched = 1), 0) FROM episodes WHERE show_id = ?",
            params![show_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(Some(ShowProgress {
            show_id,
            title,
            watched,
            total,
            last_watched,
            next_episode,
        }))
    }

    pub fn set_next_episode(&self, show_id: i64, episode_id: Option<i64>) -> Result<()> {
        let next = episode_id.map(|id| id.to_string()).unwrap_or_default();
        self.conn.execute(
            "UPDATE shows SET next_episode = ? WHERE id = ?",
            params![next, show_id],
        )?;
        Ok(())
    }

    // ============================================
    // LISTS
    // ============================================

    pub fn upsert_list(&self, list_id: &str, name: &str, order: i64) -> Result<()> {
        self.conn.execute(
            r#"INSERT INTO lists (list_id, name, list_order) VALUES (?, ?, ?)
               ON CONFLICT(list_id) DO UPDATE SET
                   name = excluded.name,
                   list_order = excluded.list_order"#,
            params![list_id, name, order],
        )?;
        Ok(())
    }

    /// Add an item to a list, returning its `list_item_id`. Adding the same
    /// item twice keeps one row.
    pub fn upsert_list_item(&self, list_id: &str, ref_id: i64, kind: ListItemKind) -> Result<String> {
        let list_item_id = format!("{}-{}-{}", ref_id, kind.code(), list_id);
        self.conn.execute(
            "INSERT INTO list_items (list_item_id, item_ref_id, item_type, list_id) VALUES (?, ?, ?, ?)",
            params![list_item_id, ref_id, kind.code(), list_id],
        )?;
        Ok(list_item_id)
    }

    pub fn lists(&self) -> Result<Vec<ListRow>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT l.list_id, l.name, l.list_order,
                      (SELECT COUNT(*) FROM list_items li WHERE li.list_id = l.list_id) AS item_count
               FROM lists l
               ORDER BY l.list_order, l.name"#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ListRow {
                list_id: row.get(0)?,
                name: row.get(1)?,
                list_order: row.get::<_, Option<i64>>(2)?.unwrap_or_default(),
                item_count: row.get(3)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Resolved items of one list, or of every list.
    pub fn list_items(&self, list_id: Option<&str>) -> Result<Vec<ListEntry>> {
        list_items::list_items(&self.conn, list_id)
    }

    // ============================================
    // MOVIES & ACTIVITY
    // ============================================

    /// Insert or replace a movie by its TMDb id.
    pub fn upsert_movie(&self, movie: &MovieRecord) -> Result<()> {
        self.conn.execute(
            r#"INSERT INTO movies
               (tmdb_id, imdb_id, title, title_no_article, overview, released_utc_ms,
                runtime_min, in_collection, in_watchlist, watched, plays, last_updated)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                movie.tmdb_id,
                movie.imdb_id,
                movie.title,
                timetools::trim_leading_article(&movie.title),
                movie.overview,
                movie.released_utc_ms,
                movie.runtime_min,
                movie.in_collection,
                movie.in_watchlist,
                movie.watched,
                movie.plays,
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    pub fn movie(&self, tmdb_id: i64) -> Result<Option<MovieRow>> {
        let row = self
            .conn
            .query_row(
                r#"SELECT tmdb_id, title, title_no_article, released_utc_ms, runtime_min,
                          in_collection, in_watchlist, watched
                   FROM movies WHERE tmdb_id = ?"#,
                params![tmdb_id],
                |row| {
                    Ok(MovieRow {
                        tmdb_id: row.get(0)?,
                        title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        sort_title: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        released_utc_ms: row.get(3)?,
                        runtime_min: row.get::<_, Option<i64>>(4)?.unwrap_or_default(),
                        in_collection: row.get::<_, Option<bool>>(5)?.unwrap_or_default(),
                        in_watchlist: row.get::<_, Option<bool>>(6)?.unwrap_or_default(),
                        watched: row.get::<_, Option<bool>>(7)?.unwrap_or_default(),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    /// Record a watch event; one entry per episode, the newest wins.
    pub fn record_activity(&self, episode_id: i64, show_id: i64, timestamp_ms: i64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO activity (episode_tvdb_id, show_tvdb_id, timestamp_ms) VALUES (?, ?, ?)",
            params![episode_id, show_id, timestamp_ms],
        )?;
        Ok(())
    }

    pub fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityRow>> {
        let mut stmt = self.conn.prepare(
            r#"SELECT a.episode_tvdb_id, a.show_tvdb_id, a.timestamp_ms, e.title, sh.title
               FROM activity a
               LEFT JOIN episodes e ON e.id = a.episode_tvdb_id
               LEFT JOIN shows sh ON sh.id = a.show_tvdb_id
               ORDER BY a.timestamp_ms DESC
               LIMIT ?"#,
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(ActivityRow {
                episode_id: row.get(0)?,
                show_id: row.get(1)?,
                timestamp_ms: row.get(2)?,
                episode_title: row.get(3)?,
                show_title: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    // ============================================
    // SEARCH
    // ============================================

    pub fn rebuild_search_index(&self) -> Result<IndexRebuild> {
        let rebuild = search::rebuild_search_index(&self.conn)?;
        info!(?rebuild, "rebuilt episode search index");
        Ok(rebuild)
    }

    pub fn search(&self, term: &str, filter: Option<&SearchFilter>) -> Option<Vec<SearchResult>> {
        search::search(&self.conn, term, filter, &self.markers)
    }

    pub fn suggest(&self, term: &str) -> Option<Vec<Suggestion>> {
        search::suggest(&self.conn, term)
    }
}

// ============================================
// SCHEMA LIFECYCLE
// ============================================

fn read_user_version(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

fn has_user_tables(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn prepare_schema(conn: &mut Connection, calendar: &StandardCalendar) -> Result<OpenOutcome> {
    let stored = read_user_version(conn)?;

    let reason = match stored {
        DATABASE_VERSION => return Ok(OpenOutcome::Current),
        0 if !has_user_tables(conn)? => {
            create_schema(conn)?;
            info!(version = DATABASE_VERSION, "created schema");
            return Ok(OpenOutcome::Created);
        }
        0 => ResetReason::Unversioned,
        v if v > DATABASE_VERSION => ResetReason::Downgrade { found: v },
        v if v < OLDEST_UPGRADABLE_VERSION => ResetReason::TooOld { found: v },
        from => match upgrade(conn, from, calendar) {
            Ok(()) => return Ok(OpenOutcome::Upgraded { from }),
            Err(reason) => reason,
        },
    };

    warn!(stored, %reason, "destroying stored data and recreating schema");
    reset_schema(conn)?;
    Ok(OpenOutcome::Reset { reason })
}

fn upgrade(
    conn: &mut Connection,
    from: i64,
    calendar: &StandardCalendar,
) -> std::result::Result<(), ResetReason> {
    let ctx = MigrationContext { calendar };
    match MigrationChain::standard().upgrade(conn, from, DATABASE_VERSION, &ctx) {
        Ok(_) => {}
        Err(e) => {
            error!(error = %e, from, "schema upgrade failed");
            let failed_at = match e {
                StoreError::Migration { version, .. } => Some(version),
                _ => None,
            };
            return Err(ResetReason::MigrationFailed { from, failed_at });
        }
    }

    match read_user_version(conn) {
        Ok(DATABASE_VERSION) => {
            info!(from, to = DATABASE_VERSION, "upgraded schema");
            Ok(())
        }
        Ok(found) => {
            let e = StoreError::VersionMismatch {
                found,
                expected: DATABASE_VERSION,
            };
            error!(error = %e, "schema upgrade incomplete");
            Err(ResetReason::IncompleteUpgrade { found })
        }
        Err(e) => {
            error!(error = %e, "could not read schema version after upgrade");
            Err(ResetReason::MigrationFailed { from, failed_at: None })
        }
    }
}

fn create_schema(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    schema::create_all(&tx)?;
    tx.pragma_update(None, "user_version", DATABASE_VERSION)?;
    tx.commit()?;
    Ok(())
}

/// Drop every user table and view, then create the current schema.
fn reset_schema(conn: &mut Connection) -> Result<()> {
    schema::with_foreign_keys_off(conn, drop_and_recreate)
}

fn drop_and_recreate(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    // virtual tables first; their shadow tables go with them
    let virtual_tables = object_names(
        &tx,
        "SELECT name FROM sqlite_master WHERE type = 'table' AND sql LIKE 'CREATE VIRTUAL TABLE%'",
    )?;
    for name in virtual_tables {
        tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{}\"", name))?;
    }
    for name in object_names(&tx, "SELECT name FROM sqlite_master WHERE type = 'view'")? {
        tx.execute_batch(&format!("DROP VIEW IF EXISTS \"{}\"", name))?;
    }
    let tables = object_names(
        &tx,
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )?;
    for name in tables {
        tx.execute_batch(&format!("DROP TABLE IF EXISTS \"{}\"", name))?;
    }
    if schema::table_exists(&tx, "sqlite_sequence")? {
        tx.execute_batch("DELETE FROM sqlite_sequence")?;
    }

    schema::create_all(&tx)?;
    tx.pragma_update(None, "user_version", DATABASE_VERSION)?;
    tx.commit()?;
    Ok(())
}

fn object_names(conn: &Connection, sql: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

fn read_episode_ref(row: &rusqlite::Row, offset: usize) -> rusqlite::Result<Option<EpisodeRef>> {
    let Some(id) = row.get::<_, Option<i64>>(offset)? else {
        return Ok(None);
    };
    Ok(Some(EpisodeRef {
        id,
        title: row.get::<_, Option<String>>(offset + 1)?.unwrap_or_default(),
        season: row.get::<_, Option<i64>>(offset + 2)?.unwrap_or_default(),
        number: row.get::<_, Option<i64>>(offset + 3)?.unwrap_or_default(),
    }))
}

// ============================================
// RECORD TYPES
// ============================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowStatus {
    Continuing,
    Ended,
    #[default]
    Unknown,
}

impl ShowStatus {
    /// Stored encoding of the status column.
    pub fn code(&self) -> &'static str {
        match self {
            ShowStatus::Continuing => "1",
            ShowStatus::Ended => "0",
            ShowStatus::Unknown => "",
        }
    }

    pub fn from_code(code: &str) -> Self {
        match code {
            "1" => ShowStatus::Continuing,
            "0" => ShowStatus::Ended,
            _ => ShowStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShowRecord {
    pub id: i64,
    pub title: String,
    pub overview: Option<String>,
    pub network: Option<String>,
    pub status: ShowStatus,
    /// Packed `HHMM`, `-1` when unknown
    pub release_time: i32,
    pub release_weekday: i32,
    pub release_timezone: Option<String>,
    pub release_country: Option<String>,
    pub poster: Option<String>,
    pub favorite: bool,
    pub hidden: bool,
    pub language: Option<String>,
}

impl ShowRecord {
    pub fn new(id: i64, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            overview: None,
            network: None,
            status: ShowStatus::Unknown,
            release_time: timetools::UNKNOWN as i32,
            release_weekday: timetools::RELEASE_WEEKDAY_UNKNOWN,
            release_timezone: None,
            release_country: None,
            poster: None,
            favorite: false,
            hidden: false,
            language: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SeasonRecord {
    pub id: i64,
    pub show_id: i64,
    pub number: i64,
    pub total_count: i64,
}

#[derive(Debug, Clone)]
pub struct EpisodeRecord {
    pub id: i64,
    pub show_id: i64,
    pub season_id: Option<i64>,
    pub season: i64,
    pub number: i64,
    pub title: String,
    pub overview: Option<String>,
    /// UTC milliseconds, `-1` when unknown
    pub first_aired_ms: i64,
    pub absolute_number: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct MovieRecord {
    pub tmdb_id: i64,
    pub imdb_id: Option<String>,
    pub title: String,
    pub overview: Option<String>,
    pub released_utc_ms: Option<i64>,
    pub runtime_min: i64,
    pub in_collection: bool,
    pub in_watchlist: bool,
    pub watched: bool,
    pub plays: i64,
}

// ============================================
// ROW TYPES
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeRef {
    pub id: i64,
    pub title: String,
    pub season: i64,
    pub number: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShowProgress {
    pub show_id: i64,
    pub title: String,
    pub watched: i64,
    pub total: i64,
    pub last_watched: Option<EpisodeRef>,
    pub next_episode: Option<EpisodeRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListRow {
    pub list_id: String,
    pub name: String,
    pub list_order: i64,
    pub item_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovieRow {
    pub tmdb_id: i64,
    pub title: String,
    pub sort_title: String,
    pub released_utc_ms: Option<i64>,
    pub runtime_min: i64,
    pub in_collection: bool,
    pub in_watchlist: bool,
    pub watched: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityRow {
    pub episode_id: i64,
    pub show_id: i64,
    pub timestamp_ms: i64,
    pub episode_title: Option<String>,
    pub show_title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CalendarConfig;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.calendar = CalendarConfig {
            device_timezone: Some("UTC".to_string()),
            ..CalendarConfig::default()
        };
        config
    }

    fn fresh_fingerprint() -> String {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_all(&conn).unwrap();
        schema::fingerprint(&conn).unwrap()
    }

    fn seed_show(store: &ShowStore) {
        store.insert_show(&ShowRecord::new(1, "The Expanse")).unwrap();
        store
            .insert_season(&SeasonRecord {
                id: 100,
                show_id: 1,
                number: 1,
                total_count: 3,
            })
            .unwrap();
        for (id, number, title) in [(1001, 1, "Dulcinea"), (1002, 2, "The Big Empty"), (1003, 3, "Remember the Cant")] {
            store
                .insert_episode(&EpisodeRecord {
                    id,
                    show_id: 1,
                    season_id: Some(100),
                    season: 1,
                    number,
                    title: title.to_string(),
                    overview: Some(format!("Episode {} of the Expanse.", number)),
                    first_aired_ms: 1_449_000_000_000 + number * 604_800_000,
                    absolute_number: Some(number),
                })
                .unwrap();
        }
    }

    #[test]
    fn test_fresh_store() {
        let store = ShowStore::open_in_memory(&test_config()).unwrap();
        assert_eq!(store.open_outcome(), &OpenOutcome::Created);
        assert_eq!(store.schema_version().unwrap(), DATABASE_VERSION);
        assert_eq!(store.schema_fingerprint().unwrap(), fresh_fingerprint());
        assert!(store.table_row_counts().unwrap().iter().all(|(_, n)| *n == 0));
    }

    #[test]
    fn test_reopen_is_current_and_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("shows.db");
        {
            let store = ShowStore::open(&path, &test_config()).unwrap();
            seed_show(&store);
        }
        let store = ShowStore::open(&path, &test_config()).unwrap();
        assert_eq!(store.open_outcome(), &OpenOutcome::Current);
        let counts = store.table_row_counts().unwrap();
        assert!(counts.contains(&("episodes", 3)));
    }

    #[test]
    fn test_legacy_database_is_upgraded_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.db");
        {
            let conn = Connection::open(&path).unwrap();
            legacy::create_version_16(&conn).unwrap();
            conn.execute_batch(
                "INSERT INTO shows (id, title, status, release_weekday) VALUES (1, 'The Wire', 'Ended', 'Sunday');
                 INSERT INTO episodes (id, title, number, season, show_id, watched, first_aired)
                 VALUES (10, 'The Target', 1, 1, 1, 1, '2002-06-02');",
            )
            .unwrap();
        }

        let store = ShowStore::open(&path, &test_config()).unwrap();
        assert_eq!(
            store.open_outcome(),
            &OpenOutcome::Upgraded {
                from: legacy::VERSION_16
            }
        );
        assert_eq!(store.schema_version().unwrap(), DATABASE_VERSION);
        assert_eq!(store.schema_fingerprint().unwrap(), fresh_fingerprint());

        let progress = store.show_progress(1).unwrap().unwrap();
        assert_eq!(progress.title, "The Wire");
        assert_eq!(progress.watched, 1);
        assert_eq!(progress.last_watched.map(|e| e.id), Some(10));
    }

    fn populate_version_16(conn: &Connection) {
        legacy::create_version_16(conn).unwrap();
        conn.execute_batch(
            "INSERT INTO shows (id, title, status, release_time, release_weekday)
             VALUES (1, 'Deadwood', 'Ended', 79200000, 'Sunday');
             INSERT INTO seasons (id, combined_number, show_id) VALUES (100, 1, 1);
             INSERT INTO episodes (id, title, overview, number, season, season_id, show_id, watched, first_aired)
             VALUES (10, 'Deadwood', 'A camp in the hills.', 1, 1, 100, 1, 1, '2004-03-21'),
                    (11, 'Deep Water', 'A body in the creek.', 2, 1, 100, 1, 0, '2004-03-28');
             INSERT INTO episode_search (docid, title, overview)
             VALUES (10, 'Deadwood', 'A camp in the hills.'),
                    (11, 'Deep Water', 'A body in the creek.');",
        )
        .unwrap();
    }

    #[test]
    fn test_populated_legacy_database_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("populated.db");
        {
            let conn = Connection::open(&path).unwrap();
            populate_version_16(&conn);
        }

        let store = ShowStore::open(&path, &test_config()).unwrap();
        assert_eq!(
            store.open_outcome(),
            &OpenOutcome::Upgraded {
                from: legacy::VERSION_16
            }
        );
        assert_eq!(store.schema_fingerprint().unwrap(), fresh_fingerprint());
        assert!(schema::foreign_keys_enabled(store.connection()).unwrap());

        let counts = store.table_row_counts().unwrap();
        for expected in [("shows", 1), ("seasons", 1), ("episodes", 2), ("episode_search", 2)] {
            assert!(counts.contains(&expected), "{:?} missing from {:?}", expected, counts);
        }
        let (weekday, release_time): (i64, i64) = store
            .connection()
            .query_row("SELECT release_weekday, release_time FROM shows WHERE id = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!((weekday, release_time), (7, 1400));

        let progress = store.show_progress(1).unwrap().unwrap();
        assert_eq!((progress.watched, progress.total), (1, 2));
        assert_eq!(progress.last_watched.map(|e| e.id), Some(10));
    }

    #[test]
    fn test_failed_upgrade_of_populated_database_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocked.db");
        {
            // a view squatting on the movies name makes step 32 fail
            let conn = Connection::open(&path).unwrap();
            populate_version_16(&conn);
            conn.execute_batch("CREATE VIEW movies AS SELECT id, title FROM shows;")
                .unwrap();
        }

        let store = ShowStore::open(&path, &test_config()).unwrap();
        assert_eq!(
            store.open_outcome(),
            &OpenOutcome::Reset {
                reason: ResetReason::MigrationFailed {
                    from: legacy::VERSION_16,
                    failed_at: Some(32)
                }
            }
        );
        assert_eq!(store.schema_version().unwrap(), DATABASE_VERSION);
        assert_eq!(store.schema_fingerprint().unwrap(), fresh_fingerprint());
        assert!(store.table_row_counts().unwrap().iter().all(|(_, n)| *n == 0));
        assert!(schema::foreign_keys_enabled(store.connection()).unwrap());
    }

    #[test]
    fn test_unsupported_versions_reset() {
        for (version, reason) in [
            (12, ResetReason::TooOld { found: 12 }),
            (45, ResetReason::Downgrade { found: 45 }),
        ] {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("old.db");
            {
                let conn = Connection::open(&path).unwrap();
                conn.execute_batch(&format!(
                    "CREATE TABLE shows (id INTEGER PRIMARY KEY, title TEXT);
                     INSERT INTO shows VALUES (1, 'Gone');
                     PRAGMA user_version = {};",
                    version
                ))
                .unwrap();
            }

            let store = ShowStore::open(&path, &test_config()).unwrap();
            assert_eq!(store.open_outcome(), &OpenOutcome::Reset { reason });
            assert_eq!(store.schema_version().unwrap(), DATABASE_VERSION);
            assert_eq!(store.schema_fingerprint().unwrap(), fresh_fingerprint());
            assert!(store.table_row_counts().unwrap().iter().all(|(_, n)| *n == 0));
            assert!(store.show_progress(1).unwrap().is_none());
        }
    }

    #[test]
    fn test_unversioned_tables_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stray.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE notes (body TEXT);
                 CREATE VIEW note_view AS SELECT body FROM notes;
                 CREATE VIRTUAL TABLE note_search USING fts4(body);",
            )
            .unwrap();
        }

        let store = ShowStore::open(&path, &test_config()).unwrap();
        assert_eq!(
            store.open_outcome(),
            &OpenOutcome::Reset {
                reason: ResetReason::Unversioned
            }
        );
        assert!(!schema::table_exists(store.connection(), "notes").unwrap());
        assert!(!schema::table_exists(store.connection(), "note_search").unwrap());
        assert_eq!(store.schema_fingerprint().unwrap(), fresh_fingerprint());
    }

    #[test]
    fn test_failed_upgrade_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.db");
        {
            // claims version 20 but has no shows table for step 21 to alter
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE episodes (id INTEGER PRIMARY KEY, title TEXT);
                 PRAGMA user_version = 20;",
            )
            .unwrap();
        }

        let store = ShowStore::open(&path, &test_config()).unwrap();
        assert_eq!(
            store.open_outcome(),
            &OpenOutcome::Reset {
                reason: ResetReason::MigrationFailed {
                    from: 20,
                    failed_at: Some(21)
                }
            }
        );
        assert_eq!(store.schema_version().unwrap(), DATABASE_VERSION);
        assert_eq!(store.schema_fingerprint().unwrap(), fresh_fingerprint());
    }

    #[test]
    fn test_foreign_keys_follow_config() {
        let store = ShowStore::open_in_memory(&test_config()).unwrap();
        let orphan = SeasonRecord {
            id: 1,
            show_id: 404,
            number: 1,
            total_count: 0,
        };
        assert!(store.insert_season(&orphan).is_err());

        let mut config = test_config();
        config.database.enforce_foreign_keys = false;
        let lax = ShowStore::open_in_memory(&config).unwrap();
        assert!(!schema::foreign_keys_enabled(lax.connection()).unwrap());
        lax.insert_season(&orphan).unwrap();
    }

    #[test]
    fn test_watching_updates_progress_and_activity() {
        let store = ShowStore::open_in_memory(&test_config()).unwrap();
        seed_show(&store);
        store.set_next_episode(1, Some(1003)).unwrap();

        assert!(store.set_episode_watched(1002, true).unwrap());
        assert!(!store.set_episode_watched(9999, true).unwrap());

        let progress = store.show_progress(1).unwrap().unwrap();
        assert_eq!((progress.watched, progress.total), (1, 3));
        assert_eq!(progress.last_watched.as_ref().map(|e| e.number), Some(2));
        assert_eq!(progress.next_episode.as_ref().map(|e| e.id), Some(1003));

        let activity = store.recent_activity(10).unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].episode_title.as_deref(), Some("The Big Empty"));
        assert_eq!(activity[0].show_title.as_deref(), Some("The Expanse"));

        // unwatching leaves the activity history alone
        assert!(store.set_episode_watched(1002, false).unwrap());
        assert_eq!(store.show_progress(1).unwrap().unwrap().watched, 0);
        assert_eq!(store.recent_activity(10).unwrap().len(), 1);
    }

    #[test]
    fn test_dangling_episode_refs_in_progress() {
        let store = ShowStore::open_in_memory(&test_config()).unwrap();
        seed_show(&store);
        store.set_next_episode(1, Some(777)).unwrap();
        store
            .connection()
            .execute("UPDATE shows SET last_watched_id = 888 WHERE id = 1", [])
            .unwrap();

        let progress = store.show_progress(1).unwrap().unwrap();
        assert!(progress.last_watched.is_none());
        assert!(progress.next_episode.is_none());
        assert!(store.show_progress(2).unwrap().is_none());
    }

    #[test]
    fn test_activity_keeps_newest_per_episode() {
        let store = ShowStore::open_in_memory(&test_config()).unwrap();
        seed_show(&store);
        store.record_activity(1001, 1, 1_000).unwrap();
        store.record_activity(1002, 1, 2_000).unwrap();
        store.record_activity(1001, 1, 3_000).unwrap();

        let activity = store.recent_activity(10).unwrap();
        let seen: Vec<(i64, i64)> = activity.iter().map(|a| (a.episode_id, a.timestamp_ms)).collect();
        assert_eq!(seen, vec![(1001, 3_000), (1002, 2_000)]);
        assert_eq!(store.recent_activity(1).unwrap().len(), 1);
    }

    #[test]
    fn test_movies_replace_by_tmdb_id() {
        let store = ShowStore::open_in_memory(&test_config()).unwrap();
        let mut movie = MovieRecord {
            tmdb_id: 603,
            title: "The Matrix".to_string(),
            runtime_min: 136,
            ..MovieRecord::default()
        };
        store.upsert_movie(&movie).unwrap();
        movie.watched = true;
        store.upsert_movie(&movie).unwrap();

        let row = store.movie(603).unwrap().unwrap();
        assert_eq!(row.sort_title, "Matrix");
        assert!(row.watched);
        assert!(store.movie(604).unwrap().is_none());
        let counts = store.table_row_counts().unwrap();
        assert!(counts.contains(&("movies", 1)));
    }

    #[test]
    fn test_lists_through_store() {
        let store = ShowStore::open_in_memory(&test_config()).unwrap();
        seed_show(&store);
        store.upsert_list("watch-next", "Watch next", 1).unwrap();
        store.upsert_list("classics", "Classics", 0).unwrap();

        let show_item = store.upsert_list_item("watch-next", 1, ListItemKind::Show).unwrap();
        assert_eq!(show_item, "1-1-watch-next");
        store.upsert_list_item("watch-next", 1001, ListItemKind::Episode).unwrap();
        store.upsert_list_item("watch-next", 1, ListItemKind::Show).unwrap();

        // renaming keeps the items
        store.upsert_list("watch-next", "Up next", 1).unwrap();
        let lists = store.lists().unwrap();
        let names: Vec<(&str, i64)> = lists.iter().map(|l| (l.name.as_str(), l.item_count)).collect();
        assert_eq!(names, vec![("Classics", 0), ("Up next", 2)]);

        let entries = store.list_items(Some("watch-next")).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind(), ListItemKind::Episode);
        assert_eq!(entries[0].show_title(), Some("The Expanse"));
        assert_eq!(entries[1].title(), "The Expanse");
    }

    #[test]
    fn test_search_through_store() {
        let mut config = test_config();
        config.search.snippet_start = "[".to_string();
        config.search.snippet_end = "]".to_string();
        let store = ShowStore::open_in_memory(&config).unwrap();
        seed_show(&store);
        assert_eq!(store.rebuild_search_index().unwrap(), IndexRebuild::Full);

        let results = store.search("dulc", None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].show_title, "The Expanse");

        let results = store.search("expanse", None).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].snippet.as_deref().unwrap().contains("[Expanse]"));

        let suggestions = store.suggest("the").unwrap();
        let titles: Vec<&str> = suggestions.iter().map(|s| s.title.as_str()).collect();
        // every overview mentions "the Expanse"
        assert_eq!(titles, vec!["Dulcinea", "The Big Empty", "Remember the Cant"]);
    }
}
