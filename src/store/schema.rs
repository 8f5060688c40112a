//! SQLite schema definition - version 38
//!
//! The registry below describes the current schema only. Tables are created
//! from it on a fresh database, and migration steps take the declarations of
//! the columns they add from it, so an upgraded table is indistinguishable
//! from a fresh one.

use rusqlite::{Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::error::Result;

/// Version written to `PRAGMA user_version` by a fully migrated database.
pub const DATABASE_VERSION: i64 = 38;

/// Oldest stored version the migration chain can upgrade from.
pub const OLDEST_UPGRADABLE_VERSION: i64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Regular,
    /// FTS4 virtual table; column declarations become plain column names
    FullText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    Replace,
}

impl ConflictPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPolicy::Replace => "REPLACE",
        }
    }
}

#[derive(Debug)]
pub struct Column {
    pub name: &'static str,
    /// Type, constraints and default as written after the column name
    pub decl: &'static str,
}

#[derive(Debug)]
pub struct UniqueKey {
    pub columns: &'static [&'static str],
    pub on_conflict: ConflictPolicy,
}

#[derive(Debug)]
pub struct Table {
    pub name: &'static str,
    pub kind: TableKind,
    pub columns: &'static [Column],
    pub unique: Option<UniqueKey>,
}

const fn col(name: &'static str, decl: &'static str) -> Column {
    Column { name, decl }
}

impl Table {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn create_sql(&self) -> String {
        match self.kind {
            TableKind::Regular => {
                let mut parts: Vec<String> = self
                    .columns
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.decl))
                    .collect();
                if let Some(unique) = &self.unique {
                    parts.push(format!(
                        "UNIQUE ({}) ON CONFLICT {}",
                        unique.columns.join(", "),
                        unique.on_conflict.as_str()
                    ));
                }
                format!("CREATE TABLE {} ({})", self.name, parts.join(", "))
            }
            TableKind::FullText => {
                let columns: Vec<&str> = self.columns.iter().map(|c| c.name).collect();
                format!(
                    "CREATE VIRTUAL TABLE {} USING fts4({})",
                    self.name,
                    columns.join(", ")
                )
            }
        }
    }

    /// `ALTER TABLE … ADD COLUMN` for a registry column, `None` if unknown.
    pub fn add_column_sql(&self, column: &str) -> Option<String> {
        self.column(column)
            .map(|c| format!("ALTER TABLE {} ADD COLUMN {} {}", self.name, c.name, c.decl))
    }
}

// ============================================
// TABLES
// ============================================

pub const SHOWS: Table = Table {
    name: "shows",
    kind: TableKind::Regular,
    columns: &[
        col("id", "INTEGER PRIMARY KEY"),
        col("title", "TEXT NOT NULL"),
        col("title_no_article", "TEXT"),
        col("overview", "TEXT DEFAULT ''"),
        col("actors", "TEXT DEFAULT ''"),
        col("release_time", "INTEGER"),
        col("release_weekday", "INTEGER"),
        col("release_country", "TEXT"),
        col("release_timezone", "TEXT"),
        col("first_release", "TEXT"),
        col("genres", "TEXT DEFAULT ''"),
        col("network", "TEXT DEFAULT ''"),
        col("rating_global", "REAL"),
        col("rating_votes", "INTEGER"),
        col("rating_user", "INTEGER"),
        col("runtime", "TEXT DEFAULT ''"),
        col("status", "TEXT DEFAULT ''"),
        col("content_rating", "TEXT DEFAULT ''"),
        col("next_episode", "TEXT DEFAULT ''"),
        col("poster", "TEXT DEFAULT ''"),
        col("next_air_date_ms", "INTEGER"),
        col("next_text", "TEXT DEFAULT ''"),
        col("imdb_id", "TEXT DEFAULT ''"),
        col("trakt_id", "INTEGER DEFAULT 0"),
        col("favorite", "INTEGER DEFAULT 0"),
        col("next_air_date_text", "TEXT DEFAULT ''"),
        col("hexagon_merge_complete", "INTEGER DEFAULT 1"),
        col("hidden", "INTEGER DEFAULT 0"),
        col("last_updated", "INTEGER DEFAULT 0"),
        col("last_edited", "INTEGER DEFAULT 0"),
        col("last_watched_id", "INTEGER DEFAULT 0"),
        col("language", "TEXT DEFAULT ''"),
    ],
    unique: None,
};

pub const SEASONS: Table = Table {
    name: "seasons",
    kind: TableKind::Regular,
    columns: &[
        col("id", "INTEGER PRIMARY KEY"),
        col("combined_number", "INTEGER"),
        col("show_id", "INTEGER REFERENCES shows(id)"),
        col("watch_count", "INTEGER DEFAULT 0"),
        col("unaired_count", "INTEGER DEFAULT 0"),
        col("no_air_date_count", "INTEGER DEFAULT 0"),
        col("tags", "TEXT DEFAULT ''"),
        col("total_count", "INTEGER DEFAULT 0"),
    ],
    unique: None,
};

pub const EPISODES: Table = Table {
    name: "episodes",
    kind: TableKind::Regular,
    columns: &[
        col("id", "INTEGER PRIMARY KEY"),
        col("title", "TEXT NOT NULL"),
        col("overview", "TEXT"),
        col("number", "INTEGER DEFAULT 0"),
        col("season", "INTEGER DEFAULT 0"),
        col("dvd_number", "REAL"),
        col("season_id", "INTEGER REFERENCES seasons(id)"),
        col("show_id", "INTEGER REFERENCES shows(id)"),
        col("watched", "INTEGER DEFAULT 0"),
        col("directors", "TEXT DEFAULT ''"),
        col("guest_stars", "TEXT DEFAULT ''"),
        col("writers", "TEXT DEFAULT ''"),
        col("image", "TEXT DEFAULT ''"),
        col("first_aired_ms", "INTEGER DEFAULT -1"),
        col("collected", "INTEGER DEFAULT 0"),
        col("rating_global", "REAL"),
        col("rating_votes", "INTEGER"),
        col("rating_user", "INTEGER"),
        col("imdb_id", "TEXT DEFAULT ''"),
        col("last_edited", "INTEGER DEFAULT 0"),
        col("absolute_number", "INTEGER"),
    ],
    unique: None,
};

pub const EPISODE_SEARCH: Table = Table {
    name: "episode_search",
    kind: TableKind::FullText,
    columns: &[col("title", "TEXT"), col("overview", "TEXT")],
    unique: None,
};

pub const LISTS: Table = Table {
    name: "lists",
    kind: TableKind::Regular,
    columns: &[
        col("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
        col("list_id", "TEXT NOT NULL"),
        col("name", "TEXT NOT NULL"),
        col("list_order", "INTEGER DEFAULT 0"),
    ],
    unique: Some(UniqueKey {
        columns: &["list_id"],
        on_conflict: ConflictPolicy::Replace,
    }),
};

pub const LIST_ITEMS: Table = Table {
    name: "list_items",
    kind: TableKind::Regular,
    columns: &[
        col("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
        col("list_item_id", "TEXT NOT NULL"),
        col("item_ref_id", "INTEGER NOT NULL"),
        col("item_type", "INTEGER NOT NULL"),
        col("list_id", "TEXT REFERENCES lists(list_id)"),
    ],
    unique: Some(UniqueKey {
        columns: &["list_item_id"],
        on_conflict: ConflictPolicy::Replace,
    }),
};

pub const MOVIES: Table = Table {
    name: "movies",
    kind: TableKind::Regular,
    columns: &[
        col("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
        col("tmdb_id", "INTEGER NOT NULL"),
        col("imdb_id", "TEXT"),
        col("title", "TEXT"),
        col("title_no_article", "TEXT"),
        col("poster", "TEXT"),
        col("genres", "TEXT"),
        col("overview", "TEXT"),
        col("released_utc_ms", "INTEGER"),
        col("runtime_min", "INTEGER DEFAULT 0"),
        col("trailer", "TEXT"),
        col("certification", "TEXT"),
        col("in_collection", "INTEGER DEFAULT 0"),
        col("in_watchlist", "INTEGER DEFAULT 0"),
        col("plays", "INTEGER DEFAULT 0"),
        col("watched", "INTEGER DEFAULT 0"),
        col("rating_tmdb", "REAL DEFAULT 0"),
        col("rating_votes_tmdb", "INTEGER DEFAULT 0"),
        col("rating_trakt", "INTEGER DEFAULT 0"),
        col("rating_votes_trakt", "INTEGER DEFAULT 0"),
        col("rating_user", "INTEGER"),
        col("last_updated", "INTEGER"),
    ],
    unique: Some(UniqueKey {
        columns: &["tmdb_id"],
        on_conflict: ConflictPolicy::Replace,
    }),
};

pub const ACTIVITY: Table = Table {
    name: "activity",
    kind: TableKind::Regular,
    columns: &[
        col("id", "INTEGER PRIMARY KEY AUTOINCREMENT"),
        col("episode_tvdb_id", "INTEGER NOT NULL"),
        col("show_tvdb_id", "INTEGER NOT NULL"),
        col("timestamp_ms", "INTEGER NOT NULL"),
    ],
    unique: Some(UniqueKey {
        columns: &["episode_tvdb_id"],
        on_conflict: ConflictPolicy::Replace,
    }),
};

/// Every table of the current schema, in creation order.
pub static TABLES: [&Table; 8] = [
    &SHOWS,
    &SEASONS,
    &EPISODES,
    &EPISODE_SEARCH,
    &LISTS,
    &LIST_ITEMS,
    &MOVIES,
    &ACTIVITY,
];

// ============================================
// QUALIFIED JOINS
// ============================================

/// Resolves `shows.last_watched_id`; the episode side is NULL when it dangles.
pub const SHOWS_JOIN_EPISODES_ON_LAST_EPISODE: &str =
    "shows LEFT OUTER JOIN episodes ON shows.last_watched_id = episodes.id";

/// Resolves `shows.next_episode`; the episode side is NULL when it dangles.
pub const SHOWS_JOIN_EPISODES_ON_NEXT_EPISODE: &str =
    "shows LEFT OUTER JOIN episodes ON shows.next_episode = episodes.id";

/// Create every table of the current schema.
pub fn create_all(conn: &Connection) -> Result<()> {
    for table in TABLES.iter() {
        conn.execute_batch(&table.create_sql())?;
    }
    Ok(())
}

/// Run `f` with `PRAGMA foreign_keys` off and restore the previous setting.
///
/// Dropping or rebuilding a parent table fails while enforcement is on, and
/// the bundled SQLite build enables it by default. The pragma is ignored
/// inside a transaction, so `conn` must not have one open.
pub fn with_foreign_keys_off<T>(
    conn: &mut Connection,
    f: impl FnOnce(&mut Connection) -> Result<T>,
) -> Result<T> {
    let enabled = foreign_keys_enabled(conn)?;
    if enabled {
        conn.pragma_update(None, "foreign_keys", false)?;
    }
    let result = f(conn);
    if enabled {
        conn.pragma_update(None, "foreign_keys", true)?;
    }
    result
}

pub fn foreign_keys_enabled(conn: &Connection) -> Result<bool> {
    Ok(conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?)
}

// ============================================
// INTROSPECTION
// ============================================

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
            [table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    Ok(column_type(conn, table, column)?.is_some())
}

/// Declared type of a column, `None` if the table or column is missing.
pub fn column_type(conn: &Connection, table: &str, column: &str) -> Result<Option<String>> {
    let declared = conn
        .query_row(
            "SELECT type FROM pragma_table_info(?1) WHERE name = ?2",
            [table, column],
            |row| row.get(0),
        )
        .optional()?;
    Ok(declared)
}

/// One row of `PRAGMA table_info`, without the column position.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub primary_key: bool,
}

pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(
        r#"SELECT name, type, "notnull", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid"#,
    )?;
    let columns = stmt
        .query_map([table], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                decl_type: row.get(1)?,
                not_null: row.get::<_, i64>(2)? != 0,
                default_value: row.get(3)?,
                primary_key: row.get::<_, i64>(4)? != 0,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Normalized shape of every user table: columns sorted by name, so tables
/// grown through `ADD COLUMN` compare equal to freshly created ones.
pub type SchemaSnapshot = BTreeMap<String, Vec<ColumnInfo>>;

pub fn snapshot(conn: &Connection) -> Result<SchemaSnapshot> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut snapshot = SchemaSnapshot::new();
    for name in names {
        let mut columns = table_columns(conn, &name)?;
        columns.sort();
        snapshot.insert(name, columns);
    }
    Ok(snapshot)
}

/// SHA-256 over the snapshot, hex encoded.
pub fn fingerprint(conn: &Connection) -> Result<String> {
    let mut hasher = Sha256::new();
    for (table, columns) in snapshot(conn)? {
        hasher.update(table.as_bytes());
        for c in columns {
            hasher.update(
                format!(
                    "|{}:{}:{}:{}:{}",
                    c.name,
                    c.decl_type,
                    c.not_null,
                    c.default_value.as_deref().unwrap_or("NULL"),
                    c.primary_key
                )
                .as_bytes(),
            );
        }
        hasher.update(b"\n");
    }
    Ok(hex::encode(hasher.finalize()))
}
