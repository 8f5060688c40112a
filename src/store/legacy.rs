//! Version 16 schema, the oldest layout the migration chain upgrades from.
//! Test fixture only.

use rusqlite::Connection;

pub const VERSION_16: i64 = 16;

pub const VERSION_16_SCHEMA: &str = r#"
CREATE TABLE shows (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    overview TEXT DEFAULT '',
    actors TEXT DEFAULT '',
    release_time INTEGER,
    release_weekday TEXT DEFAULT '',
    first_release TEXT,
    genres TEXT DEFAULT '',
    network TEXT DEFAULT '',
    rating_global REAL,
    runtime TEXT DEFAULT '',
    status TEXT DEFAULT '',
    content_rating TEXT DEFAULT '',
    next_episode TEXT DEFAULT '',
    poster TEXT DEFAULT '',
    next_text TEXT DEFAULT '',
    imdb_id TEXT DEFAULT ''
);

CREATE TABLE seasons (
    id INTEGER PRIMARY KEY,
    combined_number INTEGER,
    show_id INTEGER REFERENCES shows(id),
    watch_count INTEGER DEFAULT 0,
    unaired_count INTEGER DEFAULT 0,
    no_air_date_count INTEGER DEFAULT 0,
    tags TEXT DEFAULT ''
);

CREATE TABLE episodes (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    overview TEXT,
    number INTEGER DEFAULT 0,
    season INTEGER DEFAULT 0,
    dvd_number REAL,
    season_id INTEGER REFERENCES seasons(id),
    show_id INTEGER REFERENCES shows(id),
    watched INTEGER DEFAULT 0,
    directors TEXT DEFAULT '',
    guest_stars TEXT DEFAULT '',
    writers TEXT DEFAULT '',
    image TEXT DEFAULT '',
    first_aired TEXT DEFAULT '',
    rating_global REAL
);

CREATE VIRTUAL TABLE episode_search USING fts4(title, overview);

PRAGMA user_version = 16;
"#;

pub fn create_version_16(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(VERSION_16_SCHEMA)
}
