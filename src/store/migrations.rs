//! Forward-only schema migration chain
//!
//! Every shipped schema version from 17 to 38 has one step. Upgrading from
//! version `n` applies every step above `n` in order, each inside its own
//! transaction that also bumps `PRAGMA user_version`, so a failure never
//! leaves a half-applied step behind.
//!
//! Steps check for their DDL before running it (some installs carry columns
//! from an interrupted upgrade) but always run their data transform.

use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info, warn};

use super::schema::{
    self, Table, DATABASE_VERSION, EPISODES, LISTS, LIST_ITEMS, MOVIES, OLDEST_UPGRADABLE_VERSION,
    SEASONS, SHOWS, ACTIVITY,
};
use crate::error::{Result, StoreError};
use crate::timetools::{self, ReleaseCalendar};

/// Collaborators a data transform may call on.
pub struct MigrationContext<'a> {
    pub calendar: &'a dyn ReleaseCalendar,
}

/// One version-to-version upgrade.
pub trait MigrationStep {
    /// Schema version after this step.
    fn version(&self) -> i64;

    fn summary(&self) -> &'static str;

    /// Whether any of this step's structural changes are still missing.
    fn ddl_pending(&self, conn: &Connection) -> Result<bool>;

    /// Apply the missing structural changes. Must skip what already exists.
    fn apply_ddl(&self, conn: &Connection) -> Result<()>;

    /// Rewrite existing rows. Runs whether or not DDL was applied.
    fn transform(&self, _conn: &Connection, _ctx: &MigrationContext<'_>) -> Result<()> {
        Ok(())
    }
}

pub struct MigrationChain {
    steps: Vec<Box<dyn MigrationStep>>,
}

impl MigrationChain {
    /// The chain of every shipped version, 17 through 38.
    pub fn standard() -> Self {
        let steps: Vec<Box<dyn MigrationStep>> = vec![
            Box::new(AddColumns {
                version: 17,
                summary: "favorite shows",
                columns: &[(&SHOWS, "favorite")],
            }),
            Box::new(StatusFlags),
            Box::new(AddColumns {
                version: 19,
                summary: "season episode totals",
                columns: &[(&SEASONS, "total_count")],
            }),
            Box::new(AddColumns {
                version: 20,
                summary: "cloud merge flag",
                columns: &[(&SHOWS, "hexagon_merge_complete")],
            }),
            Box::new(AddColumns {
                version: 21,
                summary: "release country",
                columns: &[(&SHOWS, "release_country")],
            }),
            Box::new(AddColumns {
                version: 22,
                summary: "per-show update time",
                columns: &[(&SHOWS, "last_updated")],
            }),
            Box::new(AddColumns {
                version: 23,
                summary: "hidden shows",
                columns: &[(&SHOWS, "hidden")],
            }),
            Box::new(AirDateBackfill),
            Box::new(AddColumns {
                version: 25,
                summary: "next air date in milliseconds",
                columns: &[(&SHOWS, "next_air_date_ms")],
            }),
            Box::new(AddColumns {
                version: 26,
                summary: "collected episodes",
                columns: &[(&EPISODES, "collected")],
            }),
            Box::new(AddColumns {
                version: 27,
                summary: "imdb ids and edit times",
                columns: &[
                    (&SHOWS, "last_edited"),
                    (&EPISODES, "imdb_id"),
                    (&EPISODES, "last_edited"),
                ],
            }),
            Box::new(CreateTables {
                version: 28,
                summary: "lists",
                tables: &[&LISTS, &LIST_ITEMS],
            }),
            Box::new(Retired {
                version: 29,
                summary: "check-in column no longer used",
            }),
            Box::new(AddColumns {
                version: 30,
                summary: "absolute episode numbers",
                columns: &[(&EPISODES, "absolute_number")],
            }),
            Box::new(LastWatchedBackfill),
            Box::new(CreateTables {
                version: 32,
                summary: "movies",
                tables: &[&MOVIES],
            }),
            Box::new(SortTitleBackfill),
            Box::new(RatingsAndReleaseEncoding),
            Box::new(CreateTables {
                version: 35,
                summary: "activity feed",
                tables: &[&ACTIVITY],
            }),
            Box::new(AddColumns {
                version: 36,
                summary: "orderable lists",
                columns: &[(&LISTS, "list_order")],
            }),
            Box::new(AddColumns {
                version: 37,
                summary: "per-show language",
                columns: &[(&SHOWS, "language")],
            }),
            Box::new(AddColumns {
                version: 38,
                summary: "show trakt id",
                columns: &[(&SHOWS, "trakt_id")],
            }),
        ];
        Self { steps }
    }

    pub fn steps(&self) -> impl Iterator<Item = &dyn MigrationStep> {
        self.steps.iter().map(|s| s.as_ref())
    }

    /// Upgrade from `from` to `to`, returning the version reached.
    ///
    /// `from` must be at least [`OLDEST_UPGRADABLE_VERSION`] and `to` no
    /// higher than [`DATABASE_VERSION`].
    pub fn upgrade(
        &self,
        conn: &mut Connection,
        from: i64,
        to: i64,
        ctx: &MigrationContext<'_>,
    ) -> Result<i64> {
        if from < OLDEST_UPGRADABLE_VERSION || from > DATABASE_VERSION || to > DATABASE_VERSION {
            return Err(StoreError::UnsupportedSchemaVersion {
                found: from,
                oldest: OLDEST_UPGRADABLE_VERSION,
                current: DATABASE_VERSION,
            });
        }

        info!(from, to, "upgrading schema");
        // step 34 rebuilds `shows`, which seasons and episodes reference
        schema::with_foreign_keys_off(conn, |conn| {
            let mut reached = from;
            for step in self.steps().filter(|s| s.version() > from && s.version() <= to) {
                run_step(conn, step, ctx).map_err(|err| StoreError::Migration {
                    version: step.version(),
                    source: Box::new(err),
                })?;
                reached = step.version();
            }
            Ok(reached)
        })
    }
}

fn run_step(conn: &mut Connection, step: &dyn MigrationStep, ctx: &MigrationContext<'_>) -> Result<()> {
    let tx = conn.transaction()?;
    if step.ddl_pending(&tx)? {
        step.apply_ddl(&tx)?;
    } else {
        debug!(version = step.version(), "schema changes already present");
    }
    step.transform(&tx, ctx)?;
    tx.pragma_update(None, "user_version", step.version())?;
    tx.commit()?;
    debug!(version = step.version(), summary = step.summary(), "applied migration");
    Ok(())
}

// ============================================
// DDL HELPERS
// ============================================

/// Add a registry column unless the table already has it.
fn ensure_column(conn: &Connection, table: &Table, column: &str) -> Result<()> {
    if schema::column_exists(conn, table.name, column)? {
        return Ok(());
    }
    match table.add_column_sql(column) {
        Some(sql) => conn.execute_batch(&sql)?,
        None => warn!(table = table.name, column, "column not in registry, not added"),
    }
    Ok(())
}

fn ensure_table(conn: &Connection, table: &Table) -> Result<()> {
    if !schema::table_exists(conn, table.name)? {
        conn.execute_batch(&table.create_sql())?;
    }
    Ok(())
}

fn any_column_missing(conn: &Connection, columns: &[(&Table, &str)]) -> Result<bool> {
    for (table, column) in columns {
        if !schema::column_exists(conn, table.name, column)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Recreate `table` with the registry declaration for each column in
/// `retyped`, copying every row. Other columns keep their current
/// declaration. Only for tables whose sole constraint is a one-column
/// primary key.
fn rebuild_with_registry_types(conn: &Connection, table: &Table, retyped: &[&str]) -> Result<()> {
    let columns = schema::table_columns(conn, table.name)?;
    let definitions: Vec<String> = columns
        .iter()
        .map(|c| {
            if retyped.contains(&c.name.as_str()) {
                if let Some(registry) = table.column(&c.name) {
                    return format!("{} {}", c.name, registry.decl);
                }
            }
            let mut def = format!("{} {}", c.name, c.decl_type);
            if c.primary_key {
                def.push_str(" PRIMARY KEY");
            }
            if c.not_null {
                def.push_str(" NOT NULL");
            }
            if let Some(default) = &c.default_value {
                def.push_str(" DEFAULT ");
                def.push_str(default);
            }
            def
        })
        .collect();
    let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
    let names = names.join(", ");
    let scratch = format!("{}_rebuild", table.name);

    conn.execute_batch(&format!(
        "DROP TABLE IF EXISTS {scratch};
         CREATE TABLE {scratch} ({definitions});
         INSERT INTO {scratch} ({names}) SELECT {names} FROM {table};
         DROP TABLE {table};
         ALTER TABLE {scratch} RENAME TO {table};",
        scratch = scratch,
        definitions = definitions.join(", "),
        names = names,
        table = table.name,
    ))?;
    Ok(())
}

// ============================================
// GENERIC STEPS
// ============================================

struct AddColumns {
    version: i64,
    summary: &'static str,
    columns: &'static [(&'static Table, &'static str)],
}

impl MigrationStep for AddColumns {
    fn version(&self) -> i64 {
        self.version
    }

    fn summary(&self) -> &'static str {
        self.summary
    }

    fn ddl_pending(&self, conn: &Connection) -> Result<bool> {
        any_column_missing(conn, self.columns)
    }

    fn apply_ddl(&self, conn: &Connection) -> Result<()> {
        for (table, column) in self.columns {
            ensure_column(conn, table, column)?;
        }
        Ok(())
    }
}

struct CreateTables {
    version: i64,
    summary: &'static str,
    tables: &'static [&'static Table],
}

impl MigrationStep for CreateTables {
    fn version(&self) -> i64 {
        self.version
    }

    fn summary(&self) -> &'static str {
        self.summary
    }

    fn ddl_pending(&self, conn: &Connection) -> Result<bool> {
        for table in self.tables {
            if !schema::table_exists(conn, table.name)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn apply_ddl(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            ensure_table(conn, table)?;
        }
        Ok(())
    }
}

/// A version that shipped a change later withdrawn; nothing to do.
struct Retired {
    version: i64,
    summary: &'static str,
}

impl MigrationStep for Retired {
    fn version(&self) -> i64 {
        self.version
    }

    fn summary(&self) -> &'static str {
        self.summary
    }

    fn ddl_pending(&self, _conn: &Connection) -> Result<bool> {
        Ok(false)
    }

    fn apply_ddl(&self, _conn: &Connection) -> Result<()> {
        Ok(())
    }
}

// ============================================
// DATA-MIGRATING STEPS
// ============================================

/// v18: next air date text column; show status text becomes a 0/1 flag.
struct StatusFlags;

impl MigrationStep for StatusFlags {
    fn version(&self) -> i64 {
        18
    }

    fn summary(&self) -> &'static str {
        "status flags"
    }

    fn ddl_pending(&self, conn: &Connection) -> Result<bool> {
        Ok(!schema::column_exists(conn, SHOWS.name, "next_air_date_text")?)
    }

    fn apply_ddl(&self, conn: &Connection) -> Result<()> {
        ensure_column(conn, &SHOWS, "next_air_date_text")
    }

    fn transform(&self, conn: &Connection, _ctx: &MigrationContext<'_>) -> Result<()> {
        let shows = conn
            .prepare("SELECT id, status FROM shows")?
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut update = conn.prepare("UPDATE shows SET status = ?1 WHERE id = ?2")?;
        for (id, status) in shows {
            let flag = match status {
                Some(status) => status_flag(&status),
                None => Some(""),
            };
            if let Some(flag) = flag {
                update.execute(params![flag, id])?;
            }
        }
        Ok(())
    }
}

/// "Continuing" → "1", "Ended" → "0", anything else → "". `None` when the
/// value is already encoded.
fn status_flag(status: &str) -> Option<&'static str> {
    match status {
        "1" | "0" | "" => None,
        s if s.len() == 10 => Some("1"),
        s if s.len() == 5 => Some("0"),
        _ => Some(""),
    }
}

/// v24: episode air dates move from free text to UTC milliseconds.
struct AirDateBackfill;

impl MigrationStep for AirDateBackfill {
    fn version(&self) -> i64 {
        24
    }

    fn summary(&self) -> &'static str {
        "air dates in milliseconds"
    }

    fn ddl_pending(&self, conn: &Connection) -> Result<bool> {
        Ok(!schema::column_exists(conn, EPISODES.name, "first_aired_ms")?)
    }

    fn apply_ddl(&self, conn: &Connection) -> Result<()> {
        ensure_column(conn, &EPISODES, "first_aired_ms")
    }

    fn transform(&self, conn: &Connection, ctx: &MigrationContext<'_>) -> Result<()> {
        if !schema::column_exists(conn, EPISODES.name, "first_aired")? {
            debug!("no text air dates left to convert");
            return Ok(());
        }

        let zone_sql = if schema::column_exists(conn, SHOWS.name, "release_timezone")? {
            "SELECT id, release_timezone FROM shows"
        } else {
            "SELECT id, NULL FROM shows"
        };
        let shows = conn
            .prepare(zone_sql)?
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut episodes = conn.prepare("SELECT id, first_aired FROM episodes WHERE show_id = ?1")?;
        let mut update = conn.prepare("UPDATE episodes SET first_aired_ms = ?1 WHERE id = ?2")?;
        for (show_id, zone) in shows {
            let rows = episodes
                .query_map([show_id], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            for (episode_id, first_aired) in rows {
                let millis = ctx.calendar.parse_episode_release_date(
                    first_aired.as_deref().unwrap_or_default(),
                    zone.as_deref(),
                );
                update.execute(params![millis, episode_id])?;
            }
        }

        conn.execute_batch("ALTER TABLE episodes DROP COLUMN first_aired")?;
        Ok(())
    }
}

/// v31: remember the last watched episode per show.
struct LastWatchedBackfill;

impl MigrationStep for LastWatchedBackfill {
    fn version(&self) -> i64 {
        31
    }

    fn summary(&self) -> &'static str {
        "last watched episode"
    }

    fn ddl_pending(&self, conn: &Connection) -> Result<bool> {
        Ok(!schema::column_exists(conn, SHOWS.name, "last_watched_id")?)
    }

    fn apply_ddl(&self, conn: &Connection) -> Result<()> {
        ensure_column(conn, &SHOWS, "last_watched_id")
    }

    fn transform(&self, conn: &Connection, _ctx: &MigrationContext<'_>) -> Result<()> {
        let shows = conn
            .prepare("SELECT id FROM shows")?
            .query_map([], |row| row.get::<_, i64>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut update = conn.prepare("UPDATE shows SET last_watched_id = ?1 WHERE id = ?2")?;
        for show_id in shows {
            if let Some(episode_id) = latest_watched_episode(conn, show_id)? {
                update.execute(params![episode_id, show_id])?;
            }
        }
        Ok(())
    }
}

/// Most recently aired watched episode of a show; ties go to the higher
/// season, then the higher number. Episodes without an air date never count.
pub fn latest_watched_episode(conn: &Connection, show_id: i64) -> Result<Option<i64>> {
    let id = conn
        .query_row(
            "SELECT id FROM episodes
             WHERE watched = 1 AND first_aired_ms != -1 AND show_id = ?1
             ORDER BY first_aired_ms DESC, season DESC, number DESC
             LIMIT 1",
            [show_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(id)
}

/// v33: sort titles without leading articles for shows and movies.
struct SortTitleBackfill;

const SORT_TITLE_COLUMNS: &[(&Table, &str)] =
    &[(&SHOWS, "title_no_article"), (&MOVIES, "title_no_article")];

impl MigrationStep for SortTitleBackfill {
    fn version(&self) -> i64 {
        33
    }

    fn summary(&self) -> &'static str {
        "sort titles"
    }

    fn ddl_pending(&self, conn: &Connection) -> Result<bool> {
        any_column_missing(conn, SORT_TITLE_COLUMNS)
    }

    fn apply_ddl(&self, conn: &Connection) -> Result<()> {
        for (table, column) in SORT_TITLE_COLUMNS {
            ensure_column(conn, table, column)?;
        }
        Ok(())
    }

    fn transform(&self, conn: &Connection, _ctx: &MigrationContext<'_>) -> Result<()> {
        for table in [SHOWS.name, MOVIES.name] {
            let rows = conn
                .prepare(&format!("SELECT id, title FROM {}", table))?
                .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let mut update =
                conn.prepare(&format!("UPDATE {} SET title_no_article = ?1 WHERE id = ?2", table))?;
            for (id, title) in rows {
                let sort_title = title.as_deref().map(timetools::trim_leading_article);
                update.execute(params![sort_title, id])?;
            }
        }
        Ok(())
    }
}

/// v34: offline ratings and time zones; release time and weekday re-encoded.
struct RatingsAndReleaseEncoding;

const RATING_COLUMNS: &[(&Table, &str)] = &[
    (&SHOWS, "release_timezone"),
    (&SHOWS, "rating_votes"),
    (&SHOWS, "rating_user"),
    (&EPISODES, "rating_votes"),
    (&EPISODES, "rating_user"),
    (&MOVIES, "rating_user"),
];

impl RatingsAndReleaseEncoding {
    fn weekday_needs_retype(conn: &Connection) -> Result<bool> {
        let declared = schema::column_type(conn, SHOWS.name, "release_weekday")?;
        Ok(declared.is_some_and(|t| !t.eq_ignore_ascii_case("INTEGER")))
    }
}

impl MigrationStep for RatingsAndReleaseEncoding {
    fn version(&self) -> i64 {
        34
    }

    fn summary(&self) -> &'static str {
        "ratings, time zones and release encodings"
    }

    fn ddl_pending(&self, conn: &Connection) -> Result<bool> {
        Ok(any_column_missing(conn, RATING_COLUMNS)? || Self::weekday_needs_retype(conn)?)
    }

    fn apply_ddl(&self, conn: &Connection) -> Result<()> {
        for (table, column) in RATING_COLUMNS {
            ensure_column(conn, table, column)?;
        }
        if Self::weekday_needs_retype(conn)? {
            rebuild_with_registry_types(conn, &SHOWS, &["release_weekday"])?;
        }
        Ok(())
    }

    /// Not repeatable: release times are always read as milliseconds, so an
    /// already encoded `HHMM` value is encoded a second time. Only -1 is a
    /// fixed point. The chain runs this once, when the stored version is
    /// below 34.
    fn transform(&self, conn: &Connection, ctx: &MigrationContext<'_>) -> Result<()> {
        let shows = conn
            .prepare("SELECT id, release_time, release_weekday FROM shows")?
            .query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Value>(1)?, row.get::<_, Value>(2)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut update =
            conn.prepare("UPDATE shows SET release_time = ?1, release_weekday = ?2 WHERE id = ?3")?;
        for (id, time, weekday) in shows {
            let release_time = match time {
                Value::Integer(millis) => timetools::encode_release_time(millis),
                Value::Real(millis) => timetools::encode_release_time(millis as i64),
                Value::Text(text) => text
                    .trim()
                    .parse::<i64>()
                    .map(timetools::encode_release_time)
                    .unwrap_or(timetools::UNKNOWN as i32),
                _ => timetools::UNKNOWN as i32,
            };
            let release_weekday = match weekday {
                Value::Integer(day) => day as i32,
                Value::Text(text) => text
                    .trim()
                    .parse::<i32>()
                    .unwrap_or_else(|_| ctx.calendar.parse_release_weekday(&text)),
                _ => timetools::RELEASE_WEEKDAY_UNKNOWN,
            };
            update.execute(params![release_time, release_weekday, id])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CalendarConfig;
    use crate::store::legacy;
    use crate::timetools::StandardCalendar;
    use chrono::{TimeZone, Utc};

    fn calendar() -> StandardCalendar {
        StandardCalendar::from_config(&CalendarConfig {
            device_timezone: Some("UTC".to_string()),
            ..CalendarConfig::default()
        })
        .unwrap()
    }

    fn legacy_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        legacy::create_version_16(&conn).unwrap();
        conn
    }

    fn fresh_snapshot() -> schema::SchemaSnapshot {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_all(&conn).unwrap();
        schema::snapshot(&conn).unwrap()
    }

    fn user_version(conn: &Connection) -> i64 {
        conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap()
    }

    #[test]
    fn test_chain_is_contiguous() {
        let chain = MigrationChain::standard();
        let versions: Vec<i64> = chain.steps().map(|s| s.version()).collect();
        let expected: Vec<i64> = (OLDEST_UPGRADABLE_VERSION + 1..=DATABASE_VERSION).collect();
        assert_eq!(versions, expected);
    }

    #[test]
    fn test_no_step_pending_after_upgrade() {
        for (table, column) in SORT_TITLE_COLUMNS.iter().chain(RATING_COLUMNS) {
            assert!(table.column(column).is_some(), "{}.{}", table.name, column);
        }

        let chain = MigrationChain::standard();
        let cal = calendar();
        let ctx = MigrationContext { calendar: &cal };
        let mut conn = legacy_db();
        // everything but the retired step has work to do on version 16
        for step in chain.steps().filter(|s| s.version() != 29) {
            assert!(step.ddl_pending(&conn).unwrap(), "step {}", step.version());
        }

        chain.upgrade(&mut conn, 16, DATABASE_VERSION, &ctx).unwrap();
        for step in chain.steps() {
            assert!(!step.ddl_pending(&conn).unwrap(), "step {}", step.version());
        }
    }

    #[test]
    fn test_upgrade_from_every_version_matches_fresh_schema() {
        let chain = MigrationChain::standard();
        let cal = calendar();
        let ctx = MigrationContext { calendar: &cal };
        let fresh = fresh_snapshot();

        for seeded in OLDEST_UPGRADABLE_VERSION..DATABASE_VERSION {
            let mut conn = legacy_db();
            chain.upgrade(&mut conn, 16, seeded, &ctx).unwrap();
            assert_eq!(user_version(&conn), seeded);

            let reached = chain.upgrade(&mut conn, seeded, DATABASE_VERSION, &ctx).unwrap();
            assert_eq!(reached, DATABASE_VERSION);
            assert_eq!(user_version(&conn), DATABASE_VERSION);
            assert_eq!(
                schema::snapshot(&conn).unwrap(),
                fresh,
                "schema differs after upgrading from version {}",
                seeded
            );
        }
    }

    #[test]
    fn test_rerunning_chain_on_current_schema_is_harmless() {
        let chain = MigrationChain::standard();
        let cal = calendar();
        let ctx = MigrationContext { calendar: &cal };

        let mut conn = Connection::open_in_memory().unwrap();
        schema::create_all(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO shows (id, title, status, release_weekday, release_time) VALUES (1, 'The Wire', '1', 7, -1);",
        )
        .unwrap();
        let before = schema::snapshot(&conn).unwrap();

        chain.upgrade(&mut conn, 16, DATABASE_VERSION, &ctx).unwrap();
        chain.upgrade(&mut conn, 16, DATABASE_VERSION, &ctx).unwrap();

        assert_eq!(schema::snapshot(&conn).unwrap(), before);
        let (status, weekday, sort): (String, i64, String) = conn
            .query_row(
                "SELECT status, release_weekday, title_no_article FROM shows WHERE id = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(status, "1");
        assert_eq!(weekday, 7);
        assert_eq!(sort, "Wire");
    }

    #[test]
    fn test_release_time_encoding_is_not_repeatable() {
        let chain = MigrationChain::standard();
        let cal = calendar();
        let ctx = MigrationContext { calendar: &cal };

        let mut conn = Connection::open_in_memory().unwrap();
        schema::create_all(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO shows (id, title, release_time) VALUES (1, 'The Wire', 2030), (2, 'Lost', -1);",
        )
        .unwrap();

        // 2030 read as milliseconds is 16:00 at UTC-8
        chain.upgrade(&mut conn, 33, 34, &ctx).unwrap();
        let read = |id: i64| -> i64 {
            conn.query_row("SELECT release_time FROM shows WHERE id = ?1", [id], |r| r.get(0))
                .unwrap()
        };
        assert_eq!(read(1), 1600);
        assert_eq!(read(2), -1);
    }

    #[test]
    fn test_upgrade_with_foreign_keys_enforced() {
        let chain = MigrationChain::standard();
        let cal = calendar();
        let ctx = MigrationContext { calendar: &cal };
        let mut conn = legacy_db();
        conn.pragma_update(None, "foreign_keys", true).unwrap();
        conn.execute_batch(
            "INSERT INTO shows (id, title, release_weekday) VALUES (1, 'Lost', 'Wednesday');
             INSERT INTO seasons (id, combined_number, show_id) VALUES (10, 1, 1);
             INSERT INTO episodes (id, title, number, season, season_id, show_id, watched, first_aired)
             VALUES (100, 'Pilot', 1, 1, 10, 1, 1, '2004-09-22');",
        )
        .unwrap();

        chain.upgrade(&mut conn, 16, DATABASE_VERSION, &ctx).unwrap();

        assert!(schema::foreign_keys_enabled(&conn).unwrap());
        let (weekday, last_watched): (i64, i64) = conn
            .query_row(
                "SELECT release_weekday, last_watched_id FROM shows WHERE id = 1",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!((weekday, last_watched), (3, 100));
        let violations: i64 = conn
            .query_row("SELECT COUNT(*) FROM pragma_foreign_key_check", [], |r| r.get(0))
            .unwrap();
        assert_eq!(violations, 0);
    }

    #[test]
    fn test_unsupported_versions_are_rejected() {
        let chain = MigrationChain::standard();
        let cal = calendar();
        let ctx = MigrationContext { calendar: &cal };
        let mut conn = legacy_db();

        for from in [0, 12, 15, DATABASE_VERSION + 1] {
            let err = chain.upgrade(&mut conn, from, DATABASE_VERSION, &ctx).unwrap_err();
            assert!(matches!(err, StoreError::UnsupportedSchemaVersion { .. }));
        }
    }

    #[test]
    fn test_legacy_data_is_transformed() {
        let chain = MigrationChain::standard();
        let cal = calendar();
        let ctx = MigrationContext { calendar: &cal };
        let mut conn = legacy_db();

        // 20:30 at UTC-8 on 1970-01-01
        let release_ms: i64 = (28 * 3600 + 30 * 60) * 1000;
        conn.execute(
            "INSERT INTO shows (id, title, release_time, release_weekday, status)
             VALUES (1, 'The Wire', ?1, 'Sunday', 'Continuing'),
                    (2, 'Breaking Bad', -1, 'whenever', 'Ended'),
                    (3, 'A-Team', NULL, NULL, NULL)",
            [release_ms],
        )
        .unwrap();
        conn.execute_batch(
            "INSERT INTO seasons (id, combined_number, show_id) VALUES (10, 1, 1);
             INSERT INTO episodes (id, title, number, season, season_id, show_id, watched, first_aired)
             VALUES (100, 'The Target', 1, 1, 10, 1, 1, '2002-06-02'),
                    (101, 'The Detail', 2, 1, 10, 1, 0, 'TBA');",
        )
        .unwrap();

        chain.upgrade(&mut conn, 16, DATABASE_VERSION, &ctx).unwrap();

        let read_show = |id: i64| -> (i64, i64, String, Option<String>) {
            conn.query_row(
                "SELECT release_time, release_weekday, status, title_no_article FROM shows WHERE id = ?1",
                [id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap()
        };
        assert_eq!(read_show(1), (2030, 7, "1".to_string(), Some("Wire".to_string())));
        assert_eq!(read_show(2), (-1, -1, "0".to_string(), Some("Breaking Bad".to_string())));
        assert_eq!(read_show(3), (-1, -1, "".to_string(), Some("A-Team".to_string())));

        let aired: i64 = conn
            .query_row("SELECT first_aired_ms FROM episodes WHERE id = 100", [], |r| r.get(0))
            .unwrap();
        let expected = Utc.with_ymd_and_hms(2002, 6, 3, 0, 0, 0).unwrap();
        assert_eq!(aired, expected.timestamp_millis());
        let unknown: i64 = conn
            .query_row("SELECT first_aired_ms FROM episodes WHERE id = 101", [], |r| r.get(0))
            .unwrap();
        assert_eq!(unknown, -1);

        let last_watched: i64 = conn
            .query_row("SELECT last_watched_id FROM shows WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(last_watched, 100);
        assert!(!schema::column_exists(&conn, "episodes", "first_aired").unwrap());
    }

    #[test]
    fn test_last_watched_picks_latest_aired_watched_episode() {
        let chain = MigrationChain::standard();
        let cal = calendar();
        let ctx = MigrationContext { calendar: &cal };
        let mut conn = legacy_db();
        chain.upgrade(&mut conn, 16, 30, &ctx).unwrap();

        conn.execute_batch(
            "INSERT INTO shows (id, title) VALUES (1, 'Lost'), (2, 'Fringe');
             INSERT INTO episodes (id, title, number, season, show_id, watched, first_aired_ms) VALUES
                (1, 'a', 1, 1, 1, 1, 100),
                (2, 'b', 2, 1, 1, 1, 200),
                (3, 'c', 3, 1, 1, 1, 300),
                (4, 'd', 4, 1, 1, 0, 400),
                (5, 'e', 5, 1, 1, 1, -1),
                (6, 'f', 1, 1, 2, 0, 100);",
        )
        .unwrap();

        chain.upgrade(&mut conn, 30, 31, &ctx).unwrap();

        let lost: i64 = conn
            .query_row("SELECT last_watched_id FROM shows WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(lost, 3);
        // nothing watched keeps the column default
        let fringe: i64 = conn
            .query_row("SELECT last_watched_id FROM shows WHERE id = 2", [], |r| r.get(0))
            .unwrap();
        assert_eq!(fringe, 0);
    }

    #[test]
    fn test_last_watched_tie_breaks_on_season_then_number() {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_all(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO shows (id, title) VALUES (1, 'Doctor Who');
             INSERT INTO episodes (id, title, number, season, show_id, watched, first_aired_ms) VALUES
                (1, 'special', 0, 0, 1, 1, 500),
                (2, 's1e2', 2, 1, 1, 1, 500),
                (3, 's1e3', 3, 1, 1, 1, 500);",
        )
        .unwrap();
        assert_eq!(latest_watched_episode(&conn, 1).unwrap(), Some(3));
        assert_eq!(latest_watched_episode(&conn, 2).unwrap(), None);
    }

    #[test]
    fn test_partial_upgrade_still_transforms_data() {
        let chain = MigrationChain::standard();
        let cal = calendar();
        let ctx = MigrationContext { calendar: &cal };
        let mut conn = legacy_db();
        chain.upgrade(&mut conn, 16, 32, &ctx).unwrap();

        // an interrupted release added the sort title columns without filling them
        conn.execute_batch(
            "ALTER TABLE shows ADD COLUMN title_no_article TEXT;
             INSERT INTO shows (id, title) VALUES (1, 'The Sopranos');
             INSERT INTO movies (tmdb_id, title) VALUES (603, 'The Matrix');",
        )
        .unwrap();
        assert!(schema::column_exists(&conn, "movies", "title_no_article").unwrap());

        chain.upgrade(&mut conn, 32, 33, &ctx).unwrap();

        let show: String = conn
            .query_row("SELECT title_no_article FROM shows WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        let movie: String = conn
            .query_row("SELECT title_no_article FROM movies WHERE tmdb_id = 603", [], |r| r.get(0))
            .unwrap();
        assert_eq!(show, "Sopranos");
        assert_eq!(movie, "Matrix");
    }

    #[test]
    fn test_failed_step_rolls_back_and_reports_version() {
        let chain = MigrationChain::standard();
        let cal = calendar();
        let ctx = MigrationContext { calendar: &cal };
        let mut conn = legacy_db();
        chain.upgrade(&mut conn, 16, 20, &ctx).unwrap();
        conn.execute_batch("DROP TABLE shows").unwrap();

        let err = chain.upgrade(&mut conn, 20, DATABASE_VERSION, &ctx).unwrap_err();
        assert!(matches!(err, StoreError::Migration { version: 21, .. }));
        assert_eq!(user_version(&conn), 20);
    }

    #[test]
    fn test_status_flag() {
        assert_eq!(status_flag("Continuing"), Some("1"));
        assert_eq!(status_flag("Ended"), Some("0"));
        assert_eq!(status_flag("On Hiatus"), Some(""));
        assert_eq!(status_flag("1"), None);
        assert_eq!(status_flag(""), None);
    }
}
