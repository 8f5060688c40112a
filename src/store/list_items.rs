//! Resolved contents of user lists
//!
//! A list item points at a show, a season or an episode through
//! (`item_type`, `item_ref_id`). Each kind is resolved by its own query
//! against its own table, so a season id is never looked up as a show id.

use rusqlite::{Connection, Row};
use serde::Serialize;
use tracing::warn;

use super::ShowStatus;
use crate::error::Result;
use crate::timetools;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListItemKind {
    Show,
    Season,
    Episode,
}

impl ListItemKind {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(ListItemKind::Show),
            2 => Some(ListItemKind::Season),
            3 => Some(ListItemKind::Episode),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            ListItemKind::Show => 1,
            ListItemKind::Season => 2,
            ListItemKind::Episode => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ListItemKind::Show => "show",
            ListItemKind::Season => "season",
            ListItemKind::Episode => "episode",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShowSummary {
    pub id: i64,
    pub title: String,
    /// Title without a leading article, falls back to `title`
    pub sort_title: String,
    pub overview: Option<String>,
    pub poster: Option<String>,
    pub network: Option<String>,
    pub favorite: bool,
    pub status: ShowStatus,
    /// Packed `HHMM`, `-1` when unknown
    pub release_time: i32,
    pub release_weekday: i32,
    pub release_timezone: Option<String>,
    pub release_country: Option<String>,
    pub next_text: Option<String>,
    pub next_air_date_text: Option<String>,
    pub next_air_date_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeasonSummary {
    pub id: i64,
    pub number: i64,
    pub watch_count: i64,
    pub total_count: i64,
    pub show: ShowSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodeSummary {
    pub id: i64,
    pub title: String,
    pub season: i64,
    pub number: i64,
    pub watched: bool,
    pub first_aired_ms: i64,
    pub absolute_number: Option<i64>,
    pub show: ShowSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ListItemDetails {
    Show(ShowSummary),
    Season(SeasonSummary),
    Episode(EpisodeSummary),
    /// The referenced row (or its show) no longer exists
    Unresolved { item_kind: ListItemKind, ref_id: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListEntry {
    pub row_id: i64,
    pub list_item_id: String,
    pub list_id: String,
    pub item: ListItemDetails,
}

impl ListEntry {
    /// What a list view shows as the entry's headline.
    pub fn title(&self) -> String {
        match &self.item {
            ListItemDetails::Show(show) => show.title.clone(),
            ListItemDetails::Season(season) => format!("Season {}", season.number),
            ListItemDetails::Episode(ep) => format!("{}x{:02} {}", ep.season, ep.number, ep.title),
            ListItemDetails::Unresolved { item_kind, ref_id } => {
                format!("missing {} {}", item_kind.as_str(), ref_id)
            }
        }
    }

    pub fn show_title(&self) -> Option<&str> {
        match &self.item {
            ListItemDetails::Show(show) => Some(&show.title),
            ListItemDetails::Season(season) => Some(&season.show.title),
            ListItemDetails::Episode(ep) => Some(&ep.show.title),
            ListItemDetails::Unresolved { .. } => None,
        }
    }

    pub fn kind(&self) -> ListItemKind {
        match &self.item {
            ListItemDetails::Show(_) => ListItemKind::Show,
            ListItemDetails::Season(_) => ListItemKind::Season,
            ListItemDetails::Episode(_) => ListItemKind::Episode,
            ListItemDetails::Unresolved { item_kind, .. } => *item_kind,
        }
    }
}

// ============================================
// QUERIES
// ============================================

const ITEM_COLUMNS: &str = "li.id, li.list_item_id, li.list_id, li.item_ref_id";

const SHOW_COLUMNS: &str = "sh.id, sh.title, sh.title_no_article, sh.overview, sh.poster, \
     sh.network, sh.favorite, sh.status, sh.release_time, sh.release_weekday, \
     sh.release_timezone, sh.release_country, sh.next_text, sh.next_air_date_text, \
     sh.next_air_date_ms";

const SHOW_OFFSET: usize = 4;

/// First column after the show block, where season or episode columns start.
const DETAIL_OFFSET: usize = SHOW_OFFSET + 15;

fn read_show(row: &Row, offset: usize) -> rusqlite::Result<Option<ShowSummary>> {
    let Some(id) = row.get::<_, Option<i64>>(offset)? else {
        return Ok(None);
    };
    let title = row.get::<_, Option<String>>(offset + 1)?.unwrap_or_default();
    let sort_title = row
        .get::<_, Option<String>>(offset + 2)?
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| title.clone());
    let status = row.get::<_, Option<String>>(offset + 7)?;
    Ok(Some(ShowSummary {
        id,
        title,
        sort_title,
        overview: row.get(offset + 3)?,
        poster: row.get(offset + 4)?,
        network: row.get(offset + 5)?,
        favorite: row.get::<_, Option<i64>>(offset + 6)?.unwrap_or_default() == 1,
        status: ShowStatus::from_code(status.as_deref().unwrap_or_default()),
        release_time: row
            .get::<_, Option<i32>>(offset + 8)?
            .unwrap_or(timetools::UNKNOWN as i32),
        release_weekday: row
            .get::<_, Option<i32>>(offset + 9)?
            .unwrap_or(timetools::RELEASE_WEEKDAY_UNKNOWN),
        release_timezone: row.get(offset + 10)?,
        release_country: row.get(offset + 11)?,
        next_text: row.get(offset + 12)?,
        next_air_date_text: row.get(offset + 13)?,
        next_air_date_ms: row.get(offset + 14)?,
    }))
}

struct ItemHead {
    row_id: i64,
    list_item_id: String,
    list_id: String,
    ref_id: i64,
}

fn read_head(row: &Row) -> rusqlite::Result<ItemHead> {
    Ok(ItemHead {
        row_id: row.get(0)?,
        list_item_id: row.get(1)?,
        list_id: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
        ref_id: row.get(3)?,
    })
}

impl ItemHead {
    fn into_entry(self, kind: ListItemKind, item: Option<ListItemDetails>) -> ListEntry {
        ListEntry {
            row_id: self.row_id,
            list_item_id: self.list_item_id,
            list_id: self.list_id,
            item: item.unwrap_or(ListItemDetails::Unresolved {
                item_kind: kind,
                ref_id: self.ref_id,
            }),
        }
    }
}

/// `WHERE` clause restricting to one kind and optionally one list.
fn item_filter(kind: ListItemKind, list_id: Option<&str>) -> (String, Vec<String>) {
    match list_id {
        Some(list_id) => (
            format!("WHERE li.item_type = {} AND li.list_id = ?1", kind.code()),
            vec![list_id.to_string()],
        ),
        None => (format!("WHERE li.item_type = {}", kind.code()), Vec::new()),
    }
}

fn show_items(conn: &Connection, list_id: Option<&str>) -> Result<Vec<ListEntry>> {
    let (filter, params) = item_filter(ListItemKind::Show, list_id);
    let sql = format!(
        "SELECT {ITEM_COLUMNS}, {SHOW_COLUMNS}
         FROM list_items li LEFT JOIN shows sh ON sh.id = li.item_ref_id
         {filter}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
        let head = read_head(row)?;
        let show = read_show(row, SHOW_OFFSET)?;
        Ok(head.into_entry(ListItemKind::Show, show.map(ListItemDetails::Show)))
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

fn season_items(conn: &Connection, list_id: Option<&str>) -> Result<Vec<ListEntry>> {
    let (filter, params) = item_filter(ListItemKind::Season, list_id);
    let sql = format!(
        "SELECT {ITEM_COLUMNS}, {SHOW_COLUMNS},
                se.id, se.combined_number, se.watch_count, se.total_count
         FROM list_items li
         LEFT JOIN seasons se ON se.id = li.item_ref_id
         LEFT JOIN shows sh ON sh.id = se.show_id
         {filter}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
        let head = read_head(row)?;
        let show = read_show(row, SHOW_OFFSET)?;
        let at = DETAIL_OFFSET;
        let season_id: Option<i64> = row.get(at)?;
        let details = match (season_id, show) {
            (Some(id), Some(show)) => Some(ListItemDetails::Season(SeasonSummary {
                id,
                number: row.get::<_, Option<i64>>(at + 1)?.unwrap_or_default(),
                watch_count: row.get::<_, Option<i64>>(at + 2)?.unwrap_or_default(),
                total_count: row.get::<_, Option<i64>>(at + 3)?.unwrap_or_default(),
                show,
            })),
            _ => None,
        };
        Ok(head.into_entry(ListItemKind::Season, details))
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

fn episode_items(conn: &Connection, list_id: Option<&str>) -> Result<Vec<ListEntry>> {
    let (filter, params) = item_filter(ListItemKind::Episode, list_id);
    let sql = format!(
        "SELECT {ITEM_COLUMNS}, {SHOW_COLUMNS},
                e.id, e.title, e.season, e.number, e.watched, e.first_aired_ms, e.absolute_number
         FROM list_items li
         LEFT JOIN episodes e ON e.id = li.item_ref_id
         LEFT JOIN shows sh ON sh.id = e.show_id
         {filter}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
        let head = read_head(row)?;
        let show = read_show(row, SHOW_OFFSET)?;
        let at = DETAIL_OFFSET;
        let episode_id: Option<i64> = row.get(at)?;
        let details = match (episode_id, show) {
            (Some(id), Some(show)) => Some(ListItemDetails::Episode(EpisodeSummary {
                id,
                title: row.get::<_, Option<String>>(at + 1)?.unwrap_or_default(),
                season: row.get::<_, Option<i64>>(at + 2)?.unwrap_or_default(),
                number: row.get::<_, Option<i64>>(at + 3)?.unwrap_or_default(),
                watched: row.get::<_, Option<i64>>(at + 4)?.unwrap_or_default() == 1,
                first_aired_ms: row
                    .get::<_, Option<i64>>(at + 5)?
                    .unwrap_or(timetools::UNKNOWN),
                absolute_number: row.get(at + 6)?,
                show,
            })),
            _ => None,
        };
        Ok(head.into_entry(ListItemKind::Episode, details))
    })?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

fn warn_unknown_kinds(conn: &Connection, list_id: Option<&str>) -> Result<()> {
    let sql = "SELECT li.list_item_id, li.item_type FROM list_items li
               WHERE li.item_type NOT IN (1, 2, 3) AND (?1 IS NULL OR li.list_id = ?1)";
    let mut stmt = conn.prepare(sql)?;
    let unknown = stmt
        .query_map([list_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for (list_item_id, item_type) in unknown {
        warn!(list_item_id = %list_item_id, item_type, "skipping list item of unknown type");
    }
    Ok(())
}

/// Every item of `list_id` (or of all lists), resolved and ordered by the
/// order items were added.
pub fn list_items(conn: &Connection, list_id: Option<&str>) -> Result<Vec<ListEntry>> {
    let mut entries = show_items(conn, list_id)?;
    entries.extend(season_items(conn, list_id)?);
    entries.extend(episode_items(conn, list_id)?);
    warn_unknown_kinds(conn, list_id)?;
    entries.sort_by_key(|e| e.row_id);
    Ok(entries)
}
