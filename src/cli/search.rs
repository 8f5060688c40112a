//! Search and suggest command implementations

use anyhow::Result;

use super::{print_json, truncate};
use crate::store::{SearchFilter, ShowStore};

/// `None` when no restriction was requested.
pub fn filter_from_args(show: Option<i64>, season: Option<i64>, unwatched: bool) -> Option<SearchFilter> {
    let filter = SearchFilter {
        show_id: show,
        season,
        watched: unwatched.then_some(false),
    };
    (filter != SearchFilter::default()).then_some(filter)
}

pub fn run(store: &ShowStore, term: &str, filter: Option<&SearchFilter>, json: bool) -> Result<()> {
    let results = store
        .search(term, filter)
        .ok_or_else(|| anyhow::anyhow!("Search failed. Try 'watchstore rebuild-index' first."))?;

    if json {
        return print_json(&results);
    }
    if results.is_empty() {
        println!("No episodes match '{}'.", term);
        return Ok(());
    }

    println!("{:<24} {:<7} {:<3} {:<30} {}", "Show", "Episode", "", "Title", "Snippet");
    println!("{}", "-".repeat(100));
    for r in results {
        println!(
            "{:<24} {:<7} {:<3} {:<30} {}",
            truncate(&r.show_title, 24),
            format!("{}x{:02}", r.season, r.number),
            if r.watched { "✓" } else { "" },
            truncate(&r.title, 30),
            r.snippet.as_deref().map(|s| truncate(s, 60)).unwrap_or_default(),
        );
    }
    Ok(())
}

pub fn suggest(store: &ShowStore, term: &str, json: bool) -> Result<()> {
    let suggestions = store
        .suggest(term)
        .ok_or_else(|| anyhow::anyhow!("Suggestions failed. Try 'watchstore rebuild-index' first."))?;

    if json {
        return print_json(&suggestions);
    }
    for s in suggestions {
        println!("{:<10} {} ({})", s.episode_id, s.title, s.show_title);
    }
    Ok(())
}
