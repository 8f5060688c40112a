use anyhow::Result;

use super::print_json;
use crate::store::{EpisodeRef, ShowStore};

fn describe(episode: Option<&EpisodeRef>) -> String {
    episode
        .map(|e| format!("{}x{:02} {}", e.season, e.number, e.title))
        .unwrap_or_else(|| "-".to_string())
}

pub fn run(store: &ShowStore, show_id: i64, json: bool) -> Result<()> {
    let progress = store
        .show_progress(show_id)?
        .ok_or_else(|| anyhow::anyhow!("Show not found: {}", show_id))?;

    if json {
        return print_json(&progress);
    }

    println!("{} ({})", progress.title, progress.show_id);
    println!("Watched:      {}/{}", progress.watched, progress.total);
    println!("Last watched: {}", describe(progress.last_watched.as_ref()));
    println!("Next:         {}", describe(progress.next_episode.as_ref()));

    let recent: Vec<_> = store
        .recent_activity(50)?
        .into_iter()
        .filter(|a| a.show_id == show_id)
        .take(5)
        .collect();
    if !recent.is_empty() {
        println!();
        println!("Recent activity:");
        for a in recent {
            let when = chrono::DateTime::from_timestamp_millis(a.timestamp_ms)
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| a.timestamp_ms.to_string());
            println!("  {}  {}", when, a.episode_title.as_deref().unwrap_or("-"));
        }
    }
    Ok(())
}
