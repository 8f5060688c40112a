use anyhow::{Context, Result};

use crate::store::{IndexRebuild, ShowStore};

pub fn run(store: &ShowStore) -> Result<()> {
    let rebuild = store
        .rebuild_search_index()
        .context("recreating the episode search index")?;

    match rebuild {
        IndexRebuild::Full => println!("Indexed episode titles and overviews."),
        IndexRebuild::TitlesOnly => println!("Indexed episode titles only; overviews were unreadable."),
        IndexRebuild::Unpopulated => {
            anyhow::bail!("search index was recreated but could not be filled, see log")
        }
    }
    Ok(())
}
