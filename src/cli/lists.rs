//! Lists command implementation

use anyhow::Result;

use super::{print_json, truncate};
use crate::store::ShowStore;

pub fn run(store: &ShowStore, json: bool) -> Result<()> {
    let lists = store.lists()?;

    if json {
        return print_json(&lists);
    }
    if lists.is_empty() {
        println!("No lists found.");
        return Ok(());
    }

    println!("{:<24} {:<30} {:>6}", "ID", "Name", "Items");
    println!("{}", "-".repeat(62));
    for list in lists {
        println!(
            "{:<24} {:<30} {:>6}",
            truncate(&list.list_id, 24),
            truncate(&list.name, 30),
            list.item_count
        );
    }
    Ok(())
}

pub fn items(store: &ShowStore, list_id: &str, json: bool) -> Result<()> {
    let entries = store.list_items(Some(list_id))?;

    if json {
        return print_json(&entries);
    }
    if entries.is_empty() {
        println!("List '{}' is empty or does not exist.", list_id);
        return Ok(());
    }

    println!("{:<8} {:<24} {}", "Kind", "Show", "Item");
    println!("{}", "-".repeat(70));
    for entry in entries {
        println!(
            "{:<8} {:<24} {}",
            entry.kind().as_str(),
            truncate(entry.show_title().unwrap_or("-"), 24),
            entry.title()
        );
    }
    Ok(())
}
