//! Info command implementation

use anyhow::Result;
use serde::Serialize;
use std::path::Path;

use super::print_json;
use crate::store::{OpenOutcome, ShowStore};

#[derive(Serialize)]
struct StoreInfo<'a> {
    path: String,
    schema_version: i64,
    fingerprint: String,
    open: &'a OpenOutcome,
    tables: Vec<TableCount>,
}

#[derive(Serialize)]
struct TableCount {
    table: &'static str,
    rows: i64,
}

pub fn run(store: &ShowStore, path: &Path, json: bool) -> Result<()> {
    let info = StoreInfo {
        path: path.display().to_string(),
        schema_version: store.schema_version()?,
        fingerprint: store.schema_fingerprint()?,
        open: store.open_outcome(),
        tables: store
            .table_row_counts()?
            .into_iter()
            .map(|(table, rows)| TableCount { table, rows })
            .collect(),
    };

    if json {
        return print_json(&info);
    }

    println!("Database:    {}", info.path);
    println!("Schema:      v{} ({})", info.schema_version, info.open);
    println!("Fingerprint: {}", info.fingerprint);
    println!();
    println!("{:<16} {:>8}", "Table", "Rows");
    println!("{}", "-".repeat(25));
    for t in &info.tables {
        println!("{:<16} {:>8}", t.table, t.rows);
    }
    Ok(())
}
