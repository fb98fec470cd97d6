use crate::value_objects::record::NormalizedRecord;
use crate::value_objects::run::{RunSummary, UpsertOutcome};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Durable storage of market-watch snapshots keyed by
/// `(scrape_timestamp, symbol)`. Writes for an existing key are ignored.
#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn upsert_run(
        &self,
        scrape_timestamp: DateTime<Utc>,
        records: &[NormalizedRecord],
    ) -> Result<UpsertOutcome, String>;

    async fn run_summary(&self, scrape_timestamp: DateTime<Utc>) -> Result<RunSummary, String>;
}

/// Accepts `table` or `schema.table`, each part an unquoted SQL identifier.
/// Table names are spliced into statements, so nothing else gets through.
pub fn validate_table_name(table: &str) -> Result<(), String> {
    if table.is_empty() {
        return Err("table name is empty".to_string());
    }
    let invalid = || format!("invalid table name: {table}");
    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() > 2 {
        return Err(invalid());
    }
    for part in parts {
        let mut chars = part.chars();
        let first = chars.next().ok_or_else(invalid)?;
        if !(first.is_ascii_alphabetic() || first == '_') {
            return Err(invalid());
        }
        if !chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_') {
            return Err(invalid());
        }
    }
    Ok(())
}
