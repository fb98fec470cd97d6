use async_trait::async_trait;
use chrono::{DateTime, Utc};
use psx_domain::repositories::snapshots::{validate_table_name, SnapshotRepository};
use psx_domain::value_objects::record::NormalizedRecord;
use psx_domain::value_objects::run::{RunSummary, UpsertOutcome};
use std::time::Instant;
use tokio_postgres::{Client, Config, NoTls};
use tracing::Instrument;

const SCHEMA_TEMPLATE: &str = include_str!("../../../ops/migrations/0001_create_psx_data.sql");

/// Snapshot store backed by PostgreSQL. Every call opens its own connection,
/// so nothing is held open between scheduled runs.
#[derive(Debug, Clone)]
pub struct PostgresSnapshotRepository {
    config: Config,
    table: String,
}

impl PostgresSnapshotRepository {
    pub fn new(db_url: &str, table: impl Into<String>) -> Result<Self, String> {
        let table = table.into();
        if let Err(err) = validate_table_name(&table) {
            return Err(format!("invalid table '{table}': {err}"));
        }
        let config = db_url
            .parse::<Config>()
            .map_err(|err| format!("invalid postgres db url: {err}"))?;
        Ok(Self { config, table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Creates the snapshot table, its run/symbol unique key and the lookup
    /// indexes when they are missing.
    pub async fn apply_schema(&self) -> Result<(), String> {
        let client = self.connect().await?;
        client
            .batch_execute(&schema_sql(&self.table))
            .await
            .map_err(|err| format!("failed to apply schema to {}: {err}", self.table))?;
        tracing::info!(table = %self.table, "schema ready");
        Ok(())
    }

    async fn connect(&self) -> Result<Client, String> {
        let start = Instant::now();
        let (client, connection) = self.config.connect(NoTls).await.map_err(|err| {
            metrics::counter!("psx.db.connect.errors_total").increment(1);
            format!("failed to connect to postgres: {err}")
        })?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::warn!(error = %err, "postgres connection error");
            }
        });
        metrics::histogram!("psx.db.connect_ms").record(start.elapsed().as_secs_f64() * 1000.0);
        Ok(client)
    }

    async fn upsert(
        &self,
        scrape_timestamp: DateTime<Utc>,
        records: &[NormalizedRecord],
    ) -> Result<UpsertOutcome, (&'static str, String)> {
        let mut client = self.connect().await.map_err(|err| ("connect", err))?;
        let statement = client
            .prepare(&insert_sql(&self.table))
            .await
            .map_err(|err| ("prepare", format!("failed to prepare insert: {err}")))?;
        let transaction = client
            .transaction()
            .await
            .map_err(|err| ("begin", format!("failed to start transaction: {err}")))?;

        let mut outcome = UpsertOutcome::default();
        for record in records {
            let result = transaction
                .execute(
                    &statement,
                    &[
                        &scrape_timestamp,
                        &record.symbol(),
                        &record.sector(),
                        &record.listed_in(),
                        &record.ldcp(),
                        &record.open(),
                        &record.high(),
                        &record.low(),
                        &record.current(),
                        &record.change(),
                        &record.change_percent(),
                        &record.volume(),
                    ],
                )
                .await;
            match result {
                Ok(affected) => {
                    outcome.attempted += 1;
                    outcome.inserted += affected;
                }
                Err(err) => {
                    if let Err(rollback_err) = transaction.rollback().await {
                        tracing::warn!(error = %rollback_err, "rollback failed");
                    }
                    return Err((
                        "insert",
                        format!("insert failed for {}: {err}", record.symbol()),
                    ));
                }
            }
        }

        transaction
            .commit()
            .await
            .map_err(|err| ("commit", format!("failed to commit: {err}")))?;
        Ok(outcome)
    }
}

#[async_trait]
impl SnapshotRepository for PostgresSnapshotRepository {
    async fn upsert_run(
        &self,
        scrape_timestamp: DateTime<Utc>,
        records: &[NormalizedRecord],
    ) -> Result<UpsertOutcome, String> {
        if records.is_empty() {
            return Ok(UpsertOutcome::default());
        }

        let span = tracing::info_span!(
            "infra.postgres.upsert_run",
            table = %self.table,
            scrape_timestamp = %scrape_timestamp,
            records = records.len()
        );
        let start = Instant::now();
        let result = self.upsert(scrape_timestamp, records).instrument(span).await;
        metrics::histogram!("psx.db.upsert_ms").record(start.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(outcome) => {
                metrics::counter!("psx.db.upsert.calls_total", "result" => "ok").increment(1);
                metrics::counter!("psx.db.upsert.rows_ignored_total").increment(outcome.ignored());
                tracing::debug!(
                    attempted = outcome.attempted,
                    inserted = outcome.inserted,
                    "upsert committed"
                );
                Ok(outcome)
            }
            Err((stage, err)) => {
                metrics::counter!("psx.db.upsert.calls_total", "result" => "err").increment(1);
                metrics::counter!("psx.db.upsert.errors_total", "stage" => stage).increment(1);
                tracing::error!(stage, error = %err, "upsert rolled back");
                Err(err)
            }
        }
    }

    async fn run_summary(&self, scrape_timestamp: DateTime<Utc>) -> Result<RunSummary, String> {
        let client = self.connect().await?;
        let query = format!(
            "SELECT COUNT(DISTINCT symbol), \
             MIN(current)::DOUBLE PRECISION, \
             MAX(current)::DOUBLE PRECISION, \
             COALESCE(SUM(volume), 0)::BIGINT \
             FROM {} WHERE scrape_timestamp = $1",
            self.table
        );
        let row = client
            .query_one(&query, &[&scrape_timestamp])
            .await
            .map_err(|err| format!("failed to summarize run: {err}"))?;
        Ok(RunSummary {
            unique_symbols: row.get(0),
            min_current: row.get(1),
            max_current: row.get(2),
            total_volume: row.get(3),
        })
    }
}

pub fn schema_sql(table: &str) -> String {
    SCHEMA_TEMPLATE
        .replace("{index_prefix}", &table.replace('.', "_"))
        .replace("{table}", table)
}

fn insert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {table} (
            scrape_timestamp,
            symbol,
            sector,
            listed_in,
            ldcp,
            open,
            high,
            low,
            current,
            change,
            change_percent,
            volume
        ) VALUES (
            $1, $2, $3, $4,
            $5::DOUBLE PRECISION, $6::DOUBLE PRECISION, $7::DOUBLE PRECISION,
            $8::DOUBLE PRECISION, $9::DOUBLE PRECISION, $10::DOUBLE PRECISION,
            $11::DOUBLE PRECISION, $12
        )
        ON CONFLICT (scrape_timestamp, symbol) DO NOTHING"
    )
}
