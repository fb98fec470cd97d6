use crate::extraction::{ExtractionChain, Strategy};
use crate::scheduler::Clock;
use crate::shutdown::Shutdown;
use chrono::{DateTime, SubsecRound, Utc};
use psx_domain::repositories::rendering::RenderingEngine;
use psx_domain::repositories::snapshots::SnapshotRepository;
use psx_domain::services::normalizer::normalize_batch;
use psx_domain::services::window::ActiveWindow;
use psx_domain::value_objects::record::NormalizedRecord;
use psx_domain::value_objects::run::{RunSummary, UpsertOutcome};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

const SAMPLE_RECORDS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Idle,
    AcquiringSession,
    Extracting,
    Normalizing,
    Persisting,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Idle => "idle",
            RunStage::AcquiringSession => "acquiring_session",
            RunStage::Extracting => "extracting",
            RunStage::Normalizing => "normalizing",
            RunStage::Persisting => "persisting",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub scrape_timestamp: DateTime<Utc>,
    pub strategy: Strategy,
    pub extracted: usize,
    pub rejected: Vec<String>,
    pub upsert: UpsertOutcome,
    pub summary: Option<RunSummary>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The window was closed; nothing was attempted.
    Skipped,
    /// The page yielded no usable rows; the store was not touched.
    NoData,
    Persisted(RunReport),
    Failed { stage: RunStage, error: String },
    Cancelled,
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RunOutcome::Skipped => "skipped",
            RunOutcome::NoData => "no_data",
            RunOutcome::Persisted(_) => "persisted",
            RunOutcome::Failed { .. } => "failed",
            RunOutcome::Cancelled => "cancelled",
        }
    }
}

pub struct RunOrchestrator {
    engine: Arc<dyn RenderingEngine>,
    repository: Arc<dyn SnapshotRepository>,
    window: ActiveWindow,
    source_url: String,
    chain: ExtractionChain,
    clock: Arc<dyn Clock>,
}

impl RunOrchestrator {
    pub fn new(
        engine: Arc<dyn RenderingEngine>,
        repository: Arc<dyn SnapshotRepository>,
        window: ActiveWindow,
        source_url: impl Into<String>,
        chain: ExtractionChain,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            repository,
            window,
            source_url: source_url.into(),
            chain,
            clock,
        }
    }

    pub fn window(&self) -> &ActiveWindow {
        &self.window
    }

    /// One scrape-validate-persist execution. Failures are reported through
    /// the outcome, never as an error, so the caller can keep scheduling.
    pub async fn run_once(&self, shutdown: &Shutdown, force: bool) -> RunOutcome {
        let now = self.clock.now();
        if !force && !self.window.is_open(now) {
            tracing::info!(now = %now, "market window closed; skipping run");
            return record_outcome(RunOutcome::Skipped, Instant::now());
        }

        let scrape_timestamp = now.trunc_subsecs(6);
        let span = tracing::info_span!("run", scrape_timestamp = %scrape_timestamp, forced = force);
        let start = Instant::now();
        let outcome = self
            .execute(scrape_timestamp, shutdown.clone())
            .instrument(span)
            .await;
        record_outcome(outcome, start)
    }

    async fn execute(&self, scrape_timestamp: DateTime<Utc>, mut shutdown: Shutdown) -> RunOutcome {
        if shutdown.is_triggered() {
            return RunOutcome::Cancelled;
        }

        enter(RunStage::AcquiringSession);
        let loaded = tokio::select! {
            loaded = self.engine.load_page(&self.source_url) => loaded,
            _ = shutdown.triggered() => return RunOutcome::Cancelled,
        };
        let mut session = match loaded {
            Ok(session) => session,
            Err(err) => {
                tracing::error!(error = %err, url = %self.source_url, "failed to load market page");
                return RunOutcome::Failed {
                    stage: RunStage::AcquiringSession,
                    error: err.to_string(),
                };
            }
        };

        enter(RunStage::Extracting);
        let extraction = tokio::select! {
            extraction = self.chain.extract(session.as_mut()) => Some(extraction),
            _ = shutdown.triggered() => None,
        };
        if let Err(err) = session.close().await {
            tracing::warn!(error = %err, "failed to close page session");
        }

        let Some(extraction) = extraction else {
            tracing::info!("run cancelled during extraction");
            return RunOutcome::Cancelled;
        };
        let Some(strategy) = extraction.strategy else {
            tracing::warn!("no data extracted from any strategy");
            return RunOutcome::NoData;
        };
        metrics::counter!("psx.records.extracted_total").increment(extraction.records.len() as u64);

        enter(RunStage::Normalizing);
        let batch = normalize_batch(&extraction.records);
        metrics::counter!("psx.records.rejected_total").increment(batch.rejected.len() as u64);
        if !batch.rejected.is_empty() {
            tracing::debug!(rejected = ?batch.rejected, "records failed validation");
        }
        if batch.records.is_empty() {
            tracing::warn!(
                extracted = extraction.records.len(),
                "no valid records left after validation"
            );
            return RunOutcome::NoData;
        }
        tracing::info!(
            valid = batch.records.len(),
            rejected = batch.rejected.len(),
            "normalized records"
        );

        enter(RunStage::Persisting);
        let upsert = match self
            .repository
            .upsert_run(scrape_timestamp, &batch.records)
            .await
        {
            Ok(upsert) => upsert,
            Err(err) => {
                tracing::error!(error = %err, "failed to persist run");
                return RunOutcome::Failed {
                    stage: RunStage::Persisting,
                    error: err,
                };
            }
        };
        metrics::counter!("psx.records.inserted_total").increment(upsert.inserted);
        tracing::info!(
            attempted = upsert.attempted,
            inserted = upsert.inserted,
            ignored = upsert.ignored(),
            "persisted run"
        );

        let summary = match self.repository.run_summary(scrape_timestamp).await {
            Ok(summary) => {
                tracing::info!(
                    unique_symbols = summary.unique_symbols,
                    min_current = ?summary.min_current,
                    max_current = ?summary.max_current,
                    total_volume = summary.total_volume,
                    "run summary"
                );
                Some(summary)
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to summarize run");
                None
            }
        };
        log_sample(&batch.records);
        enter(RunStage::Idle);

        RunOutcome::Persisted(RunReport {
            scrape_timestamp,
            strategy,
            extracted: extraction.records.len(),
            rejected: batch.rejected,
            upsert,
            summary,
        })
    }
}

fn enter(stage: RunStage) {
    tracing::debug!(stage = stage.as_str(), "run stage");
}

fn log_sample(records: &[NormalizedRecord]) {
    for record in records.iter().take(SAMPLE_RECORDS) {
        tracing::info!(
            symbol = %record.symbol(),
            sector = %record.sector(),
            current = record.current(),
            change = record.change(),
            volume = record.volume(),
            "sample record"
        );
    }
}

fn record_outcome(outcome: RunOutcome, start: Instant) -> RunOutcome {
    metrics::counter!("psx.runs_total", "outcome" => outcome.label()).increment(1);
    if !matches!(outcome, RunOutcome::Skipped) {
        metrics::histogram!("psx.run.duration_ms").record(start.elapsed().as_secs_f64() * 1000.0);
    }
    if let RunOutcome::Failed { stage, error } = &outcome {
        tracing::warn!(stage = stage.as_str(), error = %error, "run failed");
    }
    outcome
}
