use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, SubsecRound, TimeZone, Utc, Weekday};
use chrono_tz::Asia::Karachi;
use psx_application::extraction::{ExtractionChain, ExtractionTimeouts, Strategy};
use psx_application::orchestrator::{RunOrchestrator, RunOutcome, RunStage};
use psx_application::scheduler::{Clock, WindowScheduler};
use psx_application::shutdown::{self, Shutdown};
use psx_domain::repositories::rendering::{PageSession, RenderError, RenderingEngine, TableRow};
use psx_domain::repositories::snapshots::SnapshotRepository;
use psx_domain::services::window::ActiveWindow;
use psx_domain::value_objects::record::{NormalizedRecord, RawRecord};
use psx_domain::value_objects::run::{RunSummary, UpsertOutcome};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct Page {
    table_present: bool,
    hang: bool,
    script: Option<Vec<RawRecord>>,
    rows: Vec<Vec<String>>,
}

#[derive(Default)]
struct Counters {
    loads: AtomicUsize,
    closes: AtomicUsize,
}

struct FakeEngine {
    page: Page,
    fail_load: bool,
    counters: Arc<Counters>,
}

impl FakeEngine {
    fn new(page: Page) -> (Self, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        (
            Self {
                page,
                fail_load: false,
                counters: counters.clone(),
            },
            counters,
        )
    }
}

#[async_trait]
impl RenderingEngine for FakeEngine {
    async fn load_page(&self, _url: &str) -> Result<Box<dyn PageSession>, RenderError> {
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail_load {
            return Err(RenderError::Navigation("net::ERR_NAME_NOT_RESOLVED".to_string()));
        }
        Ok(Box::new(FakeSession {
            page: self.page.clone(),
            counters: self.counters.clone(),
        }))
    }
}

struct FakeSession {
    page: Page,
    counters: Arc<Counters>,
}

struct FakeRow(Vec<String>);

#[async_trait]
impl TableRow for FakeRow {
    async fn cell_texts(&self) -> Result<Vec<String>, RenderError> {
        Ok(self.0.clone())
    }
}

#[async_trait]
impl PageSession for FakeSession {
    async fn wait_for_table(&mut self, _timeout: Duration) -> bool {
        if self.page.hang {
            std::future::pending::<()>().await;
        }
        self.page.table_present
    }

    async fn evaluate_records(
        &mut self,
        _script: &str,
    ) -> Result<Option<Vec<RawRecord>>, RenderError> {
        Ok(self.page.script.clone())
    }

    async fn query_rows(&mut self) -> Result<Vec<Box<dyn TableRow>>, RenderError> {
        Ok(self
            .page
            .rows
            .iter()
            .cloned()
            .map(|cells| Box::new(FakeRow(cells)) as Box<dyn TableRow>)
            .collect())
    }

    async fn close(&mut self) -> Result<(), RenderError> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct InMemoryRepository {
    rows: Mutex<BTreeMap<(DateTime<Utc>, String), NormalizedRecord>>,
    fail: bool,
}

impl InMemoryRepository {
    fn runs(&self) -> BTreeMap<DateTime<Utc>, Vec<String>> {
        let rows = self.rows.lock().unwrap();
        let mut runs: BTreeMap<DateTime<Utc>, Vec<String>> = BTreeMap::new();
        for (ts, symbol) in rows.keys() {
            runs.entry(*ts).or_default().push(symbol.clone());
        }
        runs
    }
}

#[async_trait]
impl SnapshotRepository for InMemoryRepository {
    async fn upsert_run(
        &self,
        scrape_timestamp: DateTime<Utc>,
        records: &[NormalizedRecord],
    ) -> Result<UpsertOutcome, String> {
        if self.fail {
            return Err("connection refused".to_string());
        }
        let mut rows = self.rows.lock().unwrap();
        let mut outcome = UpsertOutcome::default();
        for record in records {
            outcome.attempted += 1;
            let key = (scrape_timestamp, record.symbol().to_string());
            if !rows.contains_key(&key) {
                rows.insert(key, record.clone());
                outcome.inserted += 1;
            }
        }
        Ok(outcome)
    }

    async fn run_summary(&self, scrape_timestamp: DateTime<Utc>) -> Result<RunSummary, String> {
        let rows = self.rows.lock().unwrap();
        let run: Vec<&NormalizedRecord> = rows
            .iter()
            .filter(|((ts, _), _)| *ts == scrape_timestamp)
            .map(|(_, record)| record)
            .collect();
        Ok(RunSummary {
            unique_symbols: run.len() as i64,
            min_current: run.iter().map(|r| r.current()).reduce(f64::min),
            max_current: run.iter().map(|r| r.current()).reduce(f64::max),
            total_volume: run.iter().map(|r| r.volume()).sum(),
        })
    }
}

struct FixedClock(DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Wall clock that follows tokio's (possibly paused) timer.
struct TokioClock {
    base: DateTime<Utc>,
    start: tokio::time::Instant,
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now() - self.start;
        self.base + ChronoDuration::from_std(elapsed).unwrap()
    }
}

fn psx_window() -> ActiveWindow {
    ActiveWindow::new(
        Karachi,
        NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
        NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
        vec![Weekday::Sat, Weekday::Sun],
        5,
    )
    .unwrap()
}

fn pkt(d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Karachi
        .with_ymd_and_hms(2026, 10, d, h, mi, s)
        .unwrap()
        .with_timezone(&Utc)
}

fn row(symbol: &str, current: &str) -> Vec<String> {
    [
        symbol, "CEMENT", "KSE100", "10.00", "10.10", "10.90", "9.80", current, "0.40", "4.00%",
        "12,500",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Script returns nothing; the row walk finds AAA, BBB and a zero-priced CCC.
fn fallback_page() -> Page {
    Page {
        table_present: true,
        hang: false,
        script: Some(Vec::new()),
        rows: vec![row("AAA", "10.5"), row("BBB", "1,234.50"), row("CCC", "0")],
    }
}

fn timeouts() -> ExtractionTimeouts {
    ExtractionTimeouts {
        primary_wait: Duration::from_secs(20),
        settle_delay: Duration::ZERO,
        secondary_wait: Duration::from_secs(25),
    }
}

fn orchestrator(
    engine: FakeEngine,
    repository: Arc<InMemoryRepository>,
    clock: Arc<dyn Clock>,
) -> RunOrchestrator {
    RunOrchestrator::new(
        Arc::new(engine),
        repository,
        psx_window(),
        "https://dps.psx.com.pk/market-watch",
        ExtractionChain::new(timeouts()),
        clock,
    )
}

#[tokio::test]
async fn fallback_scenario_persists_only_valid_rows() {
    let (engine, counters) = FakeEngine::new(fallback_page());
    let repository = Arc::new(InMemoryRepository::default());
    let now = pkt(14, 11, 0, 0);
    let orchestrator = orchestrator(engine, repository.clone(), Arc::new(FixedClock(now)));

    let outcome = orchestrator.run_once(&Shutdown::never(), false).await;

    let RunOutcome::Persisted(report) = outcome else {
        panic!("expected a persisted run, got {outcome:?}");
    };
    assert_eq!(report.strategy, Strategy::RowWalk);
    assert_eq!(report.scrape_timestamp, now);
    assert_eq!(report.extracted, 3);
    assert_eq!(report.rejected, vec!["CCC".to_string()]);
    assert_eq!(report.upsert, UpsertOutcome { attempted: 2, inserted: 2 });
    let summary = report.summary.expect("summary");
    assert_eq!(summary.unique_symbols, 2);
    assert_eq!(summary.min_current, Some(10.5));
    assert_eq!(summary.max_current, Some(1234.5));
    assert_eq!(summary.total_volume, 25_000);

    let runs = repository.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[&now], vec!["AAA".to_string(), "BBB".to_string()]);
    assert_eq!(counters.loads.load(Ordering::SeqCst), 1);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rerunning_the_same_timestamp_inserts_nothing_new() {
    let (engine, _) = FakeEngine::new(fallback_page());
    let repository = Arc::new(InMemoryRepository::default());
    let orchestrator =
        orchestrator(engine, repository.clone(), Arc::new(FixedClock(pkt(14, 11, 0, 0))));

    let first = orchestrator.run_once(&Shutdown::never(), false).await;
    let second = orchestrator.run_once(&Shutdown::never(), false).await;

    let (RunOutcome::Persisted(first), RunOutcome::Persisted(second)) = (first, second) else {
        panic!("both runs should persist");
    };
    assert_eq!(first.upsert.inserted, 2);
    assert_eq!(second.upsert, UpsertOutcome { attempted: 2, inserted: 0 });
    assert_eq!(second.summary.map(|s| s.unique_symbols), Some(2));
}

#[tokio::test]
async fn duplicate_symbol_in_one_run_is_stored_once() {
    let page = Page {
        table_present: true,
        rows: vec![row("AAA", "10.5"), row("AAA", "11.0"), row("BBB", "20")],
        ..Page::default()
    };
    let (engine, _) = FakeEngine::new(page);
    let repository = Arc::new(InMemoryRepository::default());
    let now = pkt(14, 11, 0, 0);
    let orchestrator = orchestrator(engine, repository.clone(), Arc::new(FixedClock(now)));

    let outcome = orchestrator.run_once(&Shutdown::never(), false).await;

    let RunOutcome::Persisted(report) = outcome else {
        panic!("expected a persisted run, got {outcome:?}");
    };
    assert_eq!(report.extracted, 3);
    assert_eq!(report.upsert, UpsertOutcome { attempted: 3, inserted: 2 });
    let summary = report.summary.expect("summary");
    assert_eq!(summary.unique_symbols, 2);
    assert_eq!(summary.min_current, Some(10.5));
    assert_eq!(repository.runs()[&now], vec!["AAA".to_string(), "BBB".to_string()]);
}

#[tokio::test]
async fn closed_window_skips_without_loading() {
    let (engine, counters) = FakeEngine::new(fallback_page());
    let repository = Arc::new(InMemoryRepository::default());
    // Saturday.
    let orchestrator =
        orchestrator(engine, repository.clone(), Arc::new(FixedClock(pkt(17, 11, 0, 0))));

    let outcome = orchestrator.run_once(&Shutdown::never(), false).await;

    assert_eq!(outcome, RunOutcome::Skipped);
    assert_eq!(counters.loads.load(Ordering::SeqCst), 0);
    assert!(repository.runs().is_empty());
}

#[tokio::test]
async fn forced_run_ignores_closed_window() {
    let (engine, _) = FakeEngine::new(fallback_page());
    let repository = Arc::new(InMemoryRepository::default());
    let orchestrator =
        orchestrator(engine, repository.clone(), Arc::new(FixedClock(pkt(17, 11, 0, 0))));

    let outcome = orchestrator.run_once(&Shutdown::never(), true).await;

    assert_eq!(outcome.label(), "persisted");
    assert_eq!(repository.runs().len(), 1);
}

#[tokio::test]
async fn empty_page_reports_no_data_and_closes_session() {
    let (engine, counters) = FakeEngine::new(Page::default());
    let repository = Arc::new(InMemoryRepository {
        fail: true,
        ..InMemoryRepository::default()
    });
    let orchestrator =
        orchestrator(engine, repository.clone(), Arc::new(FixedClock(pkt(14, 11, 0, 0))));

    let outcome = orchestrator.run_once(&Shutdown::never(), false).await;

    assert_eq!(outcome, RunOutcome::NoData);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn all_rows_rejected_reports_no_data() {
    let page = Page {
        table_present: true,
        rows: vec![row("CCC", "0"), row("DDD", "250000")],
        ..Page::default()
    };
    let (engine, _) = FakeEngine::new(page);
    let repository = Arc::new(InMemoryRepository::default());
    let orchestrator =
        orchestrator(engine, repository.clone(), Arc::new(FixedClock(pkt(14, 11, 0, 0))));

    assert_eq!(
        orchestrator.run_once(&Shutdown::never(), false).await,
        RunOutcome::NoData
    );
    assert!(repository.runs().is_empty());
}

#[tokio::test]
async fn load_failure_is_reported_not_raised() {
    let (mut engine, counters) = FakeEngine::new(fallback_page());
    engine.fail_load = true;
    let repository = Arc::new(InMemoryRepository::default());
    let orchestrator =
        orchestrator(engine, repository.clone(), Arc::new(FixedClock(pkt(14, 11, 0, 0))));

    let outcome = orchestrator.run_once(&Shutdown::never(), false).await;

    let RunOutcome::Failed { stage, error } = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(stage, RunStage::AcquiringSession);
    assert!(error.contains("ERR_NAME_NOT_RESOLVED"));
    assert_eq!(counters.closes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn persistence_failure_is_reported_after_closing_session() {
    let (engine, counters) = FakeEngine::new(fallback_page());
    let repository = Arc::new(InMemoryRepository {
        fail: true,
        ..InMemoryRepository::default()
    });
    let orchestrator =
        orchestrator(engine, repository.clone(), Arc::new(FixedClock(pkt(14, 11, 0, 0))));

    let outcome = orchestrator.run_once(&Shutdown::never(), false).await;

    assert_eq!(
        outcome,
        RunOutcome::Failed {
            stage: RunStage::Persisting,
            error: "connection refused".to_string(),
        }
    );
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_table_wait_cancels_and_closes_session() {
    let page = Page {
        hang: true,
        ..fallback_page()
    };
    let (engine, counters) = FakeEngine::new(page);
    let repository = Arc::new(InMemoryRepository::default());
    let orchestrator =
        orchestrator(engine, repository.clone(), Arc::new(FixedClock(pkt(14, 11, 0, 0))));
    let (trigger, shutdown) = shutdown::channel();

    let (outcome, _) = tokio::join!(orchestrator.run_once(&shutdown, false), async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.trigger();
    });

    assert_eq!(outcome, RunOutcome::Cancelled);
    assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    assert!(repository.runs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn two_firings_are_stored_under_distinct_timestamps() {
    let (engine, counters) = FakeEngine::new(fallback_page());
    let repository = Arc::new(InMemoryRepository::default());
    let base = pkt(14, 10, 2, 30);
    let clock: Arc<dyn Clock> = Arc::new(TokioClock {
        base,
        start: tokio::time::Instant::now(),
    });
    let mut scheduler =
        WindowScheduler::new(orchestrator(engine, repository.clone(), clock.clone()), clock);
    let (trigger, shutdown) = shutdown::channel();

    let handle = tokio::spawn(async move {
        scheduler.run_forever(shutdown).await;
        scheduler
    });
    // First run at 10:02:30, second on the grid at 10:05, stop at 10:06:00.
    tokio::time::sleep(Duration::from_secs(210)).await;
    trigger.trigger();
    let scheduler = handle.await.unwrap();

    let runs = repository.runs();
    assert_eq!(runs.len(), 2);
    let timestamps: Vec<DateTime<Utc>> = runs.keys().copied().collect();
    assert_eq!(timestamps[0], base);
    let gap = timestamps[1] - timestamps[0];
    assert!(gap >= ChronoDuration::seconds(150) && gap < ChronoDuration::seconds(151));
    for symbols in runs.values() {
        assert_eq!(symbols, &vec!["AAA".to_string(), "BBB".to_string()]);
    }
    assert_eq!(counters.closes.load(Ordering::SeqCst), 2);

    let state = scheduler.state();
    assert!(state.window_open);
    assert!(state
        .last_fired
        .is_some_and(|fired| fired.trunc_subsecs(6) == timestamps[1]));
    assert!(state.next_fire.unwrap() > timestamps[1]);
}

#[tokio::test(start_paused = true)]
async fn scheduler_sleeps_through_closed_window_until_shutdown() {
    let (engine, counters) = FakeEngine::new(fallback_page());
    let repository = Arc::new(InMemoryRepository::default());
    // Saturday morning: next open is Monday.
    let clock: Arc<dyn Clock> = Arc::new(TokioClock {
        base: pkt(17, 8, 0, 0),
        start: tokio::time::Instant::now(),
    });
    let mut scheduler =
        WindowScheduler::new(orchestrator(engine, repository.clone(), clock.clone()), clock);
    let (trigger, shutdown) = shutdown::channel();

    let handle = tokio::spawn(async move {
        scheduler.run_forever(shutdown).await;
        scheduler
    });
    tokio::time::sleep(Duration::from_secs(3600)).await;
    trigger.trigger();
    let scheduler = handle.await.unwrap();

    assert_eq!(counters.loads.load(Ordering::SeqCst), 0);
    assert!(!scheduler.state().window_open);
    assert_eq!(scheduler.state().next_fire, Some(pkt(19, 9, 30, 0)));
}
