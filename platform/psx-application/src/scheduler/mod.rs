use crate::orchestrator::{RunOrchestrator, RunOutcome};
use crate::shutdown::Shutdown;
use chrono::{DateTime, Utc};
use psx_domain::services::window::{ActiveWindow, ScheduleState};
use std::sync::Arc;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Next slot on the interval grid while the window is open.
    NextInterval,
    /// The window is closed; wake when it next opens.
    WindowOpens,
}

impl WakeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            WakeReason::NextInterval => "next_interval",
            WakeReason::WindowOpens => "window_opens",
        }
    }
}

pub fn plan_next(window: &ActiveWindow, now: DateTime<Utc>) -> (DateTime<Utc>, WakeReason) {
    if window.is_open(now) {
        (window.next_aligned_instant(now), WakeReason::NextInterval)
    } else {
        (window.next_window_open(now), WakeReason::WindowOpens)
    }
}

/// Time to sleep until `wake_at`. A target at or before `now` falls back to
/// one `interval` so the loop never spins.
pub fn sleep_for(
    now: DateTime<Utc>,
    wake_at: DateTime<Utc>,
    interval: chrono::Duration,
) -> std::time::Duration {
    (wake_at - now)
        .to_std()
        .ok()
        .filter(|delay| !delay.is_zero())
        .or_else(|| interval.to_std().ok())
        .unwrap_or_default()
}

pub struct WindowScheduler {
    window: ActiveWindow,
    orchestrator: RunOrchestrator,
    clock: Arc<dyn Clock>,
    state: ScheduleState,
}

impl WindowScheduler {
    pub fn new(orchestrator: RunOrchestrator, clock: Arc<dyn Clock>) -> Self {
        Self {
            window: orchestrator.window().clone(),
            orchestrator,
            clock,
            state: ScheduleState::default(),
        }
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    /// Fires runs on the interval grid while the window is open and sleeps
    /// across closed periods. Returns once `shutdown` is triggered.
    pub async fn run_forever(&mut self, mut shutdown: Shutdown) {
        tracing::info!(
            timezone = %self.window.timezone(),
            open = %self.window.open_time(),
            close = %self.window.close_time(),
            interval_minutes = self.window.interval_minutes(),
            "scheduler started"
        );

        loop {
            if shutdown.is_triggered() {
                break;
            }

            let now = self.clock.now();
            let open = self.window.is_open(now);
            if open != self.state.window_open {
                tracing::info!(open, now = %now, "market window state changed");
                self.state.window_open = open;
            }

            if open {
                self.state.last_fired = Some(now);
                let outcome = self.orchestrator.run_once(&shutdown, false).await;
                tracing::info!(outcome = outcome.label(), "run finished");
                if matches!(outcome, RunOutcome::Cancelled) {
                    break;
                }
            }

            let now = self.clock.now();
            let (wake_at, reason) = plan_next(&self.window, now);
            let sleep = sleep_for(now, wake_at, self.window.interval());
            let wake_at = if wake_at <= now {
                tracing::warn!(
                    now = %now,
                    wake_at = %wake_at,
                    "computed non-positive sleep; waiting one interval"
                );
                now + self.window.interval()
            } else {
                wake_at
            };
            self.state.next_fire = Some(wake_at);
            tracing::info!(
                wake_at = %wake_at,
                reason = reason.as_str(),
                sleep_secs = sleep.as_secs(),
                "scheduler sleeping"
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = shutdown.triggered() => break,
            }
        }

        tracing::info!("scheduler stopped");
    }
}
