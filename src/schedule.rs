//! Scheduling of periodic engine duties.
//!
//! Four duties run under real-world constraints: catalog refresh (adaptive
//! cadence), wallpaper rotation (interval or exact wall-clock alarm), batch
//! download (on demand, never two at once) and nightly cleanup. Each duty
//! walks a small state machine and consults resource guards before running.

use crate::error::EngineError;
use crate::orchestrator::Orchestrator;
use crate::platform::{NetworkState, SystemStatus};
use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, Timelike};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Nightly cleanup fires near this local time.
fn cleanup_time() -> NaiveTime {
    NaiveTime::from_hms_opt(3, 0, 0).expect("static time")
}

/// Rotation cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationInterval {
    Never,
    Every15Minutes,
    Hourly,
    DailyAt(NaiveTime),
}

impl RotationInterval {
    /// Parse the config pair (`interval`, `daily_time`).
    pub fn from_config(interval: &str, daily_time: &str) -> Self {
        match interval.trim().to_lowercase().as_str() {
            "never" => RotationInterval::Never,
            "15m" | "every_15_minutes" => RotationInterval::Every15Minutes,
            "hourly" | "1h" => RotationInterval::Hourly,
            "daily" => {
                let time = NaiveTime::from_str(&format!("{daily_time}:00"))
                    .or_else(|_| NaiveTime::from_str(daily_time))
                    .unwrap_or_else(|_| {
                        warn!(daily_time, "unparseable daily time, using 09:00");
                        NaiveTime::from_hms_opt(9, 0, 0).expect("static time")
                    });
                RotationInterval::DailyAt(time.with_nanosecond(0).unwrap_or(time))
            }
            other => {
                warn!(interval = other, "unknown rotation interval, using hourly");
                RotationInterval::Hourly
            }
        }
    }

    /// Next wall-clock fire strictly after `now`. A daily alarm whose time
    /// already passed today schedules for tomorrow; after firing, the next
    /// computation lands on the day after.
    pub fn next_fire(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        match self {
            RotationInterval::Never => None,
            RotationInterval::Every15Minutes => Some(now + ChronoDuration::minutes(15)),
            RotationInterval::Hourly => Some(now + ChronoDuration::hours(1)),
            RotationInterval::DailyAt(time) => {
                let today = now.date_naive().and_time(*time);
                let candidate = today
                    .and_local_timezone(Local)
                    .earliest()
                    .unwrap_or(now + ChronoDuration::days(1));
                if candidate > now {
                    Some(candidate)
                } else {
                    let tomorrow = (now.date_naive() + ChronoDuration::days(1)).and_time(*time);
                    tomorrow.and_local_timezone(Local).earliest()
                }
            }
        }
    }
}

/// Next nightly cleanup strictly after `now`.
pub fn next_cleanup(now: DateTime<Local>) -> Option<DateTime<Local>> {
    RotationInterval::DailyAt(cleanup_time()).next_fire(now)
}

/// How engaged the user has been lately; drives the catalog refresh cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engagement {
    High,
    Medium,
    Low,
    Minimal,
}

impl Engagement {
    /// Classify from events (wallpaper changes + feedback) over the last week.
    pub fn assess(changes_last_week: u32, feedback_last_week: u32) -> Self {
        match changes_last_week + feedback_last_week {
            n if n >= 14 => Engagement::High,
            n if n >= 4 => Engagement::Medium,
            n if n >= 1 => Engagement::Low,
            _ => Engagement::Minimal,
        }
    }

    /// Refresh cadence: 24 h / 72 h / 168 h / 336 h.
    pub fn refresh_interval(&self) -> Duration {
        let hours = match self {
            Engagement::High => 24,
            Engagement::Medium => 72,
            Engagement::Low => 168,
            Engagement::Minimal => 336,
        };
        Duration::from_secs(hours * 3600)
    }
}

/// Lifecycle of a scheduled duty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DutyState {
    Idle,
    Enqueued,
    Running,
    Succeeded,
    Retry,
    Failed,
    Cancelled,
}

impl DutyState {
    pub fn can_transition(self, next: DutyState) -> bool {
        use DutyState::*;
        matches!(
            (self, next),
            (Idle, Enqueued)
                | (Enqueued, Running)
                | (Enqueued, Cancelled)
                | (Running, Succeeded)
                | (Running, Retry)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Retry, Enqueued)
                | (Succeeded, Idle)
                | (Retry, Idle)
                | (Failed, Idle)
                | (Cancelled, Idle)
        )
    }
}

/// A named duty with transition checking.
#[derive(Debug)]
pub struct Duty {
    pub name: &'static str,
    state: DutyState,
}

impl Duty {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: DutyState::Idle,
        }
    }

    #[allow(dead_code)]
    pub fn state(&self) -> DutyState {
        self.state
    }

    /// Move to `next`, logging the hop. Illegal hops are refused.
    pub fn transition(&mut self, next: DutyState) -> bool {
        if !self.state.can_transition(next) {
            warn!(duty = self.name, from = ?self.state, to = ?next, "illegal duty transition");
            return false;
        }
        debug!(duty = self.name, from = ?self.state, to = ?next, "duty transition");
        self.state = next;
        true
    }
}

/// Resource requirements checked immediately before a duty runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceGuards {
    pub require_network: bool,
    pub require_unmetered: bool,
    pub require_battery_ok: bool,
    pub require_storage_ok: bool,
}

impl ResourceGuards {
    pub fn refresh() -> Self {
        Self {
            require_network: true,
            require_battery_ok: true,
            require_storage_ok: true,
            ..Default::default()
        }
    }

    pub fn batch_download() -> Self {
        Self {
            require_network: true,
            require_unmetered: true,
            ..Default::default()
        }
    }

    pub fn cleanup() -> Self {
        Self {
            require_battery_ok: true,
            ..Default::default()
        }
    }

    /// Rotation runs anywhere, offline included.
    pub fn rotation() -> Self {
        Self::default()
    }

    /// `Err` names the first unmet requirement.
    pub fn check(&self, status: &dyn SystemStatus) -> std::result::Result<(), &'static str> {
        let network = status.network();
        if self.require_network && network == NetworkState::Offline {
            return Err("network unavailable");
        }
        if self.require_unmetered && network != NetworkState::Unmetered {
            return Err("unmetered network required");
        }
        if self.require_battery_ok && status.battery_low() {
            return Err("battery low");
        }
        if self.require_storage_ok && status.storage_low() {
            return Err("storage low");
        }
        Ok(())
    }
}

/// The daemon driver. Owns the duty clocks and runs the orchestrator on
/// time triggers until shutdown flips.
pub struct Scheduler {
    orchestrator: Arc<Orchestrator>,
    status: Arc<dyn SystemStatus>,
    rotation: RotationInterval,
    shutdown: watch::Receiver<bool>,
    batch_running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        status: Arc<dyn SystemStatus>,
        rotation: RotationInterval,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            orchestrator,
            status,
            rotation,
            shutdown,
            batch_running: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        info!(rotation = ?self.rotation, "scheduler started");

        // Interval rotation anchors to the last actual rotation so an
        // unrelated wakeup (cleanup, refresh) never resets the cadence.
        let mut last_rotation = Local::now();
        // After a failed refresh the next attempt waits out a holdoff
        // instead of hammering the CDN every loop turn.
        let mut refresh_holdoff: Option<DateTime<Local>> = None;

        loop {
            let now = Local::now();
            let next_rotation = match self.rotation {
                RotationInterval::DailyAt(_) | RotationInterval::Never => {
                    self.rotation.next_fire(now)
                }
                _ => self
                    .rotation
                    .next_fire(last_rotation)
                    .map(|t| t.max(now)),
            };
            let next_cleanup = next_cleanup(now);
            let next_refresh = self
                .next_refresh(now)
                .await
                .map(|t| match refresh_holdoff {
                    Some(holdoff) => t.max(holdoff),
                    None => t,
                });

            let mut wakeups: Vec<(DateTime<Local>, &'static str)> = Vec::new();
            if let Some(t) = next_rotation {
                wakeups.push((t, "rotation"));
            }
            if let Some(t) = next_cleanup {
                wakeups.push((t, "cleanup"));
            }
            if let Some(t) = next_refresh {
                wakeups.push((t, "refresh"));
            }

            let Some((fire_at, duty_name)) = wakeups.into_iter().min_by_key(|(t, _)| *t)
            else {
                // Nothing scheduled; idle until shutdown.
                if self.shutdown.changed().await.is_err() || *self.shutdown.borrow() {
                    break;
                }
                continue;
            };

            let sleep_for = (fire_at - now).to_std().unwrap_or(Duration::ZERO);
            debug!(duty = duty_name, in_secs = sleep_for.as_secs(), "next wakeup");

            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {
                    let state = self.fire(duty_name).await;
                    match duty_name {
                        "rotation" => last_rotation = Local::now(),
                        "refresh" => {
                            refresh_holdoff = match state {
                                DutyState::Succeeded => None,
                                _ => Some(Local::now() + ChronoDuration::minutes(30)),
                            };
                        }
                        _ => {}
                    }
                }
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.cancel.store(true, Ordering::SeqCst);
        info!("scheduler stopped");
        Ok(())
    }

    async fn fire(&self, duty_name: &'static str) -> DutyState {
        let mut duty = Duty::new(duty_name);
        duty.transition(DutyState::Enqueued);

        let guards = match duty_name {
            "rotation" => ResourceGuards::rotation(),
            "refresh" => ResourceGuards::refresh(),
            "cleanup" => ResourceGuards::cleanup(),
            _ => ResourceGuards::default(),
        };
        if let Err(reason) = guards.check(self.status.as_ref()) {
            info!(duty = duty_name, reason, "duty deferred by resource guard");
            duty.transition(DutyState::Cancelled);
            duty.transition(DutyState::Idle);
            return DutyState::Cancelled;
        }

        duty.transition(DutyState::Running);
        let outcome = match duty_name {
            "rotation" => {
                let applied = self
                    .orchestrator
                    .apply_next(false, &self.cancel)
                    .await
                    .map(|_| ());
                if applied.is_ok() {
                    // The refill may have queued images worth pre-fetching.
                    let (_, pending) = self.orchestrator.queue_stats().await;
                    if pending > 0 {
                        self.spawn_batch_download();
                    }
                }
                applied
            }
            "refresh" => {
                let refreshed = self.orchestrator.refresh_catalog().await.map(|_| ());
                if refreshed.is_ok() {
                    self.spawn_batch_download();
                }
                refreshed
            }
            "cleanup" => self.orchestrator.cleanup().await.map(|_| ()),
            _ => Ok(()),
        };

        let final_state = match outcome {
            Ok(()) => DutyState::Succeeded,
            // Successful no-op by contract.
            Err(EngineError::NoCandidates) => DutyState::Succeeded,
            Err(e) if e.is_retryable() => {
                warn!(duty = duty_name, error = %e, "duty will retry on next trigger");
                DutyState::Retry
            }
            Err(e) => {
                warn!(duty = duty_name, error = %e, "duty failed");
                DutyState::Failed
            }
        };
        duty.transition(final_state);
        duty.transition(DutyState::Idle);
        final_state
    }

    /// Batch downloads run off the scheduler loop; a second one is never
    /// enqueued while the first is RUNNING.
    fn spawn_batch_download(&self) {
        if self.batch_running.swap(true, Ordering::SeqCst) {
            debug!("batch download already running, not enqueueing another");
            return;
        }
        if let Err(reason) = ResourceGuards::batch_download().check(self.status.as_ref()) {
            info!(reason, "batch download deferred by resource guard");
            self.batch_running.store(false, Ordering::SeqCst);
            return;
        }

        let orchestrator = self.orchestrator.clone();
        let running = self.batch_running.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator
                .batch_download(crate::queue::MAX_QUEUE, &cancel, None)
                .await
            {
                warn!(error = %e, "batch download failed");
            }
            running.store(false, Ordering::SeqCst);
        });
    }

    async fn next_refresh(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        let last_sync = self.orchestrator.last_sync_ts();
        let engagement = self.orchestrator.engagement().await;
        let interval =
            ChronoDuration::from_std(engagement.refresh_interval()).unwrap_or(ChronoDuration::hours(24));
        let due = DateTime::from_timestamp(last_sync, 0)
            .map(|t| t.with_timezone(&Local) + interval)
            .unwrap_or(now);
        Some(due.max(now + ChronoDuration::seconds(1)))
    }
}
