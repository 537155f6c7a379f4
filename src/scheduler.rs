//! Scheduler
//!
//! Long-lived loop that decides, once per poll tick, whether to start a
//! run. Config is reloaded on every tick so edits apply without a restart.
//! A stop request ends the wait immediately; an in-flight run is never
//! killed, it sees the same cancellation and winds down on its own.

use chrono::{DateTime, Duration, Local, Timelike};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::activity::ActivityProbe;
use crate::clock::Clock;
use crate::config::{ConfigStore, RunConfig, ScheduleMode, MAX_MINUTES};
use crate::liveness::{read_marker, LivenessMarker};
use crate::output;
use crate::runner::Runner;

/// Minimum spacing of "waiting" log lines
pub const WAITING_LOG_INTERVAL_MINUTES: i64 = 15;

/// Builds a runner for one triggered run from that tick's config
pub type RunnerFactory = Box<dyn Fn(RunConfig) -> anyhow::Result<Runner> + Send + Sync>;

/// Result of one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerDecision {
    pub should_run: bool,
    pub reason: String,
}

impl SchedulerDecision {
    fn run(reason: impl Into<String>) -> Self {
        Self {
            should_run: true,
            reason: reason.into(),
        }
    }

    fn wait(reason: impl Into<String>) -> Self {
        Self {
            should_run: false,
            reason: reason.into(),
        }
    }
}

pub struct Scheduler {
    store: ConfigStore,
    activity: Arc<dyn ActivityProbe>,
    clock: Arc<dyn Clock>,
    factory: RunnerFactory,
    running: AtomicBool,
    last_waiting_log: Mutex<Option<DateTime<Local>>>,
}

impl Scheduler {
    pub fn new(
        store: ConfigStore,
        activity: Arc<dyn ActivityProbe>,
        clock: Arc<dyn Clock>,
        factory: RunnerFactory,
    ) -> Self {
        Self {
            store,
            activity,
            clock,
            factory,
            running: AtomicBool::new(false),
            last_waiting_log: Mutex::new(None),
        }
    }

    /// Whether a run started by this scheduler is in flight
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Decide whether a run should start now
    pub fn tick(&self, config: &RunConfig) -> SchedulerDecision {
        if self.is_running() {
            return SchedulerDecision::wait("run in progress");
        }
        if self.store.paths().pause_file().exists() {
            return SchedulerDecision::wait("paused (pause file present)");
        }

        let now = self.clock.now();
        if config.in_quiet_hours(now.hour()) {
            return SchedulerDecision::wait(format!("quiet hours ({})", config.quiet_hours_label()));
        }

        let last_run = output::last_run_ended(self.store.paths());
        match config.schedule_mode {
            ScheduleMode::SessionAware => self.session_aware(config, now, last_run),
            ScheduleMode::Scheduled => self.scheduled(config, now, last_run),
        }
    }

    fn session_aware(
        &self,
        config: &RunConfig,
        now: DateTime<Local>,
        last_run: Option<DateTime<Local>>,
    ) -> SchedulerDecision {
        if self.activity.is_companion_active() {
            return SchedulerDecision::wait("companion process active");
        }

        if let Some(active_at) = self.activity.last_activity() {
            let idle = now - active_at;
            if idle < minutes(config.activity_cooldown_minutes) {
                return SchedulerDecision::wait(format!(
                    "user recently active ({}m ago, cooldown {}m)",
                    idle.num_minutes().max(0),
                    config.activity_cooldown_minutes
                ));
            }
        }

        match last_run {
            Some(ended) => {
                let gap = hours(now - ended);
                if gap < config.min_gap_hours {
                    SchedulerDecision::wait(format!(
                        "minimum gap not reached ({:.1}h since last run, need {:.1}h)",
                        gap, config.min_gap_hours
                    ))
                } else {
                    SchedulerDecision::run(format!("idle and due ({:.1}h since last run)", gap))
                }
            }
            None => SchedulerDecision::run("idle, no previous run found"),
        }
    }

    fn scheduled(
        &self,
        config: &RunConfig,
        now: DateTime<Local>,
        last_run: Option<DateTime<Local>>,
    ) -> SchedulerDecision {
        let buffer = minutes(config.activity_buffer_minutes);
        let live = self.activity.is_companion_active()
            || self
                .activity
                .last_activity()
                .is_some_and(|at| now - at < buffer);
        if live {
            return SchedulerDecision::wait(format!(
                "live activity (buffer {}m)",
                config.activity_buffer_minutes
            ));
        }

        match last_run {
            Some(ended) => {
                let gap = hours(now - ended);
                if gap < config.interval_hours {
                    SchedulerDecision::wait(format!(
                        "interval not reached ({:.1}h since last run, interval {:.1}h)",
                        gap, config.interval_hours
                    ))
                } else {
                    SchedulerDecision::run(format!(
                        "interval reached ({:.1}h since last run, interval {:.1}h)",
                        gap, config.interval_hours
                    ))
                }
            }
            None => SchedulerDecision::run("no previous run found"),
        }
    }

    /// Poll until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        let paths = self.store.paths();
        if let Some(pid) = read_marker(&paths.scheduler_pid()) {
            warn!("Replacing leftover scheduler marker (PID {})", pid);
        }
        let _marker = match LivenessMarker::acquire(paths.scheduler_pid()) {
            Ok(marker) => Some(marker),
            Err(e) => {
                warn!("Could not write scheduler marker: {}", e);
                None
            }
        };

        let config = self.store.load_config();
        info!("=== Scheduler started (PID {}) ===", std::process::id());
        info!(
            "Strategy: {:?} | Quiet: {} | Pause control: {}",
            config.schedule_mode,
            config.quiet_hours_label(),
            paths.pause_file().display()
        );

        while !cancel.is_cancelled() {
            let config = self.store.load_config();
            let poll = std::time::Duration::from_secs(config.poll_interval_secs.max(1));
            let decision = self.tick(&config);

            if decision.should_run {
                info!("Triggering run: {}", decision.reason);
                self.trigger(config, &cancel).await;
                *self.last_waiting_log.lock() = None;
            } else {
                self.log_waiting(&decision.reason);
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(poll) => {}
            }
        }

        info!("Scheduler stopped");
    }

    async fn trigger(&self, config: RunConfig, cancel: &CancellationToken) {
        let runner = match (self.factory)(config) {
            Ok(runner) => runner,
            Err(e) => {
                error!("Could not build runner: {:#}", e);
                return;
            }
        };

        self.running.store(true, Ordering::SeqCst);
        let outcome = runner.run(cancel.child_token()).await;
        self.running.store(false, Ordering::SeqCst);

        info!(
            "Run finished: {} ({} rounds, {:.1} min)",
            outcome.status, outcome.rounds_completed, outcome.duration_minutes
        );
    }

    fn log_waiting(&self, reason: &str) {
        let now = self.clock.now();
        let mut last = self.last_waiting_log.lock();
        let due = last
            .map(|at| now - at >= Duration::minutes(WAITING_LOG_INTERVAL_MINUTES))
            .unwrap_or(true);
        if due {
            info!("Waiting: {}", reason);
            *last = Some(now);
        }
    }
}

/// Minute setting as a duration, bounded so it cannot overflow
fn minutes(value: i64) -> Duration {
    Duration::minutes(value.clamp(0, MAX_MINUTES))
}

fn hours(duration: Duration) -> f64 {
    duration.num_seconds() as f64 / 3600.0
}
