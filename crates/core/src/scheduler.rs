//! Periodic job scheduling and supervision.
//!
//! Each job runs in its own loop:
//! - cycles are wrapped in a whole-cycle timeout and panics are caught
//! - the loop sleeps until the next deadline, woken early only by a manual
//!   trigger (which does not move the deadline) or by shutdown
//! - shutdown is observed between cycles, never mid-cycle
//!
//! [`Supervisor`] owns the loops as named tasks, reports every exit on a
//! monitored channel and restarts loops that panicked.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Counters for one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Work items for which a transaction was submitted.
    pub attempted: usize,
    pub succeeded: usize,
    /// Broadcast but unconfirmed within the receipt window.
    pub pending: usize,
    pub failed: usize,
    /// Work items skipped before submission (e.g. rate unavailable).
    pub skipped: usize,
}

impl CycleReport {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// A unit of periodic work.
#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Run one cycle. Per-item failures are reported, not returned.
    async fn run_cycle(&self) -> CycleReport;
}

/// Job loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Running,
    Succeeded,
    TimedOut,
    Failed,
    /// Loop exited after shutdown.
    Stopped,
}

/// Why a cycle ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTrigger {
    Scheduled,
    Manual,
}

/// Outcome of the most recent cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleRecord {
    pub trigger: CycleTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub state: JobState,
    /// Missing when the cycle timed out or panicked.
    pub report: Option<CycleReport>,
}

/// Timing of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSchedule {
    pub interval: Duration,
    pub cycle_timeout: Duration,
    /// Run the first cycle immediately.
    pub run_on_start: bool,
}

/// Result of a manual trigger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerAck {
    Queued,
    /// A manual cycle is already waiting to run.
    AlreadyQueued,
}

/// State shared between a job loop, its handle and its triggers. Survives
/// loop restarts.
struct JobShared {
    name: String,
    state: watch::Sender<JobState>,
    last: Mutex<Option<CycleRecord>>,
    cycles: AtomicU64,
    trigger_pending: AtomicBool,
    trigger: Notify,
}

impl JobShared {
    fn new(name: &str) -> Self {
        let (state, _) = watch::channel(JobState::Idle);
        Self {
            name: name.to_string(),
            state,
            last: Mutex::new(None),
            cycles: AtomicU64::new(0),
            trigger_pending: AtomicBool::new(false),
            trigger: Notify::new(),
        }
    }

    fn publish(&self, state: JobState) {
        self.state.send_replace(state);
    }
}

/// Requests out-of-band cycles of one job.
#[derive(Clone)]
pub struct TriggerHandle {
    shared: Arc<JobShared>,
}

impl TriggerHandle {
    /// Queue one immediate cycle and return without waiting for it.
    pub fn trigger(&self) -> TriggerAck {
        if self.shared.trigger_pending.swap(true, Ordering::AcqRel) {
            debug!(job = %self.shared.name, "Manual cycle already queued");
            return TriggerAck::AlreadyQueued;
        }
        self.shared.trigger.notify_one();
        info!(job = %self.shared.name, "Manual cycle queued");
        TriggerAck::Queued
    }

    pub fn job_name(&self) -> &str {
        &self.shared.name
    }
}

impl std::fmt::Debug for TriggerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerHandle")
            .field("job", &self.shared.name)
            .finish()
    }
}

/// Observes and triggers one supervised job.
#[derive(Clone)]
pub struct JobHandle {
    shared: Arc<JobShared>,
}

impl JobHandle {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> JobState {
        *self.shared.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobState> {
        self.shared.state.subscribe()
    }

    pub fn last_cycle(&self) -> Option<CycleRecord> {
        self.shared.last.lock().clone()
    }

    /// Number of finished cycles (any outcome).
    pub fn cycles(&self) -> u64 {
        self.shared.cycles.load(Ordering::Acquire)
    }

    pub fn trigger(&self) -> TriggerAck {
        self.trigger_handle().trigger()
    }

    pub fn trigger_handle(&self) -> TriggerHandle {
        TriggerHandle {
            shared: self.shared.clone(),
        }
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job", &self.shared.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Next periodic deadline after a cycle that started at `started`.
///
/// Anchored at the cycle start; if the cycle overran the interval, the next
/// one waits a full interval from now rather than starting immediately.
pub(crate) fn next_deadline(started: Instant, interval: Duration, now: Instant) -> Instant {
    let anchored = started + interval;
    if anchored > now {
        anchored
    } else {
        now + interval
    }
}

async fn run_one(job: &dyn PeriodicJob, schedule: &JobSchedule, shared: &JobShared, trigger: CycleTrigger) {
    shared.publish(JobState::Running);
    let started_at = Utc::now();
    let timer = Instant::now();
    info!(job = %shared.name, trigger = ?trigger, "Cycle started");

    let guarded = AssertUnwindSafe(job.run_cycle()).catch_unwind();
    let (state, report) = match tokio::time::timeout(schedule.cycle_timeout, guarded).await {
        Ok(Ok(report)) => {
            let state = if report.has_failures() {
                JobState::Failed
            } else {
                JobState::Succeeded
            };
            info!(
                job = %shared.name,
                attempted = report.attempted,
                succeeded = report.succeeded,
                pending = report.pending,
                failed = report.failed,
                skipped = report.skipped,
                elapsed_ms = timer.elapsed().as_millis(),
                "Cycle finished"
            );
            (state, Some(report))
        }
        Ok(Err(panic)) => {
            error!(job = %shared.name, panic = %panic_message(panic.as_ref()), "Cycle panicked");
            (JobState::Failed, None)
        }
        Err(_) => {
            error!(
                job = %shared.name,
                timeout_secs = schedule.cycle_timeout.as_secs(),
                "Cycle timed out, remaining work abandoned"
            );
            (JobState::TimedOut, None)
        }
    };

    *shared.last.lock() = Some(CycleRecord {
        trigger,
        started_at,
        finished_at: Utc::now(),
        state,
        report,
    });
    shared.cycles.fetch_add(1, Ordering::AcqRel);
    shared.publish(state);
}

async fn run_job_loop(
    job: Arc<dyn PeriodicJob>,
    schedule: JobSchedule,
    shared: Arc<JobShared>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        job = %shared.name,
        interval_secs = schedule.interval.as_secs(),
        cycle_timeout_secs = schedule.cycle_timeout.as_secs(),
        "Job loop started"
    );

    let mut next_run = Instant::now() + schedule.interval;
    if schedule.run_on_start && !*shutdown.borrow() {
        let started = Instant::now();
        run_one(job.as_ref(), &schedule, &shared, CycleTrigger::Scheduled).await;
        next_run = next_deadline(started, schedule.interval, Instant::now());
    }

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = shared.trigger.notified() => {
                shared.trigger_pending.store(false, Ordering::Release);
                run_one(job.as_ref(), &schedule, &shared, CycleTrigger::Manual).await;
            }
            _ = tokio::time::sleep_until(next_run) => {
                let started = Instant::now();
                run_one(job.as_ref(), &schedule, &shared, CycleTrigger::Scheduled).await;
                next_run = next_deadline(started, schedule.interval, Instant::now());
                debug!(
                    job = %shared.name,
                    next_in_secs = next_run.saturating_duration_since(Instant::now()).as_secs(),
                    "Next cycle scheduled"
                );
            }
        }
    }

    shared.publish(JobState::Stopped);
    info!(job = %shared.name, "Job loop stopped");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Restart behavior for supervised loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartPolicy {
    pub restart_on_panic: bool,
    pub restart_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            restart_on_panic: true,
            restart_delay: Duration::from_secs(5),
        }
    }
}

/// How a supervised task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskExitKind {
    Completed,
    Panicked(String),
    Cancelled,
}

/// Exit event published on the supervisor channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskExit {
    pub name: String,
    pub kind: TaskExitKind,
    /// Restarts performed before this exit.
    pub restarts: u32,
}

/// Current status of a supervised task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Running { restarts: u32 },
    Restarting { restarts: u32 },
    Exited(TaskExitKind),
}

impl From<JoinError> for TaskExitKind {
    fn from(err: JoinError) -> Self {
        if err.is_panic() {
            TaskExitKind::Panicked(panic_message(err.into_panic().as_ref()))
        } else {
            TaskExitKind::Cancelled
        }
    }
}

/// Owns the job loops.
pub struct Supervisor {
    policy: RestartPolicy,
    shutdown_tx: watch::Sender<bool>,
    status: Arc<DashMap<String, TaskStatus>>,
    exits_tx: mpsc::UnboundedSender<TaskExit>,
    exits_rx: Option<mpsc::UnboundedReceiver<TaskExit>>,
    monitors: Vec<(String, JoinHandle<()>)>,
}

impl Supervisor {
    pub fn new(policy: RestartPolicy) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        Self {
            policy,
            shutdown_tx,
            status: Arc::new(DashMap::new()),
            exits_tx,
            exits_rx: Some(exits_rx),
            monitors: Vec::new(),
        }
    }

    /// Take the exit-event receiver (once).
    pub fn take_exits(&mut self) -> Option<mpsc::UnboundedReceiver<TaskExit>> {
        self.exits_rx.take()
    }

    pub fn status(&self, name: &str) -> Option<TaskStatus> {
        self.status.get(name).map(|s| s.value().clone())
    }

    pub fn statuses(&self) -> Vec<(String, TaskStatus)> {
        self.status
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Launch a job loop as a supervised named task.
    pub fn spawn_job(&mut self, job: Arc<dyn PeriodicJob>, schedule: JobSchedule) -> JobHandle {
        let name = job.name().to_string();
        let shared = Arc::new(JobShared::new(&name));
        let handle = JobHandle {
            shared: shared.clone(),
        };

        self.spawn_named(&name, move |shutdown| {
            run_job_loop(job.clone(), schedule, shared.clone(), shutdown)
        });
        handle
    }

    /// Supervise a task built by `make`.
    ///
    /// `make` receives the shutdown signal and is called again for every
    /// restart after a panic.
    pub fn spawn_named<F, Fut>(&mut self, name: &str, make: F)
    where
        F: Fn(watch::Receiver<bool>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let policy = self.policy;
        let shutdown_rx = self.shutdown_tx.subscribe();
        let status = self.status.clone();
        let exits = self.exits_tx.clone();
        status.insert(name.to_string(), TaskStatus::Running { restarts: 0 });

        let task_name = name.to_string();
        let monitor = tokio::spawn(async move {
            let mut restarts = 0u32;
            loop {
                let task = tokio::spawn(make(shutdown_rx.clone()));
                let kind = match task.await {
                    Ok(()) => TaskExitKind::Completed,
                    Err(e) => TaskExitKind::from(e),
                };

                match &kind {
                    TaskExitKind::Panicked(msg) => {
                        error!(task = %task_name, panic = %msg, restarts, "Supervised task panicked")
                    }
                    other => info!(task = %task_name, exit = ?other, "Supervised task exited"),
                }
                let _ = exits.send(TaskExit {
                    name: task_name.clone(),
                    kind: kind.clone(),
                    restarts,
                });

                let restart = matches!(kind, TaskExitKind::Panicked(_))
                    && policy.restart_on_panic
                    && !*shutdown_rx.borrow();
                if !restart {
                    status.insert(task_name.clone(), TaskStatus::Exited(kind));
                    break;
                }

                status.insert(task_name.clone(), TaskStatus::Restarting { restarts });
                warn!(
                    task = %task_name,
                    delay_secs = policy.restart_delay.as_secs(),
                    "Restarting supervised task"
                );

                let mut wait_shutdown = shutdown_rx.clone();
                let cancelled = tokio::select! {
                    _ = tokio::time::sleep(policy.restart_delay) => false,
                    _ = wait_shutdown.wait_for(|stop| *stop) => true,
                };
                if cancelled {
                    status.insert(task_name.clone(), TaskStatus::Exited(kind));
                    break;
                }

                restarts += 1;
                status.insert(task_name.clone(), TaskStatus::Running { restarts });
            }
        });

        info!(task = %name, "Supervised task launched");
        self.monitors.push((name.to_string(), monitor));
    }

    /// Signal cancellation and wait until every supervised task has exited.
    pub async fn shutdown(mut self) {
        info!(tasks = self.monitors.len(), "Shutting down supervised tasks");
        self.shutdown_tx.send_replace(true);

        for (name, monitor) in self.monitors.drain(..) {
            if let Err(e) = monitor.await {
                error!(task = %name, error = %e, "Supervisor monitor failed");
            }
        }
        info!("All supervised tasks stopped");
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("policy", &self.policy)
            .field("tasks", &self.monitors.len())
            .finish_non_exhaustive()
    }
}
