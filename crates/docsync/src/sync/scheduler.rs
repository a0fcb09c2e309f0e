//! Sync scheduler.
//!
//! A single loop owns the per-entity [`JobState`] map. Every started run is
//! its own tokio task; when the task ends (normally, by timeout or by panic)
//! a drop guard sends the entity over an mpsc channel and the loop collects
//! the result from the task handle. Because only the loop reads or writes the
//! state map, a tick can never observe a stale `Idle` and start a second run.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};

use super::errors::{JobError, SyncError};
use super::job::SyncJob;
use super::types::{
    DEFAULT_RUN_TIMEOUT, DEFAULT_SYNC_INTERVAL, EntityKind, Phase, SHUTDOWN_DRAIN_TIMEOUT,
    SyncReport,
};

type RunResult = Result<SyncReport, JobError>;

/// Scheduling state of one entity type.
#[derive(Debug)]
enum JobState {
    Idle,
    Running {
        started: Instant,
        handle: JoinHandle<RunResult>,
    },
}

/// The result of one finished run.
#[derive(Debug)]
pub struct RunOutcome {
    pub entity: EntityKind,
    pub elapsed: Duration,
    pub result: RunResult,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Counters accumulated over a scheduler's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub started: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Start attempts dropped because the entity was still running.
    pub overlaps_skipped: usize,
    /// Runs still in flight when the shutdown drain timed out.
    pub aborted: usize,
}

/// Sends the entity's completion signal when the run task ends, including
/// when it unwinds.
struct CompletionGuard {
    entity: EntityKind,
    tx: UnboundedSender<EntityKind>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        // The loop may already be gone after an aborted drain.
        let _ = self.tx.send(self.entity);
    }
}

/// Periodically runs registered sync jobs.
pub struct Scheduler {
    jobs: BTreeMap<EntityKind, Arc<dyn SyncJob>>,
    interval: Duration,
    run_timeout: Duration,
    drain_timeout: Duration,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(DEFAULT_SYNC_INTERVAL, DEFAULT_RUN_TIMEOUT)
    }
}

impl Scheduler {
    pub fn new(interval: Duration, run_timeout: Duration) -> Self {
        Self {
            jobs: BTreeMap::new(),
            // tokio intervals reject a zero period.
            interval: interval.max(Duration::from_millis(1)),
            run_timeout,
            drain_timeout: SHUTDOWN_DRAIN_TIMEOUT,
        }
    }

    /// Set how long [`run`](Self::run) waits for in-flight runs after shutdown.
    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Register a job, replacing any job already registered for its entity.
    pub fn register(&mut self, job: Arc<dyn SyncJob>) -> &mut Self {
        self.jobs.insert(job.kind(), job);
        self
    }

    /// Registered entity types in key order.
    pub fn entities(&self) -> Vec<EntityKind> {
        self.jobs.keys().copied().collect()
    }

    /// Run until `shutdown` resolves, then drain in-flight runs.
    ///
    /// The first tick fires immediately. Dependent entity types are never
    /// started by a tick; they start when their prerequisite's run finishes.
    pub async fn run<F>(&self, shutdown: F) -> SchedulerStats
    where
        F: Future<Output = ()>,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut runner = Runner::new(self, self.jobs.keys().copied().collect(), tx);

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        tracing::info!(
            entities = ?self.entities(),
            interval_secs = self.interval.as_secs(),
            run_timeout_secs = self.run_timeout.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown => break,
                Some(entity) = rx.recv() => {
                    runner.finish(entity, true).await;
                }
                _ = interval.tick() => runner.tick(),
            }
        }

        runner.drain(&mut rx, self.drain_timeout).await;
        tracing::info!(
            started = runner.stats.started,
            succeeded = runner.stats.succeeded,
            failed = runner.stats.failed,
            overlaps_skipped = runner.stats.overlaps_skipped,
            "Scheduler stopped"
        );
        runner.stats
    }

    /// Run one dependency-ordered pass and wait for every run to finish.
    ///
    /// With `only`, the pass is limited to those entity types; a dependent
    /// selected without its prerequisite starts immediately.
    pub async fn run_once(&self, only: Option<&[EntityKind]>) -> Vec<RunOutcome> {
        let selected: BTreeSet<EntityKind> = match only {
            Some(kinds) => kinds
                .iter()
                .copied()
                .filter(|k| self.jobs.contains_key(k))
                .collect(),
            None => self.jobs.keys().copied().collect(),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut runner = Runner::new(self, selected, tx);
        runner.tick();

        let mut outcomes = Vec::new();
        while runner.running() > 0 {
            let Some(entity) = rx.recv().await else {
                break;
            };
            if let Some(outcome) = runner.finish(entity, true).await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }
}

/// Loop-local scheduling state for one [`Scheduler::run`] or
/// [`Scheduler::run_once`] call.
struct Runner<'a> {
    jobs: &'a BTreeMap<EntityKind, Arc<dyn SyncJob>>,
    selected: BTreeSet<EntityKind>,
    states: HashMap<EntityKind, JobState>,
    run_timeout: Duration,
    tx: UnboundedSender<EntityKind>,
    stats: SchedulerStats,
}

impl<'a> Runner<'a> {
    fn new(
        scheduler: &'a Scheduler,
        selected: BTreeSet<EntityKind>,
        tx: UnboundedSender<EntityKind>,
    ) -> Self {
        let states = selected.iter().map(|&k| (k, JobState::Idle)).collect();
        Self {
            jobs: &scheduler.jobs,
            selected,
            states,
            run_timeout: scheduler.run_timeout,
            tx,
            stats: SchedulerStats::default(),
        }
    }

    fn running(&self) -> usize {
        self.states
            .values()
            .filter(|s| matches!(s, JobState::Running { .. }))
            .count()
    }

    /// Entity types started directly by a tick.
    fn roots(&self) -> Vec<EntityKind> {
        self.selected
            .iter()
            .copied()
            .filter(|k| k.prerequisite().is_none_or(|p| !self.selected.contains(&p)))
            .collect()
    }

    fn dependents(&self, entity: EntityKind) -> Vec<EntityKind> {
        self.selected
            .iter()
            .copied()
            .filter(|k| k.prerequisite() == Some(entity))
            .collect()
    }

    fn tick(&mut self) {
        tracing::debug!(running = self.running(), "Scheduler tick");
        for entity in self.roots() {
            self.start(entity);
        }
    }

    fn start(&mut self, entity: EntityKind) {
        let Some(job) = self.jobs.get(&entity).cloned() else {
            return;
        };
        let state = self.states.entry(entity).or_insert(JobState::Idle);

        if let JobState::Running { started, .. } = state {
            self.stats.overlaps_skipped += 1;
            tracing::warn!(
                entity = %entity,
                running_secs = started.elapsed().as_secs(),
                "Previous run still in progress; skipping"
            );
            return;
        }

        let tx = self.tx.clone();
        let run_timeout = self.run_timeout;
        let handle = tokio::spawn(async move {
            let _guard = CompletionGuard { entity, tx };
            match tokio::time::timeout(run_timeout, job.run()).await {
                Ok(result) => result,
                Err(_) => Err(JobError::new(
                    entity,
                    Phase::Run,
                    SyncError::Timeout(run_timeout),
                )),
            }
        });

        *state = JobState::Running {
            started: Instant::now(),
            handle,
        };
        self.stats.started += 1;
        tracing::debug!(entity = %entity, "Started sync run");
    }

    /// Collect a finished run and return the entity to `Idle`. With `chain`,
    /// start the entity's dependents.
    async fn finish(&mut self, entity: EntityKind, chain: bool) -> Option<RunOutcome> {
        let state = self.states.get_mut(&entity)?;
        let JobState::Running { started, handle } = std::mem::replace(state, JobState::Idle)
        else {
            return None;
        };

        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(JobError::new(
                entity,
                Phase::Run,
                SyncError::Panicked(join_failure(e)),
            )),
        };
        let outcome = RunOutcome {
            entity,
            elapsed: started.elapsed(),
            result,
        };

        log_outcome(&outcome);
        if outcome.is_success() {
            self.stats.succeeded += 1;
        } else {
            self.stats.failed += 1;
        }

        if chain {
            for dependent in self.dependents(entity) {
                self.start(dependent);
            }
        }
        Some(outcome)
    }

    /// Wait up to `timeout` for in-flight runs, then abort the rest.
    async fn drain(&mut self, rx: &mut UnboundedReceiver<EntityKind>, timeout: Duration) {
        let pending = self.running();
        if pending == 0 {
            return;
        }
        tracing::info!(
            pending,
            timeout_secs = timeout.as_secs(),
            "Waiting for in-flight runs to finish"
        );

        let drained = tokio::time::timeout(timeout, async {
            while self.running() > 0 {
                match rx.recv().await {
                    Some(entity) => {
                        self.finish(entity, false).await;
                    }
                    None => break,
                }
            }
        })
        .await;

        if drained.is_err() {
            for (entity, state) in self.states.iter_mut() {
                if let JobState::Running { handle, .. } = std::mem::replace(state, JobState::Idle)
                {
                    handle.abort();
                    self.stats.aborted += 1;
                    tracing::warn!(entity = %entity, "Aborted in-flight run at shutdown");
                }
            }
        }
    }
}

fn join_failure(e: JoinError) -> String {
    if e.is_panic() {
        let payload = e.into_panic();
        if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        }
    } else if e.is_cancelled() {
        "Task was cancelled".to_string()
    } else {
        format!("Task failed: {e}")
    }
}

fn log_outcome(outcome: &RunOutcome) {
    let elapsed_ms = outcome.elapsed.as_millis();
    match &outcome.result {
        Ok(report) => {
            tracing::info!(
                entity = %outcome.entity,
                source = report.source_records,
                replica = report.replica_records,
                deleted = report.deleted,
                inserted = report.inserted,
                updated = report.updated,
                unchanged = report.unchanged,
                skipped_source = report.skipped_source,
                skipped_replica = report.skipped_replica,
                batches = report.batches,
                elapsed_ms,
                "Sync run completed"
            );
            if report.unresolved_references > 0 {
                tracing::warn!(
                    entity = %outcome.entity,
                    unresolved = report.unresolved_references,
                    "Some references could not be resolved and were stored as null"
                );
            }
        }
        Err(e) => {
            tracing::error!(
                entity = %e.entity,
                phase = %e.phase,
                error = %e.error,
                elapsed_ms,
                "Sync run failed"
            );
        }
    }
}
