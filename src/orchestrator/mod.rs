//! Supervised pool of probe worker processes.
//!
//! The orchestrator runs every job in its own OS process under a concurrency
//! bound `W` and enforces process-level deadlines independent of whatever
//! timeout handling the workers do themselves:
//! - a worker still running `3T` after its spawn is killed with its process group
//! - an untracked descendant is killed `4T` after it was first observed
//! - once the queue is empty, the run ends at the latest `4T` after the last
//!   spawn with a final sweep that kills everything still alive
//!
//! Kills normally happen while holding the dump lock, so a worker is not
//! killed in the middle of appending its ping. A lock that stays busy longer
//! than `CULL_LOCK_GRACE` past a deadline, or past the end of the drain
//! window, no longer defers the kill. Jobs whose worker was killed or exited
//! with a failure are dropped and reported, never retried.

mod descendants;
mod launcher;
mod process;
mod scrape;

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::{
    scaled, OrchestratorConfig, CULL_LOCK_GRACE, DESCENDANT_CULL_FACTOR, DESCENDANT_SCAN_INTERVAL,
    LOGGING_INTERVAL, REAP_GRACE, WORKER_CULL_FACTOR,
};
use crate::models::Job;
use crate::storage::DumpLock;

use descendants::{become_subreaper, DescendantTracker};
use process::{spawn_in_own_group, TrackedWorker};

// Re-export public API
pub use launcher::{ProxyHandle, ProxyLauncher};
pub use process::{log_destination, ProcessWorkerLauncher, WorkerLauncher};
pub use scrape::{prepare_dump, scrape};

/// Outcome of one orchestrated run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Number of jobs handed to the orchestrator
    pub total: usize,
    /// Workers that exited on their own, successfully or not
    pub completed: usize,
    /// Workers killed for outliving their `3T` deadline
    pub culled: usize,
    /// Workers killed by the final sweep
    pub swept: usize,
    /// Jobs that produced no ping: culled, swept, failed to spawn or exited non-zero
    pub dropped: Vec<Job>,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

/// The worker pool control loop.
pub struct Orchestrator<L: WorkerLauncher> {
    config: OrchestratorConfig,
    launcher: L,
    dump_lock: Option<PathBuf>,
    coordinating: HashSet<u32>,
}

impl<L: WorkerLauncher> Orchestrator<L> {
    pub fn new(config: OrchestratorConfig, launcher: L) -> Self {
        Self {
            config,
            launcher,
            dump_lock: None,
            coordinating: HashSet::new(),
        }
    }

    /// Holds the lock of `dump` while killing processes.
    pub fn with_dump_lock(mut self, dump: &Path) -> Self {
        self.dump_lock = Some(dump.to_path_buf());
        self
    }

    /// Excludes a helper process, e.g. the proxy, from descendant culling.
    pub fn with_coordinator(mut self, pid: u32) -> Self {
        self.coordinating.insert(pid);
        self
    }

    /// Runs every job once and returns when all processes are gone.
    ///
    /// Ctrl-C stops scheduling new jobs; running workers are drained as usual.
    pub async fn run(&self, jobs: Vec<Job>) -> RunReport {
        let start = Instant::now();
        let worker_ttl = scaled(self.config.timeout, WORKER_CULL_FACTOR);
        let drain_window = scaled(self.config.timeout, DESCENDANT_CULL_FACTOR);

        become_subreaper();
        let mut run = RunState {
            queue: jobs.into(),
            tracked: Vec::new(),
            descendants: DescendantTracker::new(drain_window),
            last_spawn: None,
            last_scan: None,
            report: RunReport::default(),
        };
        run.report.total = run.queue.len();
        log::info!(
            "Running {} jobs with {} workers, timeout {:?}",
            run.report.total,
            self.config.workers,
            self.config.timeout
        );

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut interrupted = false;
        let mut last_progress = Instant::now();

        loop {
            run.reap_exited();
            self.spawn_ready(&mut run, worker_ttl);

            let now = Instant::now();
            if run
                .last_scan
                .map_or(true, |t| now.duration_since(t) >= DESCENDANT_SCAN_INTERVAL)
            {
                run.scan_descendants(&self.coordinating);
                run.last_scan = Some(now);
            }
            self.cull(&mut run, now);

            if run.queue.is_empty() {
                let overdue = run
                    .last_spawn
                    .map_or(true, |t| now.duration_since(t) > drain_window);
                if run.tracked.is_empty() || overdue {
                    break;
                }
            }

            if last_progress.elapsed().as_secs() >= LOGGING_INTERVAL {
                run.log_progress(start);
                last_progress = Instant::now();
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = &mut ctrl_c, if !interrupted => {
                    interrupted = true;
                    log::warn!(
                        "Interrupted: {} queued jobs will not run, draining {} workers",
                        run.queue.len(),
                        run.tracked.len()
                    );
                    run.queue.clear();
                }
            }
        }

        self.final_sweep(&mut run, drain_window).await;
        run.report.elapsed = start.elapsed();
        run.log_progress(start);
        if !run.report.dropped.is_empty() {
            log::warn!("{} jobs were dropped", run.report.dropped.len());
        }
        run.report
    }

    fn spawn_ready(&self, run: &mut RunState, worker_ttl: Duration) {
        while run.tracked.len() < self.config.workers.max(1) {
            let Some(job) = run.queue.pop_front() else {
                break;
            };
            let spawned = self.launcher.command(&job).and_then(spawn_in_own_group);
            match spawned {
                Ok(child) => {
                    let now = Instant::now();
                    log::debug!("Spawned worker {} for {job}", child.id());
                    run.last_spawn = Some(now);
                    run.tracked.push(TrackedWorker {
                        job,
                        child,
                        deadline: now + worker_ttl,
                    });
                }
                Err(err) => {
                    log::error!("Failed to spawn worker for {job}: {err}");
                    run.report.dropped.push(job);
                }
            }
        }
    }

    /// Kills overdue workers and descendants.
    ///
    /// Waits for a busy dump lock for at most `CULL_LOCK_GRACE` past the
    /// earliest missed deadline.
    fn cull(&self, run: &mut RunState, now: Instant) {
        let overdue_descendants = run.descendants.expired(now);
        let earliest_worker = run
            .tracked
            .iter()
            .map(|w| w.deadline)
            .filter(|deadline| *deadline <= now)
            .min();
        let earliest_descendant = run.descendants.earliest_deadline().filter(|d| *d <= now);
        let Some(earliest) = earliest_worker.into_iter().chain(earliest_descendant).min() else {
            return;
        };

        let _lock = match &self.dump_lock {
            Some(dump) => match DumpLock::try_acquire(dump) {
                Ok(Some(lock)) => Some(lock),
                Ok(None) if !lock_grace_over(earliest, now) => return,
                Ok(None) => {
                    log::warn!("Dump lock busy for {CULL_LOCK_GRACE:?} past a deadline, culling anyway");
                    None
                }
                Err(err) => {
                    log::warn!("Culling without the dump lock: {err}");
                    None
                }
            },
            None => None,
        };

        let mut index = 0;
        while index < run.tracked.len() {
            if run.tracked[index].deadline <= now {
                let mut worker = run.tracked.swap_remove(index);
                log::warn!(
                    "Culling worker {} after {:?}: dropping {}",
                    worker.pid(),
                    scaled(self.config.timeout, WORKER_CULL_FACTOR),
                    worker.job
                );
                worker.kill();
                run.report.culled += 1;
                run.report.dropped.push(worker.job);
            } else {
                index += 1;
            }
        }

        run.descendants.kill(&overdue_descendants);
        run.descendants.reap();
    }

    /// Kills every remaining worker and every live observed descendant.
    ///
    /// Waits for the dump lock no longer than the rest of the drain window,
    /// capped at `T`.
    async fn final_sweep(&self, run: &mut RunState, drain_window: Duration) {
        run.scan_descendants(&self.coordinating);
        if run.tracked.is_empty() && run.descendants.is_empty() {
            return;
        }

        let _lock = match &self.dump_lock {
            Some(dump) => {
                let budget = run
                    .last_spawn
                    .map_or(Duration::ZERO, |t| {
                        (t + drain_window).saturating_duration_since(Instant::now())
                    })
                    .min(self.config.timeout);
                self.wait_for_lock(dump, budget).await
            }
            None => None,
        };

        for mut worker in run.tracked.drain(..) {
            log::warn!("Sweeping worker {}: dropping {}", worker.pid(), worker.job);
            worker.kill();
            run.report.swept += 1;
            run.report.dropped.push(worker.job);
        }

        let killed = run.descendants.kill_all();
        if killed > 0 {
            log::info!("Final sweep killed {killed} untracked descendants");
        }
        let deadline = Instant::now() + REAP_GRACE;
        while !run.descendants.reap() && Instant::now() < deadline {
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    /// Polls the dump lock until it is free or `budget` has elapsed.
    async fn wait_for_lock(&self, dump: &Path, budget: Duration) -> Option<DumpLock> {
        let deadline = Instant::now() + budget;
        loop {
            match DumpLock::try_acquire(dump) {
                Ok(Some(lock)) => return Some(lock),
                Ok(None) if Instant::now() < deadline => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Ok(None) => {
                    log::warn!("Dump lock still held after {budget:?}, sweeping anyway");
                    return None;
                }
                Err(err) => {
                    log::warn!("Sweeping without the dump lock: {err}");
                    return None;
                }
            }
        }
    }
}

/// True once a deadline missed at `earliest` has waited long enough on the lock.
fn lock_grace_over(earliest: Instant, now: Instant) -> bool {
    now.saturating_duration_since(earliest) >= CULL_LOCK_GRACE
}

/// Mutable state of one run of the control loop.
struct RunState {
    queue: VecDeque<Job>,
    tracked: Vec<TrackedWorker>,
    descendants: DescendantTracker,
    last_spawn: Option<Instant>,
    last_scan: Option<Instant>,
    report: RunReport,
}

impl RunState {
    fn reap_exited(&mut self) {
        let mut index = 0;
        while index < self.tracked.len() {
            match self.tracked[index].exited() {
                Some(status) => {
                    let worker = self.tracked.swap_remove(index);
                    self.report.completed += 1;
                    if status.success() {
                        log::debug!("Worker {} finished {}", worker.pid(), worker.job);
                    } else {
                        log::warn!(
                            "Worker {} exited with {status}: dropping {}",
                            worker.pid(),
                            worker.job
                        );
                        self.report.dropped.push(worker.job);
                    }
                }
                None => index += 1,
            }
        }
    }

    fn scan_descendants(&mut self, coordinating: &HashSet<u32>) {
        let tracked: HashSet<u32> = self.tracked.iter().map(TrackedWorker::pid).collect();
        self.descendants.scan(&tracked, coordinating);
    }

    fn log_progress(&self, start: Instant) {
        let done = self.report.completed + self.report.culled + self.report.swept;
        let elapsed = start.elapsed().as_secs_f64();
        let rate = if elapsed > 0.0 { done as f64 / elapsed } else { 0.0 };
        log::info!(
            "Processed {}/{} jobs in {:.2} seconds (~{:.2} jobs/sec), {} running, {} dropped",
            done,
            self.report.total,
            elapsed,
            rate,
            self.tracked.len(),
            self.report.dropped.len()
        );
    }
}
