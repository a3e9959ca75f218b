//! Discovery and culling of untracked descendant processes.
//!
//! Workers may leave processes behind that the orchestrator never spawned
//! itself, e.g. browser renderers that outlive a crashed worker. These are
//! found by diffing the process table against the tracked workers, given
//! their own deadline from first observation, and killed once it passes.
//!
//! On Linux the orchestrator registers as a child subreaper so that orphans
//! of its workers are re-parented to it instead of to init, which keeps them
//! inside its process subtree. Every process in that subtree is a candidate,
//! including ones that left their worker's process group with `setsid`, since
//! those are exactly the ones `killpg` cannot reach.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessesToUpdate, System};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Observed {
    start_time: u64,
    deadline: Instant,
}

/// Untracked descendants seen so far, with their kill deadlines.
pub(crate) struct DescendantTracker {
    system: System,
    root: Pid,
    ttl: Duration,
    observed: HashMap<u32, Observed>,
    unreaped: Vec<u32>,
}

impl DescendantTracker {
    /// Tracks descendants of the current process, killing each `ttl` after
    /// it was first observed.
    pub fn new(ttl: Duration) -> Self {
        Self {
            system: System::new(),
            root: Pid::from_u32(std::process::id()),
            ttl,
            observed: HashMap::new(),
            unreaped: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.observed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observed.is_empty()
    }

    /// Refreshes the process table and records newly seen descendants.
    ///
    /// `tracked` are live worker pids and `coordinating` are helper processes
    /// (the proxy) whose subtrees are never culled.
    pub fn scan(&mut self, tracked: &HashSet<u32>, coordinating: &HashSet<u32>) {
        self.system.refresh_processes(ProcessesToUpdate::All, true);

        let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
        for (pid, process) in self.system.processes() {
            if process.thread_kind().is_some() {
                continue;
            }
            if let Some(parent) = process.parent() {
                children.entry(parent).or_default().push(*pid);
            }
        }

        let mut found = Vec::new();
        let mut stack = vec![self.root];
        while let Some(pid) = stack.pop() {
            for &child in children.get(&pid).into_iter().flatten() {
                let raw = child.as_u32();
                if coordinating.contains(&raw) {
                    continue;
                }
                stack.push(child);
                if tracked.contains(&raw) {
                    continue;
                }
                if let Some(process) = self.system.process(child) {
                    found.push((raw, process.start_time()));
                }
            }
        }

        self.observe(found, Instant::now());
    }

    /// Merges one snapshot of descendants into the observed set.
    ///
    /// Processes missing from the snapshot are forgotten. A pid seen with a
    /// different start time is a new process and gets a fresh deadline.
    fn observe(&mut self, snapshot: Vec<(u32, u64)>, now: Instant) {
        let ttl = self.ttl;
        let mut next = HashMap::with_capacity(snapshot.len());
        for (pid, start_time) in snapshot {
            let entry = match self.observed.get(&pid) {
                Some(known) if known.start_time == start_time => *known,
                _ => {
                    log::debug!("Observed untracked descendant {pid}");
                    Observed {
                        start_time,
                        deadline: now + ttl,
                    }
                }
            };
            next.insert(pid, entry);
        }
        self.observed = next;
    }

    /// The earliest kill deadline among observed descendants.
    pub fn earliest_deadline(&self) -> Option<Instant> {
        self.observed.values().map(|observed| observed.deadline).min()
    }

    /// Pids whose deadline has passed at `now`.
    pub fn expired(&self, now: Instant) -> Vec<u32> {
        let mut pids: Vec<u32> = self
            .observed
            .iter()
            .filter(|(_, observed)| observed.deadline <= now)
            .map(|(pid, _)| *pid)
            .collect();
        pids.sort_unstable();
        pids
    }

    /// Kills `pids` if they are still the processes that were observed.
    ///
    /// Returns the number of processes signalled.
    pub fn kill(&mut self, pids: &[u32]) -> usize {
        let mut killed = 0;
        for &pid in pids {
            let Some(observed) = self.observed.remove(&pid) else {
                continue;
            };
            let sys_pid = Pid::from_u32(pid);
            self.system
                .refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
            match self.system.process(sys_pid) {
                Some(process) if process.start_time() == observed.start_time => {
                    if process.kill() {
                        log::info!("Killed untracked descendant {pid}");
                        killed += 1;
                        self.unreaped.push(pid);
                    } else {
                        log::warn!("Failed to kill untracked descendant {pid}");
                    }
                }
                // Exited, or the pid was reused by an unrelated process
                _ => {}
            }
        }
        killed
    }

    /// Kills every observed descendant regardless of its deadline.
    pub fn kill_all(&mut self) -> usize {
        let pids: Vec<u32> = self.observed.keys().copied().collect();
        self.kill(&pids)
    }

    /// Reaps killed descendants that were re-parented to this process.
    ///
    /// Returns true once nothing is left to reap.
    pub fn reap(&mut self) -> bool {
        #[cfg(unix)]
        {
            use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
            use nix::unistd::Pid as NixPid;

            self.unreaped.retain(|&pid| {
                let Ok(raw) = i32::try_from(pid) else {
                    return false;
                };
                matches!(
                    waitpid(NixPid::from_raw(raw), Some(WaitPidFlag::WNOHANG)),
                    Ok(WaitStatus::StillAlive)
                )
            });
        }
        #[cfg(not(unix))]
        self.unreaped.clear();

        self.unreaped.is_empty()
    }
}

/// Makes orphaned descendants re-parent to this process.
#[cfg(target_os = "linux")]
pub(crate) fn become_subreaper() {
    if let Err(err) = nix::sys::prctl::set_child_subreaper(true) {
        log::debug!("Cannot become child subreaper: {err}");
    }
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn become_subreaper() {}
