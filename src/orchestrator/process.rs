//! Spawning and killing probe worker processes.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Instant;

use crate::config::{LogLevel, WorkerConfig, WorkerLog, SCRAPE_LOG_FILE};
use crate::models::Job;

/// Builds the command that runs one job in its own process.
///
/// The orchestrator owns everything else about the process: it places the
/// child in its own process group, tracks its deadline and kills it.
pub trait WorkerLauncher {
    /// Returns the command probing `job`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the output destination cannot be opened.
    fn command(&self, job: &Job) -> std::io::Result<Command>;
}

/// Opens the stdout/stderr pair for a child according to `log`.
///
/// # Errors
///
/// Returns an I/O error if `scrape.log` cannot be opened for appending.
pub fn log_destination(log: WorkerLog) -> std::io::Result<(Stdio, Stdio)> {
    match log {
        WorkerLog::Null => Ok((Stdio::null(), Stdio::null())),
        WorkerLog::Stderr => Ok((
            Stdio::from(std::io::stderr()),
            Stdio::from(std::io::stderr()),
        )),
        WorkerLog::ScrapeLog => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(SCRAPE_LOG_FILE)?;
            let errors = file.try_clone()?;
            Ok((Stdio::from(file), Stdio::from(errors)))
        }
    }
}

/// Re-executes the current binary with the `worker` subcommand.
#[derive(Debug, Clone)]
pub struct ProcessWorkerLauncher {
    exe: PathBuf,
    config: WorkerConfig,
    log: WorkerLog,
    log_level: LogLevel,
}

impl ProcessWorkerLauncher {
    /// Creates a launcher for the running executable.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the path of the current executable is unknown.
    pub fn new(config: WorkerConfig, log: WorkerLog, log_level: LogLevel) -> std::io::Result<Self> {
        Ok(Self {
            exe: std::env::current_exe()?,
            config,
            log,
            log_level,
        })
    }
}

impl WorkerLauncher for ProcessWorkerLauncher {
    fn command(&self, job: &Job) -> std::io::Result<Command> {
        let (stdout, stderr) = log_destination(self.log)?;
        let mut command = Command::new(&self.exe);
        command
            .arg("--log-level")
            .arg(self.log_level.to_string())
            .arg("worker")
            .arg("--dump")
            .arg(&self.config.dump)
            .arg("--proxy")
            .arg(&self.config.proxy)
            .arg("--timeout-ms")
            .arg(self.config.timeout.as_millis().to_string())
            .arg("--scratch")
            .arg(&self.config.scratch)
            .arg("--rid")
            .arg(job.resource_id.to_string())
            // Joined with `=` so values starting with `-` are not read as flags
            .arg(format!("--lui={}", job.lui))
            .arg(format!("--url={}", job.url))
            .stdout(stdout)
            .stderr(stderr);
        if job.is_random {
            command.arg("--random");
        }
        Ok(command)
    }
}

/// Spawns `command` as the leader of a new process group.
pub(crate) fn spawn_in_own_group(mut command: Command) -> std::io::Result<Child> {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command.stdin(Stdio::null()).spawn()
}

/// Kills the process group led by `child`, then the child itself, and reaps it.
pub(crate) fn kill_group(child: &mut Child) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Ok(pgid) = i32::try_from(child.id()) {
            if let Err(err) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                log::debug!("killpg({pgid}) failed: {err}");
            }
        }
    }
    // Already dead is fine
    let _ = child.kill();
    if let Err(err) = child.wait() {
        log::warn!("Failed to reap process {}: {err}", child.id());
    }
}

/// A running probe worker.
#[derive(Debug)]
pub(crate) struct TrackedWorker {
    pub job: Job,
    pub child: Child,
    pub deadline: Instant,
}

impl TrackedWorker {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Returns the exit status if the worker has exited.
    pub fn exited(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(err) => {
                log::warn!("Cannot poll worker {} ({}): {err}", self.pid(), self.job);
                None
            }
        }
    }

    pub fn kill(&mut self) {
        kill_group(&mut self.child);
    }
}
