//! Obtaining the intercepting proxy for a scraping run.

use std::process::{Child, Command};
use std::time::Duration;

use tokio::net::TcpStream;

use crate::config::{
    LogLevel, ProxyMode, WorkerLog, PROXY_STARTUP_POLL, PROXY_STARTUP_TIMEOUT,
    PROXY_TIMEOUT_DIVISOR,
};
use crate::error_handling::InitializationError;

use super::process::{kill_group, log_destination, spawn_in_own_group};

/// A reachable proxy, killed on drop if this run launched it.
#[derive(Debug)]
pub struct ProxyHandle {
    address: String,
    child: Option<Child>,
}

impl ProxyHandle {
    /// `host:port` the workers connect to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Pid of the launched proxy process, if any.
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            log::debug!("Stopping proxy {}", child.id());
            kill_group(child);
        }
    }
}

/// Starts or connects to the proxy a run's workers go through.
#[derive(Debug, Clone)]
pub struct ProxyLauncher {
    /// Per-job timeout `T`; a launched proxy gets `T / 3` per upstream request
    pub timeout: Duration,
    pub log: WorkerLog,
    pub log_level: LogLevel,
}

impl ProxyLauncher {
    /// Makes the proxy described by `mode` available.
    ///
    /// # Errors
    ///
    /// Returns `InitializationError::ProxyStartupError` if the proxy cannot be
    /// launched or does not accept connections within the startup timeout.
    pub async fn start(&self, mode: &ProxyMode) -> Result<ProxyHandle, InitializationError> {
        match mode {
            ProxyMode::Connect(address) => {
                wait_until_accepting(address, None).await?;
                log::info!("Using running proxy at {address}");
                Ok(ProxyHandle {
                    address: address.clone(),
                    child: None,
                })
            }
            ProxyMode::Launch => self.launch().await,
        }
    }

    fn proxy_timeout_secs(&self) -> u64 {
        (self.timeout / PROXY_TIMEOUT_DIVISOR).as_secs().max(1)
    }

    async fn launch(&self) -> Result<ProxyHandle, InitializationError> {
        let startup = |e: std::io::Error| InitializationError::ProxyStartupError(e.to_string());

        let port = free_port().map_err(startup)?;
        let (stdout, stderr) = log_destination(self.log).map_err(startup)?;
        let mut command = Command::new(std::env::current_exe().map_err(startup)?);
        command
            .arg("--log-level")
            .arg(self.log_level.to_string())
            .arg("proxy")
            .arg("--port")
            .arg(port.to_string())
            .arg("--timeout")
            .arg(self.proxy_timeout_secs().to_string())
            .stdout(stdout)
            .stderr(stderr);

        // Own process group, so a terminal Ctrl-C leaves it running while workers drain
        let child = spawn_in_own_group(command).map_err(startup)?;
        let mut handle = ProxyHandle {
            address: format!("127.0.0.1:{port}"),
            child: Some(child),
        };
        log::info!(
            "Launched proxy {} on {}",
            handle.pid().unwrap_or_default(),
            handle.address
        );

        wait_until_accepting(&handle.address, handle.child.as_mut()).await?;
        Ok(handle)
    }
}

fn free_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(listener.local_addr()?.port())
}

async fn wait_until_accepting(
    address: &str,
    mut child: Option<&mut Child>,
) -> Result<(), InitializationError> {
    let deadline = tokio::time::Instant::now() + PROXY_STARTUP_TIMEOUT;
    loop {
        let attempt = tokio::time::timeout(PROXY_STARTUP_POLL, TcpStream::connect(address)).await;
        let failure = match attempt {
            Ok(Ok(_)) => return Ok(()),
            Ok(Err(err)) => err.to_string(),
            Err(_) => "connection attempt timed out".to_string(),
        };

        if let Some(child) = child.as_deref_mut() {
            if let Ok(Some(status)) = child.try_wait() {
                return Err(InitializationError::ProxyStartupError(format!(
                    "proxy exited during startup with {status}"
                )));
            }
        } else {
            return Err(InitializationError::ProxyStartupError(format!(
                "proxy at {address} is unreachable: {failure}"
            )));
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(InitializationError::ProxyStartupError(format!(
                "proxy at {address} did not accept connections within {PROXY_STARTUP_TIMEOUT:?}: {failure}"
            )));
        }
        tokio::time::sleep(PROXY_STARTUP_POLL).await;
    }
}
