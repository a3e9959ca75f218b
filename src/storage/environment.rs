//! Description of the machine a run collected its pings on.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};

use crate::config::ENVIRONMENT_FILE;

const GIB: f64 = (1u64 << 30) as f64;

/// Provenance stamp written once per run as `<dump>/ENVIRONMENT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentDescription {
    pub machine: String,
    pub os: String,
    pub cpu: String,
    /// `<physical cores> x <threads per core>`
    pub cores: String,
    /// Free memory, e.g. `12.34GiB`
    pub memory: String,
    /// Free space on the disk holding the working directory
    pub storage: String,
    /// Command line of the run
    pub cmd: String,
}

impl EnvironmentDescription {
    /// Collects the description of the current machine.
    pub fn collect(cmd: impl Into<String>) -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_memory();

        let cpu = system
            .cpus()
            .first()
            .map(|cpu| format!("{} {}", cpu.vendor_id(), cpu.brand()).trim().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let logical = system.cpus().len().max(1);
        let physical = System::physical_core_count().unwrap_or(logical).max(1);

        let working_dir = std::env::current_dir().unwrap_or_default();
        let disks = Disks::new_with_refreshed_list();
        let free_storage = disks
            .list()
            .iter()
            .filter(|disk| working_dir.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
            .unwrap_or(0);

        Self {
            machine: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            os: System::long_os_version()
                .or_else(System::name)
                .unwrap_or_else(|| std::env::consts::OS.to_string()),
            cpu,
            cores: format!("{} x {}", physical, logical / physical),
            memory: format_gib(system.free_memory()),
            storage: format_gib(free_storage),
            cmd: cmd.into(),
        }
    }

    /// Writes the description to `<dump>/ENVIRONMENT`.
    pub fn write(&self, dump: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(dump.join(ENVIRONMENT_FILE), json)
    }
}

fn format_gib(bytes: u64) -> String {
    format!("{:.2}GiB", bytes as f64 / GIB)
}
