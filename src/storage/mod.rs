//! Dump directory storage.
//!
//! A dump directory holds one ping log per resource id, the `PROGRESS` record
//! of completed jobs, the `ENVIRONMENT` provenance stamp and the lock file
//! serializing writes between worker processes.

mod environment;
mod lock;
mod ping_log;
mod progress;

// Re-export public API
pub use environment::EnvironmentDescription;
pub use lock::DumpLock;
pub use ping_log::{read_pings, PingLog};
pub use progress::ProgressLog;
