//! Append-only, crash-tolerant log of pings for one resource.
//!
//! Every ping is written as its own gzip member holding one JSON document.
//! Concatenated members form a valid multi-member gzip file, and a reader can
//! decode member by member, so a writer killed halfway through an append only
//! loses the record it was writing.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::ping_log_file_name;
use crate::error_handling::PingLogError;
use crate::models::Ping;

/// The ping log of one resource id inside a dump directory.
#[derive(Debug, Clone)]
pub struct PingLog {
    path: PathBuf,
}

impl PingLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The log of `resource_id` inside `dump`.
    pub fn for_resource(dump: &Path, resource_id: u64) -> Self {
        Self::new(dump.join(ping_log_file_name(resource_id)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `ping` as one independent gzip member.
    ///
    /// The caller must hold the [`DumpLock`](super::DumpLock).
    ///
    /// # Errors
    ///
    /// Returns `PingLogError` if the ping cannot be serialized or written.
    pub fn append(&self, ping: &Ping) -> Result<(), PingLogError> {
        let mut record = serde_json::to_vec(ping)?;
        record.push(b'\n');

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&record)?;
        let member = encoder.finish()?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&member)?;
        file.sync_data()?;
        Ok(())
    }

    /// Reads every complete ping of the log.
    ///
    /// See [`read_pings`].
    pub fn read(&self) -> Result<Vec<Ping>, PingLogError> {
        read_pings(&self.path)
    }
}

/// Reads the pings of the log at `path`, member by member.
///
/// Decoding stops at the first member that is truncated or corrupt; every
/// ping before it is returned.
///
/// # Errors
///
/// Returns `PingLogError::Io` if the file cannot be read at all.
pub fn read_pings(path: &Path) -> Result<Vec<Ping>, PingLogError> {
    let data = std::fs::read(path)?;
    let mut remaining: &[u8] = &data;
    let mut pings = Vec::new();

    while !remaining.is_empty() {
        let mut decoder = flate2::bufread::GzDecoder::new(remaining);
        let mut record = Vec::new();
        if let Err(err) = decoder.read_to_end(&mut record) {
            log::warn!(
                "{}: stopping at incomplete record {} ({err})",
                path.display(),
                pings.len() + 1
            );
            break;
        }
        remaining = decoder.into_inner();

        match serde_json::from_slice::<Ping>(&record) {
            Ok(ping) => pings.push(ping),
            Err(err) => {
                log::warn!(
                    "{}: stopping at malformed record {} ({err})",
                    path.display(),
                    pings.len() + 1
                );
                break;
            }
        }
    }

    Ok(pings)
}
