//! The `inspect` command: dumps a ping log as JSON lines.

use std::io::Write;
use std::path::Path;

use anyhow::Context;

use crate::storage::read_pings;

/// Writes every readable ping of the log at `path` to `out`, one JSON object
/// per line, and returns how many were written.
///
/// A truncated trailing record is skipped, as when reading the log anywhere else.
///
/// # Errors
///
/// Returns an error if the log cannot be opened or `out` cannot be written.
pub fn inspect(path: &Path, out: &mut impl Write) -> anyhow::Result<usize> {
    let pings =
        read_pings(path).with_context(|| format!("Failed to read ping log {}", path.display()))?;
    for ping in &pings {
        serde_json::to_writer(&mut *out, ping)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(pings.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{request_date_now, Ping, Redirect};
    use crate::storage::PingLog;

    #[test]
    fn test_inspect_prints_one_line_per_ping() {
        let dir = tempfile::tempdir().unwrap();
        let log = PingLog::for_resource(dir.path(), 7);
        for lui in ["a", "b"] {
            log.append(&Ping::new(
                lui,
                false,
                request_date_now(),
                vec![Redirect::bare(format!("https://a.example/{lui}"), Some(404))],
                None,
                None,
            ))
            .unwrap();
        }

        let mut out = Vec::new();
        let count = inspect(log.path(), &mut out).unwrap();

        assert_eq!(count, 2);
        let text = String::from_utf8(out).unwrap();
        let luis: Vec<String> = text
            .lines()
            .map(|line| serde_json::from_str::<Ping>(line).unwrap().lui)
            .collect();
        assert_eq!(luis, ["a", "b"]);
    }

    #[test]
    fn test_inspect_missing_log_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut out = Vec::new();
        assert!(inspect(&dir.path().join("pings_1.gz"), &mut out).is_err());
    }
}
