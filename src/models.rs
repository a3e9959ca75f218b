//! Core data records: jobs, redirects and pings.

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::config::HTTP_STATUS_OK;

/// One unit of work: probe `url` on behalf of `lui` of resource `resource_id`.
///
/// Serialized as a JSON array `[resource_id, lui, is_random, url]`. The short
/// form `[resource_id, lui, url]` is accepted on input with `is_random = false`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "JobRecord", into = "JobRecord")]
pub struct Job {
    pub resource_id: u64,
    pub lui: String,
    pub is_random: bool,
    pub url: String,
}

impl Job {
    pub fn new(resource_id: u64, lui: impl Into<String>, is_random: bool, url: impl Into<String>) -> Self {
        Self {
            resource_id,
            lui: lui.into(),
            is_random,
            url: url.into(),
        }
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rid={} lui={} url={} random={}",
            self.resource_id, self.lui, self.url, self.is_random
        )
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum JobRecord {
    Full(u64, String, bool, String),
    Short(u64, String, String),
}

impl From<JobRecord> for Job {
    fn from(record: JobRecord) -> Self {
        match record {
            JobRecord::Full(resource_id, lui, is_random, url) => Job {
                resource_id,
                lui,
                is_random,
                url,
            },
            JobRecord::Short(resource_id, lui, url) => Job {
                resource_id,
                lui,
                is_random: false,
                url,
            },
        }
    }
}

impl From<Job> for JobRecord {
    fn from(job: Job) -> Self {
        JobRecord::Full(job.resource_id, job.lui, job.is_random, job.url)
    }
}

/// One hop of a redirect chain as observed through the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redirect {
    pub url: String,
    /// Remote endpoint reported by the proxy (`ip:port` or `[ipv6]:port`)
    pub ip_port: Option<String>,
    /// Upstream round-trip time in milliseconds
    pub response_time: Option<u64>,
    /// HTTP status; `None` when the proxy synthesized a non-timeout failure
    pub status: Option<u16>,
    pub dns_error: bool,
    pub ssl_error: bool,
    pub invalid_response: bool,
}

impl Redirect {
    /// A hop with only a URL and status, as produced by synthetic outcomes.
    pub fn bare(url: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            url: url.into(),
            ip_port: None,
            response_time: None,
            status,
            dns_error: false,
            ssl_error: false,
            invalid_response: false,
        }
    }
}

/// The persisted result of probing one job.
///
/// Construct through [`Ping::new`], which maintains the invariant that content
/// is only present when the final hop answered `200`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub lui: String,
    pub random: bool,
    /// Request start in UTC, second precision
    #[serde(with = "ping_date")]
    pub date: NaiveDateTime,
    pub redirects: Vec<Redirect>,
    pub content: Option<String>,
    pub content_type: Option<String>,
}

impl Ping {
    /// Builds a Ping, dropping content and content type unless the last
    /// redirect has status `200`.
    pub fn new(
        lui: impl Into<String>,
        random: bool,
        date: NaiveDateTime,
        redirects: Vec<Redirect>,
        content: Option<String>,
        content_type: Option<String>,
    ) -> Self {
        let final_ok = redirects
            .last()
            .and_then(|r| r.status)
            .is_some_and(|status| status == HTTP_STATUS_OK);
        let (content, content_type) = if content.is_some() && !final_ok {
            log::debug!("Discarding content of a non-200 final response");
            (None, None)
        } else {
            (content, content_type)
        };
        Self {
            lui: lui.into(),
            random,
            date,
            redirects,
            content,
            content_type,
        }
    }

    /// Status of the final hop, if any.
    pub fn final_status(&self) -> Option<u16> {
        self.redirects.last().and_then(|r| r.status)
    }
}

/// Current UTC time truncated to whole seconds.
pub fn request_date_now() -> NaiveDateTime {
    let now = chrono::Utc::now().naive_utc();
    now.with_nanosecond(0).unwrap_or(now)
}

mod ping_date {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S: Serializer>(date: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDateTime {
        NaiveDateTime::parse_from_str("2020-06-01 12:30:45", "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn test_job_accepts_short_and_full_tuples() {
        let short: Job = serde_json::from_str(r#"[42, "CHEBI:15377", "https://example.org/"]"#).unwrap();
        assert_eq!(short, Job::new(42, "CHEBI:15377", false, "https://example.org/"));

        let full: Job = serde_json::from_str(r#"[7, "P12345", true, "ftp://example.org/x"]"#).unwrap();
        assert!(full.is_random);
        assert_eq!(full.url, "ftp://example.org/x");
    }

    #[test]
    fn test_job_serializes_as_full_tuple() {
        let job = Job::new(42, "CHEBI:15377", false, "https://example.org/");
        assert_eq!(
            serde_json::to_string(&job).unwrap(),
            r#"[42,"CHEBI:15377",false,"https://example.org/"]"#
        );
    }

    #[test]
    fn test_ping_keeps_content_on_final_200() {
        let ping = Ping::new(
            "CHEBI:15377",
            false,
            date(),
            vec![
                Redirect::bare("http://a.example/", Some(301)),
                Redirect::bare("https://a.example/", Some(200)),
            ],
            Some("water".into()),
            Some("text/plain; charset=utf-8".into()),
        );
        assert_eq!(ping.content.as_deref(), Some("water"));
        assert_eq!(ping.final_status(), Some(200));
    }

    #[test]
    fn test_ping_drops_content_unless_final_200() {
        let ping = Ping::new(
            "x",
            false,
            date(),
            vec![Redirect::bare("https://a.example/", Some(404))],
            Some("not found".into()),
            Some("text/html".into()),
        );
        assert!(ping.content.is_none());
        assert!(ping.content_type.is_none());

        let empty = Ping::new("x", false, date(), vec![], Some("orphan".into()), None);
        assert!(empty.content.is_none());
    }

    #[test]
    fn test_ping_date_format() {
        let ping = Ping::new("x", true, date(), vec![], None, None);
        let json = serde_json::to_value(&ping).unwrap();
        assert_eq!(json["date"], "2020-06-01 12:30:45");
        assert_eq!(json["random"], true);

        let back: Ping = serde_json::from_value(json).unwrap();
        assert_eq!(back, ping);
    }

    #[test]
    fn test_request_date_has_second_precision() {
        assert_eq!(request_date_now().nanosecond(), 0);
    }
}
