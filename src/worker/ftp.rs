//! Direct FTP fetch.
//!
//! FTP resources are not routed through the browser or the proxy. A minimal
//! passive-mode client retrieves the file (or the directory listing) and
//! failures are classified into the same status vocabulary the proxy uses:
//! name resolution failures become `434`, timeouts `408`, and FTP error
//! replies keep their own code.

use std::net::{IpAddr, SocketAddr};
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use trust_dns_resolver::TokioAsyncResolver;

use crate::config::{
    FTP_STATUS_DNS_FAILURE, FTP_STATUS_OK, FTP_STATUS_TIMEOUT, HTTP_STATUS_REQUEST_TIMEOUT,
};
use crate::content_type::{content_type, decode_content, sniff_encoding, sniff_mime};
use crate::models::{request_date_now, Redirect};
use crate::navigation::Navigation;

const DEFAULT_FTP_PORT: u16 = 21;
const ANONYMOUS_USER: &str = "anonymous";
const ANONYMOUS_PASSWORD: &str = "anonymous@";

/// Compiles a static regex pattern.
///
/// Panics if the pattern is invalid, which is a programming error.
fn compile_regex_unsafe(pattern: &str, context: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| {
        panic!("Failed to compile regex pattern '{pattern}' in {context}: {e}")
    })
}

static STATUS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| compile_regex_unsafe(r"([1-6][0-9][0-9])", "STATUS_PATTERN"));
static PASV_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    compile_regex_unsafe(r"(\d+),(\d+),(\d+),(\d+),(\d+),(\d+)", "PASV_PATTERN")
});

/// Ways an FTP fetch can fail.
#[derive(Error, Debug)]
pub enum FtpError {
    #[error("invalid FTP URL {0}")]
    InvalidUrl(String),

    #[error("cannot resolve {host}: {reason}")]
    Dns { host: String, reason: String },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{code} {text}")]
    Reply { code: u16, text: String },

    #[error("malformed reply: {0:?}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FtpError {
    /// Status recorded for this failure, if any can be derived.
    pub fn status(&self) -> Option<u16> {
        match self {
            FtpError::Dns { .. } => Some(FTP_STATUS_DNS_FAILURE),
            FtpError::Timeout(_) => Some(HTTP_STATUS_REQUEST_TIMEOUT),
            FtpError::Reply { code, .. } => Some(*code),
            other => status_from_text(&other.to_string()),
        }
    }
}

/// Extracts the first three-digit status from an error text, mapping the
/// transport timeout code to `408`.
pub fn status_from_text(text: &str) -> Option<u16> {
    let status = STATUS_PATTERN
        .captures(text)
        .and_then(|captures| captures.get(1))
        .and_then(|code| code.as_str().parse::<u16>().ok())?;
    Some(if status == FTP_STATUS_TIMEOUT {
        HTTP_STATUS_REQUEST_TIMEOUT
    } else {
        status
    })
}

async fn bounded<T, F>(timeout: Duration, operation: F) -> Result<T, FtpError>
where
    F: std::future::Future<Output = Result<T, FtpError>>,
{
    tokio::time::timeout(timeout, operation)
        .await
        .map_err(|_| FtpError::Timeout(timeout))?
}

/// Control connection of one FTP session.
struct Control {
    stream: BufReader<TcpStream>,
    timeout: Duration,
}

impl Control {
    async fn reply(&mut self) -> Result<(u16, String), FtpError> {
        let timeout = self.timeout;
        bounded(timeout, async {
            let mut line = String::new();
            if self.stream.read_line(&mut line).await? == 0 {
                return Err(FtpError::Protocol("connection closed".to_string()));
            }
            let code = parse_code(&line)?;
            let mut text = line.trim_end().to_string();
            // Multi-line replies end with "<code> " on their last line
            if line.as_bytes().get(3) == Some(&b'-') {
                let terminator = format!("{code} ");
                loop {
                    let mut next = String::new();
                    if self.stream.read_line(&mut next).await? == 0 {
                        return Err(FtpError::Protocol("connection closed".to_string()));
                    }
                    text.push('\n');
                    text.push_str(next.trim_end());
                    if next.starts_with(&terminator) {
                        break;
                    }
                }
            }
            Ok((code, text))
        })
        .await
    }

    async fn command(&mut self, command: &str) -> Result<(u16, String), FtpError> {
        let timeout = self.timeout;
        bounded(timeout, async {
            self.stream
                .get_mut()
                .write_all(format!("{command}\r\n").as_bytes())
                .await?;
            Ok(())
        })
        .await?;
        self.reply().await
    }

    /// Sends `command` and fails unless the reply code is in `expected`.
    async fn expect(&mut self, command: &str, expected: &[u16]) -> Result<u16, FtpError> {
        let (code, text) = self.command(command).await?;
        if expected.contains(&code) {
            Ok(code)
        } else {
            Err(FtpError::Reply {
                code,
                text: reply_text(&text),
            })
        }
    }
}

fn parse_code(line: &str) -> Result<u16, FtpError> {
    line.get(..3)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| FtpError::Protocol(line.trim_end().to_string()))
}

fn reply_text(reply: &str) -> String {
    reply.get(4..).unwrap_or_default().to_string()
}

fn parse_pasv(reply: &str, control_ip: IpAddr) -> Result<SocketAddr, FtpError> {
    let captures = PASV_PATTERN
        .captures(reply)
        .ok_or_else(|| FtpError::Protocol(reply.to_string()))?;
    let number = |index: usize| -> Result<u16, FtpError> {
        captures[index]
            .parse::<u16>()
            .map_err(|_| FtpError::Protocol(reply.to_string()))
    };
    let port = number(5)? * 256 + number(6)?;
    // The advertised address is often private; the control peer is reachable
    Ok(SocketAddr::new(control_ip, port))
}

/// Fetches an FTP resource.
pub(crate) struct FtpFetcher<'a> {
    resolver: &'a TokioAsyncResolver,
    timeout: Duration,
}

impl<'a> FtpFetcher<'a> {
    pub fn new(resolver: &'a TokioAsyncResolver, timeout: Duration) -> Self {
        Self { resolver, timeout }
    }

    /// Retrieves `url` and records the outcome as a single redirect hop.
    ///
    /// Never fails: every error becomes a hop with `invalid_response` set and
    /// the status derived from the error.
    pub async fn fetch(&self, url: &str) -> Navigation {
        let request_date = request_date_now();
        let started = Instant::now();

        match self.retrieve(url).await {
            Ok(content) => {
                let mut redirect = Redirect::bare(url, Some(FTP_STATUS_OK));
                redirect.response_time = Some(started.elapsed().as_millis() as u64);
                let mime_type = sniff_mime(&content, url);
                let encoding = sniff_encoding(&content);
                Navigation {
                    request_date,
                    redirects: vec![redirect],
                    content: Some(decode_content(&content, &mime_type, &encoding)),
                    content_type: Some(content_type(&mime_type, &encoding)),
                }
            }
            Err(err) => {
                log::debug!("FTP fetch of {url} failed: {err}");
                let status = err.status();
                let mut redirect = Redirect::bare(url, status);
                redirect.dns_error = status == Some(FTP_STATUS_DNS_FAILURE);
                redirect.invalid_response = true;
                Navigation {
                    request_date,
                    redirects: vec![redirect],
                    content: None,
                    content_type: None,
                }
            }
        }
    }

    async fn resolve(&self, host: &str) -> Result<IpAddr, FtpError> {
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip);
        }
        let dns_error = |reason: String| FtpError::Dns {
            host: host.to_string(),
            reason,
        };
        let lookup = bounded(self.timeout, async {
            self.resolver
                .lookup_ip(host)
                .await
                .map_err(|e| dns_error(e.to_string()))
        })
        .await
        .map_err(|e| match e {
            FtpError::Timeout(_) => dns_error("lookup timed out".to_string()),
            other => other,
        })?;
        lookup
            .iter()
            .next()
            .ok_or_else(|| dns_error("no addresses".to_string()))
    }

    async fn connect(&self, addr: SocketAddr) -> Result<TcpStream, FtpError> {
        bounded(self.timeout, async { Ok(TcpStream::connect(addr).await?) }).await
    }

    async fn retrieve(&self, url: &str) -> Result<Vec<u8>, FtpError> {
        let parsed = url::Url::parse(url).map_err(|_| FtpError::InvalidUrl(url.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| FtpError::InvalidUrl(url.to_string()))?;
        let ip = self.resolve(host).await?;
        let addr = SocketAddr::new(ip, parsed.port().unwrap_or(DEFAULT_FTP_PORT));

        let mut control = Control {
            stream: BufReader::new(self.connect(addr).await?),
            timeout: self.timeout,
        };
        let (code, text) = control.reply().await?;
        if code != 220 {
            return Err(FtpError::Reply {
                code,
                text: reply_text(&text),
            });
        }

        let user = match parsed.username() {
            "" => ANONYMOUS_USER.to_string(),
            user => percent_decode(user),
        };
        let password = parsed
            .password()
            .map(percent_decode)
            .unwrap_or_else(|| ANONYMOUS_PASSWORD.to_string());
        if control.expect(&format!("USER {user}"), &[230, 331]).await? == 331 {
            control.expect(&format!("PASS {password}"), &[230, 202]).await?;
        }
        control.expect("TYPE I", &[200]).await?;

        let path = percent_decode(parsed.path());
        let content = if path.is_empty() || path.ends_with('/') {
            self.transfer(&mut control, ip, &format!("LIST {path}")).await?
        } else {
            match self.transfer(&mut control, ip, &format!("RETR {path}")).await {
                Err(FtpError::Reply { code: 550, .. }) => {
                    // Not a file; maybe a directory
                    self.transfer(&mut control, ip, &format!("LIST {path}")).await?
                }
                other => other?,
            }
        };

        let _ = control.command("QUIT").await;
        Ok(content)
    }

    /// Opens a passive data connection, sends `command` and reads the data.
    async fn transfer(
        &self,
        control: &mut Control,
        control_ip: IpAddr,
        command: &str,
    ) -> Result<Vec<u8>, FtpError> {
        let (code, text) = control.command("PASV").await?;
        if code != 227 {
            return Err(FtpError::Reply {
                code,
                text: reply_text(&text),
            });
        }
        let mut data = self.connect(parse_pasv(&text, control_ip)?).await?;
        control.expect(command, &[125, 150]).await?;

        let mut content = Vec::new();
        let mut chunk = [0u8; 16 * 1024];
        loop {
            let read = bounded(self.timeout, async { Ok(data.read(&mut chunk).await?) }).await?;
            if read == 0 {
                break;
            }
            content.extend_from_slice(&chunk[..read]);
        }
        drop(data);

        let (code, text) = control.reply().await?;
        if !matches!(code, 226 | 250) {
            return Err(FtpError::Reply {
                code,
                text: reply_text(&text),
            });
        }
        Ok(content)
    }
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' {
            if let Some(byte) = value
                .get(index + 1..index + 3)
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            {
                decoded.push(byte);
                index += 3;
                continue;
            }
        }
        decoded.push(bytes[index]);
        index += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}
