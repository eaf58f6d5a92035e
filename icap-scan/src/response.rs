//! Raw ICAP responses and the header-line scan done over them.
//!
//! No general ICAP/HTTP grammar is applied: the response is split into lines,
//! the first one is the status line and every following line is
//! prefix-matched against a small set of header names the verdict and
//! version logic care about.
//!
//! ```rust
//! use icap_scan::response::{ParsedHeaders, RawIcapResponse, X_VIRUS_ID};
//!
//! let raw = RawIcapResponse::from("ICAP/1.0 200 OK\r\nISTag: a\r\nX-Virus-ID: EICAR-Test\r\n\r\n");
//! assert!(raw.is_success());
//! let headers = ParsedHeaders::parse(&raw);
//! assert_eq!(headers.get(X_VIRUS_ID), Some("EICAR-Test"));
//! ```

use std::borrow::Cow;
use std::fmt;

pub const X_VIRUS_ID: &str = "X-Virus-ID:";
pub const SERVER: &str = "Server:";
pub const SERVICE: &str = "Service:";
pub const X_DEFINITION_INFO: &str = "X-Definition-Info";
pub const X_RESPONSE_INFO: &str = "X-Response-Info:";

/// Status line prefix of a usable OPTIONS answer.
pub const OPTIONS_OK: &[u8] = b"ICAP/1.0 200";

/// Prefixes recognised by [`ParsedHeaders::parse`], in match order.
pub const HEADERS_OF_INTEREST: [&str; 5] =
    [X_VIRUS_ID, SERVER, SERVICE, X_DEFINITION_INFO, X_RESPONSE_INFO];

/// Bytes received for one exchange, exactly as read off the socket.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawIcapResponse {
    bytes: Vec<u8>,
}

impl RawIcapResponse {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Lossy UTF-8 view of the response.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    /// First line, without its terminator.
    pub fn status_line(&self) -> String {
        self.text().lines().next().unwrap_or_default().to_string()
    }

    /// `true` when the status line starts with `ICAP/1.0 200`.
    pub fn is_success(&self) -> bool {
        self.bytes.starts_with(OPTIONS_OK)
    }
}

impl From<Vec<u8>> for RawIcapResponse {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for RawIcapResponse {
    fn from(bytes: &[u8]) -> Self {
        Self::new(bytes)
    }
}

impl From<&str> for RawIcapResponse {
    fn from(text: &str) -> Self {
        Self::new(text.as_bytes())
    }
}

impl fmt::Display for RawIcapResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// Header lines of interest, in the order they appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedHeaders {
    status_line: String,
    line_count: usize,
    headers: Vec<(String, String)>,
}

impl ParsedHeaders {
    /// Scan `raw` for [`HEADERS_OF_INTEREST`].
    pub fn parse(raw: &RawIcapResponse) -> Self {
        Self::parse_with(raw, &HEADERS_OF_INTEREST)
    }

    /// Scan `raw` for the given case-sensitive name prefixes.
    ///
    /// Each line after the status line is attributed to the first prefix it
    /// starts with; its value is whatever follows the first `:`, trimmed.
    /// Lines without a `:` carry no value and are skipped.
    fn parse_with(raw: &RawIcapResponse, names: &[&str]) -> Self {
        let text = raw.text();
        let lines: Vec<&str> = text.trim().lines().collect();

        let mut parsed = Self {
            status_line: lines.first().copied().unwrap_or_default().to_string(),
            line_count: lines.len(),
            headers: Vec::new(),
        };

        for line in lines.iter().skip(1) {
            let Some(name) = names.iter().find(|n| line.starts_with(**n)) else {
                continue;
            };
            let Some((_, value)) = line.split_once(':') else {
                continue;
            };
            parsed
                .headers
                .push(((*name).to_string(), value.trim().to_string()));
        }
        parsed
    }

    pub fn status_line(&self) -> &str {
        &self.status_line
    }

    /// Line count once surrounding whitespace is trimmed, status line included.
    pub fn line_count(&self) -> usize {
        self.line_count
    }

    /// Value of the first line matched by `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}
