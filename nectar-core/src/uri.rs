//! Request-target decomposition and query parsing.
//!
//! [`Uri`] wraps the raw request target and derives its pieces on
//! demand; nothing is split or decoded until asked for. Query
//! parameters preserve duplicate keys in insertion order and
//! percent-decode keys and values (plus `+` as space).

use std::str::FromStr;

use crate::error::HttpError;

/// A lazily-decomposed request target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uri {
    raw: String,
}

impl Uri {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Text before `://`, if the target is in absolute form.
    pub fn scheme(&self) -> Option<&str> {
        let end = self.raw.find("://")?;
        Some(&self.raw[..end])
    }

    fn authority(&self) -> Option<&str> {
        let rest = match self.raw.find("://") {
            Some(idx) => &self.raw[idx + 3..],
            // Origin-form targets carry no authority.
            None => return None,
        };
        let end = rest
            .find(|c| c == '/' || c == '?' || c == '#')
            .unwrap_or(rest.len());
        Some(&rest[..end])
    }

    pub fn host(&self) -> Option<&str> {
        let authority = self.authority()?;
        let host = match authority.rfind(':') {
            Some(idx) if authority[idx + 1..].bytes().all(|b| b.is_ascii_digit()) => {
                &authority[..idx]
            }
            _ => authority,
        };
        (!host.is_empty()).then_some(host)
    }

    pub fn port(&self) -> Option<u16> {
        let authority = self.authority()?;
        let idx = authority.rfind(':')?;
        authority[idx + 1..].parse().ok()
    }

    /// Path component; the empty path normalizes to `/`.
    pub fn path(&self) -> &str {
        let rest = match self.raw.find("://") {
            Some(idx) => {
                let after = &self.raw[idx + 3..];
                match after.find(|c| c == '/' || c == '?' || c == '#') {
                    Some(path_start) if after.as_bytes()[path_start] == b'/' => {
                        &after[path_start..]
                    }
                    _ => "",
                }
            }
            None => &self.raw,
        };
        let end = rest
            .find(|c| c == '?' || c == '#')
            .unwrap_or(rest.len());
        match &rest[..end] {
            "" => "/",
            path => path,
        }
    }

    /// Text between `?` and `#`; empty if absent.
    pub fn query(&self) -> &str {
        let start = match self.raw.find('?') {
            Some(idx) => idx + 1,
            None => return "",
        };
        let rest = &self.raw[start..];
        let end = rest.find('#').unwrap_or(rest.len());
        &rest[..end]
    }

    pub fn fragment(&self) -> Option<&str> {
        let idx = self.raw.find('#')?;
        Some(&self.raw[idx + 1..])
    }

    pub fn query_parameters(&self) -> QueryParameters {
        QueryParameters::parse(self.query())
    }
}

impl From<&http::Uri> for Uri {
    fn from(uri: &http::Uri) -> Self {
        Self::new(uri.to_string())
    }
}

impl std::fmt::Display for Uri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Percent-decode `input`; invalid escapes are passed through
/// untouched. With `plus_as_space`, `+` decodes to a space (form/query
/// convention).
pub fn percent_decode(input: &str, plus_as_space: bool) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' if plus_as_space => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decoded query parameters, duplicate keys preserved in insertion
/// order.
#[derive(Debug, Clone, Default)]
pub struct QueryParameters {
    entries: Vec<(String, String)>,
}

impl QueryParameters {
    pub fn parse(query: &str) -> Self {
        let mut entries = Vec::new();
        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = match pair.split_once('=') {
                Some((k, v)) => (k, v),
                None => (pair, ""),
            };
            entries.push((percent_decode(key, true), percent_decode(value, true)));
        }
        Self { entries }
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name`, in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `name` parsed as `T`; any parse failure fails
    /// the whole call with a client-input error.
    pub fn require_all<T: FromStr>(&self, name: &str) -> Result<Vec<T>, HttpError> {
        self.get_all(name)
            .map(|v| {
                v.parse::<T>().map_err(|_| {
                    HttpError::bad_request(format!("invalid value for query parameter '{name}'"))
                })
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
