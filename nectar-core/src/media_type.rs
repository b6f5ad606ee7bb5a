//! Media type parsing and the extension lookup table.

use std::fmt;

/// A parsed `type/subtype; param=value` media type.
///
/// Equality is structural on `(type, subtype)`; parameters are
/// preserved but do not participate in comparison.
#[derive(Debug, Clone)]
pub struct MediaType {
    family: String,
    subtype: String,
    parameters: Vec<(String, String)>,
}

impl MediaType {
    pub fn new(family: &str, subtype: &str) -> Self {
        Self {
            family: family.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            parameters: Vec::new(),
        }
    }

    /// Parse a mime string; malformed input yields `None`.
    pub fn parse(input: &str) -> Option<Self> {
        let mut sections = input.split(';');
        let essence = sections.next()?.trim();
        let (family, subtype) = essence.split_once('/')?;
        let (family, subtype) = (family.trim(), subtype.trim());
        if !is_token(family) || !is_token(subtype) {
            return None;
        }

        let mut parameters = Vec::new();
        for section in sections {
            let section = section.trim();
            if section.is_empty() {
                return None;
            }
            let (name, value) = section.split_once('=')?;
            let value = value.trim_matches('"');
            parameters.push((name.trim().to_ascii_lowercase(), value.to_string()));
        }

        Some(Self {
            family: family.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            parameters,
        })
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Matches either the full `(type, subtype)` or the type family
    /// alone (`is_type("text")` matches `text/html`).
    pub fn is_type(&self, pattern: &str) -> bool {
        match pattern.split_once('/') {
            Some((family, subtype)) => {
                self.family.eq_ignore_ascii_case(family)
                    && (subtype == "*" || self.subtype.eq_ignore_ascii_case(subtype))
            }
            None => self.family.eq_ignore_ascii_case(pattern),
        }
    }

    /// Media type for a file extension; `None` for unknown extensions.
    pub fn from_extension(extension: &str) -> Option<Self> {
        let essence = match extension.to_ascii_lowercase().as_str() {
            "aac" => "audio/aac",
            "avi" => "video/x-msvideo",
            "bin" => "application/octet-stream",
            "bmp" => "image/bmp",
            "css" => "text/css",
            "csv" => "text/csv",
            "eot" => "application/vnd.ms-fontobject",
            "gif" => "image/gif",
            "gz" => "application/gzip",
            "htm" | "html" => "text/html",
            "ico" => "image/vnd.microsoft.icon",
            "ics" => "text/calendar",
            "jpeg" | "jpg" => "image/jpeg",
            "js" | "mjs" => "text/javascript",
            "json" => "application/json",
            "jsonld" => "application/ld+json",
            "md" => "text/markdown",
            "mp3" => "audio/mpeg",
            "mp4" => "video/mp4",
            "mpeg" => "video/mpeg",
            "oga" => "audio/ogg",
            "ogv" => "video/ogg",
            "otf" => "font/otf",
            "pdf" => "application/pdf",
            "png" => "image/png",
            "svg" => "image/svg+xml",
            "tar" => "application/x-tar",
            "tif" | "tiff" => "image/tiff",
            "ttf" => "font/ttf",
            "txt" => "text/plain",
            "wasm" => "application/wasm",
            "wav" => "audio/wav",
            "weba" => "audio/webm",
            "webm" => "video/webm",
            "webp" => "image/webp",
            "woff" => "font/woff",
            "woff2" => "font/woff2",
            "xhtml" => "application/xhtml+xml",
            "xml" => "application/xml",
            "zip" => "application/zip",
            _ => return None,
        };
        MediaType::parse(essence)
    }
}

impl PartialEq for MediaType {
    fn eq(&self, other: &Self) -> bool {
        self.family == other.family && self.subtype == other.subtype
    }
}

impl Eq for MediaType {}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.family, self.subtype)?;
        for (name, value) in &self.parameters {
            write!(f, "; {name}={value}")?;
        }
        Ok(())
    }
}

fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'\''
                        | b'*'
                        | b'+'
                        | b'-'
                        | b'.'
                        | b'^'
                        | b'_'
                        | b'`'
                        | b'|'
                        | b'~'
                )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_with_parameters() {
        let mt = MediaType::parse("text/html; charset=utf-8").unwrap();
        assert_eq!(mt.family(), "text");
        assert_eq!(mt.subtype(), "html");
        assert_eq!(mt.parameter("charset"), Some("utf-8"));
    }

    #[test]
    fn equality_ignores_parameters() {
        let a = MediaType::parse("application/json; charset=utf-8").unwrap();
        let b = MediaType::new("application", "json");
        assert_eq!(a, b);
    }

    #[test]
    fn is_type_matches_family_or_full() {
        let mt = MediaType::parse("text/html").unwrap();
        assert!(mt.is_type("text"));
        assert!(mt.is_type("text/html"));
        assert!(mt.is_type("text/*"));
        assert!(!mt.is_type("application"));
        assert!(!mt.is_type("text/plain"));
    }

    #[test]
    fn invalid_strings_yield_none() {
        assert!(MediaType::parse("texthtml").is_none());
        assert!(MediaType::parse("text/").is_none());
        assert!(MediaType::parse("te<xt/html").is_none());
        assert!(MediaType::parse("text/html; charset").is_none());
    }

    #[test]
    fn extension_table() {
        assert_eq!(
            MediaType::from_extension("html").unwrap(),
            MediaType::new("text", "html")
        );
        assert_eq!(
            MediaType::from_extension("JPG").unwrap(),
            MediaType::new("image", "jpeg")
        );
        assert!(MediaType::from_extension("xyzzy").is_none());
    }
}
