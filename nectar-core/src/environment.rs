//! Process environment access with an optional `.env` overlay.
//!
//! Lookups are case-insensitive. A `.env` file merged *onto* the
//! process environment overrides it; merging the other direction keeps
//! the process values.

use std::{collections::HashMap, path::Path, str::FromStr};

#[derive(thiserror::Error, Debug)]
pub enum EnvironmentError {
    #[error("environment variable '{0}' does not exist")]
    VariableDoesNotExist(String),
    #[error("environment variable '{0}' does not convert to the requested type")]
    VariableDoesNotConvert(String),
    #[error("malformed .env file at line {line}: {reason}")]
    DotEnvParseError { line: usize, reason: &'static str },
    #[error("cannot read .env file: {0}")]
    DotEnvReadError(#[from] std::io::Error),
}

/// An immutable snapshot of environment values.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    values: HashMap<String, String>,
}

impl Environment {
    /// Snapshot the process environment.
    pub fn new() -> Self {
        Self::from_values(std::env::vars())
    }

    pub fn from_values(values: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            values: values
                .into_iter()
                .map(|(k, v)| (k.to_lowercase(), v))
                .collect(),
        }
    }

    /// Parse a `.env` file into an environment.
    pub fn dot_env(path: impl AsRef<Path>) -> Result<Self, EnvironmentError> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_values(parse_dot_env(&content)?))
    }

    /// Process environment overlaid with `.env` values; the overlay
    /// wins on key collisions.
    pub fn with_dot_env(path: impl AsRef<Path>) -> Result<Self, EnvironmentError> {
        Ok(Self::new().merging(Self::dot_env(path)?))
    }

    /// Merge `overlay` onto `self`; overlay values override.
    pub fn merging(mut self, overlay: Environment) -> Self {
        self.values.extend(overlay.values);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn get_as<T: FromStr>(&self, name: &str) -> Result<Option<T>, EnvironmentError> {
        match self.get(name) {
            None => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| EnvironmentError::VariableDoesNotConvert(name.to_string())),
        }
    }

    pub fn require(&self, name: &str) -> Result<&str, EnvironmentError> {
        self.get(name)
            .ok_or_else(|| EnvironmentError::VariableDoesNotExist(name.to_string()))
    }

    pub fn require_as<T: FromStr>(&self, name: &str) -> Result<T, EnvironmentError> {
        self.require(name)?
            .parse()
            .map_err(|_| EnvironmentError::VariableDoesNotConvert(name.to_string()))
    }
}

/// Parse `.env` content: `KEY=VALUE` entries, `#` comments, quoted
/// values that may contain whitespace and newlines.
fn parse_dot_env(content: &str) -> Result<Vec<(String, String)>, EnvironmentError> {
    let mut out = Vec::new();
    let mut chars = content.char_indices().peekable();
    let mut line = 1;

    macro_rules! bump {
        ($c:expr) => {
            if $c == '\n' {
                line += 1;
            }
        };
    }

    loop {
        // Skip whitespace and comments between entries.
        loop {
            match chars.peek() {
                Some((_, c)) if c.is_whitespace() => {
                    let (_, c) = chars.next().unwrap();
                    bump!(c);
                }
                Some((_, '#')) => {
                    for (_, c) in chars.by_ref() {
                        bump!(c);
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
        if chars.peek().is_none() {
            return Ok(out);
        }

        // Key, up to '='.
        let mut key = String::new();
        loop {
            match chars.next() {
                Some((_, '=')) => break,
                Some((_, c)) if c == '\n' || c == '#' => {
                    return Err(EnvironmentError::DotEnvParseError {
                        line,
                        reason: "expected '=' after key",
                    })
                }
                Some((_, c)) => key.push(c),
                None => {
                    return Err(EnvironmentError::DotEnvParseError {
                        line,
                        reason: "expected '=' after key",
                    })
                }
            }
        }
        let key = key.trim().to_string();
        if key.is_empty() {
            return Err(EnvironmentError::DotEnvParseError {
                line,
                reason: "empty key",
            });
        }

        // Value: quoted (may span lines) or bare until whitespace.
        let mut value = String::new();
        match chars.peek() {
            Some((_, quote @ ('"' | '\''))) => {
                let quote = *quote;
                let open_line = line;
                chars.next();
                loop {
                    match chars.next() {
                        Some((_, c)) if c == quote => break,
                        Some((_, c)) => {
                            bump!(c);
                            value.push(c);
                        }
                        None => {
                            return Err(EnvironmentError::DotEnvParseError {
                                line: open_line,
                                reason: "unterminated quoted value",
                            })
                        }
                    }
                }
            }
            _ => {
                while let Some((_, c)) = chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    value.push(chars.next().unwrap().1);
                }
            }
        }
        out.push((key, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let env =
            Environment::from_values([("SERVER_PORT".to_string(), "8080".to_string())]);
        assert_eq!(env.get("server_port"), Some("8080"));
        assert_eq!(env.get("Server_Port"), Some("8080"));
        assert_eq!(env.require_as::<u16>("SERVER_PORT").unwrap(), 8080);
    }

    #[test]
    fn missing_and_unconvertible_variables() {
        let env = Environment::from_values([("NAME".to_string(), "abc".to_string())]);
        assert!(matches!(
            env.require("absent"),
            Err(EnvironmentError::VariableDoesNotExist(_))
        ));
        assert!(matches!(
            env.require_as::<u16>("NAME"),
            Err(EnvironmentError::VariableDoesNotConvert(_))
        ));
        assert!(env.get_as::<u16>("absent").unwrap().is_none());
    }

    #[test]
    fn dot_env_parsing() {
        let parsed = parse_dot_env(
            "# leading comment\nFOO=bar\n\nQUOTED=\"two words\"\nMULTI='a\nb'\nTRAILING=x\n# done\n",
        )
        .unwrap();
        assert_eq!(
            parsed,
            vec![
                ("FOO".to_string(), "bar".to_string()),
                ("QUOTED".to_string(), "two words".to_string()),
                ("MULTI".to_string(), "a\nb".to_string()),
                ("TRAILING".to_string(), "x".to_string()),
            ]
        );
    }

    #[test]
    fn dot_env_errors() {
        assert!(matches!(
            parse_dot_env("JUSTAKEY\n"),
            Err(EnvironmentError::DotEnvParseError { .. })
        ));
        assert!(matches!(
            parse_dot_env("OPEN=\"never closed"),
            Err(EnvironmentError::DotEnvParseError { .. })
        ));
    }

    #[test]
    fn overlay_overrides_base() {
        let base = Environment::from_values([
            ("A".to_string(), "base".to_string()),
            ("B".to_string(), "keep".to_string()),
        ]);
        let overlay = Environment::from_values([("A".to_string(), "overlay".to_string())]);
        let merged = base.merging(overlay);
        assert_eq!(merged.get("a"), Some("overlay"));
        assert_eq!(merged.get("b"), Some("keep"));
    }
}
