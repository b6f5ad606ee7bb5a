//! The route trie.
//!
//! Patterns compile into per-segment nodes; matching walks the tree
//! greedily with a fixed priority at every level: literal, then
//! prefixed capture, then parameter, then wildcard, then recursive
//! wildcard. Conflicts that would make the order surprising are
//! recorded at insert time and surfaced by `Router::validate`.

use std::{collections::HashMap, rc::Rc};

use http::Method;
use nectar_core::{
    context::Parameters,
    uri::percent_decode,
};

use crate::middleware::Responder;

/// One compiled route pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Literal(String),
    /// `{name}` or legacy `:name`.
    Parameter(String),
    /// `prefix{name}suffix` or `prefix*suffix`; `capture` is `None`
    /// for the anonymous form.
    Prefixed {
        prefix: String,
        capture: Option<String>,
        suffix: String,
    },
    Wildcard,
    RecursiveWildcard,
}

pub(crate) fn parse_pattern(pattern: &str, case_insensitive: bool) -> Vec<Segment> {
    pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|segment| parse_segment(segment, case_insensitive))
        .collect()
}

fn parse_segment(segment: &str, case_insensitive: bool) -> Segment {
    if segment == "*" {
        return Segment::Wildcard;
    }
    if segment == "**" {
        return Segment::RecursiveWildcard;
    }
    if let Some(name) = segment.strip_prefix(':') {
        return Segment::Parameter(name.to_string());
    }
    if segment.starts_with('{') && segment.ends_with('}') && segment[1..].find('{').is_none() {
        return Segment::Parameter(segment[1..segment.len() - 1].to_string());
    }
    if let (Some(open), Some(close)) = (segment.find('{'), segment.rfind('}')) {
        if open < close {
            return Segment::Prefixed {
                prefix: fold(&segment[..open], case_insensitive),
                capture: Some(segment[open + 1..close].to_string()),
                suffix: fold(&segment[close + 1..], case_insensitive),
            };
        }
    }
    if let Some(star) = segment.find('*') {
        return Segment::Prefixed {
            prefix: fold(&segment[..star], case_insensitive),
            capture: None,
            suffix: fold(&segment[star + 1..], case_insensitive),
        };
    }
    Segment::Literal(fold(segment, case_insensitive))
}

fn fold(s: &str, case_insensitive: bool) -> String {
    if case_insensitive {
        s.to_lowercase()
    } else {
        s.to_string()
    }
}

/// Rebuild the canonical pattern text (`{name}` placeholders intact);
/// this is what `endpoint_path` reports.
pub(crate) fn canonical_pattern(segments: &[Segment]) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for segment in segments {
        out.push('/');
        match segment {
            Segment::Literal(s) => out.push_str(s),
            Segment::Parameter(name) => {
                out.push('{');
                out.push_str(name);
                out.push('}');
            }
            Segment::Prefixed {
                prefix,
                capture,
                suffix,
            } => {
                out.push_str(prefix);
                match capture {
                    Some(name) => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                    None => out.push('*'),
                }
                out.push_str(suffix);
            }
            Segment::Wildcard => out.push('*'),
            Segment::RecursiveWildcard => out.push_str("**"),
        }
    }
    out
}

/// What a matched route executes.
pub(crate) struct RouteTarget<Ctx> {
    pub pattern: Rc<str>,
    pub responder: Rc<dyn Responder<Ctx>>,
}

impl<Ctx> Clone for RouteTarget<Ctx> {
    fn clone(&self) -> Self {
        Self {
            pattern: self.pattern.clone(),
            responder: self.responder.clone(),
        }
    }
}

struct ParamChild<Ctx> {
    name: String,
    created_by: String,
    node: Box<TrieNode<Ctx>>,
}

struct PrefixedChild<Ctx> {
    prefix: String,
    capture: Option<String>,
    suffix: String,
    created_by: String,
    node: Box<TrieNode<Ctx>>,
}

pub(crate) struct TrieNode<Ctx> {
    literals: HashMap<String, TrieNode<Ctx>>,
    prefixed: Vec<PrefixedChild<Ctx>>,
    parameter: Option<ParamChild<Ctx>>,
    wildcard: Option<(String, Box<TrieNode<Ctx>>)>,
    recursive: Option<(String, Box<TrieNode<Ctx>>)>,
    handlers: HashMap<Method, RouteTarget<Ctx>>,
}

impl<Ctx> Default for TrieNode<Ctx> {
    fn default() -> Self {
        Self {
            literals: HashMap::new(),
            prefixed: Vec::new(),
            parameter: None,
            wildcard: None,
            recursive: None,
            handlers: HashMap::new(),
        }
    }
}

impl<Ctx> TrieNode<Ctx> {
    /// Insert a compiled route, recording pattern pairs whose
    /// coexistence would make the match order observable.
    pub(crate) fn insert(
        &mut self,
        segments: &[Segment],
        pattern: &str,
        method: Method,
        target: RouteTarget<Ctx>,
        conflicts: &mut Vec<(String, String)>,
    ) {
        let Some((head, rest)) = segments.split_first() else {
            if self.handlers.insert(method, target).is_some() {
                conflicts.push((pattern.to_string(), pattern.to_string()));
            }
            return;
        };

        let child = match head {
            Segment::Literal(value) => self.literals.entry(value.clone()).or_default(),
            Segment::Parameter(name) => {
                if let Some(wildcard) = &self.wildcard {
                    conflicts.push((wildcard.0.clone(), pattern.to_string()));
                }
                if let Some(recursive) = &self.recursive {
                    conflicts.push((recursive.0.clone(), pattern.to_string()));
                }
                let param = self.parameter.get_or_insert_with(|| ParamChild {
                    name: name.clone(),
                    created_by: pattern.to_string(),
                    node: Box::default(),
                });
                if param.name != *name {
                    conflicts.push((param.created_by.clone(), pattern.to_string()));
                }
                param.node.as_mut()
            }
            Segment::Prefixed {
                prefix,
                capture,
                suffix,
            } => {
                if let Some(existing) = self
                    .prefixed
                    .iter()
                    .position(|p| p.prefix == *prefix && p.suffix == *suffix)
                {
                    if self.prefixed[existing].capture != *capture {
                        conflicts.push((
                            self.prefixed[existing].created_by.clone(),
                            pattern.to_string(),
                        ));
                    }
                    self.prefixed[existing].node.as_mut()
                } else {
                    self.prefixed.push(PrefixedChild {
                        prefix: prefix.clone(),
                        capture: capture.clone(),
                        suffix: suffix.clone(),
                        created_by: pattern.to_string(),
                        node: Box::default(),
                    });
                    self.prefixed.last_mut().unwrap().node.as_mut()
                }
            }
            Segment::Wildcard => {
                if let Some(param) = &self.parameter {
                    conflicts.push((param.created_by.clone(), pattern.to_string()));
                }
                if let Some(recursive) = &self.recursive {
                    conflicts.push((recursive.0.clone(), pattern.to_string()));
                }
                self.wildcard
                    .get_or_insert_with(|| (pattern.to_string(), Box::default()))
                    .1
                    .as_mut()
            }
            Segment::RecursiveWildcard => {
                if let Some(param) = &self.parameter {
                    conflicts.push((param.created_by.clone(), pattern.to_string()));
                }
                if let Some(wildcard) = &self.wildcard {
                    conflicts.push((wildcard.0.clone(), pattern.to_string()));
                }
                let node = self
                    .recursive
                    .get_or_insert_with(|| (pattern.to_string(), Box::default()))
                    .1
                    .as_mut();
                // The recursive wildcard consumes the remainder; it
                // must be the final segment.
                if !rest.is_empty() {
                    conflicts.push((pattern.to_string(), pattern.to_string()));
                }
                node.insert(&[], pattern, method, target, conflicts);
                return;
            }
        };
        child.insert(rest, pattern, method, target, conflicts);
    }

    /// Greedy walk; captures go into `params` only on the successful
    /// path because failure aborts the whole match.
    pub(crate) fn matches<'n>(
        &'n self,
        segments: &[&str],
        params: &mut Parameters,
        case_insensitive: bool,
    ) -> Option<&'n TrieNode<Ctx>> {
        let Some((head, rest)) = segments.split_first() else {
            return Some(self);
        };
        let folded = fold(head, case_insensitive);

        if let Some(child) = self.literals.get(&folded) {
            return child.matches(rest, params, case_insensitive);
        }
        for prefixed in &self.prefixed {
            if folded.len() >= prefixed.prefix.len() + prefixed.suffix.len()
                && folded.starts_with(&prefixed.prefix)
                && folded.ends_with(&prefixed.suffix)
            {
                if let Some(name) = &prefixed.capture {
                    let middle = &head[prefixed.prefix.len()..head.len() - prefixed.suffix.len()];
                    params.push(name.clone(), percent_decode(middle, false));
                }
                return prefixed.node.matches(rest, params, case_insensitive);
            }
        }
        if let Some(param) = &self.parameter {
            params.push(param.name.clone(), percent_decode(head, false));
            return param.node.matches(rest, params, case_insensitive);
        }
        if let Some((_, child)) = &self.wildcard {
            return child.matches(rest, params, case_insensitive);
        }
        if let Some((_, child)) = &self.recursive {
            params.push(
                Parameters::RECURSIVE_CAPTURE,
                percent_decode(&segments.join("/"), false),
            );
            return Some(child.as_ref());
        }
        None
    }

    pub(crate) fn target(&self, method: &Method) -> Option<&RouteTarget<Ctx>> {
        self.handlers.get(method)
    }

    pub(crate) fn has_handlers(&self) -> bool {
        !self.handlers.is_empty()
    }

    /// Methods registered on this node, sorted for a stable `Allow`
    /// header.
    pub(crate) fn allowed_methods(&self) -> Vec<Method> {
        let mut methods: Vec<Method> = self.handlers.keys().cloned().collect();
        methods.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        methods
    }

    /// Install a synthetic HEAD wherever GET exists without HEAD.
    pub(crate) fn install_auto_head(
        &mut self,
        wrap: &impl Fn(RouteTarget<Ctx>) -> RouteTarget<Ctx>,
    ) {
        if !self.handlers.contains_key(&Method::HEAD) {
            if let Some(get) = self.handlers.get(&Method::GET).cloned() {
                self.handlers.insert(Method::HEAD, wrap(get));
            }
        }
        for child in self.literals.values_mut() {
            child.install_auto_head(wrap);
        }
        for prefixed in &mut self.prefixed {
            prefixed.node.install_auto_head(wrap);
        }
        if let Some(param) = &mut self.parameter {
            param.node.install_auto_head(wrap);
        }
        if let Some((_, child)) = &mut self.wildcard {
            child.install_auto_head(wrap);
        }
        if let Some((_, child)) = &mut self.recursive {
            child.install_auto_head(wrap);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_parsing() {
        assert_eq!(
            parse_pattern("/users/{id}", false),
            vec![
                Segment::Literal("users".into()),
                Segment::Parameter("id".into())
            ]
        );
        assert_eq!(
            parse_pattern("/users/:id", false),
            parse_pattern("/users/{id}", false)
        );
        assert_eq!(
            parse_pattern("/files/**", false),
            vec![
                Segment::Literal("files".into()),
                Segment::RecursiveWildcard
            ]
        );
        assert_eq!(
            parse_pattern("/file.{ext}", false),
            vec![Segment::Prefixed {
                prefix: "file.".into(),
                capture: Some("ext".into()),
                suffix: "".into(),
            }]
        );
        assert_eq!(
            parse_pattern("/img-*-small", false),
            vec![Segment::Prefixed {
                prefix: "img-".into(),
                capture: None,
                suffix: "-small".into(),
            }]
        );
    }

    #[test]
    fn canonical_pattern_round_trip() {
        for pattern in ["/users/{id}", "/files/**", "/a/*/b", "/file.{ext}", "/"] {
            let segments = parse_pattern(pattern, false);
            assert_eq!(canonical_pattern(&segments), *pattern);
        }
        // Legacy syntax normalizes to braces.
        assert_eq!(
            canonical_pattern(&parse_pattern("/users/:id", false)),
            "/users/{id}"
        );
    }
}
