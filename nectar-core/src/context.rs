//! Per-request context.
//!
//! Every request gets a fresh context, owned exclusively by the
//! in-flight pipeline and dropped after the response body finishes.
//! Applications define their own context type on top of the mandatory
//! [`CoreContext`]; groups may switch to a derived context type via
//! [`FromParentContext`].

use std::{
    cell::RefCell,
    fmt,
    rc::Rc,
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{error::HttpError, listener::AcceptedAddr};

/// Default cap applied by `collect`-style consumers unless the
/// context overrides it.
pub const DEFAULT_MAX_UPLOAD_SIZE: usize = 2 * 1024 * 1024;

/// Stable, process-monotonic request id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// The matched route pattern (e.g. `/users/{id}`), shared by handle.
///
/// The router fills it in at match time; because clones share the
/// cell, middleware that captured the handle before calling `next`
/// observes the value afterwards, including on error paths.
#[derive(Debug, Clone, Default)]
pub struct EndpointPath {
    inner: Rc<RefCell<Option<String>>>,
}

impl EndpointPath {
    pub fn set(&self, pattern: impl Into<String>) {
        *self.inner.borrow_mut() = Some(pattern.into());
    }

    pub fn get(&self) -> Option<String> {
        self.inner.borrow().clone()
    }
}

/// Ordered name→value captures recorded by the router.
///
/// Append-only during routing, read-only thereafter. The recursive
/// wildcard remainder lives under the reserved key `*`.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    entries: Vec<(String, String)>,
}

impl Parameters {
    pub const RECURSIVE_CAPTURE: &'static str = "*";

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Append every entry of `other`, preserving order.
    pub fn extend(&mut self, other: Parameters) {
        self.entries.extend(other.entries);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Capture parsed as `T`, failing with a client-input error.
    pub fn require<T: FromStr>(&self, name: &str) -> Result<T, HttpError> {
        self.get(name)
            .ok_or_else(|| HttpError::bad_request(format!("missing path parameter '{name}'")))?
            .parse()
            .map_err(|_| HttpError::bad_request(format!("invalid path parameter '{name}'")))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// What the connection driver knows when a request arrives; the only
/// input to context construction.
#[derive(Debug, Clone)]
pub struct ContextSource {
    pub request_id: RequestId,
    pub logger: tracing::Span,
    pub remote_address: Option<AcceptedAddr>,
}

impl ContextSource {
    pub fn new(remote_address: Option<AcceptedAddr>) -> Self {
        let request_id = RequestId::next();
        let logger = tracing::info_span!("request", id = %request_id);
        Self {
            request_id,
            logger,
            remote_address,
        }
    }
}

/// The mandatory per-request state every context carries.
#[derive(Debug, Clone)]
pub struct CoreContext {
    pub id: RequestId,
    pub logger: tracing::Span,
    pub endpoint_path: EndpointPath,
    pub parameters: Parameters,
    pub remote_address: Option<AcceptedAddr>,
}

impl CoreContext {
    pub fn new(source: ContextSource) -> Self {
        Self {
            id: source.request_id,
            logger: source.logger,
            endpoint_path: EndpointPath::default(),
            parameters: Parameters::default(),
            remote_address: source.remote_address,
        }
    }
}

/// Contract every request context fulfils.
pub trait RequestContext: 'static {
    fn core(&self) -> &CoreContext;
    fn core_mut(&mut self) -> &mut CoreContext;

    /// Cap for body collection; derived contexts may override.
    fn max_upload_size(&self) -> usize {
        DEFAULT_MAX_UPLOAD_SIZE
    }

    fn parameters(&self) -> &Parameters {
        &self.core().parameters
    }

    fn endpoint_path(&self) -> EndpointPath {
        self.core().endpoint_path.clone()
    }

    fn remote_address(&self) -> Option<&AcceptedAddr> {
        self.core().remote_address.as_ref()
    }

    fn logger(&self) -> &tracing::Span {
        &self.core().logger
    }
}

/// Root contexts are built from a [`ContextSource`]; this is the only
/// place custom per-request state enters the pipeline.
pub trait FromContextSource: RequestContext {
    fn from_source(source: ContextSource) -> Self;
}

/// Fallible conversion applied at group boundaries when a group
/// changes the context type.
pub trait FromParentContext<Parent>: RequestContext + Sized {
    fn from_parent(parent: Parent) -> Result<Self, HttpError>;
}

/// Ready-made context for applications without custom state.
#[derive(Debug, Clone)]
pub struct BasicContext {
    core: CoreContext,
}

impl RequestContext for BasicContext {
    fn core(&self) -> &CoreContext {
        &self.core
    }

    fn core_mut(&mut self) -> &mut CoreContext {
        &mut self.core
    }
}

impl FromContextSource for BasicContext {
    fn from_source(source: ContextSource) -> Self {
        Self {
            core: CoreContext::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_monotonic() {
        let a = RequestId::next();
        let b = RequestId::next();
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn endpoint_path_is_shared_between_clones() {
        let path = EndpointPath::default();
        let clone = path.clone();
        assert_eq!(clone.get(), None);
        path.set("/users/{id}");
        assert_eq!(clone.get().as_deref(), Some("/users/{id}"));
    }

    #[test]
    fn parameters_preserve_capture_order() {
        let mut params = Parameters::default();
        params.push("a", "1");
        params.push("b", "2");
        params.push("a", "3");
        assert_eq!(params.get("a"), Some("1"));
        assert_eq!(params.get_all("a").collect::<Vec<_>>(), vec!["1", "3"]);
        assert_eq!(
            params.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            vec!["a", "b", "a"]
        );
        assert_eq!(params.require::<u32>("b").unwrap(), 2);
        assert!(params.require::<u32>("missing").is_err());
    }
}
