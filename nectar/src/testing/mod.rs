//! Test harness.
//!
//! Two modes exercise the same pipeline: [`RouterTestClient`] drives
//! the compiled responder in-process (no sockets), and
//! [`LiveTestClient`] binds a real listener and talks HTTP/1.1 over
//! loopback TCP. Tests written against one mode run unchanged against
//! the other.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

mod live;
mod router;

pub use live::LiveTestClient;
pub use router::RouterTestClient;

/// A fully-collected response.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn body_str(&self) -> &str {
        std::str::from_utf8(&self.body).expect("response body is not utf-8")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
