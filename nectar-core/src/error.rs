use std::{borrow::Cow, fmt};

use http::{header, HeaderMap, HeaderValue, Method, StatusCode};

use crate::{body::ResponseBody, Response};

/// A type alias for `anyhow::Error`, representing any error type.
pub type AnyError = anyhow::Error;

/// A type alias for `Result<T, E>` where `E` defaults to [`AnyError`].
pub type AnyResult<T, E = AnyError> = std::result::Result<T, E>;

#[macro_export]
macro_rules! bail_into {
    ($msg:literal $(,)?) => {
        return Err(::anyhow::anyhow!($msg).into())
    };
    ($err:expr $(,)?) => {
        return Err(::anyhow::anyhow!($err).into())
    };
    ($fmt:expr, $($arg:tt)*) => {
        return Err(::anyhow::anyhow!($fmt, $($arg)*).into())
    };
}

/// Error categories surfaced by the pipeline, each with a default
/// HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    Conflict,
    PreconditionFailed,
    ContentTooLarge,
    RangeNotSatisfiable,
    InternalServerError,
    NotImplemented,
    ServiceUnavailable,
    /// Any other status a handler wants to surface directly.
    Other(StatusCode),
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::PreconditionFailed => StatusCode::PRECONDITION_FAILED,
            ErrorKind::ContentTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorKind::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            ErrorKind::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::NotImplemented => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Other(status) => *status,
        }
    }
}

/// The typed HTTP error that flows back out through the middleware
/// chain. Carries the status kind, an optional client-visible message,
/// extra response headers (e.g. `Allow` for 405) and an optional
/// internal source that is logged but never sent to the peer.
pub struct HttpError {
    kind: ErrorKind,
    message: Option<Cow<'static, str>>,
    headers: HeaderMap,
    source: Option<AnyError>,
}

impl HttpError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            headers: HeaderMap::new(),
            source: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_header(mut self, name: header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Wrap an internal failure. The peer sees a bare 500; the source
    /// stays available for logging.
    pub fn internal(source: impl Into<AnyError>) -> Self {
        Self::new_with_source(ErrorKind::InternalServerError, source)
    }

    pub fn new_with_source(kind: ErrorKind, source: impl Into<AnyError>) -> Self {
        Self {
            kind,
            message: None,
            headers: HeaderMap::new(),
            source: Some(source.into()),
        }
    }

    pub fn bad_request(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorKind::BadRequest).with_message(message)
    }

    pub fn not_found() -> Self {
        Self::new(ErrorKind::NotFound)
    }

    pub fn method_not_allowed(allowed: &[Method]) -> Self {
        let allow = allowed
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let mut err = Self::new(ErrorKind::MethodNotAllowed);
        if let Ok(value) = HeaderValue::from_str(&allow) {
            err = err.with_header(header::ALLOW, value);
        }
        err
    }

    pub fn content_too_large() -> Self {
        Self::new(ErrorKind::ContentTooLarge)
    }

    pub fn range_not_satisfiable(total_size: u64) -> Self {
        let mut err = Self::new(ErrorKind::RangeNotSatisfiable);
        if let Ok(value) = HeaderValue::from_str(&format!("bytes */{total_size}")) {
            err = err.with_header(header::CONTENT_RANGE, value);
        }
        err
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Render the error as a response: typed errors with a message get
    /// the JSON envelope `{"error":{"message":"..."}}`, the rest get an
    /// empty body.
    pub fn into_response(self) -> Response {
        let mut builder = http::Response::builder().status(self.kind.status());
        if let Some(headers) = builder.headers_mut() {
            headers.extend(self.headers);
        }
        match self.message {
            Some(message) => {
                let envelope = serde_json::json!({ "error": { "message": message } });
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                builder
                    .body(ResponseBody::fixed(envelope.to_string().into()))
                    .expect("building error response cannot fail")
            }
            None => builder
                .body(ResponseBody::empty())
                .expect("building error response cannot fail"),
        }
    }
}

impl fmt::Debug for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.kind.status(), message),
            None => write!(f, "{}", self.kind.status()),
        }
    }
}

impl std::error::Error for HttpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| &**e as &(dyn std::error::Error + 'static))
    }
}

impl From<ErrorKind> for HttpError {
    fn from(kind: ErrorKind) -> Self {
        HttpError::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ErrorKind::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::ContentTooLarge.status().as_u16(), 413);
        assert_eq!(ErrorKind::RangeNotSatisfiable.status().as_u16(), 416);
        assert_eq!(
            ErrorKind::Other(StatusCode::IM_A_TEAPOT).status().as_u16(),
            418
        );
    }

    #[test]
    fn method_not_allowed_sets_allow_header() {
        let err = HttpError::method_not_allowed(&[Method::GET, Method::HEAD]);
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(resp.headers()[header::ALLOW], "GET, HEAD");
    }

    #[test]
    fn message_envelope_is_json_escaped() {
        let err = HttpError::bad_request("nope \"quoted\"\nline");
        let resp = err.into_response();
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        let body = resp.into_body().try_into_bytes().unwrap();
        assert_eq!(
            body.as_ref(),
            br#"{"error":{"message":"nope \"quoted\"\nline"}}"#
        );
    }

    #[test]
    fn internal_errors_have_no_body() {
        let err = HttpError::internal(std::io::Error::other("disk on fire"));
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(resp.body().is_empty_hint());
    }
}
