#[macro_use]
mod error;
pub use error::{AnyError, AnyResult, ErrorKind, HttpError};

pub mod app;
pub mod body;
pub mod config;
pub mod context;
pub mod environment;
pub mod listener;
pub mod media_type;
pub mod request;
pub mod uri;

pub use app::HttpApp;
pub use body::{RequestBody, ResponseBody, ResponseBodyWriter};
pub use context::ContextSource;

/// A request as seen by middleware and handlers: `http` crate parts
/// plus a lazy streaming body bound to the connection.
pub type Request = http::Request<RequestBody>;

/// A response produced by handlers: `http` crate parts plus a
/// pull-based body the connection driver drains.
pub type Response = http::Response<ResponseBody>;
