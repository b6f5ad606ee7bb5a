//! A lightweight HTTP/1.1 + HTTP/2 server framework on monoio.
//!
//! Requests flow: connection driver → middleware chain → radix router
//! → handler, with a typed per-request context threading through and
//! duplex-streaming bodies on both sides.

pub mod application;
pub mod encode;
pub mod files;
pub mod handler;
pub mod middleware;
pub mod persist;
pub mod router;
pub mod testing;

pub use application::{AppService, Application, ShutdownTrigger};
pub use encode::{IntoResponse, Json};
pub use handler::RouteHandler;
pub use middleware::{
    CollectBodyMiddleware, MetricsMiddleware, Middleware, Next, TimeoutMiddleware,
    TracingMiddleware,
};
pub use router::{RouteCollection, Router, RouterOptions, RouterService, RouterValidationError};

pub use nectar_core::{
    context::{
        BasicContext, ContextSource, CoreContext, EndpointPath, FromContextSource,
        FromParentContext, Parameters, RequestContext, RequestId,
    },
    environment::{Environment, EnvironmentError},
    media_type::MediaType,
    request::RequestExt,
    uri::{QueryParameters, Uri},
    AnyError, AnyResult, ErrorKind, HttpError, Request, RequestBody, Response, ResponseBody,
    ResponseBodyWriter,
};
pub use nectar_server::http::{ConnectionManager, HttpServerTimeout};
