//! The contract between the connection runtime and the framework.

use std::future::Future;

use crate::{context::ContextSource, Request, Response};

/// A fully-composed application pipeline: middleware chain, router and
/// handlers compiled into one responder.
///
/// The connection drivers call `respond` once per request. Error
/// mapping happens inside the pipeline, so the driver always gets a
/// response back; only transport failures live below this trait.
pub trait HttpApp: Clone + 'static {
    fn respond(
        &self,
        request: Request,
        source: ContextSource,
    ) -> impl Future<Output = Response>;
}
