//! Route handler abstraction.

use std::future::Future;

use async_trait::async_trait;
use nectar_core::{HttpError, Request, Response};

use crate::encode::IntoResponse;

/// A route endpoint. Implemented for every async closure of the shape
/// `|request, ctx| async { ... }` returning `Result<impl IntoResponse,
/// HttpError>`.
#[async_trait(?Send)]
pub trait RouteHandler<Ctx>: 'static {
    async fn invoke(&self, request: Request, ctx: Ctx) -> Result<Response, HttpError>;
}

#[async_trait(?Send)]
impl<F, Fut, R, Ctx> RouteHandler<Ctx> for F
where
    F: Fn(Request, Ctx) -> Fut + 'static,
    Fut: Future<Output = Result<R, HttpError>>,
    R: IntoResponse,
    Ctx: 'static,
{
    async fn invoke(&self, request: Request, ctx: Ctx) -> Result<Response, HttpError> {
        Ok(self(request, ctx).await?.into_response())
    }
}
