//! Body pre-collection.

use async_trait::async_trait;
use nectar_core::{context::RequestContext, HttpError, Request, Response};

use super::{Middleware, Next};

/// Collects the request body up front, bounded by the context's max
/// upload size. Downstream middleware and the handler then see a
/// replayable in-memory body; oversized uploads fail with 413 before
/// any handler runs.
///
/// Routes that want to stream simply don't install this middleware;
/// streaming consumption is never subject to the upload cap.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectBodyMiddleware;

impl CollectBodyMiddleware {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait(?Send)]
impl<Ctx: RequestContext> Middleware<Ctx> for CollectBodyMiddleware {
    async fn handle(
        &self,
        mut request: Request,
        ctx: Ctx,
        next: Next<'_, Ctx>,
    ) -> Result<Response, HttpError> {
        request.body_mut().collect(ctx.max_upload_size()).await?;
        next.run(request, ctx).await
    }
}
