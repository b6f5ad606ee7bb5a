//! Per-request deadline guard.

use std::time::Duration;

use async_trait::async_trait;
use nectar_core::{ErrorKind, HttpError, Request, Response};
use tracing::info;

use super::{Middleware, Next};

/// Wraps the rest of the pipeline in a deadline; requests that run
/// past it fail with 503 and the handler future is dropped at its next
/// suspension point.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutMiddleware {
    deadline: Duration,
}

impl TimeoutMiddleware {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }
}

#[async_trait(?Send)]
impl<Ctx: 'static> Middleware<Ctx> for TimeoutMiddleware {
    async fn handle(
        &self,
        request: Request,
        ctx: Ctx,
        next: Next<'_, Ctx>,
    ) -> Result<Response, HttpError> {
        let path = request.uri().path().to_string();
        match monoio::time::timeout(self.deadline, next.run(request, ctx)).await {
            Ok(result) => result,
            Err(_) => {
                info!("request to {path} exceeded its {:?} deadline", self.deadline);
                Err(HttpError::new(ErrorKind::ServiceUnavailable))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use nectar_core::context::BasicContext;

    use super::*;
    use crate::{testing::RouterTestClient, Router};

    #[test]
    fn slow_handlers_hit_the_deadline() {
        monoio::RuntimeBuilder::<monoio::LegacyDriver>::new()
            .enable_timer()
            .build()
            .unwrap()
            .block_on(async {
                let mut router = Router::<BasicContext>::new();
                router.add_middleware(TimeoutMiddleware::new(Duration::from_millis(10)));
                router.get("/slow", |_req, _ctx: BasicContext| async {
                    monoio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, HttpError>("never")
                });
                router.get("/fast", |_req, _ctx: BasicContext| async {
                    Ok::<_, HttpError>("done")
                });
                let client = RouterTestClient::new(router);

                let slow = client.get("/slow").await;
                assert_eq!(slow.status, StatusCode::SERVICE_UNAVAILABLE);
                let fast = client.get("/fast").await;
                assert_eq!(fast.body_str(), "done");
            });
    }
}
