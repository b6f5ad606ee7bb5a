//! Request metrics.
//!
//! Counters and latency built on an injected prometheus [`Registry`];
//! no global state. The duration histogram covers the whole response
//! body write, not just the handler.

use std::time::Instant;

use async_trait::async_trait;
use nectar_core::{context::RequestContext, ErrorKind, HttpError, Request, Response};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

use super::{Middleware, Next};

/// Label used for requests that matched no route.
const NOT_FOUND_LABEL: &str = "NotFound";

#[derive(Clone)]
pub struct MetricsMiddleware {
    requests: IntCounterVec,
    errors: IntCounterVec,
    duration: HistogramVec,
}

impl MetricsMiddleware {
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let requests = IntCounterVec::new(
            Opts::new("hb_requests", "Total requests served"),
            &["uri", "method"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("hb_errors", "Total requests that failed"),
            &["uri", "method"],
        )?;
        let duration = HistogramVec::new(
            HistogramOpts::new(
                "hb_request_duration",
                "Seconds from request start to response body completion",
            ),
            &["method"],
        )?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(duration.clone()))?;
        Ok(Self {
            requests,
            errors,
            duration,
        })
    }
}

#[async_trait(?Send)]
impl<Ctx: RequestContext> Middleware<Ctx> for MetricsMiddleware {
    async fn handle(
        &self,
        request: Request,
        ctx: Ctx,
        next: Next<'_, Ctx>,
    ) -> Result<Response, HttpError> {
        let start = Instant::now();
        let method = request.method().as_str().to_string();
        let endpoint_path = ctx.endpoint_path();

        match next.run(request, ctx).await {
            Ok(response) => {
                let uri = endpoint_path
                    .get()
                    .unwrap_or_else(|| NOT_FOUND_LABEL.to_string());
                self.requests.with_label_values(&[uri.as_str(), method.as_str()]).inc();
                let duration = self.duration.with_label_values(&[method.as_str()]);
                Ok(response.map(move |body| {
                    body.on_complete(move |_| {
                        duration.observe(start.elapsed().as_secs_f64());
                    })
                }))
            }
            Err(err) => {
                let uri = match (err.kind(), endpoint_path.get()) {
                    (ErrorKind::NotFound, _) | (_, None) => NOT_FOUND_LABEL.to_string(),
                    (_, Some(route)) => route,
                };
                self.errors.with_label_values(&[uri.as_str(), method.as_str()]).inc();
                self.duration
                    .with_label_values(&[method.as_str()])
                    .observe(start.elapsed().as_secs_f64());
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_collectors_once() {
        let registry = Registry::new();
        assert!(MetricsMiddleware::new(&registry).is_ok());
        // Double registration of the same metric names must fail loudly.
        assert!(MetricsMiddleware::new(&registry).is_err());
    }
}
