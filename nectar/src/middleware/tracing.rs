//! Request tracing.
//!
//! One span per request. The span closes when the response body
//! finishes draining, not when the handler returns, so long streaming
//! responses are measured end to end.

use async_trait::async_trait;
use http::header::HeaderName;
use nectar_core::{context::RequestContext, HttpError, Request, Response};
use tracing::{field::Empty, info_span, Instrument, Span};

use super::{Middleware, Next};

const TRACEPARENT: HeaderName = HeaderName::from_static("traceparent");

/// Middleware recording a span per request with OpenTelemetry-style
/// field names.
#[derive(Debug, Clone, Default)]
pub struct TracingMiddleware {
    /// Query parameter names whose values are redacted from
    /// `url.query`.
    redact_parameters: Vec<String>,
}

impl TracingMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redacting(parameters: impl IntoIterator<Item = String>) -> Self {
        Self {
            redact_parameters: parameters.into_iter().collect(),
        }
    }

    fn redacted_query(&self, request: &Request) -> Option<String> {
        let raw = request.uri().query()?;
        if self.redact_parameters.is_empty() {
            return Some(raw.to_string());
        }
        let redacted = raw
            .split('&')
            .map(|pair| {
                let name = pair.split('=').next().unwrap_or(pair);
                if self.redact_parameters.iter().any(|p| p == name) {
                    format!("{name}=xxx")
                } else {
                    pair.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join("&");
        Some(redacted)
    }
}

#[async_trait(?Send)]
impl<Ctx: RequestContext> Middleware<Ctx> for TracingMiddleware {
    async fn handle(
        &self,
        request: Request,
        ctx: Ctx,
        next: Next<'_, Ctx>,
    ) -> Result<Response, HttpError> {
        let method = request.method().clone();
        let span = info_span!(
            parent: ctx.logger(),
            "http.request",
            "otel.name" = Empty,
            "trace.parent" = Empty,
            "http.request.method" = %method,
            "http.route" = Empty,
            "url.path" = %request.uri().path(),
            "url.query" = Empty,
            "http.response.status_code" = Empty,
            "http.response.body.size" = Empty,
            "error" = Empty,
        );
        if let Some(parent) = request
            .headers()
            .get(&TRACEPARENT)
            .and_then(|v| v.to_str().ok())
        {
            span.record("trace.parent", parent);
        }
        if let Some(query) = self.redacted_query(&request) {
            span.record("url.query", query.as_str());
        }

        // The router fills this cell on match; keep a handle so the
        // span sees it even when the handler fails.
        let endpoint_path = ctx.endpoint_path();

        // The span is entered for the whole downstream pipeline, so
        // handler-side events land inside it via the task-local
        // current span.
        let result = next.run(request, ctx).instrument(span.clone()).await;

        match result {
            Ok(response) => {
                let route = endpoint_path.get();
                match &route {
                    Some(route) => {
                        span.record("http.route", route.as_str());
                        span.record("otel.name", format!("HTTP {method} {route}").as_str());
                    }
                    None => {
                        span.record("otel.name", format!("HTTP {method}").as_str());
                    }
                }
                span.record(
                    "http.response.status_code",
                    response.status().as_u16(),
                );
                // Closing the span rides on body completion.
                let span_for_body: Span = span;
                Ok(response.map(|body| {
                    body.on_complete(move |bytes| {
                        span_for_body.record("http.response.body.size", bytes);
                    })
                }))
            }
            Err(err) => {
                let status = err.status();
                if status == http::StatusCode::NOT_FOUND {
                    span.record("otel.name", format!("HTTP {method} route not found").as_str());
                    span.record("error", "route not found");
                } else {
                    if let Some(route) = endpoint_path.get() {
                        span.record("http.route", route.as_str());
                    }
                    span.record("error", tracing::field::display(&err));
                }
                span.record("http.response.status_code", status.as_u16());
                Err(err)
            }
        }
    }
}
