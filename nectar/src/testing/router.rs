//! In-process harness: requests go straight into the compiled
//! responder, no sockets or framing involved.

use bytes::Bytes;
use http::Method;
use nectar_core::{context::ContextSource, HttpApp, RequestBody};

use super::TestResponse;
use crate::router::{Router, RouterService};
use nectar_core::context::FromContextSource;

pub struct RouterTestClient<Ctx> {
    app: RouterService<Ctx>,
}

impl<Ctx: FromContextSource> RouterTestClient<Ctx> {
    pub fn new(router: Router<Ctx>) -> Self {
        Self {
            app: router.build(),
        }
    }

    /// Execute one request through the pipeline and collect the
    /// response body.
    pub async fn execute(
        &self,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
        body: impl Into<Bytes>,
    ) -> TestResponse {
        let mut builder = http::Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(RequestBody::fixed(body.into()))
            .expect("invalid test request");

        let response = self
            .app
            .respond(request, ContextSource::new(None))
            .await;
        let (parts, body) = response.into_parts();
        let body = body.collect().await.unwrap_or_default();
        TestResponse {
            status: parts.status,
            headers: parts.headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.execute(Method::GET, uri, &[], Bytes::new()).await
    }

    pub async fn post(&self, uri: &str, body: impl Into<Bytes>) -> TestResponse {
        self.execute(Method::POST, uri, &[], body).await
    }
}
