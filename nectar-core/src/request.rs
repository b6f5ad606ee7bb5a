//! Lazy derived accessors on requests.

use std::future::Future;

use bytes::Bytes;
use cookie::Cookie;
use http::header;

use crate::{
    error::HttpError,
    media_type::MediaType,
    uri::{QueryParameters, Uri},
    Request,
};

/// Derived views over a request: nothing is parsed until asked for.
pub trait RequestExt {
    fn uri_components(&self) -> Uri;
    fn query_parameters(&self) -> QueryParameters;
    fn media_type(&self) -> Option<MediaType>;
    fn cookies(&self) -> Vec<Cookie<'static>>;

    /// Collect the body up to `up_to` bytes, leaving a replayable
    /// in-memory body behind.
    fn collect_body(&mut self, up_to: usize)
        -> impl Future<Output = Result<Bytes, HttpError>>;
}

impl RequestExt for Request {
    fn uri_components(&self) -> Uri {
        Uri::from(self.uri())
    }

    fn query_parameters(&self) -> QueryParameters {
        QueryParameters::parse(self.uri().query().unwrap_or(""))
    }

    fn media_type(&self) -> Option<MediaType> {
        let value = self.headers().get(header::CONTENT_TYPE)?.to_str().ok()?;
        MediaType::parse(value)
    }

    fn cookies(&self) -> Vec<Cookie<'static>> {
        let mut cookies = Vec::new();
        for value in self.headers().get_all(header::COOKIE) {
            let Ok(value) = value.to_str() else { continue };
            for cookie in Cookie::split_parse(value.to_string()).flatten() {
                cookies.push(cookie);
            }
        }
        cookies
    }

    async fn collect_body(&mut self, up_to: usize) -> Result<Bytes, HttpError> {
        self.body_mut().collect(up_to).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RequestBody;

    fn request(uri: &str) -> Request {
        http::Request::builder()
            .uri(uri)
            .body(RequestBody::empty())
            .unwrap()
    }

    #[test]
    fn query_parameters_from_target() {
        let req = request("/add?value=3&value=45&value=7");
        let params = req.query_parameters();
        assert_eq!(params.get_all("value").collect::<Vec<_>>().len(), 3);
    }

    #[test]
    fn cookies_parse_from_header() {
        let mut req = request("/");
        req.headers_mut().insert(
            header::COOKIE,
            header::HeaderValue::from_static("session=abc123; theme=dark"),
        );
        let cookies = req.cookies();
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].name(), "session");
        assert_eq!(cookies[1].value(), "dark");
    }

    #[test]
    fn media_type_from_content_type() {
        let mut req = request("/");
        req.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json; charset=utf-8"),
        );
        assert!(req.media_type().unwrap().is_type("application/json"));
    }
}
