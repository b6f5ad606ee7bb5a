//! Serving files on routes nothing else claimed.

use async_trait::async_trait;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use httpdate::{fmt_http_date, parse_http_date};
use nectar_core::{
    context::RequestContext, media_type::MediaType, uri::percent_decode, ErrorKind, HttpError,
    Request, Response, ResponseBody,
};

use super::{
    range::{etag, if_range_matches, none_match, parse_range, resolve_range},
    FileAttributes, FileProvider,
};
use crate::middleware::{Middleware, Next};

#[derive(Debug, Clone)]
pub struct FileMiddlewareConfig {
    /// URL prefix stripped before resolving against the provider.
    pub url_prefix: Option<String>,
    /// Map folder paths ending in `/` to their `index.html`.
    pub search_for_index_html: bool,
    /// Emitted verbatim as `Cache-Control` when set.
    pub cache_control: Option<HeaderValue>,
}

impl Default for FileMiddlewareConfig {
    fn default() -> Self {
        Self {
            url_prefix: None,
            search_for_index_html: true,
            cache_control: None,
        }
    }
}

/// Middleware serving files for requests the rest of the pipeline
/// answered with `NotFound`. Handles conditional requests (ETag and
/// modification date) and single byte ranges.
pub struct FileMiddleware<P> {
    provider: P,
    config: FileMiddlewareConfig,
}

impl<P: FileProvider> FileMiddleware<P> {
    pub fn new(provider: P) -> Self {
        Self::with_config(provider, FileMiddlewareConfig::default())
    }

    pub fn with_config(provider: P, config: FileMiddlewareConfig) -> Self {
        Self { provider, config }
    }

    async fn serve(
        &self,
        raw_path: &str,
        headers: &HeaderMap,
        head_only: bool,
    ) -> Result<Response, HttpError> {
        let mut path = percent_decode(raw_path, false);
        if let Some(prefix) = &self.config.url_prefix {
            match path.strip_prefix(prefix) {
                Some(rest) => path = format!("/{}", rest.trim_start_matches('/')),
                None => return Err(HttpError::not_found()),
            }
        }
        if self.config.search_for_index_html && path.ends_with('/') {
            path.push_str("index.html");
        }

        let id = self.provider.identifier(&path).ok_or_else(HttpError::not_found)?;
        let attributes = self
            .provider
            .attributes(&id)
            .await
            .ok_or_else(HttpError::not_found)?;
        if attributes.is_folder {
            return Err(HttpError::not_found());
        }

        let etag = etag(attributes.size, attributes.modification_date);
        let last_modified = fmt_http_date(attributes.modification_date);

        if self.not_modified(headers, &etag, &attributes) {
            return Ok(self.base_response(
                StatusCode::NOT_MODIFIED,
                &path,
                &etag,
                &last_modified,
                ResponseBody::empty(),
            ));
        }

        // Range only applies when If-Range (if present) still matches
        // the representation the client has.
        let range = headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range)
            .filter(|_| {
                match headers.get(header::IF_RANGE).and_then(|v| v.to_str().ok()) {
                    Some(if_range) => if_range_matches(if_range, &etag, &last_modified),
                    None => true,
                }
            });

        let (status, bounds) = match range {
            Some(range) => match resolve_range(range, attributes.size) {
                Some(bounds) => (StatusCode::PARTIAL_CONTENT, Some(bounds)),
                None => return Err(HttpError::range_not_satisfiable(attributes.size)),
            },
            None => (StatusCode::OK, None),
        };

        let body = if head_only {
            ResponseBody::empty()
        } else {
            self.provider.load(&id, bounds).await?
        };

        let mut response = self.base_response(status, &path, &etag, &last_modified, body);
        let headers = response.headers_mut();
        match bounds {
            Some((start, end)) => {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(end - start + 1));
                if let Ok(content_range) = HeaderValue::from_str(&format!(
                    "bytes {start}-{end}/{}",
                    attributes.size
                )) {
                    headers.insert(header::CONTENT_RANGE, content_range);
                }
            }
            None => {
                headers.insert(header::CONTENT_LENGTH, HeaderValue::from(attributes.size));
            }
        }
        Ok(response)
    }

    fn not_modified(&self, headers: &HeaderMap, etag: &str, attributes: &FileAttributes) -> bool {
        if let Some(candidates) = headers
            .get(header::IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok())
        {
            return none_match(candidates, etag);
        }
        if let Some(since) = headers
            .get(header::IF_MODIFIED_SINCE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_http_date(v).ok())
        {
            // HTTP dates have second precision; truncate before
            // comparing.
            let modified = attributes
                .modification_date
                .duration_since(std::time::SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let since = since
                .duration_since(std::time::SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            return modified <= since;
        }
        false
    }

    fn base_response(
        &self,
        status: StatusCode,
        path: &str,
        etag: &str,
        last_modified: &str,
        body: ResponseBody,
    ) -> Response {
        let mut builder = http::Response::builder()
            .status(status)
            .header(header::ETAG, etag)
            .header(header::LAST_MODIFIED, last_modified);
        if let Some(media_type) = path
            .rsplit('.')
            .next()
            .and_then(MediaType::from_extension)
        {
            builder = builder.header(header::CONTENT_TYPE, media_type.to_string());
        }
        if let Some(cache_control) = &self.config.cache_control {
            builder = builder.header(header::CACHE_CONTROL, cache_control.clone());
        }
        builder
            .body(body)
            .expect("file response parts cannot fail")
    }
}

#[async_trait(?Send)]
impl<Ctx: RequestContext, P: FileProvider> Middleware<Ctx> for FileMiddleware<P> {
    async fn handle(
        &self,
        request: Request,
        ctx: Ctx,
        next: Next<'_, Ctx>,
    ) -> Result<Response, HttpError> {
        let method = request.method().clone();
        if method != Method::GET && method != Method::HEAD {
            return next.run(request, ctx).await;
        }
        let path = request.uri().path().to_string();
        let headers = request.headers().clone();

        match next.run(request, ctx).await {
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.serve(&path, &headers, method == Method::HEAD).await
            }
            other => other,
        }
    }
}
