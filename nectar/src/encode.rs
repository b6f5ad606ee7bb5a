//! Turning handler return values into responses.

use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use nectar_core::{ErrorKind, HttpError, Response, ResponseBody};
use serde::{de::DeserializeOwned, Serialize};

/// Anything a route handler may return.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

fn with_body(content_type: &'static str, body: ResponseBody) -> Response {
    http::Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, HeaderValue::from_static(content_type))
        .body(body)
        .expect("static response parts cannot fail")
}

impl IntoResponse for Response {
    fn into_response(self) -> Response {
        self
    }
}

impl IntoResponse for ResponseBody {
    fn into_response(self) -> Response {
        http::Response::builder()
            .status(StatusCode::OK)
            .body(self)
            .expect("static response parts cannot fail")
    }
}

impl IntoResponse for () {
    fn into_response(self) -> Response {
        StatusCode::NO_CONTENT.into_response()
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response {
        with_body(
            "text/plain; charset=utf-8",
            ResponseBody::fixed(Bytes::from_static(self.as_bytes())),
        )
    }
}

impl IntoResponse for String {
    fn into_response(self) -> Response {
        with_body(
            "text/plain; charset=utf-8",
            ResponseBody::fixed(Bytes::from(self)),
        )
    }
}

impl IntoResponse for Bytes {
    fn into_response(self) -> Response {
        with_body("application/octet-stream", ResponseBody::fixed(self))
    }
}

impl IntoResponse for Vec<u8> {
    fn into_response(self) -> Response {
        Bytes::from(self).into_response()
    }
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> Response {
        http::Response::builder()
            .status(self)
            .body(ResponseBody::empty())
            .expect("static response parts cannot fail")
    }
}

impl<T: IntoResponse> IntoResponse for (StatusCode, T) {
    fn into_response(self) -> Response {
        let mut response = self.1.into_response();
        *response.status_mut() = self.0;
        response
    }
}

/// JSON-encoded response payload.
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.0) {
            Ok(encoded) => with_body("application/json", ResponseBody::fixed(encoded.into())),
            Err(e) => {
                tracing::error!("response serialization failed: {e}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

impl<T> Json<T>
where
    T: DeserializeOwned,
{
    /// Decode a collected request body, mapping malformed input to a
    /// client error.
    pub fn from_bytes(bytes: &[u8]) -> Result<T, HttpError> {
        serde_json::from_slice(bytes)
            .map_err(|e| HttpError::new(ErrorKind::BadRequest).with_message(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn str_response_has_length_hint() {
        let resp = "GET: Hello".into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body().size_hint(), Some(10));
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
    }

    #[test]
    fn json_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct Payload {
            name: String,
        }

        let resp = Json(Payload {
            name: "bee".into(),
        })
        .into_response();
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/json");
        let bytes = resp.into_body().try_into_bytes().unwrap();
        let decoded: Payload = Json::<Payload>::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.name, "bee");
    }

    #[test]
    fn malformed_json_is_bad_request() {
        #[derive(Debug, serde::Deserialize)]
        struct Payload {
            #[allow(dead_code)]
            name: String,
        }
        let err = Json::<Payload>::from_bytes(b"{").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn status_tuple_overrides() {
        let resp = (StatusCode::CREATED, "made").into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }
}
