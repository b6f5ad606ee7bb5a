//! HTTP/1.1 connection driver.
//!
//! One task per connection: decode a request, run the application
//! pipeline while the decoder keeps filling the request body, stream
//! the response out, repeat while keep-alive holds. The body fill and
//! the respond/write future run joined so neither side has to buffer
//! the other out.

use http::{header, HeaderMap, HeaderValue, Method, Version};
use monoio::io::{stream::Stream, AsyncReadRent, AsyncWriteRent, Split, Splitable};
use monoio_http::{
    common::body::HttpBody,
    h1::codec::decoder::{FillPayload, RequestDecoder},
};
use nectar_core::{
    context::ContextSource, listener::AcceptedAddr, HttpApp, RequestBody,
};
use tracing::{info, warn};

use super::{
    encode::{write_response, WriteOutcome},
    HttpServerTimeout,
};
use crate::cancel::Waiter;

pub(crate) async fn serve_h1<S, A>(
    stream: S,
    addr: AcceptedAddr,
    app: &A,
    timeout: HttpServerTimeout,
    server_name: Option<&HeaderValue>,
    mut shutdown: Waiter,
) where
    S: Split + AsyncReadRent + AsyncWriteRent,
    A: HttpApp,
{
    let (reader, mut writer) = stream.into_split();
    let mut decoder = RequestDecoder::new(reader);
    decoder.set_timeout(timeout.keepalive_timeout);

    loop {
        // Wait for the next request head, bailing out on shutdown or
        // header timeout.
        let decoded = {
            let decode = async {
                match timeout.read_header_timeout {
                    Some(header_timeout) => {
                        match monoio::time::timeout(header_timeout, decoder.next()).await {
                            Ok(inner) => Decoded::Next(inner),
                            Err(_) => Decoded::HeaderTimeout,
                        }
                    }
                    None => Decoded::Next(decoder.next().await),
                }
            };
            monoio::select! {
                _ = &mut shutdown => Decoded::Shutdown,
                decoded = decode => decoded,
            }
        };

        let req = match decoded {
            Decoded::Next(Some(Ok(req))) => req,
            Decoded::Next(Some(Err(err))) => {
                warn!("decode request header failed: {err}");
                break;
            }
            Decoded::Next(None) => {
                info!("connection {addr} closed");
                break;
            }
            Decoded::HeaderTimeout => {
                info!("connection {addr} timed out reading header");
                break;
            }
            Decoded::Shutdown => {
                info!("connection {addr} closing for shutdown");
                break;
            }
        };

        // Wire body -> framework body.
        let (mut parts, body) = HttpBody::request(req).into_parts();
        let method = parts.method.clone();
        let version = parts.version;
        let keepalive =
            !shutdown.cancelled() && is_conn_keepalive(&parts.headers, version);
        // Downstream only sees HTTP/1.1 semantics.
        if version == Version::HTTP_10 {
            parts.version = Version::HTTP_11;
        }
        parts.headers.remove(header::CONNECTION);
        let request = http::Request::from_parts(parts, RequestBody::from_wire(body));

        let source = ContextSource::new(Some(addr.clone()));

        // Run the pipeline and stream the response while the decoder
        // finishes pulling the request body off the wire.
        let respond_and_write = async {
            let mut response = app.respond(request, source).await;
            response.headers_mut().remove(header::CONNECTION);
            if !keepalive {
                response
                    .headers_mut()
                    .insert(header::CONNECTION, HeaderValue::from_static("close"));
            } else if version == Version::HTTP_10 {
                response
                    .headers_mut()
                    .insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
            }
            let write = write_response(
                &mut writer,
                response,
                server_name,
                method == Method::HEAD,
            );
            match timeout.read_body_timeout {
                Some(body_timeout) => monoio::time::timeout(body_timeout, write)
                    .await
                    .unwrap_or(Ok(WriteOutcome::AbortConnection)),
                None => write.await,
            }
        };
        let (write_result, fill_result) =
            futures::join!(respond_and_write, decoder.fill_payload());

        match write_result {
            Ok(WriteOutcome::Completed) => {}
            Ok(WriteOutcome::AbortConnection) => break,
            Err(e) => {
                warn!("error writing response to {addr}: {e}");
                break;
            }
        }
        if let Err(e) = fill_result {
            warn!("error reading request body from {addr}: {e}");
            break;
        }
        if !keepalive {
            break;
        }
    }

    // Half-close politely; the peer may still be draining our bytes.
    let _ = writer.shutdown().await;
}

enum Decoded<T> {
    Next(Option<T>),
    HeaderTimeout,
    Shutdown,
}

/// Keep-alive decision table: HTTP/1.1 stays open unless told
/// otherwise, HTTP/1.0 only with an explicit keep-alive, anything
/// else closes.
fn is_conn_keepalive(headers: &HeaderMap, version: Version) -> bool {
    match (version, headers.get(header::CONNECTION)) {
        (Version::HTTP_10, Some(header)) => header
            .to_str()
            .is_ok_and(|v| v.eq_ignore_ascii_case("keep-alive")),
        (Version::HTTP_11, None) => true,
        (Version::HTTP_11, Some(header)) => {
            !header.to_str().is_ok_and(|v| v.eq_ignore_ascii_case("close"))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_decision_table() {
        let empty = HeaderMap::new();
        assert!(is_conn_keepalive(&empty, Version::HTTP_11));
        assert!(!is_conn_keepalive(&empty, Version::HTTP_10));

        let mut close = HeaderMap::new();
        close.insert(header::CONNECTION, HeaderValue::from_static("close"));
        assert!(!is_conn_keepalive(&close, Version::HTTP_11));

        let mut keep = HeaderMap::new();
        keep.insert(header::CONNECTION, HeaderValue::from_static("Keep-Alive"));
        assert!(is_conn_keepalive(&keep, Version::HTTP_10));
        assert!(is_conn_keepalive(&keep, Version::HTTP_11));
    }
}
