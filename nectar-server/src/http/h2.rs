//! HTTP/2 connection driver.
//!
//! Streams multiplex over one connection: an accept task feeds
//! request/response-handle pairs into the main loop, handlers run
//! concurrently in one `FuturesUnordered`, finished responses stream
//! out through another. The [`ConnectionManager`] decides how
//! graceful shutdown and idle handling proceed; this driver only
//! translates its actions onto the wire.

use std::{cell::RefCell, rc::Rc, time::Duration};

use bytes::Bytes;
use futures::{stream::FuturesUnordered, StreamExt};
use http::header;
use monoio::io::{AsyncReadRent, AsyncWriteRent, Split};
use monoio_http::{common::body::HttpBody, h2::server::SendResponse, h2::Reason};
use nectar_core::{
    body::BodyKind, context::ContextSource, listener::AcceptedAddr, HttpApp, RequestBody,
    Response,
};
use tracing::{error, info, warn};

use super::conn_manager::{Action, ConnectionManager};
use crate::cancel::Waiter;

pub(crate) async fn serve_h2<S, A>(
    stream: S,
    addr: AcceptedAddr,
    app: &A,
    idle_timeout: Option<Duration>,
    shutdown: Waiter,
) where
    S: Split + AsyncReadRent + AsyncWriteRent + Unpin + 'static,
    A: HttpApp,
{
    let mut connection = match monoio_http::h2::server::Builder::new()
        .initial_window_size(1_000_000)
        .max_concurrent_streams(1000)
        .handshake::<S, Bytes>(stream)
        .await
    {
        Ok(c) => {
            info!("h2 handshake complete for {addr}");
            c
        }
        Err(e) => {
            error!("h2 handshake failed for {addr}: {e:?}");
            return;
        }
    };

    let manager = Rc::new(RefCell::new(ConnectionManager::new()));

    let (tx, mut rx) = local_sync::mpsc::unbounded::channel();
    let mut backend_resp_stream = FuturesUnordered::new();
    let mut frontend_resp_stream = FuturesUnordered::new();

    // The accept task owns the connection: it surfaces new streams and
    // applies the manager's shutdown decision to the wire.
    let accept_manager = manager.clone();
    monoio::spawn(async move {
        let mut shutdown = shutdown;
        let mut draining = false;
        loop {
            monoio::select! {
                _ = &mut shutdown, if !draining => {
                    draining = true;
                    if accept_manager
                        .borrow_mut()
                        .trigger_graceful_shutdown()
                        .is_some()
                    {
                        connection.graceful_shutdown();
                    }
                }
                accepted = connection.accept() => {
                    match accepted {
                        Some(result) => {
                            if tx.send(result).is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
    });

    let mut idle_deadline =
        idle_timeout.map(|timeout| monoio::time::Instant::now() + timeout);

    loop {
        monoio::select! {
            _ = monoio::time::sleep_until(idle_deadline.unwrap_or_else(monoio::time::Instant::now)),
                if idle_deadline.is_some() => {
                info!("h2 connection {addr} idle, closing");
                break;
            }
            Some(result) = rx.recv() => {
                let (request, response_handle) = match result {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("h2 stream error on {addr}: {e:?}");
                        continue;
                    }
                };
                let stream_id = u32::from(response_handle.stream_id());
                manager.borrow_mut().stream_opened(stream_id);
                idle_deadline = None;

                let (parts, body) = HttpBody::request(request).into_parts();
                let request =
                    http::Request::from_parts(parts, RequestBody::from_wire(body));
                let source = ContextSource::new(Some(addr.clone()));
                backend_resp_stream.push(async move {
                    (app.respond(request, source).await, response_handle, stream_id)
                });
            }
            Some((response, response_handle, stream_id)) = backend_resp_stream.next() => {
                frontend_resp_stream.push(async move {
                    process_response(response, response_handle).await;
                    stream_id
                });
            }
            Some(stream_id) = frontend_resp_stream.next() => {
                let action = manager.borrow_mut().stream_closed(stream_id);
                match action {
                    Some(Action::StartIdleTimer) => {
                        idle_deadline = idle_timeout
                            .map(|timeout| monoio::time::Instant::now() + timeout);
                    }
                    Some(Action::Close) => break,
                    _ => {}
                }
            }
            else => {
                // No more futures to drive; drop the connection.
                break;
            }
        }
    }

    info!("h2 connection processing complete for {addr}");
}

/// Stream one response out, honoring the body shape for end-of-stream
/// flags. Producer errors mid-stream reset the h2 stream.
async fn process_response(response: Response, mut response_handle: SendResponse<Bytes>) {
    let (mut parts, mut body) = response.into_parts();
    parts.headers.remove(header::CONNECTION);
    parts.headers.remove(header::TRANSFER_ENCODING);
    let response = http::Response::from_parts(parts, ());

    match body.kind() {
        BodyKind::Empty => {
            if let Err(e) = response_handle.send_response(response, true) {
                error!("h2 response send failed: {e:?}");
            }
        }
        BodyKind::Fixed => {
            let mut send_stream = match response_handle.send_response(response, false) {
                Ok(s) => s,
                Err(e) => {
                    error!("h2 response send failed: {e:?}");
                    return;
                }
            };
            match body.next_chunk().await {
                Some(Ok(data)) => {
                    let _ = send_stream.send_data(data, true);
                }
                _ => {
                    let _ = send_stream.send_data(Bytes::new(), true);
                }
            }
        }
        BodyKind::Stream => {
            let mut send_stream = match response_handle.send_response(response, false) {
                Ok(s) => s,
                Err(e) => {
                    error!("h2 response send failed: {e:?}");
                    return;
                }
            };
            loop {
                match body.next_chunk().await {
                    Some(Ok(data)) => {
                        let _ = send_stream.send_data(data, false);
                    }
                    Some(Err(e)) => {
                        warn!("h2 response body failed mid-stream: {e}");
                        send_stream.send_reset(Reason::INTERNAL_ERROR);
                        return;
                    }
                    None => {
                        let _ = send_stream.send_data(Bytes::new(), true);
                        return;
                    }
                }
            }
        }
    }
}
