//! HTTP/1.1 response serialization.
//!
//! Writes the status line, headers and body directly to the
//! connection, pulling the response body chunk by chunk so writer
//! callbacks see backpressure from the wire. Bodies without a known
//! size go out chunked.

use std::{io, time::SystemTime};

use bytes::{Bytes, BytesMut};
use http::{header, HeaderValue};
use monoio::io::{AsyncWriteRent, AsyncWriteRentExt};
use nectar_core::{body::BodyKind, Response};
use tracing::warn;

/// Whether the connection can be reused after writing a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    /// Response fully written.
    Completed,
    /// The body producer failed after bytes hit the wire; the caller
    /// must drop the connection.
    AbortConnection,
}

/// Serialize `response` onto `writer`. `head_only` suppresses the body
/// while keeping its headers (HEAD semantics).
pub(crate) async fn write_response<W: AsyncWriteRent>(
    writer: &mut W,
    response: Response,
    server_name: Option<&HeaderValue>,
    head_only: bool,
) -> io::Result<WriteOutcome> {
    let (mut parts, mut body) = response.into_parts();

    // 1xx, 204 and 304 carry neither a body nor framing headers.
    let body_forbidden = parts.status.is_informational()
        || parts.status == http::StatusCode::NO_CONTENT
        || parts.status == http::StatusCode::NOT_MODIFIED;

    // Framing decision: trust explicit framing headers (synthetic HEAD
    // responses carry the GET content-length), otherwise derive from
    // the body shape.
    let explicit_framing = parts.headers.contains_key(header::CONTENT_LENGTH)
        || parts.headers.contains_key(header::TRANSFER_ENCODING);
    let chunked = if body_forbidden {
        false
    } else if explicit_framing {
        parts
            .headers
            .get(header::TRANSFER_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"))
    } else {
        match body.size_hint() {
            Some(len) => {
                parts
                    .headers
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
                false
            }
            None => {
                parts
                    .headers
                    .insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
                true
            }
        }
    };

    if let Some(name) = server_name {
        parts.headers.entry(header::SERVER).or_insert(name.clone());
    }
    if let Ok(date) = HeaderValue::from_str(&httpdate::fmt_http_date(SystemTime::now())) {
        parts.headers.insert(header::DATE, date);
    }

    let head_only = head_only || body_forbidden;

    // A streaming body is probed before the head goes out so a
    // producer that fails immediately still gets a clean 500.
    let mut first_chunk = None;
    if !head_only && body.kind() == BodyKind::Stream {
        match body.next_chunk().await {
            Some(Ok(chunk)) => first_chunk = Some(chunk),
            Some(Err(e)) => {
                warn!("response body failed before start: {e}");
                let (result, _) = writer
                    .write_all(Bytes::from_static(
                        b"HTTP/1.1 500 Internal Server Error\r\ncontent-length: 0\r\n\r\n",
                    ))
                    .await;
                result?;
                writer.flush().await?;
                return Ok(WriteOutcome::Completed);
            }
            None => {}
        }
    }

    let mut head = BytesMut::with_capacity(256);
    head.extend_from_slice(b"HTTP/1.1 ");
    head.extend_from_slice(parts.status.as_str().as_bytes());
    head.extend_from_slice(b" ");
    head.extend_from_slice(parts.status.canonical_reason().unwrap_or("").as_bytes());
    head.extend_from_slice(b"\r\n");
    for (name, value) in parts.headers.iter() {
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }
    head.extend_from_slice(b"\r\n");
    let (result, _) = writer.write_all(head.freeze()).await;
    result?;

    if head_only {
        writer.flush().await?;
        return Ok(WriteOutcome::Completed);
    }

    let outcome = if chunked {
        write_chunked(writer, first_chunk, &mut body).await?
    } else {
        write_plain(writer, first_chunk, &mut body).await?
    };
    writer.flush().await?;
    Ok(outcome)
}

async fn write_plain<W: AsyncWriteRent>(
    writer: &mut W,
    first_chunk: Option<Bytes>,
    body: &mut nectar_core::ResponseBody,
) -> io::Result<WriteOutcome> {
    if let Some(chunk) = first_chunk {
        let (result, _) = writer.write_all(chunk).await;
        result?;
    }
    loop {
        match body.next_chunk().await {
            Some(Ok(chunk)) => {
                let (result, _) = writer.write_all(chunk).await;
                result?;
            }
            Some(Err(e)) => {
                warn!("response body failed mid-write: {e}");
                return Ok(WriteOutcome::AbortConnection);
            }
            None => return Ok(WriteOutcome::Completed),
        }
    }
}

async fn write_chunked<W: AsyncWriteRent>(
    writer: &mut W,
    first_chunk: Option<Bytes>,
    body: &mut nectar_core::ResponseBody,
) -> io::Result<WriteOutcome> {
    if let Some(chunk) = first_chunk {
        write_chunk(writer, chunk).await?;
    }
    loop {
        match body.next_chunk().await {
            Some(Ok(chunk)) => {
                if chunk.is_empty() {
                    continue;
                }
                write_chunk(writer, chunk).await?;
            }
            Some(Err(e)) => {
                // Do not send the final chunk; the peer must see the
                // truncation.
                warn!("response body failed mid-write: {e}");
                return Ok(WriteOutcome::AbortConnection);
            }
            None => {
                let (result, _) = writer.write_all(Bytes::from_static(b"0\r\n\r\n")).await;
                result?;
                return Ok(WriteOutcome::Completed);
            }
        }
    }
}

async fn write_chunk<W: AsyncWriteRent>(writer: &mut W, chunk: Bytes) -> io::Result<()> {
    let mut framed = BytesMut::with_capacity(chunk.len() + 16);
    framed.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
    framed.extend_from_slice(&chunk);
    framed.extend_from_slice(b"\r\n");
    let (result, _) = writer.write_all(framed.freeze()).await;
    result?;
    Ok(())
}
