//! Streaming body pipes.
//!
//! Request bodies are lazy, one-shot chunk sequences bound to the
//! connection decoder; `collect` swaps in a replayable in-memory
//! handle. Response bodies are pull-based: the connection driver
//! drains them chunk by chunk, so a writer-callback body suspends its
//! producer until the wire catches up (backpressure through a
//! capacity-one channel).

use std::fmt;

use bytes::{Bytes, BytesMut};
use futures::future::LocalBoxFuture;
use monoio_http::common::body::{Body, HttpBody};

use crate::error::{ErrorKind, HttpError};

/// The request body handle carried by [`crate::Request`].
///
/// Produced once by the connection driver, consumed once by the
/// pipeline. After [`RequestBody::collect`] returns, the handle is
/// backed by memory and may be iterated again.
pub struct RequestBody {
    inner: RequestBodyInner,
}

enum RequestBodyInner {
    /// Bound to the connection; chunks arrive as the peer sends them.
    Wire(HttpBody),
    /// Collected into memory; restartable.
    Memory { bytes: Bytes, consumed: bool },
}

impl RequestBody {
    /// Wrap the wire-side body produced by the h1 decoder or an h2
    /// stream.
    pub fn from_wire(body: HttpBody) -> Self {
        Self {
            inner: RequestBodyInner::Wire(body),
        }
    }

    pub fn fixed(bytes: Bytes) -> Self {
        Self {
            inner: RequestBodyInner::Memory {
                bytes,
                consumed: false,
            },
        }
    }

    pub fn empty() -> Self {
        Self::fixed(Bytes::new())
    }

    /// Next chunk of the body, `None` at end-of-body.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, HttpError>> {
        match &mut self.inner {
            RequestBodyInner::Wire(body) => match body.next_data().await {
                Some(Ok(data)) => Some(Ok(data)),
                Some(Err(e)) => Some(Err(HttpError::new_with_source(ErrorKind::BadRequest, e))),
                None => None,
            },
            RequestBodyInner::Memory { bytes, consumed } => {
                if *consumed {
                    // End of this iteration; the next one may start over.
                    *consumed = false;
                    None
                } else if bytes.is_empty() {
                    None
                } else {
                    *consumed = true;
                    Some(Ok(bytes.clone()))
                }
            }
        }
    }

    /// Consume the remaining chunks into one contiguous buffer,
    /// failing with `ContentTooLarge` once the cumulative size exceeds
    /// `up_to`. On success the handle is replaced by an in-memory one
    /// holding the collected bytes.
    pub async fn collect(&mut self, up_to: usize) -> Result<Bytes, HttpError> {
        if let RequestBodyInner::Memory { bytes, consumed } = &mut self.inner {
            if bytes.len() > up_to {
                return Err(HttpError::content_too_large());
            }
            *consumed = false;
            return Ok(bytes.clone());
        }

        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await {
            let chunk = chunk?;
            if buf.len() + chunk.len() > up_to {
                return Err(HttpError::content_too_large());
            }
            buf.extend_from_slice(&chunk);
        }
        let bytes = buf.freeze();
        self.inner = RequestBodyInner::Memory {
            bytes: bytes.clone(),
            consumed: false,
        };
        Ok(bytes)
    }

    /// Whether the handle is already backed by memory (restartable).
    pub fn is_collected(&self) -> bool {
        matches!(self.inner, RequestBodyInner::Memory { .. })
    }
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::fixed(bytes)
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            RequestBodyInner::Wire(_) => f.write_str("RequestBody::Wire"),
            RequestBodyInner::Memory { bytes, .. } => {
                write!(f, "RequestBody::Memory({} bytes)", bytes.len())
            }
        }
    }
}

/// Rough shape of a response body, used by the drivers to pick the
/// framing (content-length vs chunked, h2 end-of-stream flags).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Empty,
    Fixed,
    Stream,
}

type WriterFn =
    Box<dyn FnOnce(ResponseBodyWriter) -> LocalBoxFuture<'static, Result<(), HttpError>>>;

/// Each chunk travels with an ack the consumer fires when it pulls
/// again; that round-trip is what suspends a writer until the wire
/// drained its previous chunk.
type AckTx = futures::channel::oneshot::Sender<()>;
type ChunkRx = local_sync::mpsc::unbounded::Rx<(Bytes, AckTx)>;
type ChunkTx = local_sync::mpsc::unbounded::Tx<(Bytes, AckTx)>;

/// The response body carried by [`crate::Response`].
///
/// Always pull-based from the driver's point of view; the
/// writer-callback constructor bridges the push-style producer through
/// a bounded channel so `write` suspends until the frame encoder
/// drains the previous chunk.
pub struct ResponseBody {
    inner: ResponseBodyInner,
}

enum ResponseBodyInner {
    Empty,
    Fixed(Option<Bytes>),
    /// Writer callback not yet started.
    Writer(Option<WriterFn>),
    /// Writer callback running on its own task.
    Channel {
        rx: ChunkRx,
        task: Option<monoio::task::JoinHandle<Result<(), HttpError>>>,
        pending_ack: Option<AckTx>,
    },
    /// Inner body with a completion hook observing the byte count.
    Observed {
        inner: Box<ResponseBody>,
        hook: CompletionHook,
    },
    Done,
}

impl ResponseBody {
    pub fn empty() -> Self {
        Self {
            inner: ResponseBodyInner::Empty,
        }
    }

    pub fn fixed(bytes: Bytes) -> Self {
        if bytes.is_empty() {
            return Self::empty();
        }
        Self {
            inner: ResponseBodyInner::Fixed(Some(bytes)),
        }
    }

    /// Build a body from a write callback. The callback runs exactly
    /// once, on its own task, after the driver starts draining; each
    /// `writer.write` suspends until the previous chunk left for the
    /// wire.
    pub fn from_writer<F, Fut>(f: F) -> Self
    where
        F: FnOnce(ResponseBodyWriter) -> Fut + 'static,
        Fut: std::future::Future<Output = Result<(), HttpError>> + 'static,
    {
        let boxed: WriterFn = Box::new(move |writer| Box::pin(f(writer)));
        Self {
            inner: ResponseBodyInner::Writer(Some(boxed)),
        }
    }

    /// Attach a hook invoked with the total byte count once the body
    /// finishes draining (or is dropped by a dying connection).
    pub fn on_complete(self, hook: impl FnOnce(u64) + 'static) -> Self {
        Self {
            inner: ResponseBodyInner::Observed {
                inner: Box::new(self),
                hook: CompletionHook {
                    bytes: 0,
                    f: Some(Box::new(hook)),
                },
            },
        }
    }

    pub fn kind(&self) -> BodyKind {
        match &self.inner {
            ResponseBodyInner::Empty | ResponseBodyInner::Done => BodyKind::Empty,
            ResponseBodyInner::Fixed(_) => BodyKind::Fixed,
            ResponseBodyInner::Writer(_) | ResponseBodyInner::Channel { .. } => BodyKind::Stream,
            ResponseBodyInner::Observed { inner, .. } => inner.kind(),
        }
    }

    /// Known size, when the framing can use `Content-Length` directly.
    pub fn size_hint(&self) -> Option<u64> {
        match &self.inner {
            ResponseBodyInner::Empty | ResponseBodyInner::Done => Some(0),
            ResponseBodyInner::Fixed(bytes) => {
                Some(bytes.as_ref().map(|b| b.len() as u64).unwrap_or(0))
            }
            ResponseBodyInner::Observed { inner, .. } => inner.size_hint(),
            _ => None,
        }
    }

    pub fn is_empty_hint(&self) -> bool {
        self.size_hint() == Some(0)
    }

    /// Pull the next chunk. `None` means the body is complete; an
    /// error means the producer failed and the connection must be
    /// terminated at the HTTP level.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, HttpError>> {
        loop {
            match &mut self.inner {
                ResponseBodyInner::Empty | ResponseBodyInner::Done => return None,
                ResponseBodyInner::Fixed(bytes) => {
                    let out = bytes.take();
                    self.inner = ResponseBodyInner::Done;
                    return out.map(Ok);
                }
                ResponseBodyInner::Writer(f) => {
                    let f = f.take().expect("writer callback started twice");
                    let (tx, rx) = local_sync::mpsc::unbounded::channel();
                    let task = monoio::spawn(f(ResponseBodyWriter { tx }));
                    self.inner = ResponseBodyInner::Channel {
                        rx,
                        task: Some(task),
                        pending_ack: None,
                    };
                }
                ResponseBodyInner::Channel {
                    rx,
                    task,
                    pending_ack,
                } => {
                    // Pulling again means the previous chunk left for
                    // the wire; release its writer.
                    if let Some(ack) = pending_ack.take() {
                        let _ = ack.send(());
                    }
                    match rx.recv().await {
                        Some((chunk, ack)) => {
                            *pending_ack = Some(ack);
                            return Some(Ok(chunk));
                        }
                        None => {
                            // Producer finished (or died); surface its result.
                            let result = match task.take() {
                                Some(task) => task.await,
                                None => Ok(()),
                            };
                            self.inner = ResponseBodyInner::Done;
                            return match result {
                                Ok(()) => None,
                                Err(e) => Some(Err(e)),
                            };
                        }
                    }
                }
                ResponseBodyInner::Observed { inner, hook } => {
                    return match Box::pin(inner.next_chunk()).await {
                        Some(Ok(chunk)) => {
                            hook.bytes += chunk.len() as u64;
                            Some(Ok(chunk))
                        }
                        Some(Err(e)) => {
                            hook.finish();
                            Some(Err(e))
                        }
                        None => {
                            hook.finish();
                            None
                        }
                    };
                }
            }
        }
    }

    /// Drain the whole body into memory. Test harness and synthetic
    /// HEAD support; streaming bodies must be driven inside a runtime.
    pub async fn collect(mut self) -> Result<Bytes, HttpError> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    /// Non-blocking extraction for bodies already in memory.
    pub fn try_into_bytes(self) -> Option<Bytes> {
        match self.inner {
            ResponseBodyInner::Empty | ResponseBodyInner::Done => Some(Bytes::new()),
            ResponseBodyInner::Fixed(bytes) => Some(bytes.unwrap_or_default()),
            _ => None,
        }
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for ResponseBody {
    fn from(bytes: Bytes) -> Self {
        Self::fixed(bytes)
    }
}

impl From<&'static str> for ResponseBody {
    fn from(s: &'static str) -> Self {
        Self::fixed(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for ResponseBody {
    fn from(s: String) -> Self {
        Self::fixed(Bytes::from(s))
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResponseBody::{:?}", self.kind())
    }
}

/// Handle passed to a writer callback; `write` suspends until the
/// frame encoder drained the previous chunk.
pub struct ResponseBodyWriter {
    tx: ChunkTx,
}

impl ResponseBodyWriter {
    pub async fn write(&mut self, chunk: impl Into<Bytes>) -> Result<(), HttpError> {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return Ok(());
        }
        let (ack_tx, ack_rx) = futures::channel::oneshot::channel();
        self.tx
            .send((chunk, ack_tx))
            .map_err(|_| HttpError::new_with_source(ErrorKind::InternalServerError, WriteAborted))?;
        // Suspend until the frame encoder drained this chunk.
        ack_rx
            .await
            .map_err(|_| HttpError::new_with_source(ErrorKind::InternalServerError, WriteAborted))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("response body receiver dropped before the writer finished")]
struct WriteAborted;

struct CompletionHook {
    bytes: u64,
    f: Option<Box<dyn FnOnce(u64)>>,
}

impl CompletionHook {
    fn finish(&mut self) {
        if let Some(f) = self.f.take() {
            f(self.bytes);
        }
    }
}

impl Drop for CompletionHook {
    fn drop(&mut self) {
        self.finish();
    }
}
