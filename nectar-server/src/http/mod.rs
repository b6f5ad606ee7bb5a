//! HTTP connection handling.
//!
//! [`HttpDriver`] is the per-connection service: it sniffs the
//! client preface to pick HTTP/2 or HTTP/1.1, then hands the stream to
//! the matching driver loop. It implements `MakeService` so worker
//! threads can each build their own copy from a shared factory.

use std::{io, io::Cursor, time::Duration};

use http::HeaderValue;
use monoio::{
    buf::IoBufMut,
    io::{AsyncReadRent, AsyncWriteRent, PrefixedReadIo, Split},
};
use nectar_core::{config::ServerConfig, listener::AcceptedAddr, HttpApp};
use service_async::{AsyncMakeService, MakeService, Service};

pub mod conn_manager;
mod encode;
mod h1;
mod h2;

pub use conn_manager::{Action, ConnectionManager, PingData};

const H2_PREFACE: &[u8; 24] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Timeout settings for reading requests off a connection.
///
/// `keepalive_timeout` closes connections idle between requests;
/// `read_header_timeout` bounds the wait for a full request head;
/// `read_body_timeout` bounds receiving the body.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct HttpServerTimeout {
    pub keepalive_timeout: Option<Duration>,
    pub read_header_timeout: Option<Duration>,
    pub read_body_timeout: Option<Duration>,
}

impl Default for HttpServerTimeout {
    fn default() -> Self {
        const DEFAULT_KEEPALIVE_SEC: u64 = 75;
        Self {
            keepalive_timeout: Some(Duration::from_secs(DEFAULT_KEEPALIVE_SEC)),
            read_header_timeout: None,
            read_body_timeout: None,
        }
    }
}

impl From<&ServerConfig> for HttpServerTimeout {
    fn from(config: &ServerConfig) -> Self {
        Self {
            keepalive_timeout: config.keepalive_timeout,
            read_header_timeout: config.read_header_timeout,
            read_body_timeout: config.read_body_timeout,
        }
    }
}

/// Per-connection service: protocol selection plus the h1/h2 loops.
#[derive(Clone)]
pub struct HttpDriver<A> {
    app: A,
    timeout: HttpServerTimeout,
    server_name: Option<HeaderValue>,
    shutdown: crate::cancel::Waiter,
}

impl<A> HttpDriver<A> {
    pub fn new(
        app: A,
        timeout: HttpServerTimeout,
        server_name: Option<&str>,
        shutdown: crate::cancel::Waiter,
    ) -> Self {
        Self {
            app,
            timeout,
            server_name: server_name.and_then(|name| HeaderValue::from_str(name).ok()),
            shutdown,
        }
    }
}

impl<S, A> Service<(S, AcceptedAddr)> for HttpDriver<A>
where
    S: Split + AsyncReadRent + AsyncWriteRent + Unpin + 'static,
    A: HttpApp,
{
    type Response = ();
    type Error = io::Error;

    async fn call(&self, (stream, addr): (S, AcceptedAddr)) -> Result<Self::Response, Self::Error> {
        let (use_h2, stream) = detect_h2_preface(stream).await?;
        if use_h2 {
            h2::serve_h2(
                stream,
                addr,
                &self.app,
                self.timeout.keepalive_timeout,
                self.shutdown.clone(),
            )
            .await;
        } else {
            h1::serve_h1(
                stream,
                addr,
                &self.app,
                self.timeout,
                self.server_name.as_ref(),
                self.shutdown.clone(),
            )
            .await;
        }
        Ok(())
    }
}

// HttpDriver is a Service and a MakeService: workers build their own
// instance from the factory form.
impl<F: MakeService> MakeService for HttpDriver<F> {
    type Service = HttpDriver<F::Service>;
    type Error = F::Error;

    fn make_via_ref(&self, old: Option<&Self::Service>) -> Result<Self::Service, Self::Error> {
        Ok(HttpDriver {
            app: self.app.make_via_ref(old.map(|o| &o.app))?,
            timeout: self.timeout,
            server_name: self.server_name.clone(),
            shutdown: self.shutdown.clone(),
        })
    }
}

impl<F: AsyncMakeService> AsyncMakeService for HttpDriver<F> {
    type Service = HttpDriver<F::Service>;
    type Error = F::Error;

    async fn make_via_ref(
        &self,
        old: Option<&Self::Service>,
    ) -> Result<Self::Service, Self::Error> {
        Ok(HttpDriver {
            app: self.app.make_via_ref(old.map(|o| &o.app)).await?,
            timeout: self.timeout,
            server_name: self.server_name.clone(),
            shutdown: self.shutdown.clone(),
        })
    }
}

/// Read just enough of the stream to recognize the HTTP/2 client
/// preface, handing back a prefixed stream that replays the consumed
/// bytes.
async fn detect_h2_preface<IO: AsyncReadRent>(
    mut io: IO,
) -> io::Result<(bool, PrefixedReadIo<IO, Cursor<Vec<u8>>>)> {
    let target = H2_PREFACE.len();
    let mut written = 0;
    let mut buf: Vec<u8> = Vec::with_capacity(target);
    let mut eq = true;
    loop {
        // # Safety
        // The buf must have enough capacity to write the data.
        let buf_slice = unsafe { buf.slice_mut_unchecked(written..target) };
        let (result, buf_slice) = io.read(buf_slice).await;
        buf = buf_slice.into_inner();
        match result? {
            0 => break,
            n => {
                let curr = written;
                written += n;
                if H2_PREFACE[curr..written] != buf[curr..written] {
                    eq = false;
                    break;
                }
            }
        }
    }
    let io = PrefixedReadIo::new(io, Cursor::new(buf));
    Ok((eq && written == target, io))
}
