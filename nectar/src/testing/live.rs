//! Live harness: a real listener on loopback plus a minimal HTTP/1.1
//! client, so tests cover framing, keep-alive and shutdown behavior
//! too.

use std::{net::SocketAddr, rc::Rc};

use anyhow::Context;
use bytes::Bytes;
use futures_channel::oneshot;
use http::{HeaderMap, Method, StatusCode};
use monoio::{
    io::{AsyncReadRent, AsyncWriteRentExt},
    net::{ListenerOpts, TcpStream},
};
use nectar_core::{
    context::FromContextSource, listener::ListenerBuilder, AnyResult,
};
use nectar_server::{
    cancel::Canceller,
    http::{HttpDriver, HttpServerTimeout},
    serve::{serve, ConnTracker},
};

use super::TestResponse;
use crate::router::Router;

pub struct LiveTestClient {
    addr: SocketAddr,
    stop_rx: Option<oneshot::Receiver<()>>,
    tracker: ConnTracker,
    canceller: Canceller,
}

impl LiveTestClient {
    /// Bind 127.0.0.1:0, start accepting on the current runtime and
    /// return a client pointed at the bound port.
    pub fn start<Ctx: FromContextSource>(router: Router<Ctx>) -> AnyResult<Self> {
        let app = router.build();
        let listener =
            ListenerBuilder::bind_tcp("127.0.0.1:0".parse()?, ListenerOpts::default())?.build()?;
        let addr = listener.local_addr()?;

        let canceller = Canceller::new();
        let tracker = ConnTracker::new();
        let driver = Rc::new(HttpDriver::new(
            app,
            HttpServerTimeout::default(),
            Some("nectar-test"),
            canceller.waiter(),
        ));
        let (stop_tx, stop_rx) = oneshot::channel();
        monoio::spawn(serve(listener, driver, stop_tx, tracker.clone()));

        Ok(Self {
            addr,
            stop_rx: Some(stop_rx),
            tracker,
            canceller,
        })
    }

    pub fn address(&self) -> SocketAddr {
        self.addr
    }

    /// One request over a fresh connection (`Connection: close`, so
    /// end-of-body is end-of-stream).
    pub async fn execute(
        &self,
        method: Method,
        uri: &str,
        headers: &[(&str, &str)],
        body: impl Into<Bytes>,
    ) -> AnyResult<TestResponse> {
        let body = body.into();
        let mut stream = TcpStream::connect(self.addr).await?;

        let mut request = format!(
            "{method} {uri} HTTP/1.1\r\nhost: {}\r\nconnection: close\r\ncontent-length: {}\r\n",
            self.addr,
            body.len()
        );
        for (name, value) in headers {
            request.push_str(name);
            request.push_str(": ");
            request.push_str(value);
            request.push_str("\r\n");
        }
        request.push_str("\r\n");
        let mut wire = request.into_bytes();
        wire.extend_from_slice(&body);
        let (result, _) = stream.write_all(wire).await;
        result?;

        let mut raw = Vec::new();
        loop {
            let buf = vec![0u8; 16 * 1024];
            let (result, buf) = stream.read(buf).await;
            let read = result?;
            if read == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..read]);
        }
        parse_response(&raw)
    }

    pub async fn get(&self, uri: &str) -> AnyResult<TestResponse> {
        self.execute(Method::GET, uri, &[], Bytes::new()).await
    }

    /// Stop accepting and wait for in-flight connections.
    pub async fn shutdown(mut self) {
        self.canceller.cancel();
        drop(self.stop_rx.take());
        self.tracker.wait_idle().await;
    }
}

fn parse_response(raw: &[u8]) -> AnyResult<TestResponse> {
    let head_end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .context("no header terminator in response")?;
    let head = std::str::from_utf8(&raw[..head_end]).context("response head is not utf-8")?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().context("missing status line")?;
    let status_code = status_line
        .split_whitespace()
        .nth(1)
        .context("malformed status line")?;
    let status = StatusCode::from_bytes(status_code.as_bytes())?;

    let mut headers = HeaderMap::new();
    for line in lines {
        let (name, value) = line.split_once(':').context("malformed header line")?;
        headers.append(
            http::header::HeaderName::from_bytes(name.trim().as_bytes())?,
            http::header::HeaderValue::from_str(value.trim())?,
        );
    }

    let mut body = raw[head_end + 4..].to_vec();
    let chunked = headers
        .get(http::header::TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
    if chunked {
        body = dechunk(&body)?;
    }

    Ok(TestResponse {
        status,
        headers,
        body: body.into(),
    })
}

fn dechunk(mut raw: &[u8]) -> AnyResult<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let line_end = raw
            .windows(2)
            .position(|w| w == b"\r\n")
            .context("missing chunk size line")?;
        let size = usize::from_str_radix(std::str::from_utf8(&raw[..line_end])?.trim(), 16)?;
        raw = &raw[line_end + 2..];
        if size == 0 {
            return Ok(out);
        }
        if raw.len() < size + 2 {
            anyhow::bail!("truncated chunk");
        }
        out.extend_from_slice(&raw[..size]);
        raw = &raw[size + 2..];
    }
}
