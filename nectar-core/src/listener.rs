use std::{fmt, future::Future, io, net::SocketAddr, path::Path};

use monoio::{
    buf::{IoBuf, IoBufMut, IoVecBuf, IoVecBufMut},
    io::{stream::Stream, AsyncReadRent, AsyncWriteRent, Split},
    net::{ListenerOpts, TcpListener, TcpStream},
    BufResult,
};
use service_async::MakeService;

/// Where to bind. Building is deferred so every worker can make its
/// own listener (reuse-port) from the same builder.
pub enum ListenerBuilder {
    Tcp(SocketAddr, ListenerOpts),
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixListener),
}

impl ListenerBuilder {
    #[cfg(unix)]
    pub fn bind_unix<P: AsRef<Path>>(path: P) -> io::Result<ListenerBuilder> {
        // Try remove file first
        let _ = std::fs::remove_file(path.as_ref());
        let listener = std::os::unix::net::UnixListener::bind(path)?;
        // Because we use std and build async UnixStream from raw fd, we
        // have to make sure it is non_blocking.
        if monoio::utils::is_legacy() {
            listener.set_nonblocking(true)?;
        }
        Ok(Self::Unix(listener))
    }

    pub fn bind_tcp(addr: SocketAddr, opts: ListenerOpts) -> io::Result<ListenerBuilder> {
        Ok(Self::Tcp(addr, opts))
    }

    /// TCP listener for per-worker binding. monoio's default listener
    /// options enable reuse-port, which is what lets every worker bind
    /// the same address.
    pub fn bind_tcp_reuseport(addr: SocketAddr) -> io::Result<ListenerBuilder> {
        Self::bind_tcp(addr, ListenerOpts::default())
    }

    pub fn build(&self) -> io::Result<Listener> {
        match self {
            ListenerBuilder::Tcp(addr, opts) => {
                TcpListener::bind_with_config(addr, opts).map(Listener::Tcp)
            }
            #[cfg(unix)]
            ListenerBuilder::Unix(listener) => {
                let sys_listener = listener.try_clone()?;
                monoio::net::UnixListener::from_std(sys_listener).map(Listener::Unix)
            }
        }
    }
}

impl MakeService for ListenerBuilder {
    type Service = Listener;
    type Error = io::Error;

    fn make_via_ref(&self, _old: Option<&Self::Service>) -> Result<Self::Service, Self::Error> {
        self.build()
    }
}

/// Unified listener.
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(monoio::net::UnixListener),
}

impl Listener {
    /// The locally bound address (useful after binding port 0).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Listener::Tcp(l) => l.local_addr(),
            #[cfg(unix)]
            Listener::Unix(_) => Err(io::Error::other("unix listeners have no socket address")),
        }
    }
}

impl Stream for Listener {
    type Item = io::Result<(AcceptedStream, AcceptedAddr)>;

    fn next(&mut self) -> impl Future<Output = Option<Self::Item>> {
        async move {
            match self {
                Listener::Tcp(l) => match l.next().await {
                    Some(Ok(accepted)) => Some(Ok((
                        AcceptedStream::Tcp(accepted.0),
                        AcceptedAddr::Tcp(accepted.1),
                    ))),
                    Some(Err(e)) => Some(Err(e)),
                    None => None,
                },
                #[cfg(unix)]
                Listener::Unix(l) => match l.next().await {
                    Some(Ok(accepted)) => Some(Ok((
                        AcceptedStream::Unix(accepted.0),
                        AcceptedAddr::Unix(accepted.1),
                    ))),
                    Some(Err(e)) => Some(Err(e)),
                    None => None,
                },
            }
        }
    }
}

pub enum AcceptedStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(monoio::net::UnixStream),
}

unsafe impl Split for AcceptedStream {}

#[derive(Debug, Clone)]
pub enum AcceptedAddr {
    Tcp(SocketAddr),
    #[cfg(unix)]
    Unix(monoio::net::unix::SocketAddr),
}

impl AcceptedAddr {
    pub fn as_socket_addr(&self) -> Option<SocketAddr> {
        match self {
            AcceptedAddr::Tcp(addr) => Some(*addr),
            #[cfg(unix)]
            AcceptedAddr::Unix(_) => None,
        }
    }
}

impl fmt::Display for AcceptedAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceptedAddr::Tcp(addr) => write!(f, "{addr}"),
            #[cfg(unix)]
            AcceptedAddr::Unix(addr) => write!(f, "{addr:?}"),
        }
    }
}

impl From<SocketAddr> for AcceptedAddr {
    fn from(value: SocketAddr) -> Self {
        Self::Tcp(value)
    }
}

#[cfg(unix)]
impl From<monoio::net::unix::SocketAddr> for AcceptedAddr {
    fn from(value: monoio::net::unix::SocketAddr) -> Self {
        Self::Unix(value)
    }
}

impl AsyncReadRent for AcceptedStream {
    fn read<T: IoBufMut>(&mut self, buf: T) -> impl Future<Output = BufResult<usize, T>> {
        async move {
            match self {
                AcceptedStream::Tcp(inner) => inner.read(buf).await,
                #[cfg(unix)]
                AcceptedStream::Unix(inner) => inner.read(buf).await,
            }
        }
    }

    fn readv<T: IoVecBufMut>(
        &mut self,
        buf: T,
    ) -> impl Future<Output = BufResult<usize, T>> {
        async move {
            match self {
                AcceptedStream::Tcp(inner) => inner.readv(buf).await,
                #[cfg(unix)]
                AcceptedStream::Unix(inner) => inner.readv(buf).await,
            }
        }
    }
}

impl AsyncWriteRent for AcceptedStream {
    #[inline]
    fn write<T: IoBuf>(&mut self, buf: T) -> impl Future<Output = BufResult<usize, T>> {
        async move {
            match self {
                AcceptedStream::Tcp(inner) => inner.write(buf).await,
                #[cfg(unix)]
                AcceptedStream::Unix(inner) => inner.write(buf).await,
            }
        }
    }

    #[inline]
    fn writev<T: IoVecBuf>(
        &mut self,
        buf_vec: T,
    ) -> impl Future<Output = BufResult<usize, T>> {
        async move {
            match self {
                AcceptedStream::Tcp(inner) => inner.writev(buf_vec).await,
                #[cfg(unix)]
                AcceptedStream::Unix(inner) => inner.writev(buf_vec).await,
            }
        }
    }

    #[inline]
    fn flush(&mut self) -> impl Future<Output = io::Result<()>> {
        async move {
            match self {
                AcceptedStream::Tcp(inner) => inner.flush().await,
                #[cfg(unix)]
                AcceptedStream::Unix(inner) => inner.flush().await,
            }
        }
    }

    #[inline]
    fn shutdown(&mut self) -> impl Future<Output = io::Result<()>> {
        async move {
            match self {
                AcceptedStream::Tcp(inner) => inner.shutdown().await,
                #[cfg(unix)]
                AcceptedStream::Unix(inner) => inner.shutdown().await,
            }
        }
    }
}
