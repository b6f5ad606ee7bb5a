//! TLS termination in front of the HTTP driver.
//!
//! The TLS stack itself is delegated to native-tls; this service only
//! wraps accepted streams. Protocol selection still happens on the
//! decrypted stream via the h2 preface, so clients negotiate the same
//! way with or without TLS.

use monoio::io::{AsyncReadRent, AsyncWriteRent};
use monoio_native_tls::{TlsAcceptor, TlsStream};
use native_tls::Identity;
use nectar_core::AnyError;
use service_async::{MakeService, Service};

#[derive(Clone)]
pub struct TlsService<T> {
    acceptor: TlsAcceptor,
    inner: T,
}

impl<T, S, CX> Service<(S, CX)> for TlsService<T>
where
    T: Service<(TlsStream<S>, CX)>,
    T::Error: Into<AnyError>,
    S: AsyncReadRent + AsyncWriteRent,
{
    type Response = T::Response;
    type Error = AnyError;

    async fn call(&self, (stream, addr): (S, CX)) -> Result<Self::Response, Self::Error> {
        let stream = self.acceptor.accept(stream).await?;
        self.inner.call((stream, addr)).await.map_err(Into::into)
    }
}

/// Builds a [`TlsService`] per worker from the server identity.
pub struct TlsServiceFactory<F> {
    identity: Identity,
    inner: F,
}

impl<F> TlsServiceFactory<F> {
    pub fn new(identity: Identity, inner: F) -> Self {
        Self { identity, inner }
    }
}

impl<F> MakeService for TlsServiceFactory<F>
where
    F: MakeService,
    F::Error: Into<AnyError>,
{
    type Service = TlsService<F::Service>;
    type Error = AnyError;

    fn make_via_ref(&self, old: Option<&Self::Service>) -> Result<Self::Service, Self::Error> {
        let builder = native_tls::TlsAcceptor::builder(self.identity.clone());
        let acceptor = TlsAcceptor::from(builder.build().map_err(AnyError::from)?);
        Ok(TlsService {
            acceptor,
            inner: self
                .inner
                .make_via_ref(old.map(|o| &o.inner))
                .map_err(Into::into)?,
        })
    }
}
