use crate::body::CompressionBody;
use crate::config::Compressor;
use crate::future::ResponseFuture;
use http::Request;
use http_body::Body;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::Service;

/// A Tower service that compresses HTTP response bodies.
#[derive(Debug, Clone)]
pub struct CompressionService<S> {
    inner: S,
    compressor: Arc<Compressor>,
}

impl<S> CompressionService<S> {
    /// Creates a new compression service wrapping the given inner service.
    pub fn new(inner: S, compressor: Arc<Compressor>) -> Self {
        Self { inner, compressor }
    }

    /// Returns the compression policy in use.
    pub fn compressor(&self) -> &Compressor {
        &self.compressor
    }

    /// Returns a reference to the inner service.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Returns a mutable reference to the inner service.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Consumes this service, returning the inner service.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CompressionService<S>
where
    S: Service<Request<ReqBody>, Response = http::Response<ResBody>>,
    ResBody: Body,
    ResBody::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Response = http::Response<CompressionBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future, ResBody>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let negotiation = self.compressor.negotiate(req.headers());
        if let Some(encoding) = negotiation.encoding() {
            tracing::trace!(encoding, uri = %req.uri(), "negotiated response encoding");
        }

        let inner = self.inner.call(req);

        ResponseFuture::new(inner, negotiation, self.compressor.clone())
    }
}
