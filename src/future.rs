use crate::body::{CompressionBody, FrameSink};
use crate::config::Compressor;
use crate::negotiate::Negotiation;
use crate::writer::StreamingWriter;
use http::{Response, header, response::Parts};
use http_body::Body;
use pin_project_lite::pin_project;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

pin_project! {
    /// Future for compression service responses.
    ///
    /// Resolves once the inner response is available and its body has been
    /// read far enough to decide whether it gets compressed.
    pub struct ResponseFuture<F, B> {
        #[pin]
        inner: F,
        negotiation: Negotiation,
        compressor: Arc<Compressor>,
        deciding: Option<(Parts, CompressionBody<B>)>,
    }
}

impl<F, B> ResponseFuture<F, B> {
    pub(crate) fn new(inner: F, negotiation: Negotiation, compressor: Arc<Compressor>) -> Self {
        Self {
            inner,
            negotiation,
            compressor,
            deciding: None,
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F, B>
where
    F: Future<Output = Result<Response<B>, E>>,
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Output = Result<Response<CompressionBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        if this.deciding.is_none() {
            let response = ready!(this.inner.as_mut().poll(cx))?;
            let negotiation = mem::replace(this.negotiation, Negotiation::Identity);
            *this.deciding = Some(wrap_response(response, negotiation, this.compressor.clone()));
        }

        if let Some((_, body)) = this.deciding.as_mut() {
            ready!(body.poll_decision(cx));
        }

        match this.deciding.take() {
            Some((mut parts, mut body)) => {
                parts.headers = body.take_headers();
                Poll::Ready(Ok(Response::from_parts(parts, body)))
            }
            None => Poll::Pending,
        }
    }
}

/// Installs a streaming writer over the response body.
///
/// Responses that can never be compressed, and streaming responses that
/// must not be held back, get their decision before any body byte is read.
fn wrap_response<B>(
    response: Response<B>,
    negotiation: Negotiation,
    compressor: Arc<Compressor>,
) -> (Parts, CompressionBody<B>)
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (mut parts, body) = response.into_parts();
    let headers = mem::take(&mut parts.headers);

    // Check for x-accel-buffering: no header or streaming content types
    let always_flush = headers
        .get("x-accel-buffering")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("no"))
        || is_streaming_content_type(&headers);

    let writer = StreamingWriter::new(FrameSink::new(headers), negotiation, compressor);
    let mut body = CompressionBody::new(Box::pin(body), writer, always_flush);

    if always_flush || !body.may_compress() {
        body.decide_now();
    }

    (parts, body)
}

/// Checks if the content type requires always flushing (e.g., streaming).
fn is_streaming_content_type(headers: &header::HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| {
            let ct = ct.trim_start().to_ascii_lowercase();
            ct.starts_with("text/event-stream") || ct.starts_with("application/grpc-web")
        })
}
