use crate::writer::{ResponseSink, StreamingWriter, WriterPhase};
use bytes::{Buf, Bytes, BytesMut};
use http::HeaderMap;
use http_body::{Body, Frame, SizeHint};
use std::io::{self, Write};
use std::pin::Pin;
use std::task::{Context, Poll};

/// Response sink that collects body bytes for the next data frame.
///
/// Holds the response headers until the response head is released to the
/// client.
pub(crate) struct FrameSink {
    headers: HeaderMap,
    output: BytesMut,
    closed: bool,
}

impl FrameSink {
    pub(crate) fn new(headers: HeaderMap) -> Self {
        Self {
            headers,
            output: BytesMut::new(),
            closed: false,
        }
    }

    /// Takes the bytes written since the last call, if any.
    pub(crate) fn take_output(&mut self) -> Option<Bytes> {
        if self.output.is_empty() {
            None
        } else {
            Some(self.output.split().freeze())
        }
    }

    pub(crate) fn take_headers(&mut self) -> HeaderMap {
        std::mem::take(&mut self.headers)
    }

    fn pending(&self) -> usize {
        self.output.len()
    }
}

impl Write for FrameSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "response body already closed",
            ));
        }
        self.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ResponseSink for FrameSink {
    fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn close(&mut self) -> io::Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Where the body is in its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyState {
    /// Reading frames from the inner body.
    Reading,
    /// Inner body finished; emitting buffered trailers.
    Trailers,
    /// Everything emitted.
    Done,
}

/// A response body that may be compressed.
///
/// Every data frame of the inner body goes through a [`StreamingWriter`],
/// which either compresses it or passes it through unchanged.
pub struct CompressionBody<B> {
    inner: Pin<Box<B>>,
    writer: StreamingWriter<FrameSink>,
    always_flush: bool,
    state: BodyState,
    pending_trailers: Option<HeaderMap>,
    pending_error: Option<io::Error>,
}

impl<B> CompressionBody<B>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    pub(crate) fn new(
        inner: Pin<Box<B>>,
        writer: StreamingWriter<FrameSink>,
        always_flush: bool,
    ) -> Self {
        Self {
            inner,
            writer,
            always_flush,
            state: BodyState::Reading,
            pending_trailers: None,
            pending_error: None,
        }
    }

    /// Whether the body is being compressed.
    pub fn is_compressed(&self) -> bool {
        self.writer.is_compressed()
    }

    /// Whether streaming chunks are flushed through the encoder one by one.
    pub fn always_flush(&self) -> bool {
        self.always_flush
    }

    /// Forces the compression decision before any body byte is read.
    pub(crate) fn decide_now(&mut self) {
        if let Err(e) = self.writer.flush() {
            self.fail(e);
        }
    }

    /// Returns true while the writer may still compress the response.
    pub(crate) fn may_compress(&self) -> bool {
        self.writer.may_compress()
    }

    /// Reads inner frames until the writer has decided how to send the body.
    pub(crate) fn poll_decision(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        while self.writer.is_undecided() {
            match self.inner.as_mut().poll_frame(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(None) => self.on_end(),
                Poll::Ready(Some(Err(e))) => self.on_error(e),
                Poll::Ready(Some(Ok(frame))) => self.on_frame(frame),
            }
        }
        Poll::Ready(())
    }

    /// Takes the response headers, as the writer left them.
    pub(crate) fn take_headers(&mut self) -> HeaderMap {
        self.writer.sink_mut().take_headers()
    }

    /// Handles one frame from the inner body.
    fn on_frame(&mut self, frame: Frame<B::Data>) {
        match frame.into_data() {
            Ok(mut data) => {
                let mut result = Ok(());
                while data.has_remaining() && result.is_ok() {
                    let chunk = data.chunk();
                    let len = chunk.len();
                    result = self.writer.write(chunk);
                    data.advance(len);
                }
                if self.always_flush {
                    result = result.and_then(|()| self.writer.flush());
                }
                if let Err(e) = result {
                    self.fail(e);
                }
            }
            Err(frame) => {
                if let Ok(trailers) = frame.into_trailers() {
                    self.pending_trailers = Some(trailers);
                }
                self.on_end();
            }
        }
    }

    /// Handles the end of the inner body.
    fn on_end(&mut self) {
        self.state = BodyState::Trailers;
        if let Err(e) = self.writer.close() {
            self.fail(e);
        }
    }

    /// Handles an error from the inner body.
    fn on_error(&mut self, e: B::Error) {
        self.fail(io::Error::other(e.into()));
    }

    fn fail(&mut self, e: io::Error) {
        self.writer.abort();
        self.pending_trailers = None;
        self.pending_error = Some(e);
        self.state = BodyState::Done;
    }
}

impl<B> Body for CompressionBody<B>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        loop {
            if let Some(data) = this.writer.sink_mut().take_output() {
                return Poll::Ready(Some(Ok(Frame::data(data))));
            }
            if let Some(e) = this.pending_error.take() {
                return Poll::Ready(Some(Err(e)));
            }

            match this.state {
                BodyState::Done => return Poll::Ready(None),

                BodyState::Trailers => {
                    this.state = BodyState::Done;
                    if let Some(trailers) = this.pending_trailers.take() {
                        return Poll::Ready(Some(Ok(Frame::trailers(trailers))));
                    }
                }

                BodyState::Reading => match this.inner.as_mut().poll_frame(cx) {
                    Poll::Pending => return Poll::Pending,
                    Poll::Ready(None) => this.on_end(),
                    Poll::Ready(Some(Err(e))) => this.on_error(e),
                    Poll::Ready(Some(Ok(frame))) => this.on_frame(frame),
                },
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.state == BodyState::Done
            && self.writer.sink().pending() == 0
            && self.pending_error.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        match self.writer.phase() {
            WriterPhase::PassThrough if self.state == BodyState::Reading => {
                let pending = self.writer.sink().pending() as u64;
                let inner = self.inner.size_hint();
                let mut hint = SizeHint::new();
                hint.set_lower(inner.lower() + pending);
                if let Some(upper) = inner.upper() {
                    hint.set_upper(upper + pending);
                }
                hint
            }
            WriterPhase::Closed if self.state != BodyState::Reading => {
                SizeHint::with_exact(self.writer.sink().pending() as u64)
            }
            // Compressed size is unknown
            _ => SizeHint::default(),
        }
    }
}
