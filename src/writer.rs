use crate::codec::EncodeStream;
use crate::config::Compressor;
use crate::negotiate::Negotiation;
use crate::registry::EncoderSpec;
use http::{HeaderMap, header};
use std::io::{self, Write};
use std::mem;
use std::sync::Arc;

/// The raw response a [`StreamingWriter`] writes into.
///
/// Headers may be changed until the first body byte is written; the writer
/// only touches them at its decision point, before forwarding any bytes.
pub trait ResponseSink: Write {
    /// Response headers.
    fn headers(&self) -> &HeaderMap;

    /// Mutable response headers.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Ends the response body. Called at most once by the writer.
    fn close(&mut self) -> io::Result<()>;
}

/// Observable state of a [`StreamingWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterPhase {
    /// Nothing written yet.
    Init,
    /// Holding body bytes until the compression decision.
    Buffering,
    /// Forwarding bytes unmodified.
    PassThrough,
    /// Forwarding bytes through an encoder.
    Compressing,
    /// Closed; the encoder, if any, has been released.
    Closed,
}

enum Phase {
    Init,
    Buffering,
    PassThrough,
    Compressing(EncodeStream),
    Closed,
}

/// What forced the compression decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Threshold,
    Flush,
    Close,
}

/// Wraps a response sink and decides, once, whether to compress it.
///
/// Body bytes are held until `min_size` bytes have been written, the writer
/// is flushed, or it is closed. At that point the writer adds
/// `Vary: accept-encoding` and either starts the negotiated encoder (setting
/// `Content-Encoding`) or passes the body through unmodified. A body that
/// ends below `min_size` is never compressed.
///
/// Dropping the writer releases the encoder; [`close`](Self::close) is
/// needed to finish the compressed stream.
pub struct StreamingWriter<S> {
    sink: S,
    phase: Phase,
    buffer: Vec<u8>,
    content_type: Option<String>,
    compressed: bool,
    negotiation: Negotiation,
    compressor: Arc<Compressor>,
}

impl<S: ResponseSink> StreamingWriter<S> {
    /// Creates a writer for one response.
    pub fn new(sink: S, negotiation: Negotiation, compressor: Arc<Compressor>) -> Self {
        Self {
            sink,
            phase: Phase::Init,
            buffer: Vec::new(),
            content_type: None,
            compressed: false,
            negotiation,
            compressor,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> WriterPhase {
        match self.phase {
            Phase::Init => WriterPhase::Init,
            Phase::Buffering => WriterPhase::Buffering,
            Phase::PassThrough => WriterPhase::PassThrough,
            Phase::Compressing(_) => WriterPhase::Compressing,
            Phase::Closed => WriterPhase::Closed,
        }
    }

    /// Returns true once the writer has chosen to compress the response.
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Returns true until the compress/pass-through decision is made.
    pub fn is_undecided(&self) -> bool {
        matches!(self.phase, Phase::Init | Phase::Buffering)
    }

    /// Returns false when the response can no longer end up compressed,
    /// whatever is written next.
    pub fn may_compress(&self) -> bool {
        if matches!(self.negotiation, Negotiation::Identity) {
            return false;
        }

        let headers = self.sink.headers();
        if headers.contains_key(header::CONTENT_ENCODING)
            || headers.contains_key(header::CONTENT_RANGE)
        {
            return false;
        }

        let content_type = self
            .content_type
            .as_deref()
            .or_else(|| content_type(headers));
        self.compressor.gate().check(content_type)
    }

    /// Returns a reference to the sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Returns a mutable reference to the sink.
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Consumes the writer, returning the sink.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Writes all of `buf`.
    pub fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        if let Phase::Init = self.phase {
            self.content_type = content_type(self.sink.headers()).map(str::to_owned);
            self.phase = Phase::Buffering;
        }

        if let Phase::Buffering = self.phase {
            if self.buffer.len() + buf.len() < self.compressor.min_size() {
                self.buffer.extend_from_slice(buf);
                return Ok(());
            }
            self.decide(Trigger::Threshold)?;
        }

        self.forward(buf)
    }

    /// Flushes the response.
    ///
    /// While undecided this forces the decision with whatever has been
    /// buffered; size no longer counts against compression.
    pub fn flush(&mut self) -> io::Result<()> {
        if self.is_undecided() {
            self.decide(Trigger::Flush)?;
        }

        let result = match &mut self.phase {
            Phase::Compressing(stream) => match stream.flush(&mut self.sink) {
                Ok(()) => self.sink.flush(),
                Err(e) => Err(e),
            },
            Phase::PassThrough => self.sink.flush(),
            Phase::Init | Phase::Buffering | Phase::Closed => return Ok(()),
        };
        self.fail_on_error(result)
    }

    /// Finishes the response: makes the decision if still pending, writes
    /// the encoder's trailing bytes and closes the sink.
    ///
    /// Closing an already closed writer does nothing.
    pub fn close(&mut self) -> io::Result<()> {
        if self.is_undecided() {
            self.decide(Trigger::Close)?;
        }

        let result = match mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Closed => return Ok(()),
            Phase::Compressing(mut stream) => stream.finish(&mut self.sink),
            Phase::Init | Phase::Buffering | Phase::PassThrough => Ok(()),
        };

        let result = result.and_then(|()| self.sink.flush());
        let closed = self.sink.close();
        result.and(closed)
    }

    /// Releases the encoder and closes the sink without finishing the body.
    ///
    /// An undecided response still gets `Vary: accept-encoding`, since its
    /// headers may yet be sent.
    pub fn abort(&mut self) {
        if self.is_undecided() {
            add_vary_accept_encoding(self.sink.headers_mut());
        }
        self.release();
    }

    fn decide(&mut self, trigger: Trigger) -> io::Result<()> {
        let buffered = mem::take(&mut self.buffer);
        let selected = self.select(trigger, buffered.len());

        add_vary_accept_encoding(self.sink.headers_mut());
        self.phase = Phase::PassThrough;

        match selected {
            Some(spec) => match spec.encoder() {
                Ok(encoder) => {
                    let headers = self.sink.headers_mut();
                    headers.insert(header::CONTENT_ENCODING, spec.header_value().clone());

                    // Compressed size is unknown and ranges no longer apply
                    headers.remove(header::CONTENT_LENGTH);
                    headers.remove(header::ACCEPT_RANGES);

                    tracing::debug!(
                        encoding = spec.name(),
                        level = spec.level(),
                        buffered = buffered.len(),
                        "compressing response"
                    );
                    self.phase = Phase::Compressing(EncodeStream::new(encoder));
                    self.compressed = true;
                }
                Err(error) => {
                    tracing::warn!(
                        encoding = spec.name(),
                        %error,
                        "failed to construct encoder, sending response uncompressed"
                    );
                }
            },
            None => {
                tracing::trace!(
                    buffered = buffered.len(),
                    ?trigger,
                    "response passes through uncompressed"
                );
            }
        }

        if buffered.is_empty() {
            return Ok(());
        }
        self.forward(&buffered)
    }

    fn select(&self, trigger: Trigger, buffered: usize) -> Option<EncoderSpec> {
        let Negotiation::Encoding(spec) = &self.negotiation else {
            return None;
        };

        if trigger == Trigger::Close && (buffered == 0 || buffered < self.compressor.min_size()) {
            return None;
        }

        self.may_compress().then(|| spec.clone())
    }

    fn forward(&mut self, buf: &[u8]) -> io::Result<()> {
        let result = match &mut self.phase {
            Phase::PassThrough => self.sink.write_all(buf),
            Phase::Compressing(stream) => stream.write(buf, &mut self.sink),
            Phase::Init | Phase::Buffering => {
                self.buffer.extend_from_slice(buf);
                Ok(())
            }
            Phase::Closed => {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "write after response was closed",
                ));
            }
        };
        self.fail_on_error(result)
    }

    fn fail_on_error(&mut self, result: io::Result<()>) -> io::Result<()> {
        if result.is_err() {
            self.release();
        }
        result
    }

    fn release(&mut self) {
        if let Phase::Closed = self.phase {
            return;
        }

        self.phase = Phase::Closed;
        self.buffer = Vec::new();
        if let Err(error) = self.sink.close() {
            tracing::debug!(%error, "failed to close response after error");
        }
    }
}

impl<S: ResponseSink> Write for StreamingWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        StreamingWriter::write(self, buf).map(|()| buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        StreamingWriter::flush(self)
    }
}

fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
}

/// Adds Accept-Encoding to the Vary header if not already present.
fn add_vary_accept_encoding(headers: &mut HeaderMap) {
    // Check all Vary headers to see if Accept-Encoding is already present
    for vary in headers.get_all(header::VARY) {
        if let Ok(vary_str) = vary.to_str() {
            let covered = vary_str.split(',').any(|v| {
                let v = v.trim();
                v.eq_ignore_ascii_case("*") || v.eq_ignore_ascii_case("accept-encoding")
            });
            if covered {
                return;
            }
        }
    }

    headers.append(
        header::VARY,
        header::HeaderValue::from_static("accept-encoding"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_type::ContentTypeGate;
    use crate::registry::EncoderRegistry;
    use http::HeaderValue;

    #[derive(Default)]
    struct TestSink {
        headers: HeaderMap,
        body: Vec<u8>,
        flushes: usize,
        closes: usize,
        fail_writes: bool,
    }

    impl Write for TestSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.fail_writes {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
            self.body.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushes += 1;
            Ok(())
        }
    }

    impl ResponseSink for TestSink {
        fn headers(&self) -> &HeaderMap {
            &self.headers
        }

        fn headers_mut(&mut self) -> &mut HeaderMap {
            &mut self.headers
        }

        fn close(&mut self) -> io::Result<()> {
            self.closes += 1;
            Ok(())
        }
    }

    fn sink_with_content_type(content_type: &'static str) -> TestSink {
        let mut sink = TestSink::default();
        sink.headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        sink
    }

    fn writer_with(
        sink: TestSink,
        accept_encoding: &str,
        compressor: Compressor,
    ) -> StreamingWriter<TestSink> {
        let negotiation = compressor.negotiate(&HeaderMap::from_iter([(
            header::ACCEPT_ENCODING,
            HeaderValue::from_str(accept_encoding).unwrap(),
        )]));
        StreamingWriter::new(sink, negotiation, Arc::new(compressor))
    }

    fn writer(content_type: &'static str, accept_encoding: &str, min_size: usize) -> StreamingWriter<TestSink> {
        writer_with(
            sink_with_content_type(content_type),
            accept_encoding,
            Compressor::default().with_min_size(min_size),
        )
    }

    #[cfg(feature = "gzip")]
    fn gunzip(data: &[u8]) -> Vec<u8> {
        use std::io::Read;

        let mut decoded = Vec::new();
        flate2::read::GzDecoder::new(data)
            .read_to_end(&mut decoded)
            .unwrap();
        decoded
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_small_body_passes_through() {
        let mut writer = writer("text/plain", "gzip", 100);
        writer.write(b"tiny").unwrap();
        assert_eq!(writer.phase(), WriterPhase::Buffering);
        assert!(writer.sink().body.is_empty());

        writer.close().unwrap();
        assert_eq!(writer.phase(), WriterPhase::Closed);

        let sink = writer.into_sink();
        assert_eq!(sink.body, b"tiny");
        assert!(sink.headers.get(header::CONTENT_ENCODING).is_none());
        assert_eq!(sink.headers.get(header::VARY).unwrap(), "accept-encoding");
        assert_eq!(sink.closes, 1);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_threshold_starts_compression() {
        let mut sink = sink_with_content_type("text/html");
        sink.headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from_static("300"));
        sink.headers
            .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        let mut writer = writer_with(sink, "gzip", Compressor::default().with_min_size(100));

        let chunk = [b'a'; 60];
        writer.write(&chunk).unwrap();
        assert_eq!(writer.phase(), WriterPhase::Buffering);
        writer.write(&chunk).unwrap();
        assert_eq!(writer.phase(), WriterPhase::Compressing);
        assert_eq!(
            writer.sink().headers.get(header::CONTENT_ENCODING).unwrap(),
            "gzip"
        );
        assert!(writer.sink().headers.get(header::CONTENT_LENGTH).is_none());
        assert!(writer.sink().headers.get(header::ACCEPT_RANGES).is_none());

        writer.write(&chunk).unwrap();
        writer.close().unwrap();

        let sink = writer.into_sink();
        assert_eq!(gunzip(&sink.body), [b'a'; 180]);
        assert_eq!(sink.closes, 1);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_flush_forces_decision() {
        let mut writer = writer("text/plain", "gzip", 1400);
        writer.write(b"data: 1\n\n").unwrap();
        assert_eq!(writer.phase(), WriterPhase::Buffering);

        writer.flush().unwrap();
        assert_eq!(writer.phase(), WriterPhase::Compressing);
        assert!(!writer.sink().body.is_empty());
        assert!(writer.sink().flushes >= 1);

        writer.write(b"data: 2\n\n").unwrap();
        writer.close().unwrap();
        assert_eq!(gunzip(&writer.sink().body), b"data: 1\n\ndata: 2\n\n");
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_flush_before_body_skips_buffering() {
        let mut writer = writer("text/plain", "gzip", 1400);
        writer.flush().unwrap();
        assert_eq!(writer.phase(), WriterPhase::Compressing);

        let mut writer = writer_with(
            sink_with_content_type("image/png"),
            "gzip",
            Compressor::default(),
        );
        writer.flush().unwrap();
        assert_eq!(writer.phase(), WriterPhase::PassThrough);
        writer.write(b"\x89PNG").unwrap();
        assert_eq!(writer.sink().body, b"\x89PNG");
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_gated_content_type_never_compressed() {
        let mut writer = writer("image/png", "gzip", 10);
        assert!(!writer.may_compress());
        writer.write(&[0u8; 4096]).unwrap();
        assert_eq!(writer.phase(), WriterPhase::PassThrough);
        writer.close().unwrap();

        let sink = writer.into_sink();
        assert_eq!(sink.body, [0u8; 4096]);
        assert!(sink.headers.get(header::CONTENT_ENCODING).is_none());
        assert_eq!(sink.headers.get(header::VARY).unwrap(), "accept-encoding");
    }

    #[test]
    fn test_identity_passes_through() {
        let mut writer = writer("text/plain", "identity", 10);
        assert!(!writer.may_compress());
        writer.write(&[b'x'; 64]).unwrap();
        assert_eq!(writer.phase(), WriterPhase::PassThrough);
        writer.close().unwrap();
        assert!(writer.sink().headers.get(header::CONTENT_ENCODING).is_none());
        assert_eq!(writer.sink().body, [b'x'; 64]);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_already_encoded_not_recompressed() {
        let mut sink = sink_with_content_type("text/plain");
        sink.headers
            .insert(header::CONTENT_ENCODING, HeaderValue::from_static("br"));
        let mut writer = writer_with(sink, "gzip", Compressor::default().with_min_size(0));

        writer.write(b"already brotli").unwrap();
        writer.close().unwrap();
        let sink = writer.into_sink();
        assert_eq!(sink.headers.get(header::CONTENT_ENCODING).unwrap(), "br");
        assert_eq!(sink.body, b"already brotli");
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_encoder_failure_degrades_to_passthrough() {
        use crate::codec::Codec;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = EncoderRegistry::new();
        let counter = calls.clone();
        registry
            .register("gzip", 5, move |level| {
                // Succeeds once for registration, fails for every response
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Codec::Gzip.encoder(level)
                } else {
                    Err(io::Error::other("out of encoders"))
                }
            })
            .unwrap();
        let compressor = Compressor::new(registry, ContentTypeGate::default()).with_min_size(0);

        let mut writer = writer_with(sink_with_content_type("text/plain"), "gzip", compressor);
        writer.write(b"still delivered").unwrap();
        assert_eq!(writer.phase(), WriterPhase::PassThrough);
        writer.close().unwrap();

        let sink = writer.into_sink();
        assert_eq!(sink.body, b"still delivered");
        assert!(sink.headers.get(header::CONTENT_ENCODING).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_close_twice() {
        let mut writer = writer("text/plain", "gzip", 0);
        writer.write(b"hello").unwrap();
        writer.close().unwrap();
        let body = writer.sink().body.clone();

        writer.close().unwrap();
        assert_eq!(writer.sink().closes, 1);
        assert_eq!(writer.sink().body, body);
        assert_eq!(gunzip(&body), b"hello");
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_sink_error_releases_and_propagates() {
        let mut sink = sink_with_content_type("text/plain");
        sink.fail_writes = true;
        let mut writer = writer_with(sink, "gzip", Compressor::default().with_min_size(0));

        let err = writer
            .write(b"hello")
            .and_then(|()| writer.flush())
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(writer.phase(), WriterPhase::Closed);
        assert_eq!(writer.sink().closes, 1);

        assert!(writer.write(b"more").is_err());
        writer.close().unwrap();
        assert_eq!(writer.sink().closes, 1);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_abort_releases_without_finishing() {
        let mut writer = writer("text/plain", "gzip", 0);
        writer.write(b"partial").unwrap();
        writer.abort();
        assert_eq!(writer.phase(), WriterPhase::Closed);
        assert_eq!(writer.sink().closes, 1);
        writer.close().unwrap();
        assert_eq!(writer.sink().closes, 1);
    }

    #[test]
    fn test_abort_before_decision_adds_vary() {
        let mut writer = writer("text/plain", "gzip", 1400);
        writer.write(b"buffered").unwrap();
        writer.abort();

        assert_eq!(writer.phase(), WriterPhase::Closed);
        assert!(writer.sink().body.is_empty());
        assert!(writer.sink().headers.get(header::CONTENT_ENCODING).is_none());
        assert_eq!(
            writer.sink().headers.get(header::VARY).unwrap(),
            "accept-encoding"
        );
    }

    #[test]
    fn test_empty_body_not_compressed() {
        let mut writer = writer("text/plain", "gzip", 0);
        writer.close().unwrap();
        let sink = writer.into_sink();
        assert!(sink.body.is_empty());
        assert!(sink.headers.get(header::CONTENT_ENCODING).is_none());
        assert_eq!(sink.headers.get(header::VARY).unwrap(), "accept-encoding");
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_assumed_content_type() {
        let compressor = Compressor::new(
            EncoderRegistry::with_defaults(),
            ContentTypeGate::default()
                .assume_content_type("text/plain")
                .unwrap(),
        )
        .with_min_size(0);
        let mut writer = writer_with(TestSink::default(), "gzip", compressor);
        writer.write(b"untyped").unwrap();
        assert_eq!(writer.phase(), WriterPhase::Compressing);

        let mut writer = writer_with(TestSink::default(), "gzip", Compressor::default().with_min_size(0));
        writer.write(b"untyped").unwrap();
        assert_eq!(writer.phase(), WriterPhase::PassThrough);
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_io_write_impl() {
        let mut writer = writer("application/json", "gzip", 16);
        Write::write_all(&mut writer, br#"{"data":{"foo":"bar"}}"#).unwrap();
        Write::flush(&mut writer).unwrap();
        writer.close().unwrap();
        assert_eq!(gunzip(&writer.sink().body), br#"{"data":{"foo":"bar"}}"#);
    }

    #[test]
    fn test_vary_header_not_duplicated() {
        let mut sink = sink_with_content_type("text/plain");
        sink.headers
            .insert(header::VARY, HeaderValue::from_static("Accept-Encoding"));
        let mut writer = writer_with(sink, "gzip", Compressor::default());
        writer.close().unwrap();
        assert_eq!(writer.sink().headers.get_all(header::VARY).iter().count(), 1);
    }
}
