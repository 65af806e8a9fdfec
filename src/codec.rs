use compression_codecs::EncodeV2;
#[cfg(feature = "brotli")]
use compression_codecs::brotli::{BrotliEncoder, params::EncoderParams as BrotliParams};
#[cfg(feature = "deflate")]
use compression_codecs::deflate::DeflateEncoder;
#[cfg(feature = "gzip")]
use compression_codecs::gzip::GzipEncoder;
#[cfg(feature = "zstd")]
use compression_codecs::zstd::ZstdEncoder;
#[cfg(any(feature = "brotli", feature = "gzip", feature = "deflate"))]
use compression_core::Level;
use compression_core::util::{PartialBuffer, WriteBuffer};
use std::io::{self, Write};
use std::ops::RangeInclusive;

const OUTPUT_BUFFER_SIZE: usize = 8 * 1024; // 8KB output buffer

/// A boxed streaming encoder, as produced by an encoder constructor.
pub type Encoder = Box<dyn EncodeV2 + Send>;

/// Built-in compression codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    /// Brotli compression.
    #[cfg(feature = "brotli")]
    Brotli,
    /// Gzip compression.
    #[cfg(feature = "gzip")]
    Gzip,
    /// Raw DEFLATE compression.
    #[cfg(feature = "deflate")]
    Deflate,
    /// Zstd compression.
    #[cfg(feature = "zstd")]
    Zstd,
}

impl Codec {
    /// Every enabled codec, in default server preference order.
    pub const ALL: &'static [Codec] = &[
        #[cfg(feature = "brotli")]
        Codec::Brotli,
        #[cfg(feature = "gzip")]
        Codec::Gzip,
        #[cfg(feature = "deflate")]
        Codec::Deflate,
        #[cfg(feature = "zstd")]
        Codec::Zstd,
    ];

    /// Returns the Content-Encoding header value for this codec.
    pub fn content_encoding(&self) -> &'static str {
        match self {
            #[cfg(feature = "brotli")]
            Codec::Brotli => "br",
            #[cfg(feature = "gzip")]
            Codec::Gzip => "gzip",
            #[cfg(feature = "deflate")]
            Codec::Deflate => "deflate",
            #[cfg(feature = "zstd")]
            Codec::Zstd => "zstd",
        }
    }

    /// Looks up a codec by its content-coding name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Option<Codec> {
        Self::ALL
            .iter()
            .copied()
            .find(|codec| codec.content_encoding().eq_ignore_ascii_case(name))
    }

    /// Levels accepted by [`Codec::encoder`].
    pub fn levels(&self) -> RangeInclusive<i32> {
        match self {
            #[cfg(feature = "brotli")]
            Codec::Brotli => 0..=11,
            #[cfg(feature = "gzip")]
            Codec::Gzip => 0..=9,
            #[cfg(feature = "deflate")]
            Codec::Deflate => 0..=9,
            #[cfg(feature = "zstd")]
            Codec::Zstd => 1..=22,
        }
    }

    /// Level used when none is configured.
    pub fn default_level(&self) -> i32 {
        match self {
            #[cfg(feature = "brotli")]
            Codec::Brotli => 5,
            #[cfg(feature = "gzip")]
            Codec::Gzip => 5,
            #[cfg(feature = "deflate")]
            Codec::Deflate => 5,
            #[cfg(feature = "zstd")]
            Codec::Zstd => 3,
        }
    }

    /// Creates a new encoder for this codec at the given level.
    pub fn encoder(&self, level: i32) -> io::Result<Encoder> {
        let levels = self.levels();
        if !levels.contains(&level) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "{} accepts levels {}..={}",
                    self.content_encoding(),
                    levels.start(),
                    levels.end()
                ),
            ));
        }

        let encoder: Encoder = match self {
            #[cfg(feature = "brotli")]
            Codec::Brotli => Box::new(BrotliEncoder::new(
                BrotliParams::default().quality(Level::Precise(level)),
            )),
            #[cfg(feature = "gzip")]
            Codec::Gzip => Box::new(GzipEncoder::new(Level::Precise(level).into())),
            #[cfg(feature = "deflate")]
            Codec::Deflate => Box::new(DeflateEncoder::new(Level::Precise(level).into())),
            #[cfg(feature = "zstd")]
            Codec::Zstd => Box::new(ZstdEncoder::new(level)),
        };
        Ok(encoder)
    }
}

/// How to drain the encoder's internal state.
#[derive(Debug, Clone, Copy)]
enum Drain {
    Flush,
    Finish,
}

/// An encoder bound to an output buffer, writing compressed bytes to a sink.
pub(crate) struct EncodeStream {
    encoder: Encoder,
    output_buffer: Vec<u8>,
}

impl EncodeStream {
    pub(crate) fn new(encoder: Encoder) -> Self {
        Self {
            encoder,
            output_buffer: vec![0u8; OUTPUT_BUFFER_SIZE],
        }
    }

    /// Compresses `input` and writes whatever output the encoder produced.
    pub(crate) fn write<W: Write + ?Sized>(&mut self, input: &[u8], sink: &mut W) -> io::Result<()> {
        let mut input_buf = PartialBuffer::new(input);

        // Keep encoding until all input is consumed
        while input_buf.written_len() < input.len() {
            let consumed = input_buf.written_len();
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());

            self.encoder.encode(&mut input_buf, &mut output)?;

            let written = output.written_len();
            if written > 0 {
                sink.write_all(&self.output_buffer[..written])?;
            }

            if written == 0 && input_buf.written_len() == consumed {
                return Err(io::Error::other("encoder made no progress"));
            }
        }

        Ok(())
    }

    /// Emits everything compressed so far, keeping the stream open.
    pub(crate) fn flush<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        self.drain(sink, Drain::Flush)
    }

    /// Finishes the stream, writing the codec's trailing bytes.
    pub(crate) fn finish<W: Write + ?Sized>(&mut self, sink: &mut W) -> io::Result<()> {
        self.drain(sink, Drain::Finish)
    }

    fn drain<W: Write + ?Sized>(&mut self, sink: &mut W, drain: Drain) -> io::Result<()> {
        loop {
            let mut output = WriteBuffer::new_initialized(self.output_buffer.as_mut_slice());

            let done = match drain {
                Drain::Flush => self.encoder.flush(&mut output)?,
                Drain::Finish => self.encoder.finish(&mut output)?,
            };

            let written = output.written_len();
            if written > 0 {
                sink.write_all(&self.output_buffer[..written])?;
            }
            if done {
                return Ok(());
            }
        }
    }
}
