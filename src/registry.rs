use crate::codec::{Codec, EncodeStream, Encoder};
use crate::error::ConfigError;
use http::HeaderValue;
use std::fmt;
use std::io;
use std::sync::Arc;

type Construct = dyn Fn(i32) -> io::Result<Encoder> + Send + Sync;

/// A registered encoding: its content-coding name, level and constructor.
#[derive(Clone)]
pub struct EncoderSpec {
    name: Arc<str>,
    header_value: HeaderValue,
    level: i32,
    construct: Arc<Construct>,
}

impl EncoderSpec {
    /// The content-coding name, as registered.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The configured compression level.
    pub fn level(&self) -> i32 {
        self.level
    }

    /// Creates a fresh encoder for one response.
    pub fn encoder(&self) -> io::Result<Encoder> {
        (self.construct)(self.level)
    }

    pub(crate) fn header_value(&self) -> &HeaderValue {
        &self.header_value
    }
}

impl fmt::Debug for EncoderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncoderSpec")
            .field("name", &self.name)
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

/// The ordered set of encodings the server is willing to apply.
///
/// Registration order is the server's preference: when a client weighs two
/// encodings equally, the one registered first wins. The registry is built
/// once at startup and only read afterwards.
#[derive(Debug, Clone, Default)]
pub struct EncoderRegistry {
    specs: Vec<EncoderSpec>,
}

impl EncoderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every enabled built-in codec at its default
    /// level, in [`Codec::ALL`] order.
    pub fn with_defaults() -> Self {
        let specs = Codec::ALL
            .iter()
            .map(|codec| builtin_spec(*codec, codec.default_level()))
            .collect();
        Self { specs }
    }

    /// Registers an encoding.
    ///
    /// The constructor is invoked once with `level` and the resulting encoder
    /// is run to completion against a discard sink, so a level the encoder
    /// cannot work with is reported here rather than on the first request.
    pub fn register<F>(&mut self, name: &str, level: i32, construct: F) -> Result<(), ConfigError>
    where
        F: Fn(i32) -> io::Result<Encoder> + Send + Sync + 'static,
    {
        if name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if !is_token(name) {
            return Err(ConfigError::InvalidName(name.to_owned()));
        }
        if self.get(name).is_some() {
            return Err(ConfigError::DuplicateEncoding(name.to_owned()));
        }
        let header_value =
            HeaderValue::from_str(name).map_err(|_| ConfigError::InvalidName(name.to_owned()))?;

        construct(level)
            .and_then(|encoder| EncodeStream::new(encoder).finish(&mut io::sink()))
            .map_err(|source| ConfigError::InvalidLevel {
                name: name.to_owned(),
                level,
                source,
            })?;

        self.specs.push(EncoderSpec {
            name: name.into(),
            header_value,
            level,
            construct: Arc::new(construct),
        });
        Ok(())
    }

    /// Registers a built-in codec under its standard name.
    pub fn register_codec(&mut self, codec: Codec, level: i32) -> Result<(), ConfigError> {
        self.register(codec.content_encoding(), level, move |level| codec.encoder(level))
    }

    /// Registered encodings, most preferred first.
    pub fn list(&self) -> &[EncoderSpec] {
        &self.specs
    }

    /// Looks up an encoding by name, ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&EncoderSpec> {
        self.position(name).map(|index| &self.specs[index])
    }

    /// Server preference rank of an encoding; lower is preferred.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.specs
            .iter()
            .position(|spec| spec.name.eq_ignore_ascii_case(name))
    }

    /// Returns true when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

fn builtin_spec(codec: Codec, level: i32) -> EncoderSpec {
    let name = codec.content_encoding();
    EncoderSpec {
        name: name.into(),
        header_value: HeaderValue::from_static(name),
        level,
        construct: Arc::new(move |level| codec.encoder(level)),
    }
}

/// RFC 9110 `token`.
fn is_token(s: &str) -> bool {
    !s.is_empty()
        && s.bytes().all(|b| {
            b.is_ascii_alphanumeric()
                || matches!(
                    b,
                    b'!' | b'#'
                        | b'$'
                        | b'%'
                        | b'&'
                        | b'\''
                        | b'*'
                        | b'+'
                        | b'-'
                        | b'.'
                        | b'^'
                        | b'_'
                        | b'`'
                        | b'|'
                        | b'~'
                )
        })
}
