use crate::codec::Codec;
use crate::content_type::{ContentTypeGate, DEFAULT_CONTENT_TYPES};
use crate::error::ConfigError;
use crate::negotiate::{Negotiation, negotiate};
use crate::registry::EncoderRegistry;
use http::{HeaderMap, header};
use serde::{Deserialize, Serialize};

/// Default minimum body size for compression.
///
/// Bodies that end before reaching this many bytes are sent uncompressed;
/// below roughly one packet the codec framing costs more than it saves.
pub const DEFAULT_MIN_SIZE: usize = 1400;

/// An encoding entry in [`CompressionConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodingConfig {
    /// Content-coding name of a built-in codec (`br`, `gzip`, `deflate`, `zstd`).
    pub name: String,
    /// Compression level; the codec's default when omitted.
    #[serde(default)]
    pub level: Option<i32>,
}

/// Serializable compression settings, validated into a [`Compressor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Encodings offered to clients, most preferred first.
    pub encodings: Vec<EncodingConfig>,
    /// Compressible content types: exact `type/subtype` or `type/*`.
    pub content_types: Vec<String>,
    /// Minimum body size for compression.
    pub min_size: usize,
    /// Content type assumed for responses that declare none.
    pub assume_content_type: Option<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            encodings: Codec::ALL
                .iter()
                .map(|codec| EncodingConfig {
                    name: codec.content_encoding().to_owned(),
                    level: None,
                })
                .collect(),
            content_types: DEFAULT_CONTENT_TYPES
                .iter()
                .map(|content_type| (*content_type).to_owned())
                .collect(),
            min_size: DEFAULT_MIN_SIZE,
            assume_content_type: None,
        }
    }
}

/// Validated, immutable compression policy shared by every request.
///
/// Holds the encoder registry, the content-type gate and the size threshold.
/// Build it once at startup and share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct Compressor {
    registry: EncoderRegistry,
    gate: ContentTypeGate,
    min_size: usize,
}

impl Compressor {
    /// Creates a compressor from a registry and a gate, with the default
    /// minimum size.
    pub fn new(registry: EncoderRegistry, gate: ContentTypeGate) -> Self {
        Self {
            registry,
            gate,
            min_size: DEFAULT_MIN_SIZE,
        }
    }

    /// Validates a [`CompressionConfig`].
    pub fn from_config(config: &CompressionConfig) -> Result<Self, ConfigError> {
        let mut registry = EncoderRegistry::new();
        for encoding in &config.encodings {
            let codec = Codec::from_name(&encoding.name)
                .ok_or_else(|| ConfigError::UnknownEncoding(encoding.name.clone()))?;
            let level = encoding.level.unwrap_or_else(|| codec.default_level());
            registry.register_codec(codec, level)?;
        }

        let mut gate = ContentTypeGate::new(&config.content_types)?;
        if let Some(content_type) = &config.assume_content_type {
            gate = gate.assume_content_type(content_type.clone())?;
        }

        Ok(Self::new(registry, gate).with_min_size(config.min_size))
    }

    /// Sets the minimum body size required for compression.
    pub fn with_min_size(mut self, min_size: usize) -> Self {
        self.set_min_size(min_size);
        self
    }

    pub(crate) fn set_min_size(&mut self, min_size: usize) {
        self.min_size = min_size;
    }

    /// Registered encodings.
    pub fn registry(&self) -> &EncoderRegistry {
        &self.registry
    }

    /// The content-type gate.
    pub fn gate(&self) -> &ContentTypeGate {
        &self.gate
    }

    /// Minimum body size for compression.
    pub fn min_size(&self) -> usize {
        self.min_size
    }

    /// Negotiates an encoding from every `Accept-Encoding` header in `headers`.
    ///
    /// Header values that are not valid UTF-8 are ignored.
    pub fn negotiate(&self, headers: &HeaderMap) -> Negotiation {
        let values = headers
            .get_all(header::ACCEPT_ENCODING)
            .iter()
            .filter_map(|value| value.to_str().ok());
        negotiate(values, &self.registry)
    }
}

impl Default for Compressor {
    fn default() -> Self {
        Self::new(EncoderRegistry::with_defaults(), ContentTypeGate::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_default_compressor() {
        let from_config = Compressor::from_config(&CompressionConfig::default()).unwrap();
        let default = Compressor::default();

        let names = |c: &Compressor| {
            c.registry()
                .list()
                .iter()
                .map(|spec| (spec.name().to_owned(), spec.level()))
                .collect::<Vec<_>>()
        };
        assert_eq!(names(&from_config), names(&default));
        assert_eq!(from_config.min_size(), DEFAULT_MIN_SIZE);
    }

    #[test]
    #[cfg(all(feature = "brotli", feature = "gzip", feature = "deflate"))]
    fn test_deserialize_config() {
        let config: CompressionConfig = serde_json::from_str(
            r#"{
                "encodings": [
                    {"name": "br", "level": 5},
                    {"name": "gzip", "level": 5},
                    {"name": "deflate"}
                ],
                "content_types": ["application/json", "text/*"],
                "min_size": 0
            }"#,
        )
        .unwrap();
        assert_eq!(config.assume_content_type, None);

        let compressor = Compressor::from_config(&config).unwrap();
        assert_eq!(compressor.min_size(), 0);
        assert_eq!(compressor.registry().list().len(), 3);
        assert_eq!(compressor.registry().get("deflate").unwrap().level(), 5);
        assert!(compressor.gate().allows("text/csv"));
        assert!(!compressor.gate().allows("text"));
    }

    #[test]
    fn test_empty_object_is_default() {
        let config: CompressionConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CompressionConfig::default());
    }

    #[test]
    fn test_unknown_encoding() {
        let config = CompressionConfig {
            encodings: vec![EncodingConfig {
                name: "compress".to_owned(),
                level: None,
            }],
            ..Default::default()
        };
        assert!(matches!(
            Compressor::from_config(&config),
            Err(ConfigError::UnknownEncoding(name)) if name == "compress"
        ));
    }

    #[test]
    fn test_invalid_wildcard_fails_config() {
        for pattern in ["audio/*wav", "application*/*"] {
            let config = CompressionConfig {
                content_types: vec![pattern.to_owned()],
                ..Default::default()
            };
            assert!(matches!(
                Compressor::from_config(&config),
                Err(ConfigError::InvalidWildcard(_))
            ));
        }
    }

    #[test]
    fn test_invalid_assumed_content_type_fails_config() {
        let config = CompressionConfig {
            assume_content_type: Some("json".to_owned()),
            ..Default::default()
        };
        assert!(matches!(
            Compressor::from_config(&config),
            Err(ConfigError::InvalidContentType(content_type)) if content_type == "json"
        ));

        let config = CompressionConfig {
            assume_content_type: Some("application/json".to_owned()),
            ..Default::default()
        };
        let compressor = Compressor::from_config(&config).unwrap();
        assert!(compressor.gate().check(None));
    }

    #[test]
    #[cfg(feature = "gzip")]
    fn test_duplicate_encoding_fails_config() {
        let gzip = EncodingConfig {
            name: "gzip".to_owned(),
            level: Some(5),
        };
        let config = CompressionConfig {
            encodings: vec![gzip.clone(), gzip],
            ..Default::default()
        };
        assert!(matches!(
            Compressor::from_config(&config),
            Err(ConfigError::DuplicateEncoding(_))
        ));
    }

    #[test]
    #[cfg(all(feature = "brotli", feature = "gzip"))]
    fn test_negotiate_joins_header_lines() {
        let mut headers = HeaderMap::new();
        headers.append(header::ACCEPT_ENCODING, "gzip;q=0.5".parse().unwrap());
        headers.append(header::ACCEPT_ENCODING, "br;q=0.6".parse().unwrap());

        let compressor = Compressor::default();
        assert_eq!(compressor.negotiate(&headers).encoding(), Some("br"));
        assert_eq!(compressor.negotiate(&HeaderMap::new()).encoding(), None);
    }
}
