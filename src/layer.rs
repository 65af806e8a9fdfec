use crate::config::{CompressionConfig, Compressor};
use crate::error::ConfigError;
use crate::service::CompressionService;
use std::sync::Arc;
use tower::Layer;

/// A Tower layer that compresses HTTP response bodies.
///
/// This layer wraps services and compresses response bodies with the
/// encoding negotiated from the client's `Accept-Encoding` header. Every
/// service it produces shares one immutable [`Compressor`].
#[derive(Debug, Clone)]
pub struct CompressionLayer {
    compressor: Arc<Compressor>,
}

impl CompressionLayer {
    /// Creates a new compression layer with default settings.
    ///
    /// Offers every enabled codec at its default level, compresses the
    /// default content types and waits for
    /// [`DEFAULT_MIN_SIZE`](crate::DEFAULT_MIN_SIZE) bytes before compressing.
    pub fn new() -> Self {
        Self::with_compressor(Compressor::default())
    }

    /// Creates a layer from serialized settings.
    pub fn from_config(config: &CompressionConfig) -> Result<Self, ConfigError> {
        Compressor::from_config(config).map(Self::with_compressor)
    }

    /// Creates a layer from an already validated compressor.
    pub fn with_compressor(compressor: Compressor) -> Self {
        Self {
            compressor: Arc::new(compressor),
        }
    }

    /// Sets the minimum body size required for compression.
    ///
    /// Bodies that end before reaching this many bytes are sent
    /// uncompressed.
    pub fn min_size(mut self, size: usize) -> Self {
        Arc::make_mut(&mut self.compressor).set_min_size(size);
        self
    }

    /// Returns the compression policy in use.
    pub fn compressor(&self) -> &Compressor {
        &self.compressor
    }
}

impl Default for CompressionLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Layer<S> for CompressionLayer {
    type Service = CompressionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CompressionService::new(inner, self.compressor.clone())
    }
}
