//! Negotiated HTTP response compression middleware for Tower.
//!
//! This crate provides a Tower layer that compresses HTTP response bodies
//! with an encoding negotiated from the client's `Accept-Encoding` header.
//! Brotli, Gzip, Deflate and Zstd are built in; further encoders can be
//! registered on an [`EncoderRegistry`].
//!
//! # Example
//!
//! ```ignore
//! use negotiated_compression::CompressionLayer;
//! use tower::ServiceBuilder;
//!
//! let service = ServiceBuilder::new()
//!     .layer(CompressionLayer::new())
//!     .service(my_service);
//! ```
//!
//! # Negotiation
//!
//! The encoding with the highest quality value wins. Ties go to the encoding
//! registered first; `q=0`, unknown codings and malformed entries are
//! skipped. Without an acceptable encoding the response is sent as-is.
//!
//! # Compression Rules
//!
//! The body is buffered until [`min_size`](CompressionLayer::min_size) bytes
//! have been produced, the body is flushed, or it ends. The middleware will
//! **not** compress responses when:
//! - No registered encoding is acceptable to the client
//! - `Content-Encoding` header is already set
//! - `Content-Range` header is present (range responses)
//! - `Content-Type` is not allowed by the [`ContentTypeGate`]
//! - The body ends before reaching the minimum size, or is empty
//!
//! The middleware will **always flush** after each chunk when:
//! - `X-Accel-Buffering: no` header is present
//! - `Content-Type` is `text/event-stream`
//! - `Content-Type` starts with `application/grpc-web`
//!
//! # Response Modifications
//!
//! `Vary` always includes `Accept-Encoding`. When compression is applied:
//! - `Content-Encoding` header is set to the encoding used
//! - `Content-Length` header is removed (compressed size is unknown)
//! - `Accept-Ranges` header is removed

#![deny(missing_docs)]

mod body;
mod codec;
mod config;
mod content_type;
mod error;
mod future;
mod layer;
mod negotiate;
mod registry;
mod service;
mod writer;

pub use body::CompressionBody;
pub use codec::{Codec, Encoder};
pub use config::{CompressionConfig, Compressor, DEFAULT_MIN_SIZE, EncodingConfig};
pub use content_type::{ContentTypeGate, DEFAULT_CONTENT_TYPES};
pub use error::ConfigError;
pub use future::ResponseFuture;
pub use layer::CompressionLayer;
pub use negotiate::{Negotiation, negotiate};
pub use registry::{EncoderRegistry, EncoderSpec};
pub use service::CompressionService;
pub use writer::{ResponseSink, StreamingWriter, WriterPhase};
