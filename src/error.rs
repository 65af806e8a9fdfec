use std::io;

/// Errors raised while building the compression configuration.
///
/// These are never produced while serving a request; a bad configuration is
/// rejected before the first response is compressed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An encoding was registered with an empty name.
    #[error("encoding name must not be empty")]
    EmptyName,

    /// An encoding name that cannot appear in a `Content-Encoding` header.
    #[error("encoding name {0:?} is not a valid HTTP token")]
    InvalidName(String),

    /// The same encoding name (compared case-insensitively) was registered twice.
    #[error("encoding {0:?} is already registered")]
    DuplicateEncoding(String),

    /// The encoder rejected the configured level.
    #[error("invalid level {level} for encoding {name:?}: {source}")]
    InvalidLevel {
        /// Encoding name.
        name: String,
        /// Rejected level.
        level: i32,
        /// Error returned by the encoder constructor.
        source: io::Error,
    },

    /// The configuration names an encoding with no built-in codec.
    #[error("unknown encoding {0:?}")]
    UnknownEncoding(String),

    /// A wildcard content-type pattern other than `type/*`.
    #[error("unsupported content-type wildcard pattern {0:?}, only \"type/*\" is supported")]
    InvalidWildcard(String),

    /// A content-type entry that is not of the form `type/subtype`.
    #[error("invalid content-type {0:?}, expected \"type/subtype\"")]
    InvalidContentType(String),
}
