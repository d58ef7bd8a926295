#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// An offset or range fell outside of the currently buffered bytes.
    #[error("offset {offset} len {len} out of bounds for buffer of {total} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        total: usize,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "serde")]
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The frame format catalog cannot be used to synchronize.
    #[error("invalid frame format catalog: {0}")]
    InvalidCatalog(String),

    /// A single frame format definition is inconsistent.
    #[error("invalid frame format {name}: {reason}")]
    InvalidFormat { name: String, reason: String },

    /// Data was provided after the end of the stream was signaled.
    #[error("stream has already been flushed")]
    StreamEnded,

    /// Encoding or decoding a cross-process message failed.
    #[error("codec error: {0}")]
    Codec(String),

    #[error("unsupported schema version {0}")]
    UnsupportedVersion(u8),
}

pub type Result<T> = std::result::Result<T, Error>;
