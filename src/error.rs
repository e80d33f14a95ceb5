use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::codec::CodecError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o failure on `{}`", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("stream i/o failure")]
    Stream {
        #[source]
        source: io::Error,
    },

    #[error("codec failure")]
    Codec(#[from] CodecError),

    #[error("no registered format matches the stream")]
    UnknownFormat,

    #[error("container nesting exceeds {limit} layers")]
    NestingTooDeep { limit: usize },

    #[error("path not found: `{path}`")]
    NotFound { path: String },

    #[error("corrupt data in `{}`: {kind}", .path.display())]
    Corrupt { path: PathBuf, kind: Corruption },

    #[error("operation aborted")]
    Aborted,
}

impl Error {
    /// Whether this error is the cooperative cancellation signal. Abort is
    /// never retried, skipped or logged; it unwinds the whole operation.
    pub fn is_abort(&self) -> bool {
        matches!(self, Error::Aborted | Error::Codec(CodecError::Aborted))
    }
}

/// The ways a codec can report delivered data as untrustworthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    UnsupportedMethod,
    DataError,
    ChecksumMismatch,
}

impl fmt::Display for Corruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Corruption::UnsupportedMethod => "unsupported compression method",
            Corruption::DataError => "data error",
            Corruption::ChecksumMismatch => "checksum mismatch",
        };
        f.write_str(msg)
    }
}
