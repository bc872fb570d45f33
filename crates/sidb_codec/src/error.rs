//! Errors raised while encoding or decoding persisted cells.

use thiserror::Error;

/// Result alias for the layout codecs.
pub type CodecResult<T> = Result<T, CodecError>;

/// A cell that could not be encoded or did not decode.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The packed DATA value could not be serialized.
    #[error("cannot pack transaction data: {message}")]
    EncodingFailed {
        /// Serializer message.
        message: String,
    },

    /// The packed DATA value is not valid CBOR.
    #[error("cannot unpack transaction data: {message}")]
    DecodingFailed {
        /// Deserializer message.
        message: String,
    },

    /// A fixed-width value had the wrong length.
    #[error("invalid {what} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// What was being decoded.
        what: &'static str,
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },

    /// Unknown transaction state byte.
    #[error("unknown transaction state byte {0:#04x}")]
    UnknownState(u8),

    /// The packed DATA value decoded but has the wrong shape.
    #[error("malformed transaction data: {message}")]
    InvalidStructure {
        /// What was wrong.
        message: String,
    },
}

impl CodecError {
    /// Wraps a serializer failure.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Wraps a deserializer failure.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// A packed value with the wrong shape.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// A fixed-width cell of the wrong size.
    pub fn invalid_length(what: &'static str, expected: usize, actual: usize) -> Self {
        Self::InvalidLength {
            what,
            expected,
            actual,
        }
    }
}
