//! Error types for the datamosh library.
//!
//! Every error is fatal to the run: the whole point of the tool is byte-exact
//! output, so nothing is silently skipped or recovered from. Errors propagate
//! to the entry point, which prints one diagnostic and exits non-zero.

use thiserror::Error;

/// Main error type for the datamosh library.
#[derive(Error, Debug)]
pub enum Error {
    /// Codec errors (frame parsing, feature application).
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Bitstream parsing errors.
    #[error("Bitstream error: {0}")]
    Bitstream(#[from] BitstreamError),

    /// Interchange document parsing errors.
    #[error("Document error: {0}")]
    Document(#[from] datamosh_json::ParseError),

    /// Script loading or execution errors.
    #[error("Script error: {0}")]
    Script(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid parameter provided.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Unsupported feature or format.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Resource exhausted (queue slots, buffers, etc.).
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// End of stream reached.
    #[error("End of stream")]
    EndOfStream,
}

/// Codec errors.
#[derive(Error, Debug)]
pub enum CodecError {
    /// Unknown or unsupported codec for glitching.
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    /// Bitstream corruption detected while replicating a frame.
    #[error("Bitstream corruption at offset {offset}")]
    BitstreamCorruption { offset: u64 },

    /// Invalid syntax element value.
    #[error("Invalid syntax element: {element} = {value}")]
    InvalidSyntax { element: String, value: i64 },

    /// An applied document does not match the frame being rebuilt.
    #[error("Document mismatch: {0}")]
    DocumentMismatch(String),

    /// No exported data for a frame that the input stream contains.
    #[error("Missing frame data for packet at position {pos}")]
    MissingFrame { pos: i64 },

    /// Generic codec error message.
    #[error("{0}")]
    Other(String),
}

impl From<String> for CodecError {
    fn from(s: String) -> Self {
        CodecError::Other(s)
    }
}

impl From<&str> for CodecError {
    fn from(s: &str) -> Self {
        CodecError::Other(s.to_string())
    }
}

/// Bitstream output errors.
#[derive(Error, Debug)]
pub enum BitstreamError {
    /// Generic bitstream error message.
    #[error("{0}")]
    Other(String),
}

impl From<String> for BitstreamError {
    fn from(s: String) -> Self {
        BitstreamError::Other(s)
    }
}

impl From<&str> for BitstreamError {
    fn from(s: &str) -> Self {
        BitstreamError::Other(s.to_string())
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a script error.
    pub fn script(msg: impl Into<String>) -> Self {
        Error::Script(msg.into())
    }

    /// Create an invalid parameter error.
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Error::InvalidParameter(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Error::Unsupported(msg.into())
    }

    /// Check if this is an end-of-stream error.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, Error::EndOfStream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("output file required".into());
        assert_eq!(err.to_string(), "Configuration error: output file required");
    }

    #[test]
    fn test_codec_error_conversion() {
        let codec_err = CodecError::MissingFrame { pos: 512 };
        let err: Error = codec_err.into();
        assert!(matches!(
            err,
            Error::Codec(CodecError::MissingFrame { pos: 512 })
        ));
    }

    #[test]
    fn test_is_eof() {
        assert!(Error::EndOfStream.is_eof());
        assert!(!Error::Script("boom".into()).is_eof());
    }
}
