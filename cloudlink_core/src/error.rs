//! The single error type shared by the core, the bundled codecs and anything
//! that plugs a codec into the handler.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CloudError {
    /// The underlying stream codec could not be initialised.
    #[error("{codec}: unable to init stream: {message}")]
    CodecInit { codec: &'static str, message: String },

    /// A feed/drain step failed, or the input was malformed or truncated.
    #[error("{codec}: stream failed: {message}")]
    CodecStream { codec: &'static str, message: String },

    #[error("unsupported compression type {0}")]
    UnsupportedCompressionType(u8),

    #[error("invalid point cloud layout: {0}")]
    InvalidLayout(String),

    #[error("point cloud has no field named '{0}'")]
    MissingField(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CloudError {
    pub fn init(codec: &'static str, message: impl ToString) -> Self {
        CloudError::CodecInit {
            codec,
            message: message.to_string(),
        }
    }

    pub fn stream(codec: &'static str, message: impl ToString) -> Self {
        CloudError::CodecStream {
            codec,
            message: message.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
