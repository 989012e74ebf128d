use hookstream_stream::{ConfigError, StreamError};
use thiserror::Error;

/// Errors that can occur in the in-memory stream.
#[derive(Debug, Error)]
pub enum Error {
    /// Consumer could not be bound.
    #[error("failed to bind consumer `{consumer}` to stream `{stream}`: {reason}")]
    Bind {
        /// Stream name.
        stream: String,

        /// Durable consumer name.
        consumer: String,

        /// Why binding failed.
        reason: &'static str,
    },

    /// The stream or consumer handle was closed.
    #[error("handle closed")]
    Closed,

    /// Configuration rejected by validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No stream captures the subject.
    #[error("no stream captures subject `{0}`")]
    NoMatchingStream(String),

    /// The stream has not been provisioned.
    #[error("stream `{0}` does not exist")]
    NotFound(String),

    /// The stream exists but the update could not be applied.
    #[error("failed to provision stream: {0}")]
    Provision(ConfigError),
}

impl StreamError for Error {}
