use hookstream_stream::{ConfigError, StreamError};
use thiserror::Error;

/// A stream message that can't be turned back into an envelope.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum DecodeError {
    /// A routing header has a value that can't be parsed.
    #[error("invalid header `{header}`: {reason}")]
    InvalidHeader {
        /// Header name.
        header: &'static str,

        /// What is wrong with it.
        reason: String,
    },

    /// A routing header is absent or empty.
    #[error("missing header `{0}`")]
    MissingHeader(&'static str),
}

/// Errors from publishing envelopes onto a durable stream.
#[derive(Debug, Error)]
pub enum PublishError<E>
where
    E: StreamError,
{
    /// The stream adapter failed.
    #[error("failed to publish to stream: {0}")]
    Stream(#[source] E),

    /// The subject built for the envelope is not publishable.
    #[error(transparent)]
    Subject(#[from] ConfigError),
}

impl<E> crate::PublisherError for PublishError<E>
where
    E: StreamError,
{
    fn is_timeout(&self) -> bool {
        match self {
            Self::Stream(e) => e.is_timeout(),
            Self::Subject(_) => false,
        }
    }
}
