use async_nats::jetstream::consumer::pull::BatchErrorKind;
use async_nats::jetstream::context::{
    ConsumerInfoErrorKind, CreateStreamErrorKind, GetStreamErrorKind, PublishErrorKind,
};
use async_nats::jetstream::stream::ConsumerErrorKind;
use hookstream_stream::{ConfigError, StreamError};
use thiserror::Error;

/// Errors that can occur in the NATS stream adapter.
#[derive(Debug, Error)]
pub enum Error {
    /// Acknowledgment (ack, nak, or term) could not be sent.
    #[error("failed to acknowledge message: {0}")]
    Ack(String),

    /// Pull request failed.
    #[error("failed to request batch: {0}")]
    Batch(BatchErrorKind),

    /// Consumer could not be bound.
    #[error("failed to bind consumer `{consumer}` to stream `{stream}`: {reason}")]
    Bind {
        /// Stream name.
        stream: String,

        /// Durable consumer name.
        consumer: String,

        /// Why binding failed.
        reason: String,
    },

    /// The stream or consumer handle was closed.
    #[error("handle closed")]
    Closed,

    /// Configuration rejected by validation.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Consumer create or lookup failed.
    #[error("failed to create consumer: {0}")]
    ConsumerCreate(ConsumerErrorKind),

    /// Consumer info request failed.
    #[error("failed to get consumer info: {0}")]
    ConsumerInfo(ConsumerInfoErrorKind),

    /// Stream creation failed.
    #[error("failed to create stream: {0}")]
    CreateStream(CreateStreamErrorKind),

    /// Stream lookup failed.
    #[error("failed to get stream: {0}")]
    GetStream(GetStreamErrorKind),

    /// A message in a batch could not be read.
    #[error("failed to receive message: {0}")]
    Message(String),

    /// Delivery metadata missing from a message.
    #[error("no delivery info on message: {0}")]
    NoInfo(String),

    /// The stream exists but the update could not be applied.
    #[error("failed to provision stream: {0}")]
    Provision(ConfigError),

    /// The broker rejected or failed to acknowledge a publish.
    #[error("failed to publish: {0}")]
    Publish(PublishErrorKind),

    /// Advisory subscription failed.
    #[error("failed to subscribe to advisories: {0}")]
    Subscribe(String),

    /// The broker did not answer in time.
    #[error("timed out waiting for the broker")]
    Timeout,

    /// Stream update failed.
    #[error("failed to update stream: {0}")]
    UpdateStream(String),
}

impl From<PublishErrorKind> for Error {
    fn from(kind: PublishErrorKind) -> Self {
        match kind {
            PublishErrorKind::TimedOut => Self::Timeout,
            kind => Self::Publish(kind),
        }
    }
}

impl StreamError for Error {
    fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}
