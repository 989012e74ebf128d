//! Abstract interface for durable streams and pull consumers.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod config;
mod error;
mod message;

/// Subject validation, matching, and token helpers.
pub mod subject;

pub use config::{
    ConsumerConfig, DEFAULT_DUPLICATE_WINDOW, MAX_REPLICAS, RetentionPolicy, StorageClass,
    StreamConfig, validate_name,
};
pub use error::ConfigError;
pub use message::{
    ConsumerStats, DeadLetter, DeadLetterReason, Headers, MESSAGE_ID_HEADER, PendingAck,
    PublishAck, StreamMessage, StreamStats,
};

use std::error::Error;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

/// Marker trait for stream errors.
pub trait StreamError: Debug + Error + Send + Sync + 'static {
    /// True if the operation gave up waiting on the broker.
    fn is_timeout(&self) -> bool {
        false
    }
}

/// A connection to a broker bound to one named stream.
///
/// Handles are cheap to clone and safe to share between publishers and
/// consumers. Dropping or closing a handle never loses stored messages.
#[async_trait]
pub trait DurableStream: Clone + Debug + Send + Sync + 'static {
    /// The error type for the stream.
    type Error: StreamError;

    /// The consumer type created by `create_pull_consumer`.
    type Consumer: PullConsumer<Error = Self::Error>;

    /// Name of the stream this handle is bound to.
    fn name(&self) -> &str;

    /// Creates the stream, or updates it in place when it already exists.
    ///
    /// Calling this again with an identical config is a no-op. Changes the
    /// broker can't apply in place fail instead of being silently applied.
    async fn ensure_stream(&self, config: &StreamConfig) -> Result<(), Self::Error>;

    /// Appends a message and waits for the broker to confirm it is stored.
    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        headers: Headers,
    ) -> Result<PublishAck, Self::Error>;

    /// Hands a message to the broker without waiting for its acknowledgment.
    ///
    /// The caller decides how many `PendingAck`s may be outstanding.
    async fn publish_async(
        &self,
        subject: &str,
        payload: Bytes,
        headers: Headers,
    ) -> Result<PendingAck<Self::Error>, Self::Error>;

    /// Binds a durable pull consumer, resuming its cursor if it already exists.
    async fn create_pull_consumer(
        &self,
        config: ConsumerConfig,
    ) -> Result<Self::Consumer, Self::Error>;

    /// Returns a snapshot of stream state.
    async fn stream_info(&self) -> Result<StreamStats, Self::Error>;

    /// Releases the connection. Safe to call more than once.
    async fn close(&self) -> Result<(), Self::Error>;
}

/// A durable cursor over a stream that hands out batches on request.
#[async_trait]
pub trait PullConsumer: Debug + Send + Sync + 'static {
    /// The error type for the consumer.
    type Error: StreamError;

    /// The message type handed out by `fetch`.
    type Message: StreamMessage;

    /// The consumer configuration.
    fn config(&self) -> &ConsumerConfig;

    /// Requests up to `batch_size` messages, waiting at most `max_wait`.
    ///
    /// An empty batch means nothing was ready; it is not an error.
    async fn fetch(&self) -> Result<Vec<Self::Message>, Self::Error>;

    /// Acknowledges a message. Call only after its side effects are durable.
    async fn ack(&self, message: &Self::Message) -> Result<(), Self::Error>;

    /// Hands a message back for redelivery after `delay`, or at once if `None`.
    ///
    /// The redelivery still counts against `max_deliver`.
    async fn nack(
        &self,
        message: &Self::Message,
        delay: Option<Duration>,
    ) -> Result<(), Self::Error>;

    /// Stops redelivery of a message that can never succeed.
    async fn term(&self, message: &Self::Message) -> Result<(), Self::Error>;

    /// Returns a snapshot of consumer state.
    async fn consumer_info(&self) -> Result<ConsumerStats, Self::Error>;

    /// Drains messages that exhausted their delivery attempts since the last call.
    async fn take_dead_letters(&self) -> Result<Vec<DeadLetter>, Self::Error>;

    /// Unsubscribes. Unacknowledged messages become eligible for redelivery
    /// to other handles using the same durable name.
    async fn close(&self) -> Result<(), Self::Error>;
}
