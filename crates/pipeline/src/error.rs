use hookstream_events::{EventStoreError, PublishError};
use hookstream_stream::StreamError;
use thiserror::Error;

/// Errors that can occur while consuming or replaying events.
#[derive(Debug, Error)]
pub enum Error<S, E>
where
    S: StreamError,
    E: EventStoreError,
{
    /// The worker was already started.
    #[error("the worker has already been started")]
    AlreadyStarted,

    /// An envelope could not be handed to the broker.
    #[error(transparent)]
    Publish(PublishError<S>),

    /// The event store failed.
    #[error("event store error: {0}")]
    Store(#[source] E),

    /// The stream or consumer failed.
    #[error("stream error: {0}")]
    Stream(#[source] S),
}
