use crate::{EventEnvelope, EventPublisher, PublishError};

use async_trait::async_trait;
use hookstream_stream::{DurableStream, PendingAck, PublishAck, subject};
use tracing::{debug, instrument};

/// Publishes envelopes onto a durable stream.
///
/// The raw body becomes the message payload and the routing identifiers
/// travel as headers, including the message id used for duplicate suppression.
#[derive(Clone, Debug)]
pub struct StreamEventPublisher<S>
where
    S: DurableStream,
{
    stream: S,
}

impl<S> StreamEventPublisher<S>
where
    S: DurableStream,
{
    /// Wraps a stream handle.
    #[must_use]
    pub const fn new(stream: S) -> Self {
        Self { stream }
    }

    /// The underlying stream handle.
    pub const fn stream(&self) -> &S {
        &self.stream
    }

    /// Hands an envelope to the broker without waiting for its acknowledgment.
    ///
    /// # Errors
    ///
    /// Returns an error if the subject is invalid or the broker refuses the message.
    pub async fn publish_async(
        &self,
        subject: &str,
        envelope: &EventEnvelope,
    ) -> Result<PendingAck<S::Error>, PublishError<S::Error>> {
        subject::validate(subject, false)?;

        self.stream
            .publish_async(subject, envelope.payload.clone(), envelope.to_headers())
            .await
            .map_err(PublishError::Stream)
    }
}

#[async_trait]
impl<S> EventPublisher for StreamEventPublisher<S>
where
    S: DurableStream,
{
    type Error = PublishError<S::Error>;

    #[instrument(skip(self, envelope), fields(provider = %envelope.provider, delivery_id = %envelope.delivery_id))]
    async fn publish(
        &self,
        subject: &str,
        envelope: &EventEnvelope,
    ) -> Result<PublishAck, Self::Error> {
        subject::validate(subject, false)?;

        let ack = self
            .stream
            .publish(subject, envelope.payload.clone(), envelope.to_headers())
            .await
            .map_err(PublishError::Stream)?;

        debug!(sequence = ack.sequence, duplicate = ack.duplicate, "published envelope");

        Ok(ack)
    }
}
