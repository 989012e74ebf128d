//! Webhook event envelopes, the event record store contract, and publishing.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod envelope;
mod error;
mod event;
mod publisher;

pub use envelope::{
    DELIVERY_ID_HEADER, EVENT_HEADER, EventEnvelope, HOOK_ID_HEADER, PROVIDER_HEADER,
    ProviderId, RECEIVED_AT_HEADER,
};
pub use error::{DecodeError, PublishError};
pub use event::{EventFilter, NewEvent, RawEvent, StoredEvent};
pub use publisher::StreamEventPublisher;

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use hookstream_stream::PublishAck;

/// Marker trait for event store errors.
pub trait EventStoreError: Debug + Error + Send + Sync + 'static {
    /// True if the (provider, delivery id) pair is already stored.
    fn is_duplicate(&self) -> bool;

    /// True if a looked-up event does not exist.
    fn is_not_found(&self) -> bool;
}

/// Durable record of received events, unique per (provider, delivery id).
///
/// The uniqueness constraint is what makes redelivered messages harmless:
/// a second `save` of the same pair fails with a duplicate error and leaves
/// the first record untouched.
#[async_trait]
pub trait EventStore: Clone + Debug + Send + Sync + 'static {
    /// The error type for the store.
    type Error: EventStoreError;

    /// Records an event.
    async fn save(&self, event: NewEvent) -> Result<StoredEvent, Self::Error>;

    /// Records the audit copy of an envelope.
    async fn save_raw(&self, event: RawEvent) -> Result<(), Self::Error>;

    /// Looks up one event.
    async fn find_by_delivery_id(
        &self,
        provider: ProviderId,
        delivery_id: &str,
    ) -> Result<StoredEvent, Self::Error>;

    /// Lists matching events, newest first.
    async fn find_events(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>, Self::Error>;

    /// Counts matching events, ignoring `limit` and `offset`.
    async fn count_events(&self, filter: &EventFilter) -> Result<u64, Self::Error>;

    /// Returns true if the pair is already recorded.
    async fn event_exists(
        &self,
        provider: ProviderId,
        delivery_id: &str,
    ) -> Result<bool, Self::Error>;
}

/// Marker trait for publisher errors.
pub trait PublisherError: Debug + Error + Send + Sync + 'static {
    /// True if the publish gave up waiting on the broker.
    fn is_timeout(&self) -> bool {
        false
    }
}

/// The narrow contract the gateway publishes through.
#[async_trait]
pub trait EventPublisher: Clone + Debug + Send + Sync + 'static {
    /// The error type for the publisher.
    type Error: PublisherError;

    /// Publishes an envelope and waits for the broker to store it.
    async fn publish(
        &self,
        subject: &str,
        envelope: &EventEnvelope,
    ) -> Result<PublishAck, Self::Error>;
}
