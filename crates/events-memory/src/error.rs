use hookstream_events::{EventStoreError, ProviderId};
use thiserror::Error;

/// Errors that can occur in the in-memory event store.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The (provider, delivery id) pair is already recorded.
    #[error("event {provider}:{delivery_id} already recorded")]
    Duplicate {
        /// Provider id.
        provider: ProviderId,

        /// Delivery id.
        delivery_id: String,
    },

    /// No event with this (provider, delivery id) pair.
    #[error("event {provider}:{delivery_id} not found")]
    NotFound {
        /// Provider id.
        provider: ProviderId,

        /// Delivery id.
        delivery_id: String,
    },
}

impl EventStoreError for Error {
    fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
