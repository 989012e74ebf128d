use hookstream_events::{EventStoreError, ProviderId};
use thiserror::Error;

/// Errors that can occur in the libsql event store.
#[derive(Debug, Error)]
pub enum Error {
    /// A column held a value of the wrong type.
    #[error("column {index} is not {expected}")]
    Column {
        /// Column index.
        index: i32,

        /// Expected type.
        expected: &'static str,
    },

    /// The (provider, delivery id) pair is already recorded.
    #[error("event {provider}:{delivery_id} already recorded")]
    Duplicate {
        /// Provider id.
        provider: ProviderId,

        /// Delivery id.
        delivery_id: String,
    },

    /// Stored headers could not be (de)serialized.
    #[error(transparent)]
    Headers(#[from] serde_json::Error),

    /// Libsql error.
    #[error(transparent)]
    Libsql(#[from] libsql::Error),

    /// No event with this (provider, delivery id) pair.
    #[error("event {provider}:{delivery_id} not found")]
    NotFound {
        /// Provider id.
        provider: ProviderId,

        /// Delivery id.
        delivery_id: String,
    },

    /// A stored timestamp is out of range.
    #[error("stored timestamp {0} is out of range")]
    Timestamp(i64),
}

impl EventStoreError for Error {
    fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
