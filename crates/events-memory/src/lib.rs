//! In-memory event record store for local development and testing.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;

pub use error::Error;

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hookstream_events::{
    EventFilter, EventStore, NewEvent, ProviderId, RawEvent, StoredEvent,
};
use tokio::sync::Mutex;

type Key = (ProviderId, String);

#[derive(Debug, Default)]
struct Tables {
    events: HashMap<Key, StoredEvent>,
    raw_events: HashMap<Key, RawEvent>,
    next_id: i64,
}

/// In-memory event store. Clones share the same records.
#[derive(Clone, Debug, Default)]
pub struct MemoryEventStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the audit copy of a delivery, if recorded.
    pub async fn raw_event(&self, provider: ProviderId, delivery_id: &str) -> Option<RawEvent> {
        self.tables
            .lock()
            .await
            .raw_events
            .get(&(provider, delivery_id.to_string()))
            .cloned()
    }
}

fn matching(tables: &Tables, filter: &EventFilter) -> Vec<StoredEvent> {
    let mut events: Vec<StoredEvent> = tables
        .events
        .values()
        .filter(|event| filter.matches(event))
        .cloned()
        .collect();

    events.sort_by_key(|event| Reverse((event.received_at, event.id)));

    events
}

#[async_trait]
impl EventStore for MemoryEventStore {
    type Error = Error;

    async fn save(&self, event: NewEvent) -> Result<StoredEvent, Error> {
        let mut tables = self.tables.lock().await;
        let key = (event.provider, event.delivery_id.clone());

        if tables.events.contains_key(&key) {
            return Err(Error::Duplicate {
                provider: event.provider,
                delivery_id: event.delivery_id,
            });
        }

        tables.next_id += 1;
        let stored = StoredEvent::from_new(tables.next_id, event);
        tables.events.insert(key, stored.clone());

        Ok(stored)
    }

    async fn save_raw(&self, event: RawEvent) -> Result<(), Error> {
        let mut tables = self.tables.lock().await;
        let key = (event.provider, event.delivery_id.clone());

        if tables.raw_events.contains_key(&key) {
            return Err(Error::Duplicate {
                provider: event.provider,
                delivery_id: event.delivery_id,
            });
        }

        tables.raw_events.insert(key, event);

        Ok(())
    }

    async fn find_by_delivery_id(
        &self,
        provider: ProviderId,
        delivery_id: &str,
    ) -> Result<StoredEvent, Error> {
        self.tables
            .lock()
            .await
            .events
            .get(&(provider, delivery_id.to_string()))
            .cloned()
            .ok_or_else(|| Error::NotFound {
                provider,
                delivery_id: delivery_id.to_string(),
            })
    }

    async fn find_events(&self, filter: &EventFilter) -> Result<Vec<StoredEvent>, Error> {
        let tables = self.tables.lock().await;

        let events = matching(&tables, filter)
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit.map_or(usize::MAX, |limit| limit as usize))
            .collect();

        Ok(events)
    }

    async fn count_events(&self, filter: &EventFilter) -> Result<u64, Error> {
        let tables = self.tables.lock().await;

        Ok(tables
            .events
            .values()
            .filter(|event| filter.matches(event))
            .count() as u64)
    }

    async fn event_exists(&self, provider: ProviderId, delivery_id: &str) -> Result<bool, Error> {
        Ok(self
            .tables
            .lock()
            .await
            .events
            .contains_key(&(provider, delivery_id.to_string())))
    }
}
