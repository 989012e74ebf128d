use crate::{EventEnvelope, ProviderId};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use hookstream_stream::Headers;
use serde::{Deserialize, Serialize};

/// An event about to be recorded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewEvent {
    /// Provider that sent the webhook.
    pub provider: ProviderId,

    /// Provider-assigned delivery id.
    pub delivery_id: String,

    /// Provider-assigned hook id, if known.
    pub hook_id: Option<String>,

    /// Event name, if known.
    pub event_name: Option<String>,

    /// Payload bytes.
    pub payload: Bytes,

    /// When the webhook was received.
    pub received_at: DateTime<Utc>,
}

impl From<&EventEnvelope> for NewEvent {
    fn from(envelope: &EventEnvelope) -> Self {
        Self {
            provider: envelope.provider,
            delivery_id: envelope.delivery_id.clone(),
            hook_id: Some(envelope.hook_id.clone()),
            event_name: Some(envelope.event.clone()),
            payload: envelope.payload.clone(),
            received_at: envelope.received_at,
        }
    }
}

/// A recorded event. Never mutated once stored.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StoredEvent {
    /// Surrogate id assigned by the store.
    pub id: i64,

    /// Provider that sent the webhook.
    pub provider: ProviderId,

    /// Provider-assigned delivery id.
    pub delivery_id: String,

    /// Provider-assigned hook id, if known.
    pub hook_id: Option<String>,

    /// Event name, if known.
    pub event_name: Option<String>,

    /// Payload bytes.
    pub payload: Bytes,

    /// When the webhook was received.
    pub received_at: DateTime<Utc>,
}

impl StoredEvent {
    /// Builds the record a store returns for `event` under surrogate `id`.
    #[must_use]
    pub fn from_new(id: i64, event: NewEvent) -> Self {
        Self {
            id,
            provider: event.provider,
            delivery_id: event.delivery_id,
            hook_id: event.hook_id,
            event_name: event.event_name,
            payload: event.payload,
            received_at: event.received_at,
        }
    }
}

/// Audit copy of an envelope exactly as it arrived.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RawEvent {
    /// Provider that sent the webhook.
    pub provider: ProviderId,

    /// Provider-assigned delivery id.
    pub delivery_id: String,

    /// All headers the message carried.
    pub headers: Headers,

    /// Untouched body.
    pub payload: Bytes,

    /// When the webhook was received.
    pub received_at: DateTime<Utc>,
}

impl RawEvent {
    /// Captures an envelope together with the headers it travelled with.
    #[must_use]
    pub fn new(envelope: &EventEnvelope, headers: Headers) -> Self {
        Self {
            provider: envelope.provider,
            delivery_id: envelope.delivery_id.clone(),
            headers,
            payload: envelope.payload.clone(),
            received_at: envelope.received_at,
        }
    }
}

/// Criteria for listing events.
///
/// `since` is inclusive and `until` exclusive. An empty `delivery_ids` set
/// means any delivery id.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EventFilter {
    /// Only events from this provider.
    pub provider: Option<ProviderId>,

    /// Only events received at or after this time.
    pub since: Option<DateTime<Utc>>,

    /// Only events received before this time.
    pub until: Option<DateTime<Utc>>,

    /// Only events with one of these delivery ids.
    pub delivery_ids: Vec<String>,

    /// Maximum number of events to return.
    pub limit: Option<u32>,

    /// Number of matching events to skip.
    pub offset: u32,
}

impl EventFilter {
    /// Filter for a single provider.
    #[must_use]
    pub fn for_provider(provider: ProviderId) -> Self {
        Self {
            provider: Some(provider),
            ..Self::default()
        }
    }

    /// Returns true if the event satisfies every criterion except paging.
    #[must_use]
    pub fn matches(&self, event: &StoredEvent) -> bool {
        self.provider.is_none_or(|p| p == event.provider)
            && self.since.is_none_or(|since| event.received_at >= since)
            && self.until.is_none_or(|until| event.received_at < until)
            && (self.delivery_ids.is_empty() || self.delivery_ids.contains(&event.delivery_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::TimeZone;

    fn stored(provider: i64, delivery_id: &str, hour: u32) -> StoredEvent {
        StoredEvent {
            id: 1,
            provider: ProviderId(provider),
            delivery_id: delivery_id.to_string(),
            hook_id: None,
            event_name: Some("push".to_string()),
            payload: Bytes::new(),
            received_at: Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_filter_matches() {
        let event = stored(1, "d-100", 12);

        assert!(EventFilter::default().matches(&event));
        assert!(EventFilter::for_provider(ProviderId(1)).matches(&event));
        assert!(!EventFilter::for_provider(ProviderId(2)).matches(&event));

        let window = EventFilter {
            since: Some(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()),
            until: Some(Utc.with_ymd_and_hms(2026, 3, 1, 13, 0, 0).unwrap()),
            ..EventFilter::default()
        };
        assert!(window.matches(&event));
        assert!(!window.matches(&stored(1, "d-101", 13)));

        let ids = EventFilter {
            delivery_ids: vec!["d-1".to_string(), "d-100".to_string()],
            ..EventFilter::default()
        };
        assert!(ids.matches(&event));
        assert!(!ids.matches(&stored(1, "d-2", 12)));
    }
}
