use crate::Error;

use std::collections::HashMap;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use hookstream_events::{
    EventEnvelope, EventFilter, EventStore, ProviderId, StoredEvent, StreamEventPublisher,
};
use hookstream_stream::{DurableStream, PendingAck, PublishAck};
use tracing::{info, instrument, warn};

/// Options for configuring a `Replayer`.
#[derive(Debug)]
pub struct ReplayerOptions<S, E> {
    /// Provider names used to build subjects. Unknown providers use their id.
    pub provider_names: HashMap<ProviderId, String>,

    /// Where events are read from.
    pub store: E,

    /// Stream events are published to.
    pub stream: S,

    /// First subject token.
    pub subject_prefix: String,

    /// Most acknowledgments left outstanding at once. Defaults to 64 if not set.
    pub window: Option<usize>,
}

/// Outcome of a replay run.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReplayReport {
    /// Events the broker stored again.
    pub published: usize,

    /// Events the broker recognised as already published.
    pub duplicates: usize,

    /// Events lacking the identifiers needed to rebuild an envelope.
    pub skipped: usize,
}

impl ReplayReport {
    fn record(&mut self, ack: &PublishAck) {
        if ack.duplicate {
            self.duplicates += 1;
        } else {
            self.published += 1;
        }
    }
}

/// Publishes recorded events back onto the stream.
///
/// Publishes are pipelined: up to `window` acknowledgments are awaited
/// concurrently, and every one of them is awaited before `replay` returns.
#[derive(Debug)]
pub struct Replayer<S, E>
where
    S: DurableStream,
    E: EventStore,
{
    provider_names: HashMap<ProviderId, String>,
    publisher: StreamEventPublisher<S>,
    store: E,
    subject_prefix: String,
    window: usize,
}

impl<S, E> Replayer<S, E>
where
    S: DurableStream,
    E: EventStore,
{
    /// Creates a new instance of `Replayer`.
    #[must_use]
    pub fn new(
        ReplayerOptions {
            provider_names,
            store,
            stream,
            subject_prefix,
            window,
        }: ReplayerOptions<S, E>,
    ) -> Self {
        Self {
            provider_names,
            publisher: StreamEventPublisher::new(stream),
            store,
            subject_prefix,
            window: window.unwrap_or(64).max(1),
        }
    }

    fn envelope(event: StoredEvent) -> Option<EventEnvelope> {
        Some(EventEnvelope {
            provider: event.provider,
            hook_id: event.hook_id.filter(|id| !id.is_empty())?,
            event: event.event_name.filter(|name| !name.is_empty())?,
            delivery_id: event.delivery_id,
            payload: event.payload,
            received_at: event.received_at,
        })
    }

    /// Re-publishes every event matching `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store can't be read or the broker rejects a publish.
    #[instrument(skip(self, filter))]
    pub async fn replay(&self, filter: &EventFilter) -> Result<ReplayReport, Error<S::Error, E::Error>> {
        let mut events = self.store.find_events(filter).await.map_err(Error::Store)?;
        events.reverse();

        let mut report = ReplayReport::default();
        let mut in_flight = FuturesUnordered::<PendingAck<S::Error>>::new();

        for event in events {
            let (provider, delivery_id) = (event.provider, event.delivery_id.clone());

            let Some(envelope) = Self::envelope(event) else {
                warn!(provider = %provider, delivery_id = %delivery_id, "event can't be replayed");
                report.skipped += 1;
                continue;
            };

            if in_flight.len() >= self.window {
                if let Some(result) = in_flight.next().await {
                    report.record(&result.map_err(Error::Stream)?);
                }
            }

            let provider_name = self
                .provider_names
                .get(&provider)
                .cloned()
                .unwrap_or_else(|| provider.to_string());
            let subject = envelope.subject(&self.subject_prefix, &provider_name);

            let pending = self
                .publisher
                .publish_async(&subject, &envelope)
                .await
                .map_err(Error::Publish)?;

            in_flight.push(pending);
        }

        while let Some(result) = in_flight.next().await {
            report.record(&result.map_err(Error::Stream)?);
        }

        info!(?report, "replay finished");

        Ok(report)
    }
}
