use crate::{Error, Providers};

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use chrono::Utc;
use hookstream_events::{EventEnvelope, EventPublisher, EventStore, PublisherError};
use tracing::{error, info, warn};

/// Shared state handed to the webhook handler.
#[derive(Clone, Debug)]
pub struct GatewayState<P, E>
where
    P: EventPublisher,
    E: EventStore,
{
    pub(crate) providers: Arc<Providers>,
    pub(crate) publisher: P,
    pub(crate) store: Option<E>,
    pub(crate) subject_prefix: Arc<str>,
}

fn header(headers: &HeaderMap, name: &str) -> Result<String, Error> {
    let value = headers
        .get(name)
        .ok_or_else(|| Error::MissingHeader(name.to_string()))?
        .to_str()
        .map_err(|e| Error::InvalidHeader {
            header: name.to_string(),
            reason: e.to_string(),
        })?
        .trim();

    if value.is_empty() {
        return Err(Error::MissingHeader(name.to_string()));
    }

    Ok(value.to_string())
}

/// Accepts one delivery: `POST /webhooks/{provider}`.
///
/// Every routing header is checked before anything is published. Once the
/// broker has stored the envelope the sender gets `202 Accepted`; processing
/// happens later on the consumer side.
pub(crate) async fn receive<P, E>(
    State(state): State<GatewayState<P, E>>,
    Path(provider_name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), Error>
where
    P: EventPublisher,
    E: EventStore,
{
    let provider = state
        .providers
        .get(&provider_name)
        .ok_or(Error::UnknownProvider(provider_name))?;

    let hook_id = header(&headers, &provider.hook_id_header)?;
    let event = header(&headers, &provider.event_header)?;
    let delivery_id = header(&headers, &provider.delivery_id_header)?;

    let envelope = EventEnvelope {
        provider: provider.id,
        hook_id,
        event,
        delivery_id,
        payload: body,
        received_at: Utc::now(),
    };

    if let Some(store) = &state.store {
        match store
            .event_exists(envelope.provider, &envelope.delivery_id)
            .await
        {
            Ok(true) => {
                info!(
                    provider = %envelope.provider,
                    delivery_id = %envelope.delivery_id,
                    "delivery already recorded"
                );
                return Ok((StatusCode::ACCEPTED, "duplicate"));
            }
            Ok(false) => {}
            // The store is only a shortcut; the broker path still dedupes.
            Err(e) => warn!(error = %e, "duplicate pre-check failed"),
        }
    }

    let subject = envelope.subject(&state.subject_prefix, &provider.name);

    let ack = state
        .publisher
        .publish(&subject, &envelope)
        .await
        .map_err(|e| {
            error!(
                provider = %envelope.provider,
                delivery_id = %envelope.delivery_id,
                subject = %subject,
                error = %e,
                "failed to publish webhook"
            );

            if e.is_timeout() {
                Error::Timeout
            } else {
                Error::Publish(e.to_string())
            }
        })?;

    info!(
        provider = %envelope.provider,
        delivery_id = %envelope.delivery_id,
        subject = %subject,
        sequence = ack.sequence,
        duplicate = ack.duplicate,
        "accepted webhook"
    );

    if ack.duplicate {
        Ok((StatusCode::ACCEPTED, "duplicate"))
    } else {
        Ok((StatusCode::ACCEPTED, "accepted"))
    }
}

pub(crate) async fn health() -> &'static str {
    "ok"
}
