use crate::Error;

use std::sync::Arc;

use async_nats::Client;
use futures::StreamExt;
use hookstream_stream::{DeadLetter, DeadLetterReason};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Subject the server publishes to when a message exhausts `max_deliver`.
pub fn max_deliveries_subject(stream: &str, consumer: &str) -> String {
    format!("$JS.EVENT.ADVISORY.CONSUMER.MAX_DELIVERIES.{stream}.{consumer}")
}

/// Dead letters seen by a consumer handle.
#[derive(Debug, Default)]
pub struct DeadLetterLog {
    /// Not yet taken by the caller.
    pub pending: Vec<DeadLetter>,

    /// Seen since the handle was bound.
    pub total: u64,
}

#[derive(Debug, Deserialize)]
struct MaxDeliveriesAdvisory {
    stream: String,
    consumer: String,
    stream_seq: u64,
    deliveries: u64,
}

impl From<MaxDeliveriesAdvisory> for DeadLetter {
    fn from(advisory: MaxDeliveriesAdvisory) -> Self {
        Self {
            stream: advisory.stream,
            consumer: advisory.consumer,
            sequence: advisory.stream_seq,
            deliveries: advisory.deliveries,
            subject: None,
            reason: DeadLetterReason::MaxDeliveries,
        }
    }
}

pub fn parse(payload: &[u8]) -> Result<DeadLetter, serde_json::Error> {
    serde_json::from_slice::<MaxDeliveriesAdvisory>(payload).map(Into::into)
}

/// Collects max-delivery advisories for one consumer until cancelled.
pub async fn listen(
    client: Client,
    stream: String,
    consumer: String,
    log: Arc<Mutex<DeadLetterLog>>,
    shutdown: CancellationToken,
) -> Result<(), Error> {
    let subject = max_deliveries_subject(&stream, &consumer);

    let mut subscriber = client
        .subscribe(subject.clone())
        .await
        .map_err(|e| Error::Subscribe(e.to_string()))?;

    debug!(%subject, "listening for advisories");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            message = subscriber.next() => {
                let Some(message) = message else { break };

                match parse(&message.payload) {
                    Ok(dead_letter) => {
                        warn!(
                            %stream,
                            %consumer,
                            sequence = dead_letter.sequence,
                            deliveries = dead_letter.deliveries,
                            "message exhausted delivery attempts"
                        );
                        let mut log = log.lock();
                        log.pending.push(dead_letter);
                        log.total += 1;
                    }
                    Err(e) => warn!(error = ?e, "unreadable advisory"),
                }
            }
        }
    }

    if let Err(e) = subscriber.unsubscribe().await {
        debug!(error = ?e, "advisory unsubscribe failed");
    }

    Ok(())
}
