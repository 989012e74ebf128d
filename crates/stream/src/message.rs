use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Message headers.
pub type Headers = BTreeMap<String, String>;

/// Header carrying a publisher-chosen id used for duplicate suppression.
pub const MESSAGE_ID_HEADER: &str = "Nats-Msg-Id";

/// A message handed to a pull consumer.
///
/// The message stays owned by the consumer until it is acked, nacked,
/// terminated, or its ack wait expires.
pub trait StreamMessage: Debug + Send + Sync + 'static {
    /// The subject the message was published to.
    fn subject(&self) -> &str;

    /// The payload bytes.
    fn payload(&self) -> &Bytes;

    /// Headers published with the message.
    fn headers(&self) -> &Headers;

    /// Sequence of the message in its stream.
    fn sequence(&self) -> u64;

    /// Delivery attempt this message represents, starting at 1.
    fn delivered(&self) -> u64;
}

/// Broker acknowledgment of a publish.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PublishAck {
    /// Stream that stored the message.
    pub stream: String,

    /// Sequence assigned to the message.
    pub sequence: u64,

    /// True if the broker recognised the message id and did not store it again.
    pub duplicate: bool,
}

/// A publish acknowledgment that has not arrived yet.
pub struct PendingAck<E> {
    inner: BoxFuture<'static, Result<PublishAck, E>>,
}

impl<E> PendingAck<E>
where
    E: Send + 'static,
{
    /// Wraps a future resolving to the broker's acknowledgment.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<PublishAck, E>> + Send + 'static,
    {
        Self {
            inner: future.boxed(),
        }
    }

    /// An acknowledgment that is already known.
    pub fn ready(result: Result<PublishAck, E>) -> Self {
        Self::new(futures::future::ready(result))
    }
}

impl<E> Debug for PendingAck<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("PendingAck").finish_non_exhaustive()
    }
}

impl<E> Future for PendingAck<E> {
    type Output = Result<PublishAck, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().inner.as_mut().poll(cx)
    }
}

/// Why a message left the stream without being acknowledged.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum DeadLetterReason {
    /// Delivery attempts reached the consumer's `max_deliver`.
    MaxDeliveries,

    /// The consumer gave up on the message.
    Terminated(String),
}

/// A message that reached a terminal failure state.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct DeadLetter {
    /// Stream the message belongs to.
    pub stream: String,

    /// Durable name of the consumer that gave up.
    pub consumer: String,

    /// Stream sequence of the message.
    pub sequence: u64,

    /// Delivery attempts made.
    pub deliveries: u64,

    /// Subject, when known.
    pub subject: Option<String>,

    /// Why the message was dead-lettered.
    pub reason: DeadLetterReason,
}

/// Snapshot of stream state.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct StreamStats {
    /// Messages currently stored.
    pub messages: u64,

    /// Payload bytes currently stored.
    pub bytes: u64,

    /// Lowest stored sequence (0 when empty).
    pub first_sequence: u64,

    /// Highest sequence ever assigned.
    pub last_sequence: u64,

    /// Number of consumers bound to the stream.
    pub consumer_count: usize,
}

/// Snapshot of consumer state.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConsumerStats {
    /// Durable name.
    pub name: String,

    /// Total deliveries made, including redeliveries.
    pub delivered: u64,

    /// Messages delivered and awaiting acknowledgment.
    pub ack_pending: u64,

    /// Messages not delivered yet.
    pub pending: u64,

    /// Messages delivered more than once.
    pub redelivered: u64,

    /// Messages that exhausted their delivery attempts.
    pub dead_lettered: u64,

    /// Every sequence at or below this one has been acknowledged.
    pub ack_floor: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_ack_resolves() {
        let ack = PublishAck {
            stream: "WEBHOOKS".to_string(),
            sequence: 7,
            duplicate: false,
        };

        let pending = PendingAck::<std::io::Error>::new({
            let ack = ack.clone();
            async move { Ok(ack) }
        });

        assert_eq!(pending.await.unwrap(), ack);
    }

    #[tokio::test]
    async fn test_pending_ack_ready_error() {
        let pending = PendingAck::ready(Err(std::io::Error::other("no responders")));

        assert!(pending.await.is_err());
    }
}
