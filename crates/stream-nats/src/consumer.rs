use crate::Error;
use crate::advisory::DeadLetterLog;
use crate::convert::headers_from_nats;

use std::sync::Arc;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_nats::jetstream::AckKind;
use async_nats::jetstream::Message as JetStreamMessage;
use async_nats::jetstream::consumer::Consumer;
use async_nats::jetstream::consumer::pull::Config as NatsConsumerConfig;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use hookstream_stream::{
    ConsumerConfig, ConsumerStats, DeadLetter, Headers, PullConsumer, StreamMessage,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// A message handed out by a [`NatsConsumer`].
#[derive(Debug)]
pub struct NatsMessage {
    delivered: u64,
    headers: Headers,
    inner: JetStreamMessage,
    sequence: u64,
}

impl NatsMessage {
    fn try_from_jetstream(inner: JetStreamMessage) -> Result<Self, Error> {
        let (sequence, delivered) = {
            let info = inner.info().map_err(|e| Error::NoInfo(e.to_string()))?;
            (info.stream_sequence, u64::try_from(info.delivered).unwrap_or(1))
        };

        Ok(Self {
            delivered,
            headers: headers_from_nats(inner.headers.as_ref()),
            inner,
            sequence,
        })
    }
}

impl StreamMessage for NatsMessage {
    fn subject(&self) -> &str {
        self.inner.subject.as_str()
    }

    fn payload(&self) -> &Bytes {
        &self.inner.payload
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn sequence(&self) -> u64 {
        self.sequence
    }

    fn delivered(&self) -> u64 {
        self.delivered
    }
}

/// True if a pull ended because its expiry passed rather than because it failed.
fn is_pull_timeout(error: &async_nats::Error) -> bool {
    error
        .downcast_ref::<io::Error>()
        .is_some_and(|e| e.kind() == io::ErrorKind::TimedOut)
}

/// A handle on a durable JetStream pull consumer.
#[derive(Debug)]
pub struct NatsConsumer {
    closed: AtomicBool,
    config: ConsumerConfig,
    dead_letters: Arc<Mutex<DeadLetterLog>>,
    inner: Consumer<NatsConsumerConfig>,
    shutdown: CancellationToken,
}

impl NatsConsumer {
    pub(crate) const fn new(
        config: ConsumerConfig,
        dead_letters: Arc<Mutex<DeadLetterLog>>,
        inner: Consumer<NatsConsumerConfig>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            closed: AtomicBool::new(false),
            config,
            dead_letters,
            inner,
            shutdown,
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        Ok(())
    }

    async fn ack_with(&self, message: &NatsMessage, kind: AckKind) -> Result<(), Error> {
        self.ensure_open()?;

        message
            .inner
            .ack_with(kind)
            .await
            .map_err(|e| Error::Ack(e.to_string()))
    }
}

#[async_trait]
impl PullConsumer for NatsConsumer {
    type Error = Error;
    type Message = NatsMessage;

    fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    #[instrument(skip(self), fields(consumer = %self.config.durable_name))]
    async fn fetch(&self) -> Result<Vec<NatsMessage>, Error> {
        self.ensure_open()?;

        let mut batch = self
            .inner
            .batch()
            .max_messages(self.config.batch_size)
            .expires(self.config.max_wait)
            .messages()
            .await
            .map_err(|e| Error::Batch(e.kind()))?;

        let mut messages = Vec::with_capacity(self.config.batch_size);

        while let Some(message) = batch.next().await {
            match message {
                Ok(message) => messages.push(NatsMessage::try_from_jetstream(message)?),
                Err(e) if messages.is_empty() && !is_pull_timeout(&e) => {
                    return Err(Error::Message(e.to_string()));
                }
                // Whatever was received before the pull ended is still ours to ack.
                Err(e) => {
                    debug!(error = %e, "batch ended early");
                    break;
                }
            }
        }

        debug!(count = messages.len(), "fetched batch");

        Ok(messages)
    }

    async fn ack(&self, message: &NatsMessage) -> Result<(), Error> {
        self.ack_with(message, AckKind::Ack).await
    }

    async fn nack(&self, message: &NatsMessage, delay: Option<Duration>) -> Result<(), Error> {
        self.ack_with(message, AckKind::Nak(delay)).await
    }

    async fn term(&self, message: &NatsMessage) -> Result<(), Error> {
        self.ack_with(message, AckKind::Term).await
    }

    async fn consumer_info(&self) -> Result<ConsumerStats, Error> {
        self.ensure_open()?;

        let mut consumer = self.inner.clone();
        let info = consumer
            .info()
            .await
            .map_err(|e| Error::ConsumerInfo(e.kind()))?;

        Ok(ConsumerStats {
            name: self.config.durable_name.clone(),
            delivered: info.delivered.consumer_sequence,
            ack_pending: info.num_ack_pending as u64,
            pending: info.num_pending,
            redelivered: info.num_redelivered as u64,
            dead_lettered: self.dead_letters.lock().total,
            ack_floor: info.ack_floor.stream_sequence,
        })
    }

    async fn take_dead_letters(&self) -> Result<Vec<DeadLetter>, Error> {
        self.ensure_open()?;

        Ok(std::mem::take(&mut self.dead_letters.lock().pending))
    }

    async fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.shutdown.cancel();

        let unreported = self.dead_letters.lock().pending.len();
        if unreported > 0 {
            warn!(
                consumer = %self.config.durable_name,
                unreported,
                "closing consumer with unreported dead letters"
            );
        }

        Ok(())
    }
}

impl Drop for NatsConsumer {
    fn drop(&mut self) {
        // Stops the advisory listener of a handle that was never closed.
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{NatsStream, NatsStreamOptions};

    use hookstream_stream::{DurableStream, StreamConfig};
    use serial_test::serial;

    #[test]
    fn test_pull_timeout_is_recognised_by_kind() {
        let timeout: async_nats::Error =
            Box::new(io::Error::new(io::ErrorKind::TimedOut, "pull expired"));
        let failure: async_nats::Error = Box::new(io::Error::new(
            io::ErrorKind::Other,
            "error while processing messages: timed out waiting for heartbeat",
        ));

        assert!(is_pull_timeout(&timeout));
        assert!(!is_pull_timeout(&failure));
        assert!(!is_pull_timeout(&"timed out".into()));
    }

    #[tokio::test]
    #[serial]
    #[ignore = "requires a NATS server on localhost:4222"]
    async fn test_drop_stops_advisory_listener() {
        let client = async_nats::connect("localhost:4222").await.unwrap();
        let name = format!("WEBHOOKS{}", uuid::Uuid::new_v4().simple());
        let stream = NatsStream::new(NatsStreamOptions {
            client,
            publish_timeout: None,
            stream_name: name.clone(),
        });
        stream
            .ensure_stream(&StreamConfig::new(name, ["nats-drop.>"]))
            .await
            .unwrap();

        let consumer = stream
            .create_pull_consumer(ConsumerConfig::new("recorder", "nats-drop.>"))
            .await
            .unwrap();
        let listener = consumer.shutdown.clone();

        assert!(!listener.is_cancelled());
        drop(consumer);
        assert!(listener.is_cancelled());
    }
}
