use crate::Shared;
use crate::error::Error;
use crate::state::StoredMessage;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use hookstream_stream::{
    ConsumerConfig, ConsumerStats, DeadLetter, Headers, PullConsumer, StreamMessage,
};
use tokio::time::Instant;
use tracing::{debug, instrument};

/// A message handed out by a [`MemoryConsumer`].
#[derive(Clone, Debug)]
pub struct MemoryMessage {
    subject: String,
    payload: Bytes,
    headers: Headers,
    sequence: u64,
    delivered: u64,
}

impl MemoryMessage {
    pub(crate) fn new(sequence: u64, stored: &StoredMessage, delivered: u64) -> Self {
        Self {
            subject: stored.subject.clone(),
            payload: stored.payload.clone(),
            headers: stored.headers.clone(),
            sequence,
            delivered,
        }
    }
}

impl StreamMessage for MemoryMessage {
    fn subject(&self) -> &str {
        &self.subject
    }

    fn payload(&self) -> &Bytes {
        &self.payload
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

/// A handle on a durable cursor of a [`MemoryStream`](crate::MemoryStream).
#[derive(Debug)]
pub struct MemoryConsumer {
    closed: AtomicBool,
    config: ConsumerConfig,
    instance: u64,
    shared: Arc<Shared>,
    stream: String,
}

impl MemoryConsumer {
    pub(crate) const fn new(
        stream: String,
        config: ConsumerConfig,
        instance: u64,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            closed: AtomicBool::new(false),
            config,
            instance,
            shared,
            stream,
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) || self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        Ok(())
    }

    async fn settle<F>(&self, message: &MemoryMessage, op: F) -> Result<(), Error>
    where
        F: FnOnce(&mut crate::state::StreamState, &str, u64) -> bool + Send,
    {
        self.ensure_open()?;

        let mut guard = self.shared.state.lock().await;
        let state = guard
            .as_mut()
            .ok_or_else(|| Error::NotFound(self.stream.clone()))?;

        if !op(state, &self.config.durable_name, message.sequence) {
            debug!(
                consumer = %self.config.durable_name,
                sequence = message.sequence,
                "message no longer outstanding"
            );
        }

        drop(guard);
        self.shared.notify.notify_waiters();

        Ok(())
    }
}

#[async_trait]
impl PullConsumer for MemoryConsumer {
    type Error = Error;
    type Message = MemoryMessage;

    fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    #[instrument(skip(self), fields(consumer = %self.config.durable_name))]
    async fn fetch(&self) -> Result<Vec<MemoryMessage>, Error> {
        let deadline = Instant::now() + self.config.max_wait;

        loop {
            self.ensure_open()?;

            // Register interest before looking so a publish between the check
            // and the wait is not missed.
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake = {
                let mut guard = self.shared.state.lock().await;
                let state = guard
                    .as_mut()
                    .ok_or_else(|| Error::NotFound(self.stream.clone()))?;

                let batch = state.fetch(&self.config.durable_name, self.instance, Instant::now());
                if !batch.is_empty() {
                    debug!(count = batch.len(), "fetched batch");
                    return Ok(batch);
                }

                state
                    .next_deadline(&self.config.durable_name)
                    .map_or(deadline, |next| next.min(deadline))
            };

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }

            tokio::select! {
                () = &mut notified => {}
                () = tokio::time::sleep_until(wake) => {}
            }
        }
    }

    async fn ack(&self, message: &MemoryMessage) -> Result<(), Error> {
        self.settle(message, |state, durable, seq| state.ack(durable, seq))
            .await
    }

    async fn nack(&self, message: &MemoryMessage, delay: Option<Duration>) -> Result<(), Error> {
        self.settle(message, |state, durable, seq| {
            state.nack(durable, seq, Instant::now(), delay)
        })
        .await
    }

    async fn term(&self, message: &MemoryMessage) -> Result<(), Error> {
        self.settle(message, |state, durable, seq| state.term(durable, seq))
            .await
    }

    async fn consumer_info(&self) -> Result<ConsumerStats, Error> {
        self.ensure_open()?;

        let guard = self.shared.state.lock().await;

        guard
            .as_ref()
            .and_then(|state| state.consumer_stats(&self.config.durable_name))
            .ok_or_else(|| Error::NotFound(self.stream.clone()))
    }

    async fn take_dead_letters(&self) -> Result<Vec<DeadLetter>, Error> {
        self.ensure_open()?;

        let mut guard = self.shared.state.lock().await;

        Ok(guard
            .as_mut()
            .map(|state| state.take_dead_letters(&self.config.durable_name))
            .unwrap_or_default())
    }

    async fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(state) = self.shared.state.lock().await.as_mut() {
            state.release(&self.config.durable_name, self.instance);
        }

        self.shared.notify.notify_waiters();

        debug!(consumer = %self.config.durable_name, "consumer closed");

        Ok(())
    }
}
