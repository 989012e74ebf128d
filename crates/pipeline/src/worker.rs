use crate::{DeadLetterSink, Error};

use std::sync::Arc;
use std::time::Duration;

use hookstream_events::{EventEnvelope, EventStore, EventStoreError, NewEvent, RawEvent};
use hookstream_stream::{DeadLetter, DeadLetterReason, PullConsumer, StreamMessage};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

/// Options for configuring a `Worker`.
#[derive(Debug)]
pub struct WorkerOptions<C, E, D> {
    /// Consumer the worker pulls from.
    pub consumer: C,

    /// How long to wait after a failed fetch before trying again. Defaults to 1 second if not set.
    pub error_backoff: Option<Duration>,

    /// How long a message that failed to record waits before redelivery.
    /// Defaults to the consumer's ack wait if not set.
    pub retry_delay: Option<Duration>,

    /// Where unprocessable messages are reported.
    pub sink: D,

    /// Where events are recorded.
    pub store: E,

    /// Name of the stream the consumer reads, used in dead-letter reports.
    pub stream_name: String,
}

/// What happened to one message.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// Recorded for the first time and acked.
    Stored,

    /// Already recorded; acked without reprocessing.
    Duplicate,

    /// Recording failed; nacked for delayed redelivery.
    Retry,

    /// Can never be processed; terminated and reported.
    Terminated,
}

/// Tally of one fetched batch.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BatchReport {
    /// Messages recorded for the first time.
    pub stored: usize,

    /// Messages that were already recorded.
    pub duplicates: usize,

    /// Messages handed back for redelivery.
    pub retried: usize,

    /// Messages terminated as unprocessable.
    pub terminated: usize,

    /// Dead letters forwarded to the sink.
    pub dead_lettered: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Stored => self.stored += 1,
            Outcome::Duplicate => self.duplicates += 1,
            Outcome::Retry => self.retried += 1,
            Outcome::Terminated => self.terminated += 1,
        }
    }

    /// Number of messages fetched in the batch.
    #[must_use]
    pub const fn fetched(&self) -> usize {
        self.stored + self.duplicates + self.retried + self.terminated
    }
}

struct Processor<C, E, D> {
    consumer: C,
    retry_delay: Duration,
    sink: D,
    store: E,
    stream_name: String,
}

impl<C, E, D> Processor<C, E, D>
where
    C: PullConsumer,
    E: EventStore,
    D: DeadLetterSink,
{
    async fn process_batch(&self) -> Result<BatchReport, C::Error> {
        let messages = self.consumer.fetch().await?;

        self.process(messages).await
    }

    async fn process(&self, messages: Vec<C::Message>) -> Result<BatchReport, C::Error> {
        let mut report = BatchReport::default();

        for message in &messages {
            report.record(self.handle(message).await);
        }

        for dead_letter in self.consumer.take_dead_letters().await? {
            self.sink.report(dead_letter).await;
            report.dead_lettered += 1;
        }

        if report.fetched() > 0 || report.dead_lettered > 0 {
            debug!(?report, "processed batch");
        }

        Ok(report)
    }

    #[instrument(skip(self, message), fields(subject = %message.subject(), sequence = message.sequence(), delivered = message.delivered()))]
    async fn handle(&self, message: &C::Message) -> Outcome {
        let envelope = match EventEnvelope::from_parts(message.headers(), message.payload().clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "undecodable message");
                return self.terminate(message, e.to_string()).await;
            }
        };

        let raw = RawEvent::new(&envelope, message.headers().clone());

        if let Err(e) = self.store.save_raw(raw).await {
            if !e.is_duplicate() {
                error!(
                    provider = %envelope.provider,
                    delivery_id = %envelope.delivery_id,
                    error = %e,
                    "failed to record raw event"
                );
                return self.retry(message).await;
            }
        }

        match self.store.save(NewEvent::from(&envelope)).await {
            Ok(stored) => {
                info!(
                    provider = %envelope.provider,
                    delivery_id = %envelope.delivery_id,
                    id = stored.id,
                    "recorded event"
                );
                self.ack(message, Outcome::Stored).await
            }
            Err(e) if e.is_duplicate() => {
                debug!(
                    provider = %envelope.provider,
                    delivery_id = %envelope.delivery_id,
                    "event already recorded"
                );
                self.ack(message, Outcome::Duplicate).await
            }
            Err(e) => {
                error!(
                    provider = %envelope.provider,
                    delivery_id = %envelope.delivery_id,
                    error = %e,
                    "failed to record event"
                );
                self.retry(message).await
            }
        }
    }

    async fn ack(&self, message: &C::Message, outcome: Outcome) -> Outcome {
        // An ack that doesn't arrive means a redelivery, which the store absorbs.
        if let Err(e) = self.consumer.ack(message).await {
            warn!(error = %e, "failed to ack message");
        }

        outcome
    }

    async fn retry(&self, message: &C::Message) -> Outcome {
        if let Err(e) = self.consumer.nack(message, Some(self.retry_delay)).await {
            warn!(error = %e, "failed to nack message");
        }

        Outcome::Retry
    }

    async fn terminate(&self, message: &C::Message, reason: String) -> Outcome {
        if let Err(e) = self.consumer.term(message).await {
            warn!(error = %e, "failed to terminate message");
        }

        self.sink
            .report(DeadLetter {
                stream: self.stream_name.clone(),
                consumer: self.consumer.config().durable_name.clone(),
                sequence: message.sequence(),
                deliveries: message.delivered(),
                subject: Some(message.subject().to_string()),
                reason: DeadLetterReason::Terminated(reason),
            })
            .await;

        Outcome::Terminated
    }
}

/// Pulls batches from a consumer and records each event exactly once.
///
/// A message is acked only after the store holds its event. Storage failures
/// nack the message so it comes back after the retry delay; a duplicate
/// counts as done.
pub struct Worker<C, E, D>
where
    C: PullConsumer,
    E: EventStore,
    D: DeadLetterSink,
{
    error_backoff: Duration,
    processor: Arc<Processor<C, E, D>>,
    shutdown_token: CancellationToken,
    task_tracker: TaskTracker,
}

impl<C, E, D> Worker<C, E, D>
where
    C: PullConsumer,
    E: EventStore,
    D: DeadLetterSink,
{
    /// Creates a new instance of `Worker`.
    #[must_use]
    pub fn new(
        WorkerOptions {
            consumer,
            error_backoff,
            retry_delay,
            sink,
            store,
            stream_name,
        }: WorkerOptions<C, E, D>,
    ) -> Self {
        let retry_delay = retry_delay.unwrap_or(consumer.config().ack_wait);

        Self {
            error_backoff: error_backoff.unwrap_or(Duration::from_secs(1)),
            processor: Arc::new(Processor {
                consumer,
                retry_delay,
                sink,
                store,
                stream_name,
            }),
            shutdown_token: CancellationToken::new(),
            task_tracker: TaskTracker::new(),
        }
    }

    /// Fetches one batch and processes every message in it.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetch itself fails. Per-message failures are
    /// handled by nacking or terminating and show up in the report.
    pub async fn process_batch(&self) -> Result<BatchReport, C::Error> {
        self.processor.process_batch().await
    }

    /// Runs the pull loop in the background until `shutdown`.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker was already started.
    pub fn start(&self) -> Result<JoinHandle<()>, Error<C::Error, E::Error>> {
        if self.task_tracker.is_closed() {
            return Err(Error::AlreadyStarted);
        }

        let processor = self.processor.clone();
        let shutdown_token = self.shutdown_token.clone();
        let error_backoff = self.error_backoff;

        let handle = self.task_tracker.spawn(async move {
            info!(consumer = %processor.consumer.config().durable_name, "worker started");

            loop {
                // Only the fetch is abandoned on shutdown; a fetched batch is always finished.
                let fetched = tokio::select! {
                    () = shutdown_token.cancelled() => break,
                    result = processor.consumer.fetch() => result,
                };

                let result = match fetched {
                    Ok(messages) => processor.process(messages).await,
                    Err(e) => Err(e),
                };

                if let Err(e) = result {
                    error!(error = %e, "failed to pull from consumer");

                    tokio::select! {
                        () = shutdown_token.cancelled() => break,
                        () = tokio::time::sleep(error_backoff) => {}
                    }
                }
            }

            if let Err(e) = processor.consumer.close().await {
                warn!(error = %e, "failed to close consumer");
            }

            info!("worker stopped");
        });

        self.task_tracker.close();

        Ok(handle)
    }

    /// Stops fetching, waits for the in-flight batch and closes the consumer.
    pub async fn shutdown(&self) {
        info!("worker shutting down...");

        self.shutdown_token.cancel();
        self.task_tracker.wait().await;

        info!("worker shutdown");
    }
}
