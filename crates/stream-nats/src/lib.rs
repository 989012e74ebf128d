//! NATS JetStream implementation of durable streams and pull consumers.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod advisory;
mod consumer;
mod convert;
mod error;

pub use consumer::{NatsConsumer, NatsMessage};
pub use error::Error;

use advisory::DeadLetterLog;
use convert::{
    consumer_config_to_nats, headers_to_nats, stream_config_from_nats, stream_config_to_nats,
};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_nats::Client;
use async_nats::jetstream::context::{GetStreamErrorKind, PublishAckFuture};
use async_nats::jetstream::{Context as JetStreamContext, ErrorCode};
use async_trait::async_trait;
use bytes::Bytes;
use hookstream_stream::subject;
use hookstream_stream::{
    ConfigError, ConsumerConfig, DurableStream, Headers, PendingAck, PublishAck, StreamConfig,
    StreamStats,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Options for configuring a `NatsStream`.
#[derive(Clone, Debug)]
pub struct NatsStreamOptions {
    /// The NATS client to use.
    pub client: Client,

    /// How long a synchronous publish waits for the broker. Defaults to 5 seconds if not set.
    pub publish_timeout: Option<Duration>,

    /// Name of the stream the handle is bound to.
    pub stream_name: String,
}

/// A durable stream backed by NATS JetStream.
#[derive(Clone, Debug)]
pub struct NatsStream {
    client: Client,
    closed: Arc<AtomicBool>,
    jetstream_context: JetStreamContext,
    name: String,
    publish_timeout: Duration,
}

impl NatsStream {
    /// Creates a handle; the stream itself is provisioned by `ensure_stream`.
    #[must_use]
    pub fn new(
        NatsStreamOptions {
            client,
            publish_timeout,
            stream_name,
        }: NatsStreamOptions,
    ) -> Self {
        let jetstream_context = async_nats::jetstream::new(client.clone());

        Self {
            client,
            closed: Arc::new(AtomicBool::new(false)),
            jetstream_context,
            name: stream_name,
            publish_timeout: publish_timeout.unwrap_or(Duration::from_secs(5)),
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        Ok(())
    }

    async fn send(
        &self,
        subject: &str,
        payload: Bytes,
        headers: &Headers,
    ) -> Result<PublishAckFuture, Error> {
        self.ensure_open()?;
        subject::validate(subject, false)?;

        self.jetstream_context
            .publish_with_headers(subject.to_string(), headers_to_nats(headers), payload)
            .await
            .map_err(|e| Error::from(e.kind()))
    }
}

fn is_stream_not_found(kind: &GetStreamErrorKind) -> bool {
    matches!(kind, GetStreamErrorKind::JetStream(e) if e.error_code() == ErrorCode::STREAM_NOT_FOUND)
}

fn to_publish_ack(ack: async_nats::jetstream::publish::PublishAck) -> PublishAck {
    PublishAck {
        stream: ack.stream,
        sequence: ack.sequence,
        duplicate: ack.duplicate,
    }
}

#[async_trait]
impl DurableStream for NatsStream {
    type Error = Error;
    type Consumer = NatsConsumer;

    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, config), fields(stream = %self.name))]
    async fn ensure_stream(&self, config: &StreamConfig) -> Result<(), Error> {
        self.ensure_open()?;

        if config.name != self.name {
            return Err(Error::Config(ConfigError::StreamMismatch {
                bound: self.name.clone(),
                requested: config.name.clone(),
            }));
        }

        config.validate()?;

        match self.jetstream_context.get_stream(&self.name).await {
            Ok(stream) => {
                let existing = stream_config_from_nats(&stream.cached_info().config);
                let changes = existing.diff(config).map_err(Error::Provision)?;

                if changes.is_empty() {
                    debug!("stream already up to date");
                    return Ok(());
                }

                self.jetstream_context
                    .update_stream(stream_config_to_nats(config))
                    .await
                    .map_err(|e| {
                        error!(error = %e, "failed to update stream");
                        Error::UpdateStream(e.to_string())
                    })?;

                info!(changes = ?changes, "updated stream");
            }
            Err(e) if is_stream_not_found(&e.kind()) => {
                self.jetstream_context
                    .create_stream(stream_config_to_nats(config))
                    .await
                    .map_err(|e| Error::CreateStream(e.kind()))?;

                info!(subjects = ?config.subjects, "created stream");
            }
            Err(e) => return Err(Error::GetStream(e.kind())),
        }

        Ok(())
    }

    #[instrument(skip(self, payload, headers), fields(stream = %self.name))]
    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        headers: Headers,
    ) -> Result<PublishAck, Error> {
        let publish = async {
            let ack = self.send(subject, payload, &headers).await?;
            ack.await.map_err(|e| Error::from(e.kind()))
        };

        let ack = tokio::time::timeout(self.publish_timeout, publish)
            .await
            .map_err(|_| Error::Timeout)??;

        if ack.duplicate {
            debug!(sequence = ack.sequence, "duplicate publish suppressed");
        }

        Ok(to_publish_ack(ack))
    }

    async fn publish_async(
        &self,
        subject: &str,
        payload: Bytes,
        headers: Headers,
    ) -> Result<PendingAck<Error>, Error> {
        let ack = self.send(subject, payload, &headers).await?;

        Ok(PendingAck::new(async move {
            ack.await
                .map(to_publish_ack)
                .map_err(|e| Error::from(e.kind()))
        }))
    }

    #[instrument(skip(self, config), fields(stream = %self.name, consumer = %config.durable_name))]
    async fn create_pull_consumer(&self, config: ConsumerConfig) -> Result<NatsConsumer, Error> {
        self.ensure_open()?;
        config.validate()?;

        let stream = match self.jetstream_context.get_stream(&self.name).await {
            Ok(stream) => stream,
            Err(e) if is_stream_not_found(&e.kind()) => {
                return Err(Error::Bind {
                    stream: self.name.clone(),
                    consumer: config.durable_name.clone(),
                    reason: "stream does not exist".to_string(),
                });
            }
            Err(e) => return Err(Error::GetStream(e.kind())),
        };

        let overlaps = stream
            .cached_info()
            .config
            .subjects
            .iter()
            .any(|pattern| subject::overlaps(pattern, &config.filter_subject));

        if !overlaps {
            return Err(Error::Bind {
                stream: self.name.clone(),
                consumer: config.durable_name.clone(),
                reason: "filter subject does not overlap the stream subjects".to_string(),
            });
        }

        let inner = stream
            .get_or_create_consumer(&config.durable_name, consumer_config_to_nats(&config))
            .await
            .map_err(|e| Error::ConsumerCreate(e.kind()))?;

        let bound_filter = &inner.cached_info().config.filter_subject;
        if bound_filter != &config.filter_subject {
            return Err(Error::Bind {
                stream: self.name.clone(),
                consumer: config.durable_name.clone(),
                reason: format!("durable consumer exists with filter subject `{bound_filter}`"),
            });
        }

        let dead_letters = Arc::new(Mutex::new(DeadLetterLog::default()));
        let shutdown = CancellationToken::new();

        tokio::spawn({
            let client = self.client.clone();
            let stream = self.name.clone();
            let consumer = config.durable_name.clone();
            let dead_letters = dead_letters.clone();
            let shutdown = shutdown.clone();

            async move {
                if let Err(e) =
                    advisory::listen(client, stream, consumer, dead_letters, shutdown).await
                {
                    error!(error = %e, "advisory listener stopped");
                }
            }
        });

        debug!("bound consumer");

        Ok(NatsConsumer::new(config, dead_letters, inner, shutdown))
    }

    async fn stream_info(&self) -> Result<StreamStats, Error> {
        self.ensure_open()?;

        let stream = self
            .jetstream_context
            .get_stream(&self.name)
            .await
            .map_err(|e| Error::GetStream(e.kind()))?;

        let state = &stream.cached_info().state;

        Ok(StreamStats {
            messages: state.messages,
            bytes: state.bytes,
            first_sequence: state.first_sequence,
            last_sequence: state.last_sequence,
            consumer_count: state.consumer_count,
        })
    }

    async fn close(&self) -> Result<(), Error> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        // Pending publishes must reach the server before the handle goes away.
        if let Err(e) = self.client.flush().await {
            debug!(error = %e, "flush on close failed");
        }

        debug!(stream = %self.name, "stream handle closed");

        Ok(())
    }
}
