//! In-memory implementation of durable streams for local development and testing.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod consumer;
mod error;
mod state;

pub use consumer::{MemoryConsumer, MemoryMessage};
pub use error::Error;

use state::{BindFailure, StreamState};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use hookstream_stream::subject;
use hookstream_stream::{
    ConfigError, ConsumerConfig, DurableStream, Headers, PendingAck, PublishAck, StreamConfig,
    StreamStats,
};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, instrument};

#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) closed: AtomicBool,
    pub(crate) notify: Notify,
    pub(crate) state: Mutex<Option<StreamState>>,
}

/// Options for configuring a `MemoryStream`.
pub struct MemoryStreamOptions {
    /// Name of the stream the handle is bound to.
    pub stream_name: String,
}

/// An in-memory durable stream.
///
/// Clones share the same stored messages and consumer cursors, the way
/// separate handles on one broker connection would.
#[derive(Clone, Debug)]
pub struct MemoryStream {
    name: String,
    shared: Arc<Shared>,
}

impl MemoryStream {
    /// Creates a handle bound to a stream that is provisioned by `ensure_stream`.
    #[must_use]
    pub fn new(MemoryStreamOptions { stream_name }: MemoryStreamOptions) -> Self {
        Self {
            name: stream_name,
            shared: Arc::new(Shared::default()),
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }

        Ok(())
    }

    fn check_bound(&self, config: &StreamConfig) -> Result<(), Error> {
        if config.name != self.name {
            return Err(Error::Config(ConfigError::StreamMismatch {
                bound: self.name.clone(),
                requested: config.name.clone(),
            }));
        }

        Ok(())
    }
}

#[async_trait]
impl DurableStream for MemoryStream {
    type Error = Error;
    type Consumer = MemoryConsumer;

    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, config), fields(stream = %self.name))]
    async fn ensure_stream(&self, config: &StreamConfig) -> Result<(), Error> {
        self.ensure_open()?;
        self.check_bound(config)?;
        config.validate()?;

        let mut guard = self.shared.state.lock().await;

        match guard.as_mut() {
            None => {
                *guard = Some(StreamState::new(config.clone()));
                info!(subjects = ?config.subjects, "created stream");
            }
            Some(state) => {
                let changes = state.config().diff(config).map_err(Error::Provision)?;

                if changes.is_empty() {
                    debug!("stream already up to date");
                } else {
                    state.update(config.clone(), Instant::now());
                    info!(changes = ?changes, "updated stream");
                }
            }
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
        self.ensure_open()?;
        subject::validate(subject, false)?;

        let ack = {
            let mut guard = self.shared.state.lock().await;
            let state = guard
                .as_mut()
                .ok_or_else(|| Error::NotFound(self.name.clone()))?;

            if !state.config().captures(subject) {
                return Err(Error::NoMatchingStream(subject.to_string()));
            }

            state.append(subject, payload, headers, Instant::now())
        };

        if ack.duplicate {
            debug!(sequence = ack.sequence, "duplicate publish suppressed");
        } else {
            self.shared.notify.notify_waiters();
        }

        Ok(ack)
    }

    async fn publish_async(
        &self,
        subject: &str,
        payload: Bytes,
        headers: Headers,
    ) -> Result<PendingAck<Error>, Error> {
        let result = self.publish(subject, payload, headers).await;

        Ok(PendingAck::ready(result))
    }

    #[instrument(skip(self, config), fields(stream = %self.name, consumer = %config.durable_name))]
    async fn create_pull_consumer(&self, config: ConsumerConfig) -> Result<MemoryConsumer, Error> {
        self.ensure_open()?;
        config.validate()?;

        let bind_error = |reason| Error::Bind {
            stream: self.name.clone(),
            consumer: config.durable_name.clone(),
            reason,
        };

        let instance = {
            let mut guard = self.shared.state.lock().await;
            let state = guard
                .as_mut()
                .ok_or_else(|| bind_error("stream does not exist"))?;

            state
                .bind(config.clone())
                .map_err(|failure| {
                    bind_error(match failure {
                        BindFailure::FilterChanged => {
                            "durable consumer exists with a different filter subject"
                        }
                        BindFailure::FilterOutsideStream => {
                            "filter subject does not overlap the stream subjects"
                        }
                    })
                })?
        };

        debug!(instance, "bound consumer");

        Ok(MemoryConsumer::new(
            self.name.clone(),
            config,
            instance,
            self.shared.clone(),
        ))
    }

    async fn stream_info(&self) -> Result<StreamStats, Error> {
        self.ensure_open()?;

        self.shared
            .state
            .lock()
            .await
            .as_ref()
            .map(StreamState::stats)
            .ok_or_else(|| Error::NotFound(self.name.clone()))
    }

    async fn close(&self) -> Result<(), Error> {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.shared.notify.notify_waiters();
            debug!(stream = %self.name, "stream handle closed");
        }

        Ok(())
    }
}
