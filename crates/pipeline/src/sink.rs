use std::fmt::Debug;

use async_trait::async_trait;
use hookstream_stream::DeadLetter;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Operator channel for messages that will never be processed.
#[async_trait]
pub trait DeadLetterSink: Debug + Send + Sync + 'static {
    /// Reports one dead letter. Must not fail; sinks log what they can't deliver.
    async fn report(&self, dead_letter: DeadLetter);
}

/// Logs dead letters at `error` level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

#[async_trait]
impl DeadLetterSink for LogSink {
    async fn report(&self, dead_letter: DeadLetter) {
        error!(
            stream = %dead_letter.stream,
            consumer = %dead_letter.consumer,
            sequence = dead_letter.sequence,
            deliveries = dead_letter.deliveries,
            subject = ?dead_letter.subject,
            reason = ?dead_letter.reason,
            "message dead-lettered"
        );
    }
}

/// Forwards dead letters to a channel.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    sender: mpsc::Sender<DeadLetter>,
}

impl ChannelSink {
    /// Creates a sink and the receiving end of its channel.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DeadLetter>) {
        let (sender, receiver) = mpsc::channel(capacity);

        (Self { sender }, receiver)
    }
}

#[async_trait]
impl DeadLetterSink for ChannelSink {
    async fn report(&self, dead_letter: DeadLetter) {
        if let Err(e) = self.sender.send(dead_letter).await {
            // Nobody is listening any more; keep the record in the logs.
            LogSink.report(e.0).await;
            warn!("dead-letter receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use hookstream_stream::DeadLetterReason;
    use tracing_test::traced_test;

    fn dead_letter() -> DeadLetter {
        DeadLetter {
            stream: "WEBHOOKS".to_string(),
            consumer: "recorder".to_string(),
            sequence: 3,
            deliveries: 5,
            subject: Some("webhooks.github.push".to_string()),
            reason: DeadLetterReason::MaxDeliveries,
        }
    }

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut receiver) = ChannelSink::new(4);

        sink.report(dead_letter()).await;

        assert_eq!(receiver.recv().await.unwrap(), dead_letter());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_channel_sink_logs_when_receiver_gone() {
        let (sink, receiver) = ChannelSink::new(1);
        drop(receiver);

        sink.report(dead_letter()).await;

        assert!(logs_contain("message dead-lettered"));
        assert!(logs_contain("sequence=3"));
    }
}
