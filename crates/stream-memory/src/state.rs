use crate::consumer::MemoryMessage;

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use bytes::Bytes;
use hookstream_stream::subject;
use hookstream_stream::{
    ConsumerConfig, ConsumerStats, DeadLetter, DeadLetterReason, Headers, MESSAGE_ID_HEADER,
    PublishAck, RetentionPolicy, StreamConfig, StreamStats,
};
use tokio::time::Instant;

#[derive(Debug)]
pub struct StoredMessage {
    pub subject: String,
    pub payload: Bytes,
    pub headers: Headers,
    pub stored_at: Instant,
}

/// An outstanding delivery. `deadline` of `None` means ready for redelivery now.
#[derive(Debug)]
struct Delivery {
    count: u64,
    deadline: Option<Instant>,
    instance: u64,
}

#[derive(Debug)]
struct ConsumerState {
    config: ConsumerConfig,
    cursor: u64,
    outstanding: BTreeMap<u64, Delivery>,
    delivered: u64,
    redelivered: u64,
    dead_lettered: u64,
    dead_letters: Vec<DeadLetter>,
    next_instance: u64,
}

impl ConsumerState {
    fn is_done_with(&self, seq: u64, subject: &str) -> bool {
        !subject::matches(&self.config.filter_subject, subject)
            || (self.cursor > seq && !self.outstanding.contains_key(&seq))
    }
}

#[derive(Debug)]
pub struct StreamState {
    config: StreamConfig,
    messages: BTreeMap<u64, StoredMessage>,
    last_sequence: u64,
    bytes: u64,
    message_ids: HashMap<String, (u64, Instant)>,
    consumers: HashMap<String, ConsumerState>,
}

/// Why a consumer could not be bound.
#[derive(Debug)]
pub enum BindFailure {
    FilterChanged,
    FilterOutsideStream,
}

impl StreamState {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            messages: BTreeMap::new(),
            last_sequence: 0,
            bytes: 0,
            message_ids: HashMap::new(),
            consumers: HashMap::new(),
        }
    }

    pub const fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn update(&mut self, config: StreamConfig, now: Instant) {
        self.config = config;
        self.enforce_limits(now);
    }

    pub fn append(
        &mut self,
        subject: &str,
        payload: Bytes,
        headers: Headers,
        now: Instant,
    ) -> PublishAck {
        let window = self.config.duplicate_window;
        self.message_ids
            .retain(|_, (_, seen_at)| now.duration_since(*seen_at) < window);

        let message_id = headers.get(MESSAGE_ID_HEADER).cloned();

        if let Some((sequence, _)) = message_id
            .as_ref()
            .and_then(|id| self.message_ids.get(id))
        {
            return PublishAck {
                stream: self.config.name.clone(),
                sequence: *sequence,
                duplicate: true,
            };
        }

        self.last_sequence += 1;
        let sequence = self.last_sequence;

        if let Some(id) = message_id {
            self.message_ids.insert(id, (sequence, now));
        }

        let interested = self.config.retention != RetentionPolicy::Interest
            || self
                .consumers
                .values()
                .any(|c| subject::matches(&c.config.filter_subject, subject));

        if interested {
            self.bytes += payload.len() as u64;
            self.messages.insert(
                sequence,
                StoredMessage {
                    subject: subject.to_string(),
                    payload,
                    headers,
                    stored_at: now,
                },
            );
        }

        self.enforce_limits(now);

        PublishAck {
            stream: self.config.name.clone(),
            sequence,
            duplicate: false,
        }
    }

    fn enforce_limits(&mut self, now: Instant) {
        if let Some(max_age) = self.config.max_age {
            let expired: Vec<u64> = self
                .messages
                .iter()
                .take_while(|(_, m)| now.duration_since(m.stored_at) >= max_age)
                .map(|(seq, _)| *seq)
                .collect();

            for seq in expired {
                self.remove(seq);
            }
        }

        if let Some(max_messages) = self.config.max_messages {
            while self.messages.len() as u64 > max_messages {
                self.remove_first();
            }
        }

        if let Some(max_bytes) = self.config.max_bytes {
            while self.bytes > max_bytes && !self.messages.is_empty() {
                self.remove_first();
            }
        }
    }

    fn remove_first(&mut self) {
        if let Some(seq) = self.messages.keys().next().copied() {
            self.remove(seq);
        }
    }

    fn remove(&mut self, seq: u64) {
        if let Some(message) = self.messages.remove(&seq) {
            self.bytes -= message.payload.len() as u64;
        }
    }

    /// Drops a message once retention no longer needs it.
    fn settle(&mut self, seq: u64) {
        match self.config.retention {
            RetentionPolicy::Limits => {}
            RetentionPolicy::WorkQueue => self.remove(seq),
            RetentionPolicy::Interest => {
                let done = self.messages.get(&seq).is_some_and(|message| {
                    self.consumers
                        .values()
                        .all(|c| c.is_done_with(seq, &message.subject))
                });

                if done {
                    self.remove(seq);
                }
            }
        }
    }

    /// Binds a handle to a durable consumer, creating the cursor if needed.
    pub fn bind(&mut self, config: ConsumerConfig) -> Result<u64, BindFailure> {
        if let Some(existing) = self.consumers.get_mut(&config.durable_name) {
            if existing.config.filter_subject != config.filter_subject {
                return Err(BindFailure::FilterChanged);
            }

            existing.config = config;
            existing.next_instance += 1;

            return Ok(existing.next_instance);
        }

        let overlaps = self
            .config
            .subjects
            .iter()
            .any(|pattern| subject::overlaps(pattern, &config.filter_subject));

        if !overlaps {
            return Err(BindFailure::FilterOutsideStream);
        }

        self.consumers.insert(
            config.durable_name.clone(),
            ConsumerState {
                config,
                cursor: 1,
                outstanding: BTreeMap::new(),
                delivered: 0,
                redelivered: 0,
                dead_lettered: 0,
                dead_letters: Vec::new(),
                next_instance: 1,
            },
        );

        Ok(1)
    }

    /// Hands out the next batch for a consumer.
    ///
    /// Expired deliveries are redelivered first, lowest sequence first; a
    /// delivery that already used its last attempt is dead-lettered instead.
    pub fn fetch(&mut self, durable: &str, instance: u64, now: Instant) -> Vec<MemoryMessage> {
        let stream_name = self.config.name.clone();
        let Self {
            messages,
            consumers,
            ..
        } = &mut *self;

        let Some(consumer) = consumers.get_mut(durable) else {
            return Vec::new();
        };

        let batch_size = consumer.config.batch_size;
        let max_deliver = consumer.config.max_deliver;
        let ack_wait = consumer.config.ack_wait;

        let mut batch = Vec::new();
        let mut exhausted = Vec::new();

        let expired: Vec<u64> = consumer
            .outstanding
            .iter()
            .filter(|(_, d)| d.deadline.is_none_or(|deadline| deadline <= now))
            .map(|(seq, _)| *seq)
            .collect();

        for seq in expired {
            let Some(message) = messages.get(&seq) else {
                consumer.outstanding.remove(&seq);
                continue;
            };

            let Some(delivery) = consumer.outstanding.get_mut(&seq) else {
                continue;
            };

            if delivery.count >= max_deliver {
                let deliveries = delivery.count;
                consumer.outstanding.remove(&seq);
                consumer.dead_lettered += 1;
                consumer.dead_letters.push(DeadLetter {
                    stream: stream_name.clone(),
                    consumer: durable.to_string(),
                    sequence: seq,
                    deliveries,
                    subject: Some(message.subject.clone()),
                    reason: DeadLetterReason::MaxDeliveries,
                });
                exhausted.push(seq);
                continue;
            }

            if batch.len() < batch_size {
                delivery.count += 1;
                delivery.deadline = Some(now + ack_wait);
                delivery.instance = instance;
                consumer.delivered += 1;
                consumer.redelivered += 1;
                batch.push(MemoryMessage::new(seq, message, delivery.count));
            }
        }

        for (seq, message) in messages.range(consumer.cursor..) {
            if batch.len() >= batch_size {
                break;
            }

            consumer.cursor = seq + 1;

            if !subject::matches(&consumer.config.filter_subject, &message.subject) {
                continue;
            }

            consumer.outstanding.insert(
                *seq,
                Delivery {
                    count: 1,
                    deadline: Some(now + ack_wait),
                    instance,
                },
            );
            consumer.delivered += 1;
            batch.push(MemoryMessage::new(*seq, message, 1));
        }

        for seq in exhausted {
            self.settle(seq);
        }

        batch
    }

    /// Earliest moment an outstanding delivery becomes due again.
    pub fn next_deadline(&self, durable: &str) -> Option<Instant> {
        self.consumers
            .get(durable)?
            .outstanding
            .values()
            .filter_map(|d| d.deadline)
            .min()
    }

    /// Returns true if the message was outstanding.
    pub fn ack(&mut self, durable: &str, seq: u64) -> bool {
        let removed = self
            .consumers
            .get_mut(durable)
            .and_then(|c| c.outstanding.remove(&seq))
            .is_some();

        if removed {
            self.settle(seq);
        }

        removed
    }

    /// Makes an outstanding delivery due again after `delay`, or at once.
    pub fn nack(&mut self, durable: &str, seq: u64, now: Instant, delay: Option<Duration>) -> bool {
        match self
            .consumers
            .get_mut(durable)
            .and_then(|c| c.outstanding.get_mut(&seq))
        {
            Some(delivery) => {
                delivery.deadline = delay.map(|delay| now + delay);
                true
            }
            None => false,
        }
    }

    pub fn term(&mut self, durable: &str, seq: u64) -> bool {
        self.ack(durable, seq)
    }

    /// Makes every delivery held by a closing handle immediately redeliverable.
    pub fn release(&mut self, durable: &str, instance: u64) {
        if let Some(consumer) = self.consumers.get_mut(durable) {
            for delivery in consumer.outstanding.values_mut() {
                if delivery.instance == instance {
                    delivery.deadline = None;
                }
            }
        }
    }

    pub fn take_dead_letters(&mut self, durable: &str) -> Vec<DeadLetter> {
        self.consumers
            .get_mut(durable)
            .map(|c| std::mem::take(&mut c.dead_letters))
            .unwrap_or_default()
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            messages: self.messages.len() as u64,
            bytes: self.bytes,
            first_sequence: self.messages.keys().next().copied().unwrap_or(0),
            last_sequence: self.last_sequence,
            consumer_count: self.consumers.len(),
        }
    }

    pub fn consumer_stats(&self, durable: &str) -> Option<ConsumerStats> {
        let consumer = self.consumers.get(durable)?;

        let pending = self
            .messages
            .range(consumer.cursor..)
            .filter(|(_, m)| subject::matches(&consumer.config.filter_subject, &m.subject))
            .count() as u64;

        let ack_floor = consumer
            .outstanding
            .keys()
            .next()
            .map_or(consumer.cursor.saturating_sub(1), |first| first - 1);

        Some(ConsumerStats {
            name: durable.to_string(),
            delivered: consumer.delivered,
            ack_pending: consumer.outstanding.len() as u64,
            pending,
            redelivered: consumer.redelivered,
            dead_lettered: consumer.dead_lettered,
            ack_floor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use hookstream_stream::StreamMessage;
    use std::time::Duration;

    fn consumer_config(max_deliver: u64) -> ConsumerConfig {
        ConsumerConfig {
            durable_name: "recorder".to_string(),
            filter_subject: "webhooks.>".to_string(),
            batch_size: 10,
            max_wait: Duration::from_millis(100),
            max_deliver,
            ack_wait: Duration::from_secs(1),
        }
    }

    fn headers_with_id(id: &str) -> Headers {
        let mut headers = Headers::new();
        headers.insert(MESSAGE_ID_HEADER.to_string(), id.to_string());
        headers
    }

    #[test]
    fn test_duplicate_message_id_is_not_stored_twice() {
        let now = Instant::now();
        let mut state = StreamState::new(StreamConfig::new("WEBHOOKS", ["webhooks.>"]));

        let first = state.append(
            "webhooks.github.push",
            Bytes::from("a"),
            headers_with_id("1:d-100"),
            now,
        );
        let second = state.append(
            "webhooks.github.push",
            Bytes::from("a"),
            headers_with_id("1:d-100"),
            now,
        );

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.sequence, second.sequence);
        assert_eq!(state.stats().messages, 1);
    }

    #[test]
    fn test_duplicate_window_expires() {
        let now = Instant::now();
        let mut config = StreamConfig::new("WEBHOOKS", ["webhooks.>"]);
        config.duplicate_window = Duration::from_secs(10);
        let mut state = StreamState::new(config);

        state.append("webhooks.a", Bytes::new(), headers_with_id("x"), now);
        let later = state.append(
            "webhooks.a",
            Bytes::new(),
            headers_with_id("x"),
            now + Duration::from_secs(11),
        );

        assert!(!later.duplicate);
        assert_eq!(state.stats().messages, 2);
    }

    #[test]
    fn test_max_messages_discards_oldest() {
        let now = Instant::now();
        let mut config = StreamConfig::new("WEBHOOKS", ["webhooks.>"]);
        config.max_messages = Some(2);
        let mut state = StreamState::new(config);

        for body in ["a", "b", "c"] {
            state.append("webhooks.a", Bytes::from(body), Headers::new(), now);
        }

        let stats = state.stats();
        assert_eq!(stats.messages, 2);
        assert_eq!(stats.first_sequence, 2);
        assert_eq!(stats.last_sequence, 3);
        assert_eq!(stats.bytes, 2);
    }

    #[test]
    fn test_redelivery_then_dead_letter() {
        let start = Instant::now();
        let mut state = StreamState::new(StreamConfig::new("WEBHOOKS", ["webhooks.>"]));
        let instance = state.bind(consumer_config(2)).unwrap();

        state.append("webhooks.a", Bytes::from("a"), Headers::new(), start);

        let first = state.fetch("recorder", instance, start);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].delivered(), 1);

        // Not due yet.
        assert!(state.fetch("recorder", instance, start).is_empty());

        let after_wait = start + Duration::from_secs(1);
        let second = state.fetch("recorder", instance, after_wait);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].delivered(), 2);

        let exhausted = state.fetch("recorder", instance, after_wait + Duration::from_secs(1));
        assert!(exhausted.is_empty());

        let dead = state.take_dead_letters("recorder");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].sequence, 1);
        assert_eq!(dead[0].deliveries, 2);
        assert_eq!(dead[0].reason, DeadLetterReason::MaxDeliveries);
        assert!(state.take_dead_letters("recorder").is_empty());
    }

    #[test]
    fn test_work_queue_removes_acked() {
        let now = Instant::now();
        let mut config = StreamConfig::new("WEBHOOKS", ["webhooks.>"]);
        config.retention = RetentionPolicy::WorkQueue;
        let mut state = StreamState::new(config);
        let instance = state.bind(consumer_config(3)).unwrap();

        state.append("webhooks.a", Bytes::from("a"), Headers::new(), now);
        let batch = state.fetch("recorder", instance, now);

        assert!(state.ack("recorder", batch[0].sequence()));
        assert_eq!(state.stats().messages, 0);
        assert!(!state.ack("recorder", batch[0].sequence()));
    }

    #[test]
    fn test_interest_without_consumers_drops() {
        let now = Instant::now();
        let mut config = StreamConfig::new("WEBHOOKS", ["webhooks.>"]);
        config.retention = RetentionPolicy::Interest;
        let mut state = StreamState::new(config);

        let ack = state.append("webhooks.a", Bytes::from("a"), Headers::new(), now);

        assert_eq!(ack.sequence, 1);
        assert_eq!(state.stats().messages, 0);
    }

    #[test]
    fn test_rebind_resumes_cursor() {
        let now = Instant::now();
        let mut state = StreamState::new(StreamConfig::new("WEBHOOKS", ["webhooks.>"]));
        let first = state.bind(consumer_config(3)).unwrap();

        state.append("webhooks.a", Bytes::from("a"), Headers::new(), now);
        state.append("webhooks.a", Bytes::from("b"), Headers::new(), now);

        let batch = state.fetch("recorder", first, now);
        for message in &batch {
            state.ack("recorder", message.sequence());
        }

        let second = state.bind(consumer_config(3)).unwrap();
        assert_ne!(first, second);
        assert!(state.fetch("recorder", second, now).is_empty());
        assert_eq!(state.consumer_stats("recorder").unwrap().ack_floor, 2);
    }

    #[test]
    fn test_bind_rejects_foreign_filter() {
        let mut state = StreamState::new(StreamConfig::new("WEBHOOKS", ["webhooks.>"]));
        let mut config = consumer_config(3);
        config.filter_subject = "billing.>".to_string();

        assert!(matches!(
            state.bind(config),
            Err(BindFailure::FilterOutsideStream)
        ));
    }

    #[test]
    fn test_delayed_nack_waits() {
        let start = Instant::now();
        let mut state = StreamState::new(StreamConfig::new("WEBHOOKS", ["webhooks.>"]));
        let instance = state.bind(consumer_config(3)).unwrap();

        state.append("webhooks.a", Bytes::from("a"), Headers::new(), start);
        let batch = state.fetch("recorder", instance, start);

        let delay = Duration::from_millis(500);
        assert!(state.nack("recorder", batch[0].sequence(), start, Some(delay)));
        assert_eq!(state.next_deadline("recorder"), Some(start + delay));

        assert!(state.fetch("recorder", instance, start).is_empty());

        let again = state.fetch("recorder", instance, start + delay);
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].delivered(), 2);
    }

    #[test]
    fn test_bind_accepts_partially_overlapping_filter() {
        let mut state = StreamState::new(StreamConfig::new("WEBHOOKS", ["webhooks.github.*"]));
        let mut config = consumer_config(3);
        config.filter_subject = "webhooks.*.push".to_string();

        assert!(state.bind(config).is_ok());
    }
}
