use std::time::Duration;

use async_nats::HeaderMap;
use async_nats::jetstream::consumer::AckPolicy;
use async_nats::jetstream::consumer::pull::Config as NatsConsumerConfig;
use async_nats::jetstream::stream::{
    Config as NatsStreamConfig, RetentionPolicy as NatsRetention, StorageType,
};
use hookstream_stream::{
    ConsumerConfig, Headers, RetentionPolicy, StorageClass, StreamConfig,
};

/// NATS uses -1 (or 0) for "no limit".
fn limit_to_nats(limit: Option<u64>) -> i64 {
    limit.and_then(|v| i64::try_from(v).ok()).unwrap_or(-1)
}

fn limit_from_nats(limit: i64) -> Option<u64> {
    u64::try_from(limit).ok().filter(|v| *v > 0)
}

pub fn stream_config_to_nats(config: &StreamConfig) -> NatsStreamConfig {
    NatsStreamConfig {
        name: config.name.clone(),
        subjects: config.subjects.clone(),
        max_messages: limit_to_nats(config.max_messages),
        max_bytes: limit_to_nats(config.max_bytes),
        max_age: config.max_age.unwrap_or(Duration::ZERO),
        storage: match config.storage {
            StorageClass::File => StorageType::File,
            StorageClass::Memory => StorageType::Memory,
        },
        num_replicas: config.replicas,
        retention: match config.retention {
            RetentionPolicy::Limits => NatsRetention::Limits,
            RetentionPolicy::WorkQueue => NatsRetention::WorkQueue,
            RetentionPolicy::Interest => NatsRetention::Interest,
        },
        duplicate_window: config.duplicate_window,
        ..Default::default()
    }
}

pub fn stream_config_from_nats(config: &NatsStreamConfig) -> StreamConfig {
    StreamConfig {
        name: config.name.clone(),
        subjects: config.subjects.clone(),
        max_messages: limit_from_nats(config.max_messages),
        max_bytes: limit_from_nats(config.max_bytes),
        max_age: Some(config.max_age).filter(|age| !age.is_zero()),
        storage: match config.storage {
            StorageType::File => StorageClass::File,
            StorageType::Memory => StorageClass::Memory,
        },
        replicas: config.num_replicas,
        retention: match config.retention {
            NatsRetention::Limits => RetentionPolicy::Limits,
            NatsRetention::WorkQueue => RetentionPolicy::WorkQueue,
            NatsRetention::Interest => RetentionPolicy::Interest,
        },
        duplicate_window: config.duplicate_window,
    }
}

pub fn consumer_config_to_nats(config: &ConsumerConfig) -> NatsConsumerConfig {
    NatsConsumerConfig {
        durable_name: Some(config.durable_name.clone()),
        filter_subject: config.filter_subject.clone(),
        ack_policy: AckPolicy::Explicit,
        ack_wait: config.ack_wait,
        max_deliver: i64::try_from(config.max_deliver).unwrap_or(i64::MAX),
        ..Default::default()
    }
}

pub fn headers_to_nats(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();

    for (name, value) in headers {
        map.insert(name.as_str(), value.as_str());
    }

    map
}

/// Keeps the first value of each header.
pub fn headers_from_nats(map: Option<&HeaderMap>) -> Headers {
    let mut headers = Headers::new();

    if let Some(map) = map {
        for (name, values) in map.iter() {
            if let Some(value) = values.first() {
                headers.insert(name.to_string(), value.as_str().to_string());
            }
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_config_survives_conversion() {
        let mut config = StreamConfig::new("WEBHOOKS", ["webhooks.>"]);
        config.max_messages = Some(10_000);
        config.max_age = Some(Duration::from_secs(86_400));
        config.retention = RetentionPolicy::WorkQueue;
        config.replicas = 3;

        let back = stream_config_from_nats(&stream_config_to_nats(&config));

        assert_eq!(back, config);
    }

    #[test]
    fn test_unlimited_maps_to_negative_one() {
        let nats = stream_config_to_nats(&StreamConfig::new("WEBHOOKS", ["webhooks.>"]));

        assert_eq!(nats.max_messages, -1);
        assert_eq!(nats.max_bytes, -1);
        assert!(nats.max_age.is_zero());
    }

    #[test]
    fn test_headers_round_trip_first_value() {
        let mut headers = Headers::new();
        headers.insert("Hookstream-Provider".to_string(), "1".to_string());
        headers.insert("Nats-Msg-Id".to_string(), "1:abc".to_string());

        let map = headers_to_nats(&headers);

        assert_eq!(headers_from_nats(Some(&map)), headers);
        assert!(headers_from_nats(None).is_empty());
    }
}
