use crate::ConfigError;
use crate::subject;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default window in which a repeated message id is treated as a duplicate publish.
pub const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_secs(120);

/// Upper bound on replicas a stream may request.
pub const MAX_REPLICAS: usize = 5;

/// Where the broker keeps stream data.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum StorageClass {
    /// Held in broker memory, lost on broker restart.
    Memory,

    /// Persisted to disk.
    #[default]
    File,
}

/// When the broker is allowed to drop messages.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum RetentionPolicy {
    /// Keep messages until a size, count, or age limit is hit.
    #[default]
    Limits,

    /// Each message is removed once any consumer acknowledges it.
    WorkQueue,

    /// Messages are kept only while some consumer still has to acknowledge them.
    Interest,
}

/// Stream configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StreamConfig {
    /// Stream name.
    pub name: String,

    /// Subject patterns captured by the stream.
    pub subjects: Vec<String>,

    /// Maximum number of messages to retain.
    pub max_messages: Option<u64>,

    /// Maximum bytes of payload to retain.
    pub max_bytes: Option<u64>,

    /// Maximum age of retained messages.
    pub max_age: Option<Duration>,

    /// Storage class.
    pub storage: StorageClass,

    /// Number of replicas.
    pub replicas: usize,

    /// Retention policy.
    pub retention: RetentionPolicy,

    /// Window used for duplicate suppression by message id.
    pub duplicate_window: Duration,
}

impl StreamConfig {
    /// Creates a file-backed, single-replica, limits-retained stream config.
    pub fn new<N, S>(name: N, subjects: impl IntoIterator<Item = S>) -> Self
    where
        N: Into<String>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            subjects: subjects.into_iter().map(Into::into).collect(),
            max_messages: None,
            max_bytes: None,
            max_age: None,
            storage: StorageClass::default(),
            replicas: 1,
            retention: RetentionPolicy::default(),
            duplicate_window: DEFAULT_DUPLICATE_WINDOW,
        }
    }

    /// Checks the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns the first problem found with the name, subjects, or limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name(&self.name)?;

        if self.subjects.is_empty() {
            return Err(ConfigError::NoSubjects(self.name.clone()));
        }

        for pattern in &self.subjects {
            subject::validate(pattern, true)?;
        }

        if self.replicas == 0 || self.replicas > MAX_REPLICAS {
            return Err(ConfigError::Replicas(self.replicas));
        }

        if self.max_messages == Some(0) {
            return Err(ConfigError::ZeroLimit("max_messages"));
        }

        if self.max_bytes == Some(0) {
            return Err(ConfigError::ZeroLimit("max_bytes"));
        }

        if self.max_age == Some(Duration::ZERO) {
            return Err(ConfigError::ZeroLimit("max_age"));
        }

        Ok(())
    }

    /// Returns true if the literal subject is captured by this stream.
    #[must_use]
    pub fn captures(&self, subject: &str) -> bool {
        self.subjects
            .iter()
            .any(|pattern| subject::matches(pattern, subject))
    }

    /// Compares this (existing) configuration with a requested one.
    ///
    /// Returns the names of the fields that would change. Storage class,
    /// retention policy, and name can't be changed in place, and every
    /// existing subject pattern must stay covered by the new set so already
    /// published data remains addressable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::IncompatibleUpdate` listing the offending fields.
    pub fn diff(&self, requested: &Self) -> Result<Vec<&'static str>, ConfigError> {
        let mut incompatible = Vec::new();

        if self.name != requested.name {
            incompatible.push("name");
        }
        if self.storage != requested.storage {
            incompatible.push("storage");
        }
        if self.retention != requested.retention {
            incompatible.push("retention");
        }

        let narrowed = self.subjects.iter().any(|existing| {
            !requested
                .subjects
                .iter()
                .any(|candidate| subject::covers(candidate, existing))
        });
        if narrowed {
            incompatible.push("subjects");
        }

        if !incompatible.is_empty() {
            return Err(ConfigError::IncompatibleUpdate {
                stream: self.name.clone(),
                fields: incompatible,
            });
        }

        let mut changes = Vec::new();

        if self.subjects != requested.subjects {
            changes.push("subjects");
        }
        if self.max_messages != requested.max_messages {
            changes.push("max_messages");
        }
        if self.max_bytes != requested.max_bytes {
            changes.push("max_bytes");
        }
        if self.max_age != requested.max_age {
            changes.push("max_age");
        }
        if self.replicas != requested.replicas {
            changes.push("replicas");
        }
        if self.duplicate_window != requested.duplicate_window {
            changes.push("duplicate_window");
        }

        Ok(changes)
    }
}

/// Pull consumer configuration.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ConsumerConfig {
    /// Durable name; identifies the cursor across restarts.
    pub durable_name: String,

    /// Subject (or pattern) the consumer reads.
    pub filter_subject: String,

    /// Maximum messages returned by a single fetch.
    pub batch_size: usize,

    /// How long a fetch waits for messages.
    pub max_wait: Duration,

    /// Delivery attempts before a message is dead-lettered.
    pub max_deliver: u64,

    /// Time a delivered message may stay unacknowledged before redelivery.
    pub ack_wait: Duration,
}

impl ConsumerConfig {
    /// Creates a consumer config with a batch of 10, 5s max wait, 5 deliveries, and 30s ack wait.
    pub fn new<N, S>(durable_name: N, filter_subject: S) -> Self
    where
        N: Into<String>,
        S: Into<String>,
    {
        Self {
            durable_name: durable_name.into(),
            filter_subject: filter_subject.into(),
            batch_size: 10,
            max_wait: Duration::from_secs(5),
            max_deliver: 5,
            ack_wait: Duration::from_secs(30),
        }
    }

    /// Checks the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_name(&self.durable_name)?;
        subject::validate(&self.filter_subject, true)?;

        if self.batch_size == 0 {
            return Err(ConfigError::ZeroLimit("batch_size"));
        }
        if self.max_wait.is_zero() {
            return Err(ConfigError::ZeroLimit("max_wait"));
        }
        if self.max_deliver == 0 {
            return Err(ConfigError::ZeroLimit("max_deliver"));
        }
        if self.ack_wait.is_zero() {
            return Err(ConfigError::ZeroLimit("ack_wait"));
        }

        Ok(())
    }
}

/// Checks a stream or consumer name.
///
/// # Errors
///
/// Returns `ConfigError::InvalidName` for empty names or names containing
/// whitespace, `.`, `*`, `>`, `/` or `\`.
pub fn validate_name(name: &str) -> Result<(), ConfigError> {
    let bad = name.is_empty()
        || name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '.' | '*' | '>' | '/' | '\\'));

    if bad {
        return Err(ConfigError::InvalidName(name.to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;

    #[test]
    fn test_stream_config_validation() {
        assert!(StreamConfig::new("WEBHOOKS", ["webhooks.>"]).validate().is_ok());

        assert_matches!(
            StreamConfig::new("web.hooks", ["webhooks.>"]).validate(),
            Err(ConfigError::InvalidName(_))
        );
        assert_matches!(
            StreamConfig::new("WEBHOOKS", Vec::<String>::new()).validate(),
            Err(ConfigError::NoSubjects(_))
        );

        let mut config = StreamConfig::new("WEBHOOKS", ["webhooks.>"]);
        config.replicas = 0;
        assert_matches!(config.validate(), Err(ConfigError::Replicas(0)));

        let mut config = StreamConfig::new("WEBHOOKS", ["webhooks.>"]);
        config.max_age = Some(Duration::ZERO);
        assert_matches!(config.validate(), Err(ConfigError::ZeroLimit("max_age")));
    }

    #[test]
    fn test_consumer_config_validation() {
        assert!(ConsumerConfig::new("recorder", "webhooks.>").validate().is_ok());

        let mut config = ConsumerConfig::new("recorder", "webhooks.>");
        config.max_deliver = 0;
        assert_matches!(config.validate(), Err(ConfigError::ZeroLimit("max_deliver")));

        let mut config = ConsumerConfig::new("recorder", "webhooks.>");
        config.batch_size = 0;
        assert_matches!(config.validate(), Err(ConfigError::ZeroLimit("batch_size")));
    }

    #[test]
    fn test_diff_identical_is_empty() {
        let config = StreamConfig::new("WEBHOOKS", ["webhooks.>"]);

        assert_eq!(config.diff(&config.clone()).unwrap(), Vec::<&str>::new());
    }

    #[test]
    fn test_diff_widening_and_limits() {
        let existing = StreamConfig::new("WEBHOOKS", ["webhooks.github.>"]);

        let mut requested = StreamConfig::new("WEBHOOKS", ["webhooks.>"]);
        requested.max_messages = Some(1_000);

        assert_eq!(
            existing.diff(&requested).unwrap(),
            vec!["subjects", "max_messages"]
        );
    }

    #[test]
    fn test_diff_rejects_structural_changes() {
        let existing = StreamConfig::new("WEBHOOKS", ["webhooks.>"]);

        let mut requested = existing.clone();
        requested.storage = StorageClass::Memory;
        assert_matches!(
            existing.diff(&requested),
            Err(ConfigError::IncompatibleUpdate { fields, .. }) if fields == vec!["storage"]
        );

        let requested = StreamConfig::new("WEBHOOKS", ["webhooks.github.>"]);
        assert_matches!(
            existing.diff(&requested),
            Err(ConfigError::IncompatibleUpdate { fields, .. }) if fields == vec!["subjects"]
        );
    }
}
