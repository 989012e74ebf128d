use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use hookstream_events::{EventFilter, ProviderId};
use hookstream_gateway::ProviderConfig;
use hookstream_stream::{ConsumerConfig, RetentionPolicy, StorageClass, StreamConfig};

#[derive(Debug, Parser)]
#[command(version, about = "Idempotent webhook ingestion over a durable stream", long_about = None)]
pub struct Args {
    /// Event database path. `:memory:` keeps events in memory.
    #[arg(long, env = "HOOKSTREAM_DATABASE", default_value = "hookstream.db")]
    pub database: PathBuf,

    /// Providers as `id:name`, comma separated.
    #[arg(
        long = "provider",
        env = "HOOKSTREAM_PROVIDERS",
        value_delimiter = ',',
        default_value = "1:github"
    )]
    pub providers: Vec<ProviderConfig>,

    /// First subject token for published events.
    #[arg(long, env = "HOOKSTREAM_SUBJECT_PREFIX", default_value = "webhooks")]
    pub subject_prefix: String,

    #[command(flatten)]
    pub stream: StreamArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Accept webhooks and record them.
    Serve(ServeArgs),

    /// Publish recorded events onto the stream again.
    Replay(ReplayArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Storage {
    File,
    Memory,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Retention {
    Limits,
    WorkQueue,
    Interest,
}

#[derive(ClapArgs, Debug)]
pub struct StreamArgs {
    /// NATS server URL. Without it events go to an in-process stream.
    #[arg(long, env = "HOOKSTREAM_NATS_URL")]
    pub nats_url: Option<String>,

    /// Stream name.
    #[arg(long, env = "HOOKSTREAM_STREAM", default_value = "WEBHOOKS")]
    pub stream_name: String,

    /// Subjects captured by the stream. Defaults to `<prefix>.>`.
    #[arg(long = "stream-subject", env = "HOOKSTREAM_STREAM_SUBJECTS", value_delimiter = ',')]
    pub subjects: Vec<String>,

    #[arg(long, env = "HOOKSTREAM_MAX_MESSAGES")]
    pub max_messages: Option<u64>,

    #[arg(long, env = "HOOKSTREAM_MAX_BYTES")]
    pub max_bytes: Option<u64>,

    /// Oldest message age kept, in seconds.
    #[arg(long, env = "HOOKSTREAM_MAX_AGE_SECS")]
    pub max_age_secs: Option<u64>,

    #[arg(long, env = "HOOKSTREAM_STORAGE", value_enum, default_value_t = Storage::File)]
    pub storage: Storage,

    #[arg(long, env = "HOOKSTREAM_REPLICAS", default_value_t = 1)]
    pub replicas: usize,

    #[arg(long, env = "HOOKSTREAM_RETENTION", value_enum, default_value_t = Retention::Limits)]
    pub retention: Retention,

    /// Window for broker-side duplicate suppression, in seconds.
    #[arg(long, env = "HOOKSTREAM_DUPLICATE_WINDOW_SECS", default_value_t = 120)]
    pub duplicate_window_secs: u64,

    /// How long a publish waits for the broker, in milliseconds.
    #[arg(long, env = "HOOKSTREAM_PUBLISH_TIMEOUT_MS", default_value_t = 5000)]
    pub publish_timeout_ms: u64,
}

impl StreamArgs {
    pub fn stream_config(&self, subject_prefix: &str) -> StreamConfig {
        let subjects = if self.subjects.is_empty() {
            vec![format!("{subject_prefix}.>")]
        } else {
            self.subjects.clone()
        };

        let mut config = StreamConfig::new(self.stream_name.clone(), subjects);
        config.max_messages = self.max_messages;
        config.max_bytes = self.max_bytes;
        config.max_age = self.max_age_secs.map(Duration::from_secs);
        config.storage = match self.storage {
            Storage::File => StorageClass::File,
            Storage::Memory => StorageClass::Memory,
        };
        config.replicas = self.replicas;
        config.retention = match self.retention {
            Retention::Limits => RetentionPolicy::Limits,
            Retention::WorkQueue => RetentionPolicy::WorkQueue,
            Retention::Interest => RetentionPolicy::Interest,
        };
        config.duplicate_window = Duration::from_secs(self.duplicate_window_secs);

        config
    }

    pub const fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

#[derive(ClapArgs, Debug)]
pub struct ServeArgs {
    #[arg(long, env = "HOOKSTREAM_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: SocketAddr,

    /// Largest webhook body accepted, in bytes.
    #[arg(long, env = "HOOKSTREAM_MAX_BODY_BYTES")]
    pub max_body_bytes: Option<usize>,

    /// Skip the event store lookup before publishing.
    #[arg(long, env = "HOOKSTREAM_NO_PRECHECK")]
    pub no_precheck: bool,

    /// Durable consumer name.
    #[arg(long, env = "HOOKSTREAM_CONSUMER", default_value = "recorder")]
    pub consumer: String,

    /// Subject the consumer reads. Defaults to `<prefix>.>`.
    #[arg(long, env = "HOOKSTREAM_FILTER_SUBJECT")]
    pub filter_subject: Option<String>,

    #[arg(long, env = "HOOKSTREAM_BATCH_SIZE", default_value_t = 10)]
    pub batch_size: usize,

    /// Longest a fetch waits for messages, in milliseconds.
    #[arg(long, env = "HOOKSTREAM_MAX_WAIT_MS", default_value_t = 5000)]
    pub max_wait_ms: u64,

    #[arg(long, env = "HOOKSTREAM_MAX_DELIVER", default_value_t = 5)]
    pub max_deliver: u64,

    /// Time before an unacked message is redelivered, in seconds.
    #[arg(long, env = "HOOKSTREAM_ACK_WAIT_SECS", default_value_t = 30)]
    pub ack_wait_secs: u64,

    /// Delay before a message that failed to record is redelivered, in
    /// milliseconds. Defaults to the ack wait.
    #[arg(long, env = "HOOKSTREAM_RETRY_DELAY_MS")]
    pub retry_delay_ms: Option<u64>,
}

impl ServeArgs {
    pub fn consumer_config(&self, subject_prefix: &str) -> ConsumerConfig {
        let filter_subject = self
            .filter_subject
            .clone()
            .unwrap_or_else(|| format!("{subject_prefix}.>"));

        let mut config = ConsumerConfig::new(self.consumer.clone(), filter_subject);
        config.batch_size = self.batch_size;
        config.max_wait = Duration::from_millis(self.max_wait_ms);
        config.max_deliver = self.max_deliver;
        config.ack_wait = Duration::from_secs(self.ack_wait_secs);

        config
    }

    pub fn retry_delay(&self) -> Option<Duration> {
        self.retry_delay_ms.map(Duration::from_millis)
    }
}

#[derive(ClapArgs, Debug)]
pub struct ReplayArgs {
    /// Only events from this provider id.
    #[arg(long)]
    pub provider_id: Option<i64>,

    /// Only events received at or after this RFC 3339 time.
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,

    /// Only events received before this RFC 3339 time.
    #[arg(long)]
    pub until: Option<DateTime<Utc>>,

    /// Only these delivery ids.
    #[arg(long = "delivery-id", value_delimiter = ',')]
    pub delivery_ids: Vec<String>,

    #[arg(long)]
    pub limit: Option<u32>,

    #[arg(long, default_value_t = 0)]
    pub offset: u32,

    /// Most publish acknowledgments outstanding at once.
    #[arg(long, default_value_t = 64)]
    pub window: usize,
}

impl ReplayArgs {
    pub fn filter(&self) -> EventFilter {
        EventFilter {
            provider: self.provider_id.map(ProviderId),
            since: self.since,
            until: self.until,
            delivery_ids: self.delivery_ids.clone(),
            limit: self.limit,
            offset: self.offset,
        }
    }
}
