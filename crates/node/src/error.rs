use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Event store error.
    #[error(transparent)]
    EventStore(#[from] hookstream_events_libsql::Error),

    /// Gateway error.
    #[error(transparent)]
    Gateway(#[from] hookstream_gateway::Error),

    /// Could not connect to NATS.
    #[error("failed to connect to NATS: {0}")]
    NatsConnect(#[from] async_nats::ConnectError),

    /// Worker or replay error.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// Could not set global default subscriber.
    #[error("could not set global default subscriber: {0}")]
    SetTracing(#[from] tracing::dispatcher::SetGlobalDefaultError),

    /// Stream provisioning or broker error.
    #[error("stream error: {0}")]
    Stream(String),

    /// Invalid configuration.
    #[error(transparent)]
    StreamConfig(#[from] hookstream_stream::ConfigError),
}
