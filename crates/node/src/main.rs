//! Binary that runs the webhook gateway and the recording worker, or replays recorded events.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod args;
mod error;

use args::{Args, Command, ReplayArgs, ServeArgs};
use error::{Error, Result};

use std::collections::HashMap;

use clap::Parser;
use hookstream_events::StreamEventPublisher;
use hookstream_events_libsql::LibsqlEventStore;
use hookstream_gateway::{Gateway, GatewayOptions, GatewayServer, Providers};
use hookstream_pipeline::{LogSink, Replayer, ReplayerOptions, Worker, WorkerOptions};
use hookstream_stream::DurableStream;
use hookstream_stream_memory::{MemoryStream, MemoryStreamOptions};
use hookstream_stream_nats::{NatsStream, NatsStreamOptions};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder().with_env_filter(filter).finish(),
    )?;

    let args = Args::parse();

    let store = LibsqlEventStore::connect(&args.database).await?;

    if let Some(url) = &args.stream.nats_url {
        let client = async_nats::connect(url.as_str()).await?;
        info!(url = %url, "connected to NATS");

        let stream = NatsStream::new(NatsStreamOptions {
            client,
            publish_timeout: Some(args.stream.publish_timeout()),
            stream_name: args.stream.stream_name.clone(),
        });

        run(stream, store, args).await
    } else {
        warn!("no NATS URL configured, using an in-process stream");

        let stream = MemoryStream::new(MemoryStreamOptions {
            stream_name: args.stream.stream_name.clone(),
        });

        run(stream, store, args).await
    }
}

async fn run<S>(stream: S, store: LibsqlEventStore, args: Args) -> Result<()>
where
    S: DurableStream,
{
    let stream_config = args.stream.stream_config(&args.subject_prefix);
    stream_config.validate()?;

    stream
        .ensure_stream(&stream_config)
        .await
        .map_err(|e| Error::Stream(e.to_string()))?;

    let providers = Providers::new(args.providers)?;
    let subject_prefix = args.subject_prefix;

    let result = match args.command {
        Command::Serve(serve_args) => {
            serve(stream.clone(), store, providers, subject_prefix, serve_args).await
        }
        Command::Replay(replay_args) => {
            replay(stream.clone(), store, &providers, subject_prefix, &replay_args).await
        }
    };

    if let Err(e) = stream.close().await {
        warn!(error = %e, "failed to close stream");
    }

    result
}

async fn serve<S>(
    stream: S,
    store: LibsqlEventStore,
    providers: Providers,
    subject_prefix: String,
    args: ServeArgs,
) -> Result<()>
where
    S: DurableStream,
{
    let consumer = stream
        .create_pull_consumer(args.consumer_config(&subject_prefix))
        .await
        .map_err(|e| Error::Stream(e.to_string()))?;

    let worker = Worker::new(WorkerOptions {
        consumer,
        error_backoff: None,
        retry_delay: args.retry_delay(),
        sink: LogSink,
        store: store.clone(),
        stream_name: stream.name().to_string(),
    });

    let worker_handle = worker
        .start()
        .map_err(|e| Error::Pipeline(e.to_string()))?;

    let gateway = Gateway::new(GatewayOptions {
        max_body_bytes: args.max_body_bytes,
        providers,
        publisher: StreamEventPublisher::new(stream),
        store: (!args.no_precheck).then_some(store),
        subject_prefix,
    });

    let server = GatewayServer::new(args.listen_addr);
    let server_handle = server.start(gateway.router()).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
        _ = server_handle => {
            error!("gateway server exited");
        }
        _ = worker_handle => {
            error!("worker exited");
        }
    }

    server.shutdown().await;
    worker.shutdown().await;

    Ok(())
}

async fn replay<S>(
    stream: S,
    store: LibsqlEventStore,
    providers: &Providers,
    subject_prefix: String,
    args: &ReplayArgs,
) -> Result<()>
where
    S: DurableStream,
{
    let provider_names: HashMap<_, _> = providers
        .iter()
        .map(|provider| (provider.id, provider.name.clone()))
        .collect();

    let replayer = Replayer::new(ReplayerOptions {
        provider_names,
        store,
        stream,
        subject_prefix,
        window: Some(args.window),
    });

    let report = replayer
        .replay(&args.filter())
        .await
        .map_err(|e| Error::Pipeline(e.to_string()))?;

    info!(
        published = report.published,
        duplicates = report.duplicates,
        skipped = report.skipped,
        "replayed events"
    );

    Ok(())
}
