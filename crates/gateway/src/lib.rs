//! Ingestion gateway: accepts webhooks over HTTP and publishes them onto a durable stream.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod provider;
mod server;
mod webhook;

pub use error::Error;
pub use provider::{ProviderConfig, Providers};
pub use server::GatewayServer;
pub use webhook::GatewayState;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use hookstream_events::{EventPublisher, EventStore};

/// Largest body accepted when no limit is configured (25 MiB).
pub const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Options for configuring a `Gateway`.
#[derive(Clone, Debug)]
pub struct GatewayOptions<P, E>
where
    P: EventPublisher,
    E: EventStore,
{
    /// Largest request body accepted. Defaults to `DEFAULT_MAX_BODY_BYTES` if not set.
    pub max_body_bytes: Option<usize>,

    /// Providers webhooks are accepted from.
    pub providers: Providers,

    /// Where envelopes are published.
    pub publisher: P,

    /// Store consulted before publishing to skip already-recorded deliveries.
    pub store: Option<E>,

    /// First subject token; envelopes go to `<prefix>.<provider>.<event>`.
    pub subject_prefix: String,
}

/// The webhook intake routes.
#[derive(Clone, Debug)]
pub struct Gateway<P, E>
where
    P: EventPublisher,
    E: EventStore,
{
    max_body_bytes: usize,
    state: GatewayState<P, E>,
}

impl<P, E> Gateway<P, E>
where
    P: EventPublisher,
    E: EventStore,
{
    /// Creates a new instance of `Gateway`.
    #[must_use]
    pub fn new(
        GatewayOptions {
            max_body_bytes,
            providers,
            publisher,
            store,
            subject_prefix,
        }: GatewayOptions<P, E>,
    ) -> Self {
        Self {
            max_body_bytes: max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES),
            state: GatewayState {
                providers: Arc::new(providers),
                publisher,
                store,
                subject_prefix: subject_prefix.into(),
            },
        }
    }

    /// Builds the router: `POST /webhooks/{provider}` and `GET /healthz`.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/webhooks/{provider}", post(webhook::receive::<P, E>))
            .route("/healthz", get(webhook::health))
            .layer(DefaultBodyLimit::max(self.max_body_bytes))
            .with_state(self.state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use bytes::Bytes;
    use hookstream_events::{
        EventEnvelope, EventFilter, NewEvent, ProviderId, PublisherError, StreamEventPublisher,
    };
    use hookstream_events_memory::MemoryEventStore;
    use hookstream_stream::{DurableStream, PublishAck, StreamConfig};
    use hookstream_stream_memory::{MemoryStream, MemoryStreamOptions};
    use tower::ServiceExt;
    use tracing_test::traced_test;

    type Publisher = StreamEventPublisher<MemoryStream>;

    async fn stream() -> MemoryStream {
        let stream = MemoryStream::new(MemoryStreamOptions {
            stream_name: "WEBHOOKS".to_string(),
        });
        stream
            .ensure_stream(&StreamConfig::new("WEBHOOKS", ["webhooks.>"]))
            .await
            .unwrap();

        stream
    }

    fn gateway<P: EventPublisher>(
        publisher: P,
        store: Option<MemoryEventStore>,
    ) -> Gateway<P, MemoryEventStore> {
        Gateway::new(GatewayOptions {
            max_body_bytes: Some(1024),
            providers: Providers::new([
                ProviderConfig::github(ProviderId(1), "github"),
                ProviderConfig::generic(ProviderId(2), "stripe"),
            ])
            .unwrap(),
            publisher,
            store,
            subject_prefix: "webhooks".to_string(),
        })
    }

    fn github_request(delivery_id: &str, body: &'static str) -> Request<Body> {
        Request::post("/webhooks/github")
            .header("X-GitHub-Hook-ID", "42")
            .header("X-GitHub-Event", "push")
            .header("X-GitHub-Delivery", delivery_id)
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, String) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();

        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_accepts_and_publishes_untouched_body() {
        let stream = stream().await;
        let router = gateway(Publisher::new(stream.clone()), None).router();

        let (status, body) = send(router, github_request("d-100", "{\"ref\":\"main\"}")).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, "accepted");

        let stats = stream.stream_info().await.unwrap();
        assert_eq!(stats.messages, 1);
    }

    #[tokio::test]
    async fn test_missing_header_rejected_before_publish() {
        let stream = stream().await;
        let router = gateway(Publisher::new(stream.clone()), None).router();

        for missing in ["X-GitHub-Hook-ID", "X-GitHub-Event", "X-GitHub-Delivery"] {
            let mut request = github_request("d-100", "{}");
            request.headers_mut().remove(missing);

            let (status, body) = send(router.clone(), request).await;

            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(body.contains(missing), "{body}");
        }

        let mut request = github_request("d-100", "{}");
        request
            .headers_mut()
            .insert("x-github-delivery", "  ".parse().unwrap());
        assert_eq!(send(router, request).await.0, StatusCode::BAD_REQUEST);

        assert_eq!(stream.stream_info().await.unwrap().messages, 0);
    }

    #[tokio::test]
    async fn test_unknown_provider_rejected() {
        let router = gateway(Publisher::new(stream().await), None).router();

        let request = Request::post("/webhooks/gitlab")
            .header("X-Hook-ID", "1")
            .header("X-Event-Name", "push")
            .header("X-Delivery-ID", "d-1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(send(router, request).await.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_generic_provider_headers() {
        let stream = stream().await;
        let router = gateway(Publisher::new(stream.clone()), None).router();

        let request = Request::post("/webhooks/stripe")
            .header("x-hook-id", "wh_1")
            .header("x-event-name", "invoice.paid")
            .header("x-delivery-id", "evt_1")
            .body(Body::from("{}"))
            .unwrap();

        assert_eq!(send(router, request).await.0, StatusCode::ACCEPTED);
        assert_eq!(stream.stream_info().await.unwrap().messages, 1);
    }

    #[tokio::test]
    async fn test_retried_delivery_published_once() {
        let stream = stream().await;
        let router = gateway(Publisher::new(stream.clone()), None).router();

        let (_, first) = send(router.clone(), github_request("d-100", "{}")).await;
        let (status, second) = send(router, github_request("d-100", "{}")).await;

        assert_eq!(first, "accepted");
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(second, "duplicate");
        assert_eq!(stream.stream_info().await.unwrap().messages, 1);
    }

    #[tokio::test]
    async fn test_recorded_delivery_not_republished() {
        let stream = stream().await;
        let store = MemoryEventStore::new();

        let envelope = EventEnvelope {
            provider: ProviderId(1),
            hook_id: "42".to_string(),
            event: "push".to_string(),
            delivery_id: "d-100".to_string(),
            payload: Bytes::from_static(b"{}"),
            received_at: chrono::Utc::now(),
        };
        store.save(NewEvent::from(&envelope)).await.unwrap();

        let router = gateway(Publisher::new(stream.clone()), Some(store.clone())).router();

        let (status, body) = send(router, github_request("d-100", "{}")).await;

        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, "duplicate");
        assert_eq!(stream.stream_info().await.unwrap().messages, 0);
        assert_eq!(store.count_events(&EventFilter::default()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let stream = stream().await;
        let router = gateway(Publisher::new(stream.clone()), None).router();

        let request = Request::post("/webhooks/github")
            .header("X-GitHub-Hook-ID", "42")
            .header("X-GitHub-Event", "push")
            .header("X-GitHub-Delivery", "d-1")
            .body(Body::from(vec![b'x'; 2048]))
            .unwrap();

        let (status, _) = send(router, request).await;

        assert!(status.is_client_error());
        assert_eq!(stream.stream_info().await.unwrap().messages, 0);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("broker unavailable")]
    struct Unavailable {
        timeout: bool,
    }

    impl PublisherError for Unavailable {
        fn is_timeout(&self) -> bool {
            self.timeout
        }
    }

    #[derive(Clone, Debug)]
    struct FailingPublisher {
        timeout: bool,
        called: Arc<AtomicBool>,
    }

    #[async_trait]
    impl EventPublisher for FailingPublisher {
        type Error = Unavailable;

        async fn publish(
            &self,
            _subject: &str,
            _envelope: &EventEnvelope,
        ) -> Result<PublishAck, Unavailable> {
            self.called.store(true, Ordering::SeqCst);
            Err(Unavailable {
                timeout: self.timeout,
            })
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_publish_failure_is_server_error() {
        for (timeout, expected) in [
            (false, StatusCode::INTERNAL_SERVER_ERROR),
            (true, StatusCode::SERVICE_UNAVAILABLE),
        ] {
            let called = Arc::new(AtomicBool::new(false));
            let publisher = FailingPublisher {
                timeout,
                called: called.clone(),
            };

            let (status, body) =
                send(gateway(publisher, None).router(), github_request("d-1", "{}")).await;

            assert!(called.load(Ordering::SeqCst));
            assert_eq!(status, expected);
            assert!(!body.contains("broker"));
        }

        assert!(logs_contain("failed to publish webhook"));
        assert!(logs_contain("delivery_id=d-1"));
    }

    #[tokio::test]
    async fn test_closed_stream_is_server_error() {
        let stream = stream().await;
        let router = gateway(Publisher::new(stream.clone()), None).router();
        stream.close().await.unwrap();

        let (status, _) = send(router, github_request("d-1", "{}")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_health() {
        let router = gateway(Publisher::new(stream().await), None).router();

        let (status, body) = send(
            router,
            Request::get("/healthz").body(Body::empty()).unwrap(),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}
