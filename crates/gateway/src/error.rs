use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors that can occur in the gateway.
#[derive(Debug, Error)]
pub enum Error {
    /// The server was already started.
    #[error("the server has already been started")]
    AlreadyStarted,

    /// The listen address could not be bound.
    #[error("failed to bind listener: {0}")]
    Bind(#[source] std::io::Error),

    /// Two providers share a name or an id.
    #[error("duplicate provider `{0}`")]
    DuplicateProvider(String),

    /// A routing header has a value that is not visible ASCII.
    #[error("invalid header `{header}`: {reason}")]
    InvalidHeader {
        /// Header name.
        header: String,

        /// What is wrong with it.
        reason: String,
    },

    /// A provider definition could not be parsed.
    #[error("invalid provider `{value}`: {reason}")]
    InvalidProvider {
        /// The definition as given.
        value: String,

        /// What is wrong with it.
        reason: String,
    },

    /// A routing header is absent or empty.
    #[error("missing header `{0}`")]
    MissingHeader(String),

    /// The broker refused or failed to store the envelope.
    #[error("failed to publish event: {0}")]
    Publish(String),

    /// The broker did not confirm the publish in time.
    #[error("timed out publishing event")]
    Timeout,

    /// The request names a provider that is not configured.
    #[error("unknown provider `{0}`")]
    UnknownProvider(String),
}

impl Error {
    /// Status code reported to the webhook sender.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidHeader { .. } | Self::MissingHeader(_) | Self::UnknownProvider(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Timeout => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        // Broker details stay in the logs.
        let message = if status.is_server_error() {
            status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string()
        } else {
            self.to_string()
        };

        (status, message).into_response()
    }
}
