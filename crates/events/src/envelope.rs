use crate::DecodeError;

use std::fmt::{Display, Formatter, Result as FmtResult};
use std::num::ParseIntError;
use std::str::FromStr;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use hookstream_stream::subject::sanitize_token;
use hookstream_stream::{Headers, MESSAGE_ID_HEADER};
use serde::{Deserialize, Serialize};

/// Header carrying the provider id.
pub const PROVIDER_HEADER: &str = "Hookstream-Provider";

/// Header carrying the provider's hook id.
pub const HOOK_ID_HEADER: &str = "Hookstream-Hook-Id";

/// Header carrying the event name.
pub const EVENT_HEADER: &str = "Hookstream-Event";

/// Header carrying the provider's delivery id.
pub const DELIVERY_ID_HEADER: &str = "Hookstream-Delivery-Id";

/// Header carrying the RFC 3339 receive time.
pub const RECEIVED_AT_HEADER: &str = "Hookstream-Received-At";

/// Identifies an upstream webhook provider.
#[derive(
    Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(transparent)]
pub struct ProviderId(pub i64);

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProviderId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

impl From<i64> for ProviderId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A received webhook: routing identifiers plus the untouched body.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EventEnvelope {
    /// Provider that sent the webhook.
    pub provider: ProviderId,

    /// Provider-assigned hook id.
    pub hook_id: String,

    /// Event name (category) as sent by the provider.
    pub event: String,

    /// Provider-assigned delivery id; unique per provider.
    pub delivery_id: String,

    /// Raw request body.
    pub payload: Bytes,

    /// When the gateway received the webhook.
    pub received_at: DateTime<Utc>,
}

impl EventEnvelope {
    /// Message id used for broker-side duplicate suppression.
    #[must_use]
    pub fn message_id(&self) -> String {
        format!("{}:{}", self.provider, self.delivery_id)
    }

    /// Subject the envelope is published to: `<prefix>.<provider>.<event>`.
    #[must_use]
    pub fn subject(&self, prefix: &str, provider_name: &str) -> String {
        format!(
            "{prefix}.{}.{}",
            sanitize_token(provider_name),
            sanitize_token(&self.event)
        )
    }

    /// Headers that carry the routing identifiers on the wire.
    #[must_use]
    pub fn to_headers(&self) -> Headers {
        let mut headers = Headers::new();

        headers.insert(PROVIDER_HEADER.to_string(), self.provider.to_string());
        headers.insert(HOOK_ID_HEADER.to_string(), self.hook_id.clone());
        headers.insert(EVENT_HEADER.to_string(), self.event.clone());
        headers.insert(DELIVERY_ID_HEADER.to_string(), self.delivery_id.clone());
        headers.insert(
            RECEIVED_AT_HEADER.to_string(),
            self.received_at
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        );
        headers.insert(MESSAGE_ID_HEADER.to_string(), self.message_id());

        headers
    }

    /// Rebuilds an envelope from a stream message.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError` if a routing header is missing or malformed.
    pub fn from_parts(headers: &Headers, payload: Bytes) -> Result<Self, DecodeError> {
        let provider: ProviderId = required(headers, PROVIDER_HEADER)?
            .parse()
            .map_err(|e: ParseIntError| DecodeError::InvalidHeader {
                header: PROVIDER_HEADER,
                reason: e.to_string(),
            })?;

        let received_at = DateTime::parse_from_rfc3339(required(headers, RECEIVED_AT_HEADER)?)
            .map_err(|e| DecodeError::InvalidHeader {
                header: RECEIVED_AT_HEADER,
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);

        Ok(Self {
            provider,
            hook_id: required(headers, HOOK_ID_HEADER)?.to_string(),
            event: required(headers, EVENT_HEADER)?.to_string(),
            delivery_id: required(headers, DELIVERY_ID_HEADER)?.to_string(),
            payload,
            received_at,
        })
    }
}

fn required<'a>(headers: &'a Headers, name: &'static str) -> Result<&'a str, DecodeError> {
    headers
        .get(name)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
        .ok_or(DecodeError::MissingHeader(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn envelope() -> EventEnvelope {
        EventEnvelope {
            provider: ProviderId(1),
            hook_id: "42".to_string(),
            event: "pull_request".to_string(),
            delivery_id: "d-100".to_string(),
            payload: Bytes::from_static(b"{\"action\":\"opened\"}"),
            received_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_headers_carry_routing_and_message_id() {
        let headers = envelope().to_headers();

        assert_eq!(headers.get(PROVIDER_HEADER).unwrap(), "1");
        assert_eq!(headers.get(MESSAGE_ID_HEADER).unwrap(), "1:d-100");
        assert_eq!(
            headers.get(RECEIVED_AT_HEADER).unwrap(),
            "2026-03-01T12:00:00.000Z"
        );
    }

    #[test]
    fn test_decode_restores_envelope() {
        let original = envelope();

        let decoded =
            EventEnvelope::from_parts(&original.to_headers(), original.payload.clone()).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_decode_rejects_missing_and_invalid_headers() {
        let original = envelope();

        let mut headers = original.to_headers();
        headers.remove(DELIVERY_ID_HEADER);
        assert_matches!(
            EventEnvelope::from_parts(&headers, Bytes::new()),
            Err(DecodeError::MissingHeader(DELIVERY_ID_HEADER))
        );

        let mut headers = original.to_headers();
        headers.insert(EVENT_HEADER.to_string(), "   ".to_string());
        assert_matches!(
            EventEnvelope::from_parts(&headers, Bytes::new()),
            Err(DecodeError::MissingHeader(EVENT_HEADER))
        );

        let mut headers = original.to_headers();
        headers.insert(PROVIDER_HEADER.to_string(), "github".to_string());
        assert_matches!(
            EventEnvelope::from_parts(&headers, Bytes::new()),
            Err(DecodeError::InvalidHeader { header: PROVIDER_HEADER, .. })
        );
    }

    #[test]
    fn test_subject_sanitizes_tokens() {
        let mut envelope = envelope();
        envelope.event = "check.suite".to_string();

        assert_eq!(
            envelope.subject("webhooks", "git hub"),
            "webhooks.git_hub.check_suite"
        );
    }
}
