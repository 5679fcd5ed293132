//! Wire shapes exchanged over the realtime connection.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// `type` given to frames that do not match the [`InboundMessage`] shape.
pub const RAW_MESSAGE_TYPE: &str = "message";

/// A message received from the server.
///
/// Frames are JSON objects of the form `{ "type": ..., "data": ..., "timestamp": ... }`. Anything
/// else is wrapped as `{ "type": "message", "data": <raw text> }` by [`InboundMessage::parse`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<String>,
}

impl InboundMessage {
    /// Parse a text frame. Never fails: frames that are not JSON, or JSON that does not match
    /// the expected shape, are passed through as a [`RAW_MESSAGE_TYPE`] message.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        // Serde accepts a JSON array for a struct, only objects carry the typed shape
        if !raw.trim_start().starts_with('{') {
            return Self::raw(raw);
        }

        match serde_json::from_str::<Self>(raw) {
            Ok(message) => message,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::trace!(error = %e, "Inbound frame is not a typed message, passing through raw");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                Self::raw(raw)
            }
        }
    }

    /// Wrap an unstructured payload.
    #[must_use]
    pub fn raw(raw: &str) -> Self {
        Self {
            kind: RAW_MESSAGE_TYPE.to_owned(),
            data: Some(Value::String(raw.to_owned())),
            timestamp: None,
        }
    }

    /// Returns `true` if this message carries the given `type`.
    #[must_use]
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    /// Deserialize the `data` payload into a concrete type. A missing payload decodes as `null`.
    pub fn decode<T: DeserializeOwned>(&self) -> crate::Result<T> {
        let data = self.data.clone().unwrap_or(Value::Null);
        Ok(serde_json::from_value(data)?)
    }
}

/// Accepts `"2026-01-01T00:00:00Z"`, numeric epochs and `null`.
fn lenient_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Timestamp {
        Text(String),
        Number(serde_json::Number),
    }

    Ok(
        Option::<Timestamp>::deserialize(deserializer)?.map(|timestamp| match timestamp {
            Timestamp::Text(text) => text,
            Timestamp::Number(number) => number.to_string(),
        }),
    )
}

/// Control frames sent by the manager itself.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    /// Keep-alive sent on every heartbeat tick. No reply is expected.
    Ping {
        /// ISO-8601 time at which the ping was produced
        timestamp: String,
    },
}

impl ControlFrame {
    #[must_use]
    pub fn ping(at: DateTime<Utc>) -> Self {
        Self::Ping {
            timestamp: at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub(crate) fn encode(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
