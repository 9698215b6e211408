//! The event envelope shared by every source and sink.
//!
//! `Event` is CloudEvents-shaped: the public fields serialize to the fixed wire
//! names `id`, `source`, `type`, `subject`, `time`, `data`, `dataschema` and
//! `datacontenttype`. Routing fields used by in-process consumers are carried
//! in memory only and never serialized.

use crate::{ConnectorError, ConnectorResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use std::fmt;
use uuid::Uuid;

/// Content type stamped on events whose payload is JSON
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Accept exactly one JSON value, optionally surrounded by whitespace
fn check_json(text: &str) -> Result<(), String> {
    serde_json::from_str::<&RawValue>(text)
        .map(|_| ())
        .map_err(|e| format!("event data is not valid JSON: {}", e))
}

/// Opaque JSON payload of an [`Event`].
///
/// The text is kept byte-for-byte as received (no key reordering, no number
/// normalization, surrounding whitespace included), and is guaranteed to be a
/// single valid JSON value. On the wire it is embedded as raw JSON.
#[derive(Clone)]
pub struct EventData(Box<str>);

impl EventData {
    /// Wrap bytes that must already be valid JSON
    pub fn from_json_bytes(bytes: &[u8]) -> ConnectorResult<Self> {
        let text = std::str::from_utf8(bytes).map_err(|e| {
            ConnectorError::parse(format!("event data is not valid UTF-8: {}", e), bytes)
        })?;
        check_json(text).map_err(|e| ConnectorError::parse(e, bytes))?;
        Ok(EventData(text.into()))
    }

    /// Wrap a string that must already be valid JSON
    pub fn from_json_string(json: impl Into<String>) -> ConnectorResult<Self> {
        let json = json.into();
        match check_json(&json) {
            Ok(()) => Ok(EventData(json.into_boxed_str())),
            Err(e) => Err(ConnectorError::parse(e, json)),
        }
    }

    /// Encode `text` as a JSON string literal
    pub fn string(text: &str) -> Self {
        // A JSON-encoded str is always valid
        serde_json::to_string(text)
            .map(|json| EventData(json.into_boxed_str()))
            .unwrap_or_else(|_| EventData::null())
    }

    /// Serialize any value as the payload
    pub fn from_value<T: Serialize>(value: &T) -> ConnectorResult<Self> {
        Ok(EventData(serde_json::to_string(value)?.into_boxed_str()))
    }

    /// The JSON `null` payload
    pub fn null() -> Self {
        EventData("null".into())
    }

    /// Raw JSON text
    pub fn get(&self) -> &str {
        &self.0
    }

    /// Raw JSON bytes
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Deserialize the payload into a typed value
    pub fn parse<'a, T: Deserialize<'a>>(&'a self) -> ConnectorResult<T> {
        Ok(serde_json::from_str(&self.0)?)
    }

    /// Parse the payload into a generic JSON value
    pub fn to_value(&self) -> ConnectorResult<serde_json::Value> {
        self.parse()
    }
}

impl Serialize for EventData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let raw: &RawValue = serde_json::from_str(&self.0).map_err(serde::ser::Error::custom)?;
        raw.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for EventData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        Ok(EventData(raw.get().into()))
    }
}

impl Default for EventData {
    fn default() -> Self {
        EventData::null()
    }
}

impl PartialEq for EventData {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl Eq for EventData {}

impl fmt::Debug for EventData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.get())
    }
}

impl fmt::Display for EventData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.get())
    }
}

/// The universal event envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Unique per event instance
    pub id: String,
    /// Producing connector, `"<type>/<instance-name>"`
    pub source: String,
    /// Event type identifier
    #[serde(rename = "type")]
    pub event_type: String,
    /// The resource or record this event concerns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Time of the occurrence, UTC
    pub time: DateTime<Utc>,
    /// JSON payload, passed through unmodified
    pub data: EventData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataschema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,

    /// Tenant used for downstream routing (never serialized)
    #[serde(skip)]
    pub tenant_id: Option<String>,
    /// Pipeline used for downstream routing (never serialized)
    #[serde(skip)]
    pub pipeline_id: Option<String>,
    /// Deduplication hint for in-process consumers (never serialized)
    #[serde(skip)]
    pub idempotency_key: Option<String>,
}

impl Event {
    /// Create an event with a fresh UUID and the current time
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, data: EventData) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            event_type: event_type.into(),
            subject: None,
            time: Utc::now(),
            data,
            dataschema: None,
            datacontenttype: None,
            tenant_id: None,
            pipeline_id: None,
            idempotency_key: None,
        }
    }

    /// Override the generated id
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the subject
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set the occurrence time
    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = time;
        self
    }

    /// Set the data schema URI
    pub fn with_dataschema(mut self, schema: impl Into<String>) -> Self {
        self.dataschema = Some(schema.into());
        self
    }

    /// Set the data content type
    pub fn with_datacontenttype(mut self, content_type: impl Into<String>) -> Self {
        self.datacontenttype = Some(content_type.into());
        self
    }

    /// Attach the in-memory tenant id
    pub fn with_tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Attach the in-memory pipeline id
    pub fn with_pipeline_id(mut self, pipeline_id: impl Into<String>) -> Self {
        self.pipeline_id = Some(pipeline_id.into());
        self
    }

    /// Attach the in-memory idempotency key
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Wire representation (internal fields omitted)
    pub fn to_json(&self) -> ConnectorResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire representation as bytes
    pub fn to_json_bytes(&self) -> ConnectorResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode the wire representation
    pub fn from_json(bytes: &[u8]) -> ConnectorResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
