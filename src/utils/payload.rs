//! Payload normalization helpers.

use crate::EventData;

/// Turn an inbound payload into event data.
///
/// Valid JSON is passed through unmodified; anything else is wrapped as a JSON
/// string literal (invalid UTF-8 is replaced lossily).
pub fn json_or_string(payload: &[u8]) -> EventData {
    match EventData::from_json_bytes(payload) {
        Ok(data) => data,
        Err(_) => EventData::string(&String::from_utf8_lossy(payload)),
    }
}
