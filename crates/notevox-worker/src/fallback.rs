//! Fallback persistence for undeliverable messages.
//!
//! When the channel to the other side is broken, the message is written to
//! a standalone `worker-fallback-<epochMillis>.json` file: best-effort,
//! single-attempt, never retried in-process. This is explicitly not a
//! durability guarantee beyond "didn't lose data silently".

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

use crate::protocol::{SupervisorMessage, WorkerEvent};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
    /// Epoch milliseconds at write time.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u64>,
}

impl FallbackRecord {
    pub fn new(kind: &str, data: serde_json::Value, session_id: Option<u64>) -> Self {
        Self {
            kind: kind.to_string(),
            data,
            timestamp: Utc::now().timestamp_millis(),
            session_id,
        }
    }

    pub fn for_event(event: &WorkerEvent) -> Self {
        let data = serde_json::to_value(event).unwrap_or(serde_json::Value::Null);
        Self::new(event.kind(), data, event.session_id())
    }

    pub fn for_message(message: &SupervisorMessage) -> Self {
        let data = serde_json::to_value(message).unwrap_or(serde_json::Value::Null);
        Self::new(message.kind(), data, None)
    }
}

/// Single write attempt; the caller never retries.
pub fn write_fallback(dir: &Path, record: &FallbackRecord) -> io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("worker-fallback-{}.json", record.timestamp));
    let body = serde_json::to_string_pretty(record).map_err(io::Error::other)?;
    std::fs::write(&path, body)?;
    Ok(path)
}

pub fn read_fallback(path: &Path) -> io::Result<FallbackRecord> {
    let body = std::fs::read_to_string(path)?;
    serde_json::from_str(&body).map_err(io::Error::other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_record_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let record = FallbackRecord::new(
            "snippet",
            serde_json::json!({"text": "hello", "confidence": 0.8}),
            Some(42),
        );

        let path = write_fallback(dir.path(), &record).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("worker-fallback-"));
        assert!(name.ends_with(".json"));

        let back = read_fallback(&path).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn record_for_event_captures_kind_and_session() {
        let event = WorkerEvent::Snippet {
            text: "interim".into(),
            confidence: 0.7,
            session_id: 9,
        };
        let record = FallbackRecord::for_event(&event);
        assert_eq!(record.kind, "snippet");
        assert_eq!(record.session_id, Some(9));
        assert_eq!(record.data["text"], "interim");
    }

    #[test]
    fn json_shape_uses_type_and_session_id_keys() {
        let record = FallbackRecord::new("stop", serde_json::Value::Null, Some(1));
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""type":"stop""#));
        assert!(json.contains(r#""sessionId":1"#));
        assert!(json.contains(r#""timestamp""#));
    }
}
