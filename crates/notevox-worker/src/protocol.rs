//! JSON message protocol between the supervisor and the worker process.
//!
//! One message per logical event, newline-delimited over the worker's
//! stdio. Messages for one session are delivered in send order; nothing is
//! guaranteed across sessions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const PROTOCOL_VERSION: u32 = 1;

/// Configuration shipped with `initialize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    pub protocol_version: u32,
    pub data_dir: PathBuf,
    pub grace_period_secs: u64,
    pub confidence_threshold: f32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION,
            data_dir: PathBuf::from("notes"),
            grace_period_secs: 30,
            confidence_threshold: 0.5,
        }
    }
}

/// Messages the supervisor sends to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SupervisorMessage {
    Initialize { config: WorkerConfig },
    Start { note_id: String },
    Stop,
    GetStatus,
}

impl SupervisorMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SupervisorMessage::Initialize { .. } => "initialize",
            SupervisorMessage::Start { .. } => "start",
            SupervisorMessage::Stop => "stop",
            SupervisorMessage::GetStatus => "getStatus",
        }
    }
}

/// Events the worker reports back to the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum WorkerEvent {
    Ready {
        pid: u32,
    },
    Initialized {
        success: bool,
    },
    Started {
        note_id: String,
        success: bool,
    },
    Stopped {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timed_out: Option<bool>,
    },
    Snippet {
        text: String,
        confidence: f32,
        session_id: u64,
    },
    SessionTranscript {
        text: String,
        session_id: u64,
    },
    /// Reply to `getStatus`.
    Status {
        is_recording: bool,
        is_processing: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note_id: Option<String>,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
    DeviceDisconnected {
        reason: String,
    },
    ReconnectionAttempt {
        attempt: u32,
        max_attempts: u32,
    },
    ReconnectionFailed {
        total_attempts: u32,
    },
    ReconnectionSuccess {
        attempts_required: u32,
    },
}

impl WorkerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkerEvent::Ready { .. } => "ready",
            WorkerEvent::Initialized { .. } => "initialized",
            WorkerEvent::Started { .. } => "started",
            WorkerEvent::Stopped { .. } => "stopped",
            WorkerEvent::Snippet { .. } => "snippet",
            WorkerEvent::SessionTranscript { .. } => "sessionTranscript",
            WorkerEvent::Status { .. } => "status",
            WorkerEvent::Error { .. } => "error",
            WorkerEvent::DeviceDisconnected { .. } => "deviceDisconnected",
            WorkerEvent::ReconnectionAttempt { .. } => "reconnectionAttempt",
            WorkerEvent::ReconnectionFailed { .. } => "reconnectionFailed",
            WorkerEvent::ReconnectionSuccess { .. } => "reconnectionSuccess",
        }
    }

    pub fn session_id(&self) -> Option<u64> {
        match self {
            WorkerEvent::Snippet { session_id, .. }
            | WorkerEvent::SessionTranscript { session_id, .. } => Some(*session_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supervisor_messages_round_trip() {
        let messages = vec![
            SupervisorMessage::Initialize { config: WorkerConfig::default() },
            SupervisorMessage::Start { note_id: "note-7".into() },
            SupervisorMessage::Stop,
            SupervisorMessage::GetStatus,
        ];
        for msg in messages {
            let json = msg.to_json().expect("should serialize");
            let back = SupervisorMessage::from_json(&json).expect("should deserialize");
            assert_eq!(msg, back, "roundtrip failed for {:?}", msg);
        }
    }

    #[test]
    fn worker_events_round_trip() {
        let events = vec![
            WorkerEvent::Ready { pid: 1234 },
            WorkerEvent::Initialized { success: true },
            WorkerEvent::Started { note_id: "n".into(), success: true },
            WorkerEvent::Stopped { success: true, timed_out: Some(true) },
            WorkerEvent::Snippet { text: "hi".into(), confidence: 0.9, session_id: 1 },
            WorkerEvent::SessionTranscript { text: "hi there".into(), session_id: 1 },
            WorkerEvent::Status { is_recording: true, is_processing: false, note_id: Some("n".into()) },
            WorkerEvent::Error { message: "boom".into(), stack: None },
            WorkerEvent::DeviceDisconnected { reason: "unplugged".into() },
            WorkerEvent::ReconnectionAttempt { attempt: 2, max_attempts: 5 },
            WorkerEvent::ReconnectionFailed { total_attempts: 5 },
            WorkerEvent::ReconnectionSuccess { attempts_required: 3 },
        ];
        for event in events {
            let json = event.to_json().expect("should serialize");
            let back = WorkerEvent::from_json(&json).expect("should deserialize");
            assert_eq!(event, back, "roundtrip failed for {:?}", event);
        }
    }

    #[test]
    fn wire_format_uses_camel_case_kinds_and_fields() {
        assert_eq!(SupervisorMessage::Stop.to_json().unwrap(), r#"{"type":"stop"}"#);
        assert_eq!(
            SupervisorMessage::GetStatus.to_json().unwrap(),
            r#"{"type":"getStatus"}"#
        );

        let json = SupervisorMessage::Start { note_id: "n1".into() }.to_json().unwrap();
        assert!(json.contains(r#""noteId":"n1""#));

        let json = WorkerEvent::Snippet { text: "t".into(), confidence: 0.5, session_id: 9 }
            .to_json()
            .unwrap();
        assert!(json.contains(r#""type":"snippet""#));
        assert!(json.contains(r#""sessionId":9"#));

        let json = WorkerEvent::SessionTranscript { text: "t".into(), session_id: 9 }
            .to_json()
            .unwrap();
        assert!(json.contains(r#""type":"sessionTranscript""#));

        let json = WorkerEvent::ReconnectionAttempt { attempt: 1, max_attempts: 5 }
            .to_json()
            .unwrap();
        assert!(json.contains(r#""maxAttempts":5"#));
    }

    #[test]
    fn stopped_without_timeout_omits_the_flag() {
        let json = WorkerEvent::Stopped { success: true, timed_out: None }.to_json().unwrap();
        assert!(!json.contains("timedOut"));

        let back = WorkerEvent::from_json(r#"{"type":"stopped","success":true}"#).unwrap();
        assert_eq!(back, WorkerEvent::Stopped { success: true, timed_out: None });
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(SupervisorMessage::from_json(r#"{"type":"selfDestruct"}"#).is_err());
        assert!(WorkerEvent::from_json("not json").is_err());
    }
}
