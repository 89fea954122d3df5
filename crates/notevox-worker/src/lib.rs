//! Out-of-process recognition bridge for NoteVox
//!
//! The capture/engine/device stack runs in a worker process; only typed,
//! versioned messages cross the boundary. The supervisor side lives in
//! [`bridge`], the worker side in [`host`]. Durability helpers (ring-buffer
//! log, fallback persistence, reconnection backoff) are shared.

pub mod backoff;
pub mod bridge;
pub mod fallback;
pub mod host;
pub mod protocol;
pub mod ring_log;

pub use backoff::ReconnectPolicy;
pub use bridge::{BridgeState, StatusReport, StopResult, WorkerBridge};
pub use fallback::{read_fallback, write_fallback, FallbackRecord};
pub use host::{run, run_with_io, HostOptions};
pub use protocol::{SupervisorMessage, WorkerConfig, WorkerEvent, PROTOCOL_VERSION};
pub use ring_log::{LogEntry, LogLevel, RingLog, DEFAULT_LOG_CAPACITY};
