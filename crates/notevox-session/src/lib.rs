//! Session coordination for NoteVox
//!
//! One actor owns each session's state; commands, engine results, the
//! grace-period deadline, and capture health checks are all serialized
//! through its select loop. `SessionHandle` is the explicitly owned entry
//! point handed to callers.

pub mod actor;
pub mod grace;
pub mod permissions;
pub mod probe;
pub mod store;

pub use actor::{
    spawn_session, BackendFactory, CpalBackendFactory, SessionCommand, SessionConfig,
    SessionDeps, SessionEvent, SessionHandle, StopOutcome,
};
pub use grace::GraceScheduler;
pub use permissions::{DeniedPermissions, GrantedPermissions, PermissionBroker};
pub use probe::{select_pipeline, CapabilityFlags, PipelineMode};
pub use store::TranscriptStore;
