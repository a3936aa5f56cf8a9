//! Recording sessions.
//!
//! ## Lifecycle
//!
//! ```text
//! create()                     idle       StartCapture sent
//!      ↓ capture-ready
//! transition(Recording)        recording  flush timer armed
//!      ↓ session-stop
//! transition(Stopping)         stopping   wait for capture-finished
//!      ↓ final flush
//! transition(Completed)        completed  summary persisted
//! ```
//!
//! Any non-terminal status may move to `error` instead.

pub mod registry;
pub mod types;

pub use registry::{SessionError, SessionHandle, SessionRegistry, SessionState};
pub use types::{Capabilities, Session, SessionSummary, StatusFilter};
