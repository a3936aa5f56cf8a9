//! tabreel - recording session orchestration for instrumented browser tabs.
//!
//! Telemetry from the capture side (network, console, DOM) is correlated,
//! stamped onto the video-relative time axis, buffered per channel and
//! written to the blob store in numbered batches.

pub mod archive;
pub mod buffer;
pub mod correlator;
pub mod flush;
pub mod keys;
pub mod publisher;
pub mod recorder;
pub mod redact;
pub mod router;
pub mod sessions;
pub mod settings;
pub mod sync;
pub mod telemetry;
pub mod web;

pub use recorder::Recorder;
pub use router::{Router, RouterHandle};
pub use sessions::{SessionError, SessionRegistry};
