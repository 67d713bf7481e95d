//! Session orchestration
//!
//! The controller owns the session state machine and routes frames between
//! the wake word gate and the transport.

mod controller;
mod event;
mod state;
mod wake_lock;

pub use controller::{
    FrameRouting, STATUS_LISTENING, STATUS_MANUAL_ONLY, STATUS_SESSION_ACTIVE, SessionController,
};
pub use event::{ControlCommand, ControlHandle, SessionEvent, UiEvent};
pub use state::SessionState;
pub use wake_lock::{ExclusiveResource, WakeLock};
