//! # Control session
//!
//! Ties the transport, the synchronizer, the rule engine and the timers of
//! one client together and executes control intents.
//!
//! ```text
//! session/
//! ├── control.rs    - ControlSession state machine, command dispatch
//! ├── error.rs      - SessionError
//! ├── handle.rs     - SessionHandle, runs the session in a tokio task
//! ├── intent.rs     - Intents from buttons, gestures and voice
//! ├── scheduler.rs  - Cancellable debounce, confirmation and delay timers
//! └── view.rs       - Read-only SessionView for display collaborators
//! ```
//!
//! Everything runs on a single task; the session loop selects over inbound
//! messages, requests, timer expiries, the rule poll and connection state
//! changes, and publishes a fresh [`SessionView`] after each of them.

pub mod control;
pub mod error;
pub mod handle;
pub mod intent;
pub mod scheduler;
pub mod view;

pub use control::{ControlSession, SessionInputs, SessionRequest};
pub use error::SessionError;
pub use handle::SessionHandle;
pub use intent::Intent;
pub use scheduler::{Scheduler, TimerFired, TimerKind};
pub use view::{DelayTimerView, Notice, Operator, SessionView};
