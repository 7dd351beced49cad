//! Terminal session subsystem: the PTY wrapper, the bounded replay history,
//! and the single-session manager that arbitrates them.

pub mod history;
pub mod manager;
pub mod pty;

pub use manager::{SessionManager, StartInfo, StartOptions, StatusReport};
pub use pty::{PtyDimensions, PtySession, SessionEvents, StopTimings};
