//! ptycast-core: Shared protocol library for ptycast.
//!
//! Provides the JSON channel message types, the terminal-identity output
//! sanitizer, and the special-key to control-sequence mapping.

pub mod error;
pub mod keymap;
pub mod messages;
pub mod sanitize;

// Re-export commonly used items at crate root.
pub use error::{CastError, CastResult};
pub use keymap::map_special_key;
pub use messages::{ClientMessage, ServerMessage, SessionStatus};
pub use sanitize::strip_device_attributes;
