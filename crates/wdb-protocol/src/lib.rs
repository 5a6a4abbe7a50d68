//! Wire protocol shared between the wdb hub and its peers.
//!
//! Debuggee processes speak a length-prefixed TCP framing: a 4-byte
//! big-endian signed length followed by that many bytes of UTF-8 text.
//! Browser channels carry the same text payloads over WebSocket. Structured
//! messages are a verb and an optional JSON payload joined with `|`.

pub mod breakpoint;
pub mod frame;
pub mod message;

pub use breakpoint::Breakpoint;
pub use frame::{FrameError, REGISTRATION_UUID_LEN, read_frame, write_frame};
