//! Coordination hub for the wdb remote debugger.
//!
//! Debuggee processes connect over TCP and register with a session UUID,
//! browser debugging UIs attach to a session over a relay WebSocket, and a
//! control WebSocket multiplexes the session list, breakpoint administration
//! and process enumeration across all open tabs.

pub mod api;
pub mod config;
pub mod engine;
pub mod monitor;
pub mod state;
pub mod tcp;
pub mod watcher;
