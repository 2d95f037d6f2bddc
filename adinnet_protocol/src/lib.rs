//! Wire protocols for streaming segmented speech between capture tools and
//! recognizer hosts.
//!
//! Two sibling protocols share one TCP framing scheme:
//!
//! * **adinnet**: raw 16-bit PCM segments from a capture client to one or
//!   more recognizer servers, with single-byte pause/resume/terminate
//!   commands flowing back from each server.
//! * **vecnet**: feature-vector segments (one configuration header, then
//!   length-prefixed `f32` vectors) to the same kind of servers.

pub mod client;
pub mod vecnet;
pub mod wire;

pub use client::AdinnetPeers;
pub use wire::{AdinMessage, Command, Connection, ProtocolError};

/// Default adinnet server port.
pub const ADINNET_PORT: u16 = 5530;

/// Default vecnet server port.
pub const VECNET_PORT: u16 = 5531;
