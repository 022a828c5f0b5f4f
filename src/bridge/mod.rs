//! # Call Bridge
//!
//! Everything that connects a telephony media stream to a realtime
//! translation session:
//!
//! - **protocol**: wire types for both legs (provider events, backend events)
//! - **session**: per-call state machine and the process-wide registry
//! - **relay**: pure gating/forwarding logic (event in, actions out)
//! - **backend**: negotiation call plus the streaming socket's I/O tasks
//! - **caller**: the WebSocket actor that owns a call end to end

pub mod backend;
pub mod caller;
pub mod protocol;
pub mod relay;
pub mod session;
