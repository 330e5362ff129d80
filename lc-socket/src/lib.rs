//! LatamChat Socket - realtime change feed client.
//!
//! This crate provides:
//! - Change event and channel subscription types shared by every backend
//! - A topic router that fans change events out to open channels
//! - The Phoenix channel wire format used by the realtime service
//! - A websocket client that joins channels, keeps the heartbeat, and routes events
//!
//! There is no automatic reconnection. When the socket closes, open channels
//! end and callers decide whether to subscribe again.

pub mod client;
pub mod events;
pub mod protocol;

// Re-export key types
pub use client::RealtimeClient;
pub use events::{
    ChangeEvent, ChangeKind, ChannelRouter, ChannelSpec, ConnectionState, RealtimeChannel,
};
