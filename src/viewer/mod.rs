//! Live stream viewer
//!
//! Connects to the hub's WebSocket stream and hands decoded events to the
//! caller. Rendering is left to whoever consumes the events.

mod websocket;

pub use websocket::{LiveStreamClient, ViewerEvent, stream_url};
