//! # Meshlink - Radio-Link Protocol Engine
//!
//! Meshlink speaks the serial protocol of Meshtastic-compatible mesh radios:
//! it turns the raw byte stream arriving from a device into typed protocol
//! events (node telemetry, chat text, position reports) and turns
//! application intents (send text, send position, request the node
//! database) back into correctly framed bytes.
//!
//! ## Features
//!
//! - **Stream resynchronization**: binary frames are recovered from a byte
//!   stream that also carries free-form firmware debug text, surviving
//!   corrupted headers and arbitrary chunk boundaries.
//! - **Typed protocol**: protobuf envelopes decoded into a tagged inbound
//!   message type; payloads dispatched by portnum (text, position,
//!   DEFLATE-compressed text), unknown ports carried through opaquely.
//! - **Dual-path dedup**: chat messages observed both as binary packets and
//!   as firmware log lines are merged so the application sees each message
//!   exactly once.
//! - **Session management**: node-database sync handshake with nonce
//!   gating, periodic heartbeats, and bounded-backoff reconnection.
//! - **Async design**: built on Tokio; events are delivered over a channel
//!   in stream order.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "serial")]
//! # {
//! use meshlink::link::{LinkEvent, LinkSession, SessionTiming};
//! use meshlink::link::transport::SerialOpener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (mut session, mut events) = LinkSession::new(SessionTiming::default());
//!     session.choose_port(Box::new(SerialOpener::new("/dev/ttyUSB0", 115200)))?;
//!     session.connect()?;
//!     while let Some(event) = events.recv().await {
//!         if let LinkEvent::ChatReceived { message } = event {
//!             println!("<{}> {}", message.from, message.text);
//!         }
//!     }
//!     Ok(())
//! }
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`link`] - The protocol engine: framing, codec, text channel, dedup,
//!   node database, and the session state machine
//! - [`proto`] - Hand-maintained wire schema definitions
//! - [`config`] - Configuration management and validation
//! - [`metrics`] - Process-wide link counters
//! - [`logutil`] - Log sanitation helpers
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   LinkSession    │ ← lifecycle, handshake, heartbeat, reconnect
//! └──────────────────┘
//!          │
//! ┌──────────────────┐
//! │  FrameDemuxer /  │ ← stream framing and the textual side channel
//! │   TextChannel    │
//! └──────────────────┘
//!          │
//! ┌──────────────────┐
//! │  ProtocolCodec   │ ← typed messages over the wire schema
//! └──────────────────┘
//! ```

pub mod config;
pub mod link;
pub mod logutil;
pub mod metrics;
pub mod proto;

pub use link::{
    ChatMessage, ChatThread, ChatVia, LinkError, LinkEvent, LinkSession, LinkState, RadioNode,
    SessionTiming,
};
