//! # Radio Link Engine
//!
//! This module turns the raw byte stream from a mesh radio into typed
//! protocol events and turns application intents back into framed bytes.
//! It is transport-agnostic: the host supplies a duplex byte stream (see
//! [`transport`]) and receives events over a channel.
//!
//! ## Pipeline
//!
//! ```text
//! raw bytes ──► FrameDemuxer ──┬─► binary frame ─► ProtocolCodec ─► typed event ─┐
//!                              │                                                 ├─► Deduplicator ─► events
//!                              └─► text run ─────► TextChannel ──► log scrape ───┘
//!
//! commands ──► CommandEncoder ─► ProtocolCodec ─► frame header ─► raw bytes
//! ```
//!
//! The two inbound paths exist because the firmware sometimes echoes a chat
//! message only into its human log stream rather than (or in addition to)
//! the binary channel; [`dedup::Deduplicator`] is the merge point that keeps
//! the application from seeing the same message twice.
//!
//! ## Session lifecycle
//!
//! [`session::LinkSession`] owns the connection state machine:
//!
//! ```text
//! Disconnected ─► PortSelected ─► Connecting ─► Syncing ─► Ready
//!        ▲                            ▲                      │
//!        └────────── Reconnecting ◄───┴──────────────────────┘
//! ```
//!
//! Connecting clears all per-connection state and requests the radio's node
//! database with a fresh nonce; only a completion event echoing that nonce
//! promotes the session to Ready. Read failures trigger reconnection with
//! bounded backoff unless the user asked to disconnect.

pub mod codec;
pub mod dedup;
pub mod error;
pub mod framer;
pub mod nodedb;
pub mod session;
pub mod text;
pub mod transport;

use serde::Serialize;

pub use codec::{CommandEncoder, InboundMessage, OutboundCommand, PacketContent, BROADCAST};
pub use dedup::{DedupKey, Deduplicator};
pub use error::{CodecError, LinkError};
pub use framer::{Frame, FrameDemuxer};
pub use nodedb::{NodeDatabase, NodeMetrics, NodePosition, RadioNode};
pub use session::{LinkSession, SessionTiming};
pub use text::TextChannel;
pub use transport::{LinkTransport, TransportOpener};

/// Connection lifecycle states. `Disconnected` is both initial and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    PortSelected,
    Connecting,
    Syncing,
    Ready,
    Reconnecting,
}

/// Which path delivered a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatVia {
    /// Decoded from a binary frame.
    Protobuf,
    /// Scraped from the firmware log stream.
    Ascii,
    /// Decoded from a binary frame carrying DEFLATE-compressed text.
    Compressed,
}

/// One inbound chat message, after deduplication.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub from: u32,
    /// [`BROADCAST`] routes to the public thread.
    pub to: u32,
    pub channel: u32,
    pub text: String,
    /// Packet id, zero-padded lowercase hex.
    pub id_hex: String,
    pub via: ChatVia,
    pub received_at_ms: u64,
}

/// Which conversation a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatThread {
    Public,
    /// Keyed by the other party's node number.
    Direct(u32),
}

impl ChatMessage {
    /// Routing key for presentation: broadcasts go to the public thread,
    /// everything else is keyed by whichever party is not us.
    pub fn thread(&self, self_node: Option<u32>) -> ChatThread {
        if self.to == BROADCAST {
            return ChatThread::Public;
        }
        match self_node {
            Some(me) if self.from == me => ChatThread::Direct(self.to),
            _ => ChatThread::Direct(self.from),
        }
    }
}

/// Events delivered to the application, in stream order.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LinkEvent {
    ConnectionStateChanged { state: LinkState },
    NodeUpdated { node: RadioNode },
    ChatReceived { message: ChatMessage },
    SyncProgress { done: u32, total: u32 },
    SyncComplete,
    SyncTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(from: u32, to: u32) -> ChatMessage {
        ChatMessage {
            from,
            to,
            channel: 0,
            text: "t".into(),
            id_hex: "00".into(),
            via: ChatVia::Protobuf,
            received_at_ms: 0,
        }
    }

    #[test]
    fn broadcast_routes_to_public_thread() {
        assert_eq!(msg(5, BROADCAST).thread(Some(1)), ChatThread::Public);
    }

    #[test]
    fn direct_thread_is_keyed_by_the_other_party() {
        // Inbound DM: peer 5 wrote to us (1).
        assert_eq!(msg(5, 1).thread(Some(1)), ChatThread::Direct(5));
        // Echo of our own DM: we (1) wrote to peer 5.
        assert_eq!(msg(1, 5).thread(Some(1)), ChatThread::Direct(5));
        // Unknown self: attribute to the sender.
        assert_eq!(msg(5, 1).thread(None), ChatThread::Direct(5));
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_string(&LinkEvent::ConnectionStateChanged {
            state: LinkState::Ready,
        })
        .unwrap();
        assert!(json.contains("\"event\":\"connection_state_changed\""));
        assert!(json.contains("\"ready\""));
    }
}
