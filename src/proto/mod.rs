//! Wire schema for the radio serial protocol.
//!
//! Hand-maintained `prost` message definitions covering the subset of the
//! device schema this engine speaks: the `ToRadio`/`FromRadio` envelopes,
//! mesh packets with their decoded/encrypted payload variants, positions,
//! node records, and the heartbeat. Field numbers match the upstream
//! firmware definitions so frames interoperate with real devices; unknown
//! fields and oneof variants are skipped by prost on decode, which is what
//! gives the engine its forward compatibility with newer firmwares.

/// Envelope for everything the host sends to the radio.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ToRadio {
    #[prost(oneof = "to_radio::PayloadVariant", tags = "1, 3, 4, 7")]
    pub payload_variant: ::core::option::Option<to_radio::PayloadVariant>,
}
/// Nested message and enum types in `ToRadio`.
pub mod to_radio {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        /// A mesh packet to transmit.
        #[prost(message, tag = "1")]
        Packet(super::MeshPacket),
        /// Ask the radio to stream its config and node database; the nonce
        /// is echoed back in `FromRadio.config_complete_id`.
        #[prost(uint32, tag = "3")]
        WantConfigId(u32),
        /// Tell the radio the host is going away.
        #[prost(bool, tag = "4")]
        Disconnect(bool),
        #[prost(message, tag = "7")]
        Heartbeat(super::Heartbeat),
    }
}

/// Envelope for everything the radio sends to the host.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FromRadio {
    /// Monotonic frame id assigned by the firmware.
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(oneof = "from_radio::PayloadVariant", tags = "2, 3, 4, 7, 8")]
    pub payload_variant: ::core::option::Option<from_radio::PayloadVariant>,
}
/// Nested message and enum types in `FromRadio`.
pub mod from_radio {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        #[prost(message, tag = "2")]
        Packet(super::MeshPacket),
        #[prost(message, tag = "3")]
        MyInfo(super::MyNodeInfo),
        #[prost(message, tag = "4")]
        NodeInfo(super::NodeInfo),
        /// Echo of the `want_config_id` nonce; marks the end of the
        /// config/node-database push.
        #[prost(uint32, tag = "7")]
        ConfigCompleteId(u32),
        #[prost(bool, tag = "8")]
        Rebooted(bool),
    }
}

/// One packet observed on (or destined for) the mesh.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct MeshPacket {
    #[prost(fixed32, tag = "1")]
    pub from: u32,
    #[prost(fixed32, tag = "2")]
    pub to: u32,
    #[prost(uint32, tag = "3")]
    pub channel: u32,
    #[prost(oneof = "mesh_packet::PayloadVariant", tags = "4, 5")]
    pub payload_variant: ::core::option::Option<mesh_packet::PayloadVariant>,
    #[prost(fixed32, tag = "6")]
    pub id: u32,
    /// Seconds since epoch when the radio received the packet.
    #[prost(fixed32, tag = "7")]
    pub rx_time: u32,
    #[prost(float, tag = "8")]
    pub rx_snr: f32,
    #[prost(uint32, tag = "9")]
    pub hop_limit: u32,
    #[prost(bool, tag = "10")]
    pub want_ack: bool,
    #[prost(uint32, tag = "11")]
    pub priority: u32,
}
/// Nested message and enum types in `MeshPacket`.
pub mod mesh_packet {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum PayloadVariant {
        /// Cleartext application payload.
        #[prost(message, tag = "4")]
        Decoded(super::Data),
        /// Payload this node could not decrypt; carried opaquely.
        #[prost(bytes, tag = "5")]
        Encrypted(::prost::alloc::vec::Vec<u8>),
    }
}

/// Application-layer payload inside a decoded `MeshPacket`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Data {
    /// Selects how `payload` is interpreted; see [`PortNum`].
    #[prost(int32, tag = "1")]
    pub portnum: i32,
    #[prost(bytes = "vec", tag = "2")]
    pub payload: ::prost::alloc::vec::Vec<u8>,
    #[prost(bool, tag = "3")]
    pub want_response: bool,
    #[prost(fixed32, tag = "4")]
    pub dest: u32,
    #[prost(fixed32, tag = "5")]
    pub source: u32,
    #[prost(fixed32, tag = "6")]
    pub request_id: u32,
    #[prost(fixed32, tag = "7")]
    pub reply_id: u32,
    #[prost(fixed32, tag = "8")]
    pub emoji: u32,
}

/// A GPS fix in fixed-point degrees (1e-7 degree units).
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Position {
    #[prost(sfixed32, optional, tag = "1")]
    pub latitude_i: ::core::option::Option<i32>,
    #[prost(sfixed32, optional, tag = "2")]
    pub longitude_i: ::core::option::Option<i32>,
    /// Meters above MSL.
    #[prost(int32, optional, tag = "3")]
    pub altitude: ::core::option::Option<i32>,
    #[prost(fixed32, optional, tag = "4")]
    pub time: ::core::option::Option<u32>,
}

/// Identity block for a node.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct User {
    /// Stable node id string, e.g. `!a1b2c3d4`.
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub long_name: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub short_name: ::prost::alloc::string::String,
}

/// Battery/radio utilization metrics reported by a node.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct DeviceMetrics {
    /// 0-100, or >100 for "powered".
    #[prost(uint32, optional, tag = "1")]
    pub battery_level: ::core::option::Option<u32>,
    #[prost(float, optional, tag = "2")]
    pub voltage: ::core::option::Option<f32>,
    #[prost(float, optional, tag = "3")]
    pub channel_utilization: ::core::option::Option<f32>,
    #[prost(float, optional, tag = "4")]
    pub air_util_tx: ::core::option::Option<f32>,
}

/// One entry in the radio's node database.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodeInfo {
    #[prost(uint32, tag = "1")]
    pub num: u32,
    #[prost(message, optional, tag = "2")]
    pub user: ::core::option::Option<User>,
    #[prost(message, optional, tag = "3")]
    pub position: ::core::option::Option<Position>,
    #[prost(float, tag = "4")]
    pub snr: f32,
    /// Seconds since epoch when this node was last heard.
    #[prost(fixed32, tag = "5")]
    pub last_heard: u32,
    #[prost(message, optional, tag = "6")]
    pub device_metrics: ::core::option::Option<DeviceMetrics>,
    #[prost(uint32, tag = "7")]
    pub channel: u32,
}

/// The radio's own identity, sent at the head of a config push.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct MyNodeInfo {
    #[prost(uint32, tag = "1")]
    pub my_node_num: u32,
    /// Number of node-database entries the push will contain.
    #[prost(uint32, tag = "14")]
    pub nodedb_count: u32,
}

/// Periodic keep-alive from host to radio.
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct Heartbeat {
    #[prost(uint32, tag = "1")]
    pub nonce: u32,
}

/// Application port numbers this engine interprets. Everything else is
/// carried through opaquely.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PortNum {
    UnknownApp = 0,
    /// UTF-8 chat text.
    TextMessageApp = 1,
    /// `Position` sub-message.
    PositionApp = 3,
    /// DEFLATE-compressed UTF-8 chat text.
    TextMessageCompressedApp = 7,
}
