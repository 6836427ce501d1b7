//! Protocol codec: typed messages to and from frame payloads.
//!
//! Inbound, a [`Frame`] payload is one `FromRadio` envelope; the codec maps
//! it onto [`InboundMessage`] and interprets packet payloads by portnum.
//! Outbound, an [`OutboundCommand`] becomes a `ToRadio` envelope, and
//! [`CommandEncoder`] wraps the encoded bytes in the 4-byte frame header
//! ready for the wire.
use std::io::Read;

use prost::Message;

use super::error::CodecError;
use super::framer::{frame_payload, Frame, MAX_FRAME_LEN};
use super::ChatVia;
use crate::proto;

/// Destination id meaning "everyone".
pub const BROADCAST: u32 = 0xFFFF_FFFF;

/// Decompressed text payloads larger than this are rejected as corrupt.
const MAX_INFLATED_TEXT: usize = 64 * 1024;

/// Typed view of one inbound frame, mirroring the `FromRadio` oneof.
#[derive(Debug, Clone)]
pub enum InboundMessage {
    MyNodeInfo { my_node_num: u32, nodedb_count: u32 },
    NodeInfo(proto::NodeInfo),
    ConfigComplete { nonce: u32 },
    Packet(proto::MeshPacket),
    Rebooted,
}

/// Interpretation of a decoded packet's application payload.
#[derive(Debug, Clone)]
pub enum PacketContent {
    Text { text: String, via: ChatVia },
    Position(proto::Position),
    /// Unrecognized portnum, carried through uninterpreted.
    Opaque { portnum: i32, payload: Vec<u8> },
}

/// Decode one frame payload into a typed inbound message.
pub fn decode_frame(frame: &Frame) -> Result<InboundMessage, CodecError> {
    let envelope = proto::FromRadio::decode(frame.payload.as_slice())?;
    use proto::from_radio::PayloadVariant;
    match envelope.payload_variant {
        Some(PayloadVariant::MyInfo(info)) => Ok(InboundMessage::MyNodeInfo {
            my_node_num: info.my_node_num,
            nodedb_count: info.nodedb_count,
        }),
        Some(PayloadVariant::NodeInfo(info)) => Ok(InboundMessage::NodeInfo(info)),
        Some(PayloadVariant::ConfigCompleteId(nonce)) => {
            Ok(InboundMessage::ConfigComplete { nonce })
        }
        Some(PayloadVariant::Packet(pkt)) => Ok(InboundMessage::Packet(pkt)),
        Some(PayloadVariant::Rebooted(_)) => Ok(InboundMessage::Rebooted),
        None => Err(CodecError::UnsupportedVariant),
    }
}

/// Interpret a decoded packet's `Data` payload by portnum.
pub fn interpret_data(data: &proto::Data) -> Result<PacketContent, CodecError> {
    match proto::PortNum::try_from(data.portnum).unwrap_or(proto::PortNum::UnknownApp) {
        proto::PortNum::TextMessageApp => {
            let text = std::str::from_utf8(&data.payload).map_err(|e| CodecError::BadPayload {
                portnum: data.portnum,
                reason: e.to_string(),
            })?;
            Ok(PacketContent::Text {
                text: text.to_string(),
                via: ChatVia::Protobuf,
            })
        }
        proto::PortNum::TextMessageCompressedApp => {
            let text = inflate_text(&data.payload).map_err(|reason| CodecError::BadPayload {
                portnum: data.portnum,
                reason,
            })?;
            Ok(PacketContent::Text {
                text,
                via: ChatVia::Compressed,
            })
        }
        proto::PortNum::PositionApp => {
            let pos =
                proto::Position::decode(data.payload.as_slice()).map_err(|e| {
                    CodecError::BadPayload {
                        portnum: data.portnum,
                        reason: e.to_string(),
                    }
                })?;
            Ok(PacketContent::Position(pos))
        }
        proto::PortNum::UnknownApp => Ok(PacketContent::Opaque {
            portnum: data.portnum,
            payload: data.payload.clone(),
        }),
    }
}

fn inflate_text(payload: &[u8]) -> Result<String, String> {
    let mut inflated = Vec::new();
    let mut decoder = flate2::read::DeflateDecoder::new(payload).take(MAX_INFLATED_TEXT as u64 + 1);
    decoder
        .read_to_end(&mut inflated)
        .map_err(|e| e.to_string())?;
    if inflated.len() > MAX_INFLATED_TEXT {
        return Err(format!("inflated past {} bytes", MAX_INFLATED_TEXT));
    }
    String::from_utf8(inflated).map_err(|e| e.to_string())
}

/// An application intent headed for the radio.
#[derive(Debug, Clone)]
pub enum OutboundCommand {
    SendText {
        /// `None` broadcasts on the channel.
        dest: Option<u32>,
        channel: u32,
        text: String,
    },
    SendPosition {
        dest: Option<u32>,
        channel: u32,
        latitude_i: i32,
        longitude_i: i32,
        altitude: Option<i32>,
        time: u32,
    },
    Heartbeat {
        nonce: u32,
    },
    RequestNodeDb {
        nonce: u32,
    },
}

/// Encode a command into `ToRadio` envelope bytes (no frame header).
pub fn encode(command: &OutboundCommand) -> Vec<u8> {
    use proto::to_radio::PayloadVariant;
    let variant = match command {
        OutboundCommand::SendText {
            dest,
            channel,
            text,
        } => {
            let data = proto::Data {
                portnum: proto::PortNum::TextMessageApp as i32,
                payload: text.as_bytes().to_vec(),
                ..Default::default()
            };
            PayloadVariant::Packet(mesh_packet(*dest, *channel, data))
        }
        OutboundCommand::SendPosition {
            dest,
            channel,
            latitude_i,
            longitude_i,
            altitude,
            time,
        } => {
            let pos = proto::Position {
                latitude_i: Some(*latitude_i),
                longitude_i: Some(*longitude_i),
                altitude: *altitude,
                time: Some(*time),
            };
            let data = proto::Data {
                portnum: proto::PortNum::PositionApp as i32,
                payload: pos.encode_to_vec(),
                ..Default::default()
            };
            PayloadVariant::Packet(mesh_packet(*dest, *channel, data))
        }
        OutboundCommand::Heartbeat { nonce } => {
            PayloadVariant::Heartbeat(proto::Heartbeat { nonce: *nonce })
        }
        OutboundCommand::RequestNodeDb { nonce } => PayloadVariant::WantConfigId(*nonce),
    };
    proto::ToRadio {
        payload_variant: Some(variant),
    }
    .encode_to_vec()
}

/// Build the MeshPacket envelope for an outbound payload. Direct messages
/// are sent reliable (want_ack, elevated priority, fresh packet id) so the
/// radio transmits them promptly; broadcasts go out fire-and-forget.
fn mesh_packet(dest: Option<u32>, channel: u32, data: proto::Data) -> proto::MeshPacket {
    let is_direct = dest.is_some();
    let id = if is_direct { nonzero_random() } else { 0 };
    proto::MeshPacket {
        from: 0, // firmware fills in the source
        to: dest.unwrap_or(BROADCAST),
        channel,
        payload_variant: Some(proto::mesh_packet::PayloadVariant::Decoded(data)),
        id,
        rx_time: 0,
        rx_snr: 0.0,
        hop_limit: 3,
        want_ack: is_direct,
        priority: if is_direct { 70 } else { 0 },
    }
}

fn nonzero_random() -> u32 {
    let id: u32 = rand::random();
    if id == 0 {
        1
    } else {
        id
    }
}

/// Builds fully framed command bytes, ready for the transport sink.
pub struct CommandEncoder;

impl CommandEncoder {
    pub fn send_text(
        dest: Option<u32>,
        channel: u32,
        text: &str,
    ) -> Result<Vec<u8>, CodecError> {
        Self::framed(&OutboundCommand::SendText {
            dest,
            channel,
            text: text.to_string(),
        })
    }

    pub fn send_position(
        dest: Option<u32>,
        channel: u32,
        latitude_i: i32,
        longitude_i: i32,
        altitude: Option<i32>,
        time: u32,
    ) -> Result<Vec<u8>, CodecError> {
        Self::framed(&OutboundCommand::SendPosition {
            dest,
            channel,
            latitude_i,
            longitude_i,
            altitude,
            time,
        })
    }

    pub fn heartbeat(nonce: u32) -> Result<Vec<u8>, CodecError> {
        Self::framed(&OutboundCommand::Heartbeat { nonce })
    }

    pub fn request_node_db(nonce: u32) -> Result<Vec<u8>, CodecError> {
        Self::framed(&OutboundCommand::RequestNodeDb { nonce })
    }

    fn framed(command: &OutboundCommand) -> Result<Vec<u8>, CodecError> {
        let payload = encode(command);
        if payload.is_empty() || payload.len() > MAX_FRAME_LEN {
            return Err(CodecError::Oversize(payload.len()));
        }
        Ok(frame_payload(&payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::framer::FrameDemuxer;

    fn frame_of(payload: Vec<u8>) -> Frame {
        Frame {
            magic: [0x94, 0xC3],
            length: payload.len() as u16,
            payload,
        }
    }

    fn from_radio(variant: proto::from_radio::PayloadVariant) -> Frame {
        let env = proto::FromRadio {
            id: 0,
            payload_variant: Some(variant),
        };
        frame_of(env.encode_to_vec())
    }

    #[test]
    fn decodes_my_info() {
        let frame = from_radio(proto::from_radio::PayloadVariant::MyInfo(
            proto::MyNodeInfo {
                my_node_num: 0xAABB,
                nodedb_count: 12,
            },
        ));
        match decode_frame(&frame).unwrap() {
            InboundMessage::MyNodeInfo {
                my_node_num,
                nodedb_count,
            } => {
                assert_eq!(my_node_num, 0xAABB);
                assert_eq!(nodedb_count, 12);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn decodes_config_complete_nonce() {
        let frame = from_radio(proto::from_radio::PayloadVariant::ConfigCompleteId(0x5EED));
        match decode_frame(&frame).unwrap() {
            InboundMessage::ConfigComplete { nonce } => assert_eq!(nonce, 0x5EED),
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn malformed_payload_is_an_error_not_a_panic() {
        // 0xFF opens a field with an invalid wire type for every known tag.
        let frame = frame_of(vec![0xFF, 0xFF, 0xFF]);
        assert!(matches!(
            decode_frame(&frame),
            Err(CodecError::Malformed(_))
        ));
    }

    #[test]
    fn text_payload_round_trip() {
        let data = proto::Data {
            portnum: proto::PortNum::TextMessageApp as i32,
            payload: b"hello mesh".to_vec(),
            ..Default::default()
        };
        match interpret_data(&data).unwrap() {
            PacketContent::Text { text, via } => {
                assert_eq!(text, "hello mesh");
                assert_eq!(via, ChatVia::Protobuf);
            }
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn invalid_utf8_text_is_rejected() {
        let data = proto::Data {
            portnum: proto::PortNum::TextMessageApp as i32,
            payload: vec![0xC3, 0x28],
            ..Default::default()
        };
        assert!(matches!(
            interpret_data(&data),
            Err(CodecError::BadPayload { portnum: 1, .. })
        ));
    }

    #[test]
    fn compressed_text_is_inflated() {
        use std::io::Write;
        let mut enc =
            flate2::write::DeflateEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all("squeezed greeting".as_bytes()).unwrap();
        let data = proto::Data {
            portnum: proto::PortNum::TextMessageCompressedApp as i32,
            payload: enc.finish().unwrap(),
            ..Default::default()
        };
        match interpret_data(&data).unwrap() {
            PacketContent::Text { text, via } => {
                assert_eq!(text, "squeezed greeting");
                assert_eq!(via, ChatVia::Compressed);
            }
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn corrupt_deflate_stream_is_rejected() {
        let data = proto::Data {
            portnum: proto::PortNum::TextMessageCompressedApp as i32,
            payload: vec![0x00, 0x01, 0x02],
            ..Default::default()
        };
        assert!(matches!(
            interpret_data(&data),
            Err(CodecError::BadPayload { portnum: 7, .. })
        ));
    }

    #[test]
    fn position_payload_decodes_recursively() {
        let pos = proto::Position {
            latitude_i: Some(520000000),
            longitude_i: Some(43000000),
            altitude: Some(8),
            time: Some(12345),
        };
        let data = proto::Data {
            portnum: proto::PortNum::PositionApp as i32,
            payload: pos.encode_to_vec(),
            ..Default::default()
        };
        match interpret_data(&data).unwrap() {
            PacketContent::Position(got) => assert_eq!(got, pos),
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn unknown_portnum_passes_through() {
        let data = proto::Data {
            portnum: 67,
            payload: vec![1, 2, 3],
            ..Default::default()
        };
        match interpret_data(&data).unwrap() {
            PacketContent::Opaque { portnum, payload } => {
                assert_eq!(portnum, 67);
                assert_eq!(payload, vec![1, 2, 3]);
            }
            other => panic!("unexpected content {:?}", other),
        }
    }

    #[test]
    fn send_text_encodes_a_broadcast_packet() {
        let bytes = encode(&OutboundCommand::SendText {
            dest: None,
            channel: 2,
            text: "ping".to_string(),
        });
        let env = proto::ToRadio::decode(bytes.as_slice()).unwrap();
        match env.payload_variant.unwrap() {
            proto::to_radio::PayloadVariant::Packet(pkt) => {
                assert_eq!(pkt.to, BROADCAST);
                assert_eq!(pkt.channel, 2);
                assert_eq!(pkt.id, 0);
                assert!(!pkt.want_ack);
                match pkt.payload_variant.unwrap() {
                    proto::mesh_packet::PayloadVariant::Decoded(data) => {
                        assert_eq!(data.portnum, proto::PortNum::TextMessageApp as i32);
                        assert_eq!(data.payload, b"ping");
                    }
                    other => panic!("unexpected variant {:?}", other),
                }
            }
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn direct_text_is_reliable() {
        let bytes = encode(&OutboundCommand::SendText {
            dest: Some(0x42),
            channel: 0,
            text: "dm".to_string(),
        });
        let env = proto::ToRadio::decode(bytes.as_slice()).unwrap();
        match env.payload_variant.unwrap() {
            proto::to_radio::PayloadVariant::Packet(pkt) => {
                assert_eq!(pkt.to, 0x42);
                assert!(pkt.want_ack);
                assert_ne!(pkt.id, 0);
                assert_eq!(pkt.priority, 70);
            }
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn request_node_db_carries_the_nonce() {
        let bytes = encode(&OutboundCommand::RequestNodeDb { nonce: 0xCAFE });
        let env = proto::ToRadio::decode(bytes.as_slice()).unwrap();
        assert!(matches!(
            env.payload_variant,
            Some(proto::to_radio::PayloadVariant::WantConfigId(0xCAFE))
        ));
    }

    #[test]
    fn command_encoder_output_reframes_cleanly() {
        let framed = CommandEncoder::heartbeat(7).unwrap();
        let mut demux = FrameDemuxer::new();
        let events = demux.feed(&framed);
        assert_eq!(events.len(), 1);
        match &events[0] {
            crate::link::framer::DemuxEvent::Frame(f) => {
                let env = proto::ToRadio::decode(f.payload.as_slice()).unwrap();
                match env.payload_variant.unwrap() {
                    proto::to_radio::PayloadVariant::Heartbeat(hb) => assert_eq!(hb.nonce, 7),
                    other => panic!("unexpected variant {:?}", other),
                }
            }
            other => panic!("expected frame, got {:?}", other),
        }
    }
}
