//! Test utilities & fixtures.
//! Provides a scripted radio simulator that stands in for the serial
//! transport: it parses outbound `ToRadio` frames and replies the way
//! firmware does (node-database push echoing the request nonce), and lets
//! tests inject inbound bytes or kill the link.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use prost::Message;

use meshlink::link::framer::frame_payload;
use meshlink::link::transport::{LinkTransport, TransportOpener};
use meshlink::link::{LinkEvent, SessionTiming};
use meshlink::proto;

/// Timing knobs shrunk far enough that handshake/reconnect tests finish in
/// tens of milliseconds.
#[allow(dead_code)]
pub fn fast_timing() -> SessionTiming {
    SessionTiming {
        heartbeat: Duration::from_millis(100),
        want_config_resend: Duration::from_millis(200),
        sync_timeout: Duration::from_secs(2),
        reconnect_floor: Duration::from_millis(50),
        reconnect_cap: Duration::from_millis(200),
    }
}

/// Fixed behavior of the simulated radio.
#[derive(Clone)]
pub struct SimConfig {
    pub my_node_num: u32,
    pub nodes: Vec<proto::NodeInfo>,
    /// Completion nonce override; `None` echoes the request nonce the way
    /// real firmware does.
    pub completion_nonce: Option<u32>,
    /// Number of initial `open()` calls that fail before one succeeds.
    pub fail_opens: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            my_node_num: 0x0100_0001,
            nodes: vec![node_info(0x0100_0002, "Relay One", "R1")],
            completion_nonce: None,
            fail_opens: 0,
        }
    }
}

#[allow(dead_code)]
pub fn node_info(num: u32, long_name: &str, short_name: &str) -> proto::NodeInfo {
    proto::NodeInfo {
        num,
        user: Some(proto::User {
            id: format!("!{:08x}", num),
            long_name: long_name.to_string(),
            short_name: short_name.to_string(),
        }),
        last_heard: 1_700_000_000,
        snr: 6.25,
        ..Default::default()
    }
}

struct SimShared {
    config: SimConfig,
    inbound: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
    opens: usize,
    read_error: Option<io::ErrorKind>,
}

/// Handle held by the test to script the radio side.
#[derive(Clone)]
pub struct RadioSim {
    shared: Arc<Mutex<SimShared>>,
}

#[allow(dead_code)]
impl RadioSim {
    pub fn new(config: SimConfig) -> Self {
        Self {
            shared: Arc::new(Mutex::new(SimShared {
                config,
                inbound: VecDeque::new(),
                writes: Vec::new(),
                opens: 0,
                read_error: None,
            })),
        }
    }

    pub fn opener(&self) -> Box<dyn TransportOpener> {
        Box::new(SimOpener {
            shared: self.shared.clone(),
        })
    }

    /// Queue raw bytes for the engine to read.
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.shared.lock().unwrap().inbound.push_back(bytes.to_vec());
    }

    /// Queue a framed `FromRadio` envelope.
    pub fn push_from_radio(&self, variant: proto::from_radio::PayloadVariant) {
        let env = proto::FromRadio {
            id: 0,
            payload_variant: Some(variant),
        };
        self.push_bytes(&frame_payload(&env.encode_to_vec()));
    }

    /// Queue a broadcast text packet.
    pub fn push_text_packet(&self, from: u32, id: u32, text: &str) {
        let data = proto::Data {
            portnum: proto::PortNum::TextMessageApp as i32,
            payload: text.as_bytes().to_vec(),
            ..Default::default()
        };
        let pkt = proto::MeshPacket {
            from,
            to: 0xFFFF_FFFF,
            id,
            payload_variant: Some(proto::mesh_packet::PayloadVariant::Decoded(data)),
            ..Default::default()
        };
        self.push_from_radio(proto::from_radio::PayloadVariant::Packet(pkt));
    }

    /// Make the next read fail, as an unplugged cable would.
    pub fn fail_link(&self) {
        self.shared.lock().unwrap().read_error = Some(io::ErrorKind::BrokenPipe);
    }

    pub fn open_count(&self) -> usize {
        self.shared.lock().unwrap().opens
    }

    /// Decode every `ToRadio` frame the engine has written so far.
    pub fn written_to_radio(&self) -> Vec<proto::ToRadio> {
        let shared = self.shared.lock().unwrap();
        shared
            .writes
            .iter()
            .filter_map(|frame| {
                if frame.len() < 4 || frame[0] != 0x94 || frame[1] != 0xC3 {
                    return None;
                }
                proto::ToRadio::decode(&frame[4..]).ok()
            })
            .collect()
    }

    pub fn want_config_nonces(&self) -> Vec<u32> {
        self.written_to_radio()
            .into_iter()
            .filter_map(|env| match env.payload_variant {
                Some(proto::to_radio::PayloadVariant::WantConfigId(nonce)) => Some(nonce),
                _ => None,
            })
            .collect()
    }

    pub fn heartbeat_nonces(&self) -> Vec<u32> {
        self.written_to_radio()
            .into_iter()
            .filter_map(|env| match env.payload_variant {
                Some(proto::to_radio::PayloadVariant::Heartbeat(hb)) => Some(hb.nonce),
                _ => None,
            })
            .collect()
    }

    pub fn sent_text_packets(&self) -> Vec<proto::MeshPacket> {
        self.written_to_radio()
            .into_iter()
            .filter_map(|env| match env.payload_variant {
                Some(proto::to_radio::PayloadVariant::Packet(pkt)) => Some(pkt),
                _ => None,
            })
            .collect()
    }
}

struct SimOpener {
    shared: Arc<Mutex<SimShared>>,
}

impl TransportOpener for SimOpener {
    fn open(&self) -> io::Result<Box<dyn LinkTransport>> {
        let mut shared = self.shared.lock().unwrap();
        shared.opens += 1;
        if shared.config.fail_opens > 0 {
            shared.config.fail_opens -= 1;
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
        }
        // A fresh connection starts with clean buffers.
        shared.inbound.clear();
        shared.read_error = None;
        Ok(Box::new(SimTransport {
            shared: self.shared.clone(),
        }))
    }

    fn describe(&self) -> String {
        "sim".to_string()
    }
}

struct SimTransport {
    shared: Arc<Mutex<SimShared>>,
}

impl SimTransport {
    /// Firmware-side behavior: a node-db request triggers the config push.
    fn respond(shared: &mut SimShared, env: &proto::ToRadio) {
        if let Some(proto::to_radio::PayloadVariant::WantConfigId(nonce)) = env.payload_variant {
            let config = shared.config.clone();
            let mut reply = Vec::new();
            // Firmwares interleave boot chatter with the binary push.
            reply.push(b"INFO  | Node database push starting\r\n".to_vec());
            let my_info = proto::FromRadio {
                id: 0,
                payload_variant: Some(proto::from_radio::PayloadVariant::MyInfo(
                    proto::MyNodeInfo {
                        my_node_num: config.my_node_num,
                        nodedb_count: config.nodes.len() as u32,
                    },
                )),
            };
            reply.push(frame_payload(&my_info.encode_to_vec()));
            for node in &config.nodes {
                let env = proto::FromRadio {
                    id: 0,
                    payload_variant: Some(proto::from_radio::PayloadVariant::NodeInfo(
                        node.clone(),
                    )),
                };
                reply.push(frame_payload(&env.encode_to_vec()));
            }
            let complete = proto::FromRadio {
                id: 0,
                payload_variant: Some(proto::from_radio::PayloadVariant::ConfigCompleteId(
                    config.completion_nonce.unwrap_or(nonce),
                )),
            };
            reply.push(frame_payload(&complete.encode_to_vec()));
            shared.inbound.extend(reply);
        }
    }
}

impl LinkTransport for SimTransport {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut shared = self.shared.lock().unwrap();
        if let Some(kind) = shared.read_error.take() {
            return Err(io::Error::new(kind, "simulated link failure"));
        }
        match shared.inbound.pop_front() {
            Some(chunk) => {
                assert!(chunk.len() <= buf.len(), "sim chunk exceeds read buffer");
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            None => Err(io::Error::new(io::ErrorKind::TimedOut, "idle")),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let mut shared = self.shared.lock().unwrap();
        shared.writes.push(data.to_vec());
        if data.len() >= 4 && data[0] == 0x94 && data[1] == 0xC3 {
            if let Ok(env) = proto::ToRadio::decode(&data[4..]) {
                Self::respond(&mut shared, &env);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Wait (bounded) for an event matching the predicate, discarding others.
#[allow(dead_code)]
pub async fn wait_for<F>(
    events: &mut tokio::sync::mpsc::UnboundedReceiver<LinkEvent>,
    pred: F,
) -> LinkEvent
where
    F: Fn(&LinkEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
