//! Connection lifecycle: port selection, handshake, heartbeats, reconnect.
//!
//! A [`LinkSession`] owns one managed link. `connect()` spawns a session
//! task that opens the transport, runs the node-database handshake, and
//! keeps the connection alive; a dedicated reader task drains the transport
//! and dispatches decoded events. All writes funnel through the session
//! task (commands arrive over a channel), so the outbound byte stream has a
//! single writer. Heartbeat and reconnect timing live inside the session
//! task's `select!` loops and die with them, which is what guarantees no
//! heartbeat can fire after teardown.
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::codec::{self, CommandEncoder, InboundMessage, PacketContent, BROADCAST};
use super::dedup::Deduplicator;
use super::error::{CodecError, LinkError};
use super::framer::{DemuxEvent, FrameDemuxer};
use super::nodedb::{NodeDatabase, RadioNode};
use super::text::TextChannel;
use super::transport::{LinkTransport, TransportOpener};
use super::{ChatMessage, ChatVia, LinkEvent, LinkState};
use crate::logutil::{escape_log, hex_snippet};
use crate::metrics;
use crate::proto;

type SharedPort = Arc<Mutex<Box<dyn LinkTransport>>>;

/// Timing knobs for a session. Defaults match the device's expectations;
/// tests shrink them.
#[derive(Debug, Clone)]
pub struct SessionTiming {
    /// Heartbeat interval once the session is Ready.
    pub heartbeat: Duration,
    /// Re-send cadence for the node-db request while syncing.
    pub want_config_resend: Duration,
    /// How long a sync may run before a SyncTimeout status is emitted.
    pub sync_timeout: Duration,
    /// First reconnect delay.
    pub reconnect_floor: Duration,
    /// Reconnect delay ceiling.
    pub reconnect_cap: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(12),
            want_config_resend: Duration::from_secs(7),
            sync_timeout: Duration::from_secs(45),
            reconnect_floor: Duration::from_millis(1000),
            reconnect_cap: Duration::from_millis(15000),
        }
    }
}

/// Node-database sync bookkeeping. Recreated on every request; a completion
/// only counts when its echoed nonce matches.
#[derive(Debug)]
struct SyncState {
    nonce: u32,
    expected: u32,
    done: u32,
    in_progress: bool,
    timed_out: bool,
    started: Instant,
    last_request: Instant,
}

impl SyncState {
    fn idle() -> Self {
        let now = Instant::now();
        Self {
            nonce: 0,
            expected: 0,
            done: 0,
            in_progress: false,
            timed_out: false,
            started: now,
            last_request: now,
        }
    }

    fn fresh(nonce: u32) -> Self {
        Self {
            nonce,
            in_progress: true,
            ..Self::idle()
        }
    }
}

/// State shared between the session handle, the session task, and the
/// reader task. Single writer per field: the reader owns node/dedup
/// mutation, the session task owns lifecycle fields.
struct SessionCtx {
    timing: SessionTiming,
    state: Mutex<LinkState>,
    nodes: Mutex<NodeDatabase>,
    dedup: Mutex<Deduplicator>,
    sync: Mutex<SyncState>,
    my_node_num: Mutex<Option<u32>>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    user_disconnect: AtomicBool,
    backoff_ms: AtomicU64,
}

impl SessionCtx {
    fn emit(&self, event: LinkEvent) {
        let _ = self.event_tx.send(event);
    }

    fn set_state(&self, next: LinkState) {
        let mut cur = self.state.lock().unwrap();
        if *cur != next {
            debug!("Link state {:?} -> {:?}", *cur, next);
            *cur = next;
            drop(cur);
            self.emit(LinkEvent::ConnectionStateChanged { state: next });
        }
    }

    fn current_state(&self) -> LinkState {
        *self.state.lock().unwrap()
    }

    fn floor_ms(&self) -> u64 {
        self.timing.reconnect_floor.as_millis() as u64
    }
}

enum SessionCommand {
    Write(Vec<u8>),
    RequestNodeDb,
    Disconnect,
}

enum ConnectionEnd {
    UserDisconnect,
    LinkLost,
}

/// One managed radio link: the public face of the engine.
pub struct LinkSession {
    ctx: Arc<SessionCtx>,
    opener: Option<Arc<dyn TransportOpener>>,
    cmd_tx: Option<mpsc::UnboundedSender<SessionCommand>>,
    task: Option<JoinHandle<()>>,
}

impl LinkSession {
    /// Build a session and the channel its events arrive on.
    pub fn new(timing: SessionTiming) -> (Self, mpsc::UnboundedReceiver<LinkEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let floor = timing.reconnect_floor.as_millis() as u64;
        let ctx = Arc::new(SessionCtx {
            timing,
            state: Mutex::new(LinkState::Disconnected),
            nodes: Mutex::new(NodeDatabase::new()),
            dedup: Mutex::new(Deduplicator::default()),
            sync: Mutex::new(SyncState::idle()),
            my_node_num: Mutex::new(None),
            event_tx,
            user_disconnect: AtomicBool::new(false),
            backoff_ms: AtomicU64::new(floor),
        });
        (
            Self {
                ctx,
                opener: None,
                cmd_tx: None,
                task: None,
            },
            event_rx,
        )
    }

    pub fn state(&self) -> LinkState {
        self.ctx.current_state()
    }

    pub fn my_node_num(&self) -> Option<u32> {
        *self.ctx.my_node_num.lock().unwrap()
    }

    pub fn node_count(&self) -> usize {
        self.ctx.nodes.lock().unwrap().len()
    }

    /// Read-only clone of the node registry for presentation layers.
    pub fn nodes_snapshot(&self) -> Vec<RadioNode> {
        self.ctx.nodes.lock().unwrap().snapshot()
    }

    /// Select the port to use. No I/O happens until `connect()`.
    pub fn choose_port(&mut self, opener: Box<dyn TransportOpener>) -> Result<(), LinkError> {
        if self.task.is_some() {
            return Err(LinkError::Command(
                "disconnect before selecting a new port".into(),
            ));
        }
        info!("Port selected: {}", opener.describe());
        self.opener = Some(Arc::from(opener));
        self.ctx.set_state(LinkState::PortSelected);
        Ok(())
    }

    /// Open the selected port and start the session task. Calling without a
    /// selected port is a command failure, never retried.
    pub fn connect(&mut self) -> Result<(), LinkError> {
        let opener = self
            .opener
            .clone()
            .ok_or_else(|| LinkError::Command("no port selected".into()))?;
        if self.task.is_some() {
            return Err(LinkError::Command("already connected".into()));
        }
        self.ctx.user_disconnect.store(false, Ordering::SeqCst);
        self.ctx
            .backoff_ms
            .store(self.ctx.floor_ms(), Ordering::SeqCst);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        self.cmd_tx = Some(cmd_tx);
        let ctx = self.ctx.clone();
        self.task = Some(tokio::spawn(run_session(ctx, opener, cmd_rx)));
        Ok(())
    }

    /// Tear the link down and stay down: marks the disconnect as
    /// user-requested (suppressing reconnection), stops the timers and the
    /// reader, and waits for the session task to finish before returning.
    pub async fn disconnect(&mut self) {
        self.ctx.user_disconnect.store(true, Ordering::SeqCst);
        if let Some(tx) = self.cmd_tx.take() {
            let _ = tx.send(SessionCommand::Disconnect);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.ctx.set_state(LinkState::Disconnected);
    }

    /// Queue a chat message. `dest: None` broadcasts on the channel.
    pub fn send_text(
        &self,
        dest: Option<u32>,
        channel: u32,
        text: &str,
    ) -> Result<(), LinkError> {
        self.require_state("send_text", &[LinkState::Ready])?;
        let bytes = CommandEncoder::send_text(dest, channel, text)?;
        self.dispatch(SessionCommand::Write(bytes))
    }

    /// Queue a position report. Coordinates are degrees; they are packed as
    /// fixed-point 1e-7 degree integers on the wire.
    pub fn send_position(
        &self,
        dest: Option<u32>,
        channel: u32,
        latitude_deg: f64,
        longitude_deg: f64,
        altitude: Option<i32>,
    ) -> Result<(), LinkError> {
        self.require_state("send_position", &[LinkState::Ready])?;
        let latitude_i = (latitude_deg * 1e7).round() as i32;
        let longitude_i = (longitude_deg * 1e7).round() as i32;
        let time = chrono::Utc::now().timestamp() as u32;
        let bytes =
            CommandEncoder::send_position(dest, channel, latitude_i, longitude_i, altitude, time)?;
        self.dispatch(SessionCommand::Write(bytes))
    }

    /// Restart the node-database sync with a fresh nonce.
    pub fn request_node_db(&self) -> Result<(), LinkError> {
        self.require_state(
            "request_node_db",
            &[LinkState::Connecting, LinkState::Syncing, LinkState::Ready],
        )?;
        self.dispatch(SessionCommand::RequestNodeDb)
    }

    fn dispatch(&self, cmd: SessionCommand) -> Result<(), LinkError> {
        match &self.cmd_tx {
            Some(tx) => tx
                .send(cmd)
                .map_err(|_| LinkError::Command("session task has exited".into())),
            None => Err(LinkError::Command("not connected".into())),
        }
    }

    fn require_state(&self, what: &str, allowed: &[LinkState]) -> Result<(), LinkError> {
        let current = self.state();
        if allowed.contains(&current) {
            Ok(())
        } else {
            Err(LinkError::Command(format!(
                "{} requires {:?}, link is {:?}",
                what, allowed, current
            )))
        }
    }
}

fn fresh_nonce() -> u32 {
    let nonce: u32 = rand::random();
    if nonce == 0 {
        1
    } else {
        nonce
    }
}

fn next_backoff(current_ms: u64, cap_ms: u64) -> u64 {
    current_ms.saturating_mul(2).min(cap_ms)
}

fn write_frame(port: &SharedPort, bytes: &[u8]) -> io::Result<()> {
    let mut guard = port.lock().unwrap();
    guard.write_all(bytes)?;
    guard.flush()
}

/// Session task body: connect/reconnect loop around individual connection
/// attempts.
async fn run_session(
    ctx: Arc<SessionCtx>,
    opener: Arc<dyn TransportOpener>,
    mut cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
) {
    loop {
        ctx.set_state(LinkState::Connecting);
        let transport = match opener.open() {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to open {}: {}", opener.describe(), e);
                if !wait_backoff(&ctx, &mut cmd_rx).await {
                    break;
                }
                continue;
            }
        };
        info!("Opened {}", opener.describe());
        match run_connection(&ctx, transport, &mut cmd_rx).await {
            ConnectionEnd::UserDisconnect => break,
            ConnectionEnd::LinkLost => {
                if ctx.user_disconnect.load(Ordering::SeqCst) {
                    break;
                }
                if !wait_backoff(&ctx, &mut cmd_rx).await {
                    break;
                }
            }
        }
    }
    ctx.set_state(LinkState::Disconnected);
}

/// Sleep out the current backoff delay, doubling it (bounded) for next
/// time. Returns false when the session should stop instead of retrying;
/// a Disconnect command cancels the pending timer immediately.
async fn wait_backoff(
    ctx: &SessionCtx,
    cmd_rx: &mut mpsc::UnboundedReceiver<SessionCommand>,
) -> bool {
    if ctx.user_disconnect.load(Ordering::SeqCst) {
        return false;
    }
    let delay_ms = ctx.backoff_ms.load(Ordering::SeqCst);
    ctx.set_state(LinkState::Reconnecting);
    metrics::inc_reconnect_attempts();
    debug!("Reconnecting in {} ms", delay_ms);
    let sleep = tokio::time::sleep(Duration::from_millis(delay_ms));
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => {
                let cap = ctx.timing.reconnect_cap.as_millis() as u64;
                ctx.backoff_ms
                    .store(next_backoff(delay_ms, cap), Ordering::SeqCst);
                return !ctx.user_disconnect.load(Ordering::SeqCst);
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(SessionCommand::Disconnect) | None => return false,
                Some(_) => {
                    // Nothing sane to write while the port is down.
                    debug!("Dropping command issued while reconnecting");
                }
            }
        }
    }
}

/// One connection attempt: handshake, then serve reads/writes until the
/// link dies or the user disconnects.
async fn run_connection(
    ctx: &Arc<SessionCtx>,
    transport: Box<dyn LinkTransport>,
    cmd_rx: &mut mpsc::UnboundedReceiver<SessionCommand>,
) -> ConnectionEnd {
    // A fresh handshake invalidates all prior per-connection state.
    ctx.nodes.lock().unwrap().clear();
    ctx.dedup.lock().unwrap().clear();
    *ctx.my_node_num.lock().unwrap() = None;

    let port: SharedPort = Arc::new(Mutex::new(transport));

    // Kick off the node-database sync.
    let nonce = fresh_nonce();
    *ctx.sync.lock().unwrap() = SyncState::fresh(nonce);
    let request = match CommandEncoder::request_node_db(nonce) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Could not encode sync request: {}", e);
            return ConnectionEnd::LinkLost;
        }
    };
    if let Err(e) = write_frame(&port, &request) {
        warn!("Initial sync request failed: {}", e);
        return ConnectionEnd::LinkLost;
    }
    debug!("Requested node database (nonce 0x{:08x})", nonce);
    ctx.set_state(LinkState::Syncing);

    let (done_tx, mut done_rx) = oneshot::channel::<()>();
    let reader = LinkReader::new(ctx.clone(), port.clone());
    let reader_task = tokio::spawn(reader.run(done_tx));

    let mut heartbeat = tokio::time::interval(ctx.timing.heartbeat);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    heartbeat.tick().await; // immediate first tick
    // Check sync health often enough to honor the resend cadence.
    let sync_cadence = ctx
        .timing
        .want_config_resend
        .clamp(Duration::from_millis(10), Duration::from_secs(1));
    let mut sync_tick = tokio::time::interval(sync_cadence);
    sync_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut hb_nonce: u32 = 1;

    let end = loop {
        tokio::select! {
            _ = &mut done_rx => break ConnectionEnd::LinkLost,

            _ = heartbeat.tick(), if ctx.current_state() == LinkState::Ready => {
                match CommandEncoder::heartbeat(hb_nonce) {
                    Ok(bytes) => {
                        if let Err(e) = write_frame(&port, &bytes) {
                            warn!("Heartbeat write failed: {}", e);
                            break ConnectionEnd::LinkLost;
                        }
                        trace!("Heartbeat {} sent", hb_nonce);
                        metrics::inc_heartbeats_sent();
                        hb_nonce = hb_nonce.wrapping_add(1);
                    }
                    Err(e) => warn!("Heartbeat encode failed: {}", e),
                }
            }

            _ = sync_tick.tick() => {
                if let Some(bytes) = sync_maintenance(ctx) {
                    if let Err(e) = write_frame(&port, &bytes) {
                        warn!("Sync re-request failed: {}", e);
                        break ConnectionEnd::LinkLost;
                    }
                }
            }

            cmd = cmd_rx.recv() => match cmd {
                Some(SessionCommand::Write(bytes)) => {
                    if let Err(e) = write_frame(&port, &bytes) {
                        warn!("Write failed: {}", e);
                        break ConnectionEnd::LinkLost;
                    }
                }
                Some(SessionCommand::RequestNodeDb) => {
                    let nonce = fresh_nonce();
                    *ctx.sync.lock().unwrap() = SyncState::fresh(nonce);
                    match CommandEncoder::request_node_db(nonce) {
                        Ok(bytes) => {
                            if let Err(e) = write_frame(&port, &bytes) {
                                warn!("Sync request failed: {}", e);
                                break ConnectionEnd::LinkLost;
                            }
                            debug!("Requested node database (nonce 0x{:08x})", nonce);
                        }
                        Err(e) => warn!("Could not encode sync request: {}", e),
                    }
                }
                Some(SessionCommand::Disconnect) | None => break ConnectionEnd::UserDisconnect,
            }
        }
    };

    // Stop the reader before releasing the port; its blocking read is
    // bounded by the transport's own timeout.
    reader_task.abort();
    let _ = reader_task.await;
    end
}

/// While a sync is in progress: surface a timeout status once, and re-send
/// the request (same nonce) on the configured cadence.
fn sync_maintenance(ctx: &SessionCtx) -> Option<Vec<u8>> {
    let mut sync = ctx.sync.lock().unwrap();
    if !sync.in_progress {
        return None;
    }
    if !sync.timed_out && sync.started.elapsed() >= ctx.timing.sync_timeout {
        sync.timed_out = true;
        warn!("Node database sync timed out");
        ctx.emit(LinkEvent::SyncTimeout);
    }
    if sync.last_request.elapsed() >= ctx.timing.want_config_resend {
        sync.last_request = Instant::now();
        debug!("Resending node database request (nonce 0x{:08x})", sync.nonce);
        return CommandEncoder::request_node_db(sync.nonce).ok();
    }
    None
}

/// Reader task: drains the transport, demuxes the stream, and dispatches
/// decoded events. Owns the demuxer, the text channel, and all mutation of
/// the node database and the deduplicator, preserving stream order.
struct LinkReader {
    ctx: Arc<SessionCtx>,
    port: SharedPort,
    demux: FrameDemuxer,
    text: TextChannel,
}

impl LinkReader {
    fn new(ctx: Arc<SessionCtx>, port: SharedPort) -> Self {
        Self {
            ctx,
            port,
            demux: FrameDemuxer::new(),
            text: TextChannel::new(),
        }
    }

    async fn run(mut self, done_tx: oneshot::Sender<()>) {
        let mut interval = tokio::time::interval(Duration::from_millis(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let mut buffer = [0u8; 1024];
            let read_result = {
                let mut port = self.port.lock().unwrap();
                port.read_chunk(&mut buffer)
            };
            match read_result {
                Ok(0) => {} // nothing available
                Ok(n) => {
                    trace!("RAW {} bytes: {}", n, hex_snippet(&buffer[..n], 64));
                    self.process_chunk(&buffer[..n]);
                }
                Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("Transport read error: {}", e);
                    break;
                }
            }
        }
        let _ = done_tx.send(());
    }

    fn process_chunk(&mut self, chunk: &[u8]) {
        for event in self.demux.feed(chunk) {
            match event {
                DemuxEvent::Frame(frame) => match codec::decode_frame(&frame) {
                    Ok(msg) => {
                        metrics::inc_frames_decoded();
                        self.handle_inbound(msg);
                    }
                    Err(CodecError::UnsupportedVariant) => {
                        trace!("Ignoring frame with unsupported variant ({} bytes)", frame.length)
                    }
                    Err(e) => {
                        metrics::inc_frames_dropped();
                        warn!("Dropping undecodable frame: {}", e);
                    }
                },
                DemuxEvent::Text(bytes) => {
                    let out = self.text.feed(&bytes);
                    for line in out.lines {
                        metrics::inc_text_lines();
                        debug!("device: {}", escape_log(&line));
                    }
                    for cand in out.chats {
                        metrics::inc_chat_ascii();
                        self.deliver_chat(ChatMessage {
                            from: cand.from,
                            to: BROADCAST,
                            channel: 0,
                            text: cand.text,
                            id_hex: cand.id_hex,
                            via: ChatVia::Ascii,
                            received_at_ms: now_ms(),
                        });
                    }
                }
            }
        }
    }

    fn handle_inbound(&mut self, msg: InboundMessage) {
        match msg {
            InboundMessage::MyNodeInfo {
                my_node_num,
                nodedb_count,
            } => {
                debug!(
                    "Radio is node 0x{:08x}, announcing {} node-db entries",
                    my_node_num, nodedb_count
                );
                *self.ctx.my_node_num.lock().unwrap() = Some(my_node_num);
                let mut sync = self.ctx.sync.lock().unwrap();
                if sync.in_progress {
                    sync.expected = nodedb_count;
                }
            }
            InboundMessage::NodeInfo(info) => {
                let node = self.ctx.nodes.lock().unwrap().upsert(&info);
                self.ctx.emit(LinkEvent::NodeUpdated { node });
                let mut sync = self.ctx.sync.lock().unwrap();
                if sync.in_progress {
                    sync.done += 1;
                    let (done, total) = (sync.done, sync.expected);
                    drop(sync);
                    self.ctx.emit(LinkEvent::SyncProgress { done, total });
                }
            }
            InboundMessage::ConfigComplete { nonce } => self.note_config_complete(nonce),
            InboundMessage::Rebooted => info!("Radio reports it rebooted"),
            InboundMessage::Packet(pkt) => self.handle_packet(pkt),
        }
    }

    /// Completion gate: only the nonce from the most recent request may
    /// promote the session, so completions from an aborted earlier sync are
    /// ignored.
    fn note_config_complete(&mut self, nonce: u32) {
        let mut sync = self.ctx.sync.lock().unwrap();
        if !(sync.in_progress && sync.nonce == nonce) {
            debug!("Ignoring stale sync completion (nonce 0x{:08x})", nonce);
            return;
        }
        sync.in_progress = false;
        drop(sync);
        info!(
            "Node database sync complete ({} nodes)",
            self.ctx.nodes.lock().unwrap().len()
        );
        self.ctx.emit(LinkEvent::SyncComplete);
        // Success resets the reconnect backoff to its floor.
        self.ctx
            .backoff_ms
            .store(self.ctx.floor_ms(), Ordering::SeqCst);
        self.ctx.set_state(LinkState::Ready);
    }

    fn handle_packet(&mut self, pkt: proto::MeshPacket) {
        let data = match &pkt.payload_variant {
            Some(proto::mesh_packet::PayloadVariant::Decoded(data)) => data,
            Some(proto::mesh_packet::PayloadVariant::Encrypted(bytes)) => {
                trace!(
                    "Encrypted packet from 0x{:08x} ({} bytes), ignored",
                    pkt.from,
                    bytes.len()
                );
                return;
            }
            None => return,
        };
        match codec::interpret_data(data) {
            Ok(PacketContent::Text { text, via }) => {
                // Legacy firmwares broadcast with to=0.
                let to = if pkt.to == 0 { BROADCAST } else { pkt.to };
                metrics::inc_chat_binary();
                self.deliver_chat(ChatMessage {
                    from: pkt.from,
                    to,
                    channel: pkt.channel,
                    text,
                    id_hex: format!("{:08x}", pkt.id),
                    via,
                    received_at_ms: now_ms(),
                });
            }
            Ok(PacketContent::Position(pos)) => {
                let node = self
                    .ctx
                    .nodes
                    .lock()
                    .unwrap()
                    .update_position(pkt.from, &pos, pkt.rx_time, pkt.rx_snr);
                self.ctx.emit(LinkEvent::NodeUpdated { node });
            }
            Ok(PacketContent::Opaque { portnum, payload }) => {
                debug!(
                    "Packet from 0x{:08x} port {} len={} hex={}",
                    pkt.from,
                    portnum,
                    payload.len(),
                    hex_snippet(&payload, 16)
                );
            }
            Err(e) => {
                metrics::inc_frames_dropped();
                warn!("Dropping packet payload from 0x{:08x}: {}", pkt.from, e);
            }
        }
    }

    fn deliver_chat(&mut self, msg: ChatMessage) {
        let fresh = self.ctx.dedup.lock().unwrap().accept(&msg);
        if fresh {
            let label = self.ctx.nodes.lock().unwrap().label(msg.from);
            debug!(
                "Chat from {} via {:?}: {}",
                label,
                msg.via,
                escape_log(&msg.text)
            );
            self.ctx.emit(LinkEvent::ChatReceived { message: msg });
        } else {
            metrics::inc_dedup_suppressed();
            trace!("Suppressed duplicate chat (id {})", msg.id_hex);
        }
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullTransport;

    impl LinkTransport for NullTransport {
        fn read_chunk(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::TimedOut, "idle"))
        }
        fn write_all(&mut self, _data: &[u8]) -> io::Result<()> {
            Ok(())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn reader_fixture() -> (
        LinkReader,
        mpsc::UnboundedReceiver<LinkEvent>,
        Arc<SessionCtx>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let timing = SessionTiming::default();
        let floor = timing.reconnect_floor.as_millis() as u64;
        let ctx = Arc::new(SessionCtx {
            timing,
            state: Mutex::new(LinkState::Syncing),
            nodes: Mutex::new(NodeDatabase::new()),
            dedup: Mutex::new(Deduplicator::default()),
            sync: Mutex::new(SyncState::fresh(0xBEEF)),
            my_node_num: Mutex::new(None),
            event_tx,
            user_disconnect: AtomicBool::new(false),
            backoff_ms: AtomicU64::new(floor),
        });
        let port: SharedPort = Arc::new(Mutex::new(Box::new(NullTransport)));
        (LinkReader::new(ctx.clone(), port), event_rx, ctx)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let mut ms = 1000;
        for _ in 0..10 {
            ms = next_backoff(ms, 15000);
            assert!(ms <= 15000);
        }
        assert_eq!(ms, 15000);
        assert_eq!(next_backoff(1000, 15000), 2000);
        assert_eq!(next_backoff(8000, 15000), 15000);
    }

    #[test]
    fn mismatched_nonce_does_not_promote() {
        let (mut reader, _event_rx, ctx) = reader_fixture();
        reader.note_config_complete(0x1234);
        assert_eq!(ctx.current_state(), LinkState::Syncing);
        assert!(ctx.sync.lock().unwrap().in_progress);
    }

    #[test]
    fn matching_nonce_promotes_and_resets_backoff() {
        let (mut reader, mut event_rx, ctx) = reader_fixture();
        ctx.backoff_ms.store(8000, Ordering::SeqCst);
        reader.note_config_complete(0xBEEF);
        assert_eq!(ctx.current_state(), LinkState::Ready);
        assert!(!ctx.sync.lock().unwrap().in_progress);
        assert_eq!(ctx.backoff_ms.load(Ordering::SeqCst), ctx.floor_ms());
        // SyncComplete, then the state change.
        assert!(matches!(
            event_rx.try_recv().unwrap(),
            LinkEvent::SyncComplete
        ));
        assert!(matches!(
            event_rx.try_recv().unwrap(),
            LinkEvent::ConnectionStateChanged {
                state: LinkState::Ready
            }
        ));
    }

    #[test]
    fn stale_completion_after_resync_is_ignored() {
        let (mut reader, _event_rx, ctx) = reader_fixture();
        // A new request supersedes the old nonce.
        *ctx.sync.lock().unwrap() = SyncState::fresh(0xF00D);
        reader.note_config_complete(0xBEEF);
        assert_eq!(ctx.current_state(), LinkState::Syncing);
        reader.note_config_complete(0xF00D);
        assert_eq!(ctx.current_state(), LinkState::Ready);
    }

    #[test]
    fn node_info_during_sync_reports_progress() {
        let (mut reader, mut event_rx, ctx) = reader_fixture();
        ctx.sync.lock().unwrap().expected = 2;
        reader.handle_inbound(InboundMessage::NodeInfo(proto::NodeInfo {
            num: 7,
            ..Default::default()
        }));
        assert!(matches!(
            event_rx.try_recv().unwrap(),
            LinkEvent::NodeUpdated { .. }
        ));
        assert!(matches!(
            event_rx.try_recv().unwrap(),
            LinkEvent::SyncProgress { done: 1, total: 2 }
        ));
        assert_eq!(ctx.nodes.lock().unwrap().len(), 1);
    }

    #[test]
    fn dual_path_message_emits_once() {
        let (mut reader, mut event_rx, _ctx) = reader_fixture();
        // Binary arrival first.
        let data = proto::Data {
            portnum: proto::PortNum::TextMessageApp as i32,
            payload: b"hi".to_vec(),
            ..Default::default()
        };
        reader.handle_packet(proto::MeshPacket {
            from: 42,
            to: BROADCAST,
            id: 0x2a,
            payload_variant: Some(proto::mesh_packet::PayloadVariant::Decoded(data)),
            ..Default::default()
        });
        // Same message scraped from the log stream.
        reader.process_chunk(b"Received text msg from=0x2a, id=0x2a, msg=hi\n");
        let mut chats = 0;
        while let Ok(ev) = event_rx.try_recv() {
            if matches!(ev, LinkEvent::ChatReceived { .. }) {
                chats += 1;
            }
        }
        assert_eq!(chats, 1);
    }

    #[test]
    fn command_preconditions_are_enforced() {
        let (session, _event_rx) = LinkSession::new(SessionTiming::default());
        assert!(matches!(
            session.send_text(None, 0, "x"),
            Err(LinkError::Command(_))
        ));
        assert!(matches!(
            session.request_node_db(),
            Err(LinkError::Command(_))
        ));
    }

    #[tokio::test]
    async fn connect_without_port_is_a_command_failure() {
        let (mut session, _event_rx) = LinkSession::new(SessionTiming::default());
        assert!(matches!(session.connect(), Err(LinkError::Command(_))));
        // Disconnect with nothing running is harmless.
        session.disconnect().await;
        assert_eq!(session.state(), LinkState::Disconnected);
    }
}
