//! Link metrics: process-wide counters cheap enough to bump from the hot
//! read path, with a point-in-time snapshot for status output and tests.
use std::sync::atomic::{AtomicU64, Ordering};

static FRAMES_DECODED: AtomicU64 = AtomicU64::new(0);
static FRAMES_DROPPED: AtomicU64 = AtomicU64::new(0);
static TEXT_LINES: AtomicU64 = AtomicU64::new(0);
static CHAT_BINARY: AtomicU64 = AtomicU64::new(0);
static CHAT_ASCII: AtomicU64 = AtomicU64::new(0);
static DEDUP_SUPPRESSED: AtomicU64 = AtomicU64::new(0);
static RECONNECT_ATTEMPTS: AtomicU64 = AtomicU64::new(0);
static HEARTBEATS_SENT: AtomicU64 = AtomicU64::new(0);

pub fn inc_frames_decoded() {
    FRAMES_DECODED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_frames_dropped() {
    FRAMES_DROPPED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_text_lines() {
    TEXT_LINES.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_chat_binary() {
    CHAT_BINARY.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_chat_ascii() {
    CHAT_ASCII.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_dedup_suppressed() {
    DEDUP_SUPPRESSED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_reconnect_attempts() {
    RECONNECT_ATTEMPTS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_heartbeats_sent() {
    HEARTBEATS_SENT.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub frames_decoded: u64,
    pub frames_dropped: u64,
    pub text_lines: u64,
    pub chat_binary: u64,
    pub chat_ascii: u64,
    pub dedup_suppressed: u64,
    pub reconnect_attempts: u64,
    pub heartbeats_sent: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        frames_decoded: FRAMES_DECODED.load(Ordering::Relaxed),
        frames_dropped: FRAMES_DROPPED.load(Ordering::Relaxed),
        text_lines: TEXT_LINES.load(Ordering::Relaxed),
        chat_binary: CHAT_BINARY.load(Ordering::Relaxed),
        chat_ascii: CHAT_ASCII.load(Ordering::Relaxed),
        dedup_suppressed: DEDUP_SUPPRESSED.load(Ordering::Relaxed),
        reconnect_attempts: RECONNECT_ATTEMPTS.load(Ordering::Relaxed),
        heartbeats_sent: HEARTBEATS_SENT.load(Ordering::Relaxed),
    }
}
