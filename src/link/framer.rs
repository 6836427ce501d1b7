//! Length-prefixed frame demultiplexer for the radio serial stream.
//!
//! Binary protocol frames on the wire look like:
//!
//!   `0x94 0xC3 <len_hi> <len_lo> <payload: len bytes>`
//!
//! and are interleaved with free-form firmware debug text. The demuxer is
//! fed arbitrary chunks and splits the stream into complete frames and runs
//! of non-frame bytes, resynchronizing past corrupted headers. Output is
//! identical regardless of how the input was chunked.
use bytes::{Buf, BytesMut};

/// First magic byte of a frame header.
pub const MAGIC0: u8 = 0x94;
/// Second magic byte of a frame header.
pub const MAGIC1: u8 = 0xC3;
/// Maximum payload length a header may declare. Anything larger is treated
/// as stream garbage rather than a frame.
pub const MAX_FRAME_LEN: usize = 4096;

/// One complete binary frame extracted from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub magic: [u8; 2],
    pub length: u16,
    pub payload: Vec<u8>,
}

/// Output of [`FrameDemuxer::feed`]: either a whole binary frame or a run
/// of bytes that belong to the textual side channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemuxEvent {
    Frame(Frame),
    Text(Vec<u8>),
}

/// Incremental demuxer. Holds only the unconsumed tail of the stream; any
/// prefix that cannot begin a frame is flushed as [`DemuxEvent::Text`] on
/// every pass, so garbage can never accumulate.
#[derive(Debug, Default)]
pub struct FrameDemuxer {
    buf: BytesMut,
}

impl FrameDemuxer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Number of buffered bytes awaiting more data.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Discard any buffered tail (fresh connection).
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Append a chunk and extract as many events as are complete.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DemuxEvent> {
        self.buf.extend_from_slice(chunk);
        let mut events = Vec::new();
        loop {
            match self.find_magic() {
                Some(pos) => {
                    if pos > 0 {
                        let text = self.buf.split_to(pos);
                        events.push(DemuxEvent::Text(text.to_vec()));
                    }
                    // Buffer now starts with the two magic bytes.
                    if self.buf.len() < 4 {
                        break; // wait for the rest of the header
                    }
                    let declared = ((self.buf[2] as usize) << 8) | (self.buf[3] as usize);
                    if declared == 0 || declared > MAX_FRAME_LEN {
                        // Corrupt header: the magic bytes were stream noise.
                        let noise = self.buf.split_to(2);
                        events.push(DemuxEvent::Text(noise.to_vec()));
                        continue;
                    }
                    if self.buf.len() < 4 + declared {
                        break; // wait for the full payload
                    }
                    self.buf.advance(4);
                    let payload = self.buf.split_to(declared).to_vec();
                    events.push(DemuxEvent::Frame(Frame {
                        magic: [MAGIC0, MAGIC1],
                        length: declared as u16,
                        payload,
                    }));
                }
                None => {
                    // No magic pair present. Everything is text except a
                    // trailing 0x94 that could be the start of a split magic.
                    let hold = usize::from(self.buf.last() == Some(&MAGIC0));
                    let flush = self.buf.len() - hold;
                    if flush > 0 {
                        let text = self.buf.split_to(flush);
                        events.push(DemuxEvent::Text(text.to_vec()));
                    }
                    break;
                }
            }
        }
        events
    }

    fn find_magic(&self) -> Option<usize> {
        self.buf
            .windows(2)
            .position(|w| w[0] == MAGIC0 && w[1] == MAGIC1)
    }
}

/// Prepend the 4-byte frame header to an encoded payload.
///
/// The payload must be 1..=[`MAX_FRAME_LEN`] bytes; callers validate before
/// reaching this point.
pub fn frame_payload(payload: &[u8]) -> Vec<u8> {
    debug_assert!(!payload.is_empty() && payload.len() <= MAX_FRAME_LEN);
    let mut out = Vec::with_capacity(4 + payload.len());
    out.push(MAGIC0);
    out.push(MAGIC1);
    out.push(((payload.len() >> 8) & 0xFF) as u8);
    out.push((payload.len() & 0xFF) as u8);
    out.extend_from_slice(payload);
    out
}
