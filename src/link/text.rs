//! Textual side channel of the radio serial stream.
//!
//! Everything the demuxer does not recognize as a binary frame lands here:
//! firmware boot banners, log records, and the occasional chat message that
//! the firmware only echoes into its human log stream. The channel decodes
//! bytes as streaming UTF-8 (holding split multi-byte sequences across
//! reads), strips terminal escape sequences (holding a split sequence across
//! reads the same way), buffers complete lines, and scans a bounded buffer
//! for the firmware's "Received text msg" log shape so those messages can be
//! merged with the binary path by the deduplicator.

/// An incomplete escape sequence longer than this is assumed to be stream
/// noise rather than a real sequence and is passed through verbatim.
const MAX_ESC_CARRY: usize = 64;

/// Fallback scan buffer cap; the buffer is cut back to the keep window when
/// it grows past the cap.
const PARSE_BUF_CAP: usize = 20_000;
const PARSE_BUF_KEEP: usize = 10_000;

/// Longest partial line retained while waiting for its newline.
const MAX_LINE_LEN: usize = 8192;

const CHAT_MARKER: &str = "Received text msg from=0x";
const ID_SEP: &str = ", id=0x";
const MSG_SEP: &str = ", msg=";

/// A chat message recovered from the firmware log stream. Still subject to
/// deduplication against the binary decode path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatCandidate {
    pub from: u32,
    /// Packet id, normalized to zero-padded lowercase hex so both arrival
    /// paths produce the same dedup key.
    pub id_hex: String,
    pub text: String,
}

/// Result of one [`TextChannel::feed`] call.
#[derive(Debug, Default)]
pub struct TextOutput {
    /// Complete, non-blank lines with escape sequences removed.
    pub lines: Vec<String>,
    /// Chat messages recovered by the fallback scan.
    pub chats: Vec<ChatCandidate>,
}

/// Incremental decoder for the non-frame byte runs.
#[derive(Debug, Default)]
pub struct TextChannel {
    /// Undecodable tail of a split multi-byte UTF-8 sequence.
    utf8_carry: Vec<u8>,
    /// Incomplete escape sequence awaiting its terminator.
    esc_carry: String,
    /// Trailing partial line.
    line_buf: String,
    /// Bounded buffer for the fallback chat scan.
    parse_buf: String,
}

impl TextChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all carried state (fresh connection).
    pub fn reset(&mut self) {
        self.utf8_carry.clear();
        self.esc_carry.clear();
        self.line_buf.clear();
        self.parse_buf.clear();
    }

    /// Feed one run of non-frame bytes.
    pub fn feed(&mut self, bytes: &[u8]) -> TextOutput {
        let decoded = self.decode_utf8(bytes);
        let cleaned = self.strip_ansi(&decoded);
        let lines = self.take_lines(&cleaned);
        self.parse_buf.push_str(&cleaned);
        let chats = self.scan_candidates();
        self.trim_parse_buf();
        TextOutput { lines, chats }
    }

    fn decode_utf8(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.utf8_carry);
        input.extend_from_slice(bytes);
        let mut out = String::with_capacity(input.len());
        let mut rest: &[u8] = &input;
        while !rest.is_empty() {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(n) => {
                            out.push('\u{FFFD}');
                            rest = &after[n..];
                        }
                        None => {
                            // Split multi-byte sequence; hold the tail.
                            self.utf8_carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    fn strip_ansi(&mut self, input: &str) -> String {
        let mut s = std::mem::take(&mut self.esc_carry);
        s.push_str(input);
        let mut out = String::with_capacity(s.len());
        let mut idx = 0usize;
        while idx < s.len() {
            let Some(ch) = s[idx..].chars().next() else {
                break;
            };
            if ch != '\u{1b}' {
                out.push(ch);
                idx += ch.len_utf8();
                continue;
            }
            match scan_escape(&s[idx..]) {
                EscScan::Complete(len) => idx += len,
                EscScan::Incomplete => {
                    let tail = &s[idx..];
                    if tail.len() > MAX_ESC_CARRY {
                        // Too long to be a real sequence; pass it through.
                        out.push_str(tail);
                    } else {
                        self.esc_carry = tail.to_string();
                    }
                    idx = s.len();
                }
            }
        }
        out
    }

    fn take_lines(&mut self, cleaned: &str) -> Vec<String> {
        self.line_buf.push_str(cleaned);
        let mut lines = Vec::new();
        while let Some(pos) = self.line_buf.find('\n') {
            let raw: String = self.line_buf.drain(..=pos).collect();
            let line = raw.trim_end_matches(['\n', '\r']);
            if !line.trim().is_empty() {
                lines.push(line.to_string());
            }
        }
        // A stream that never sends a newline must not hoard memory.
        if self.line_buf.len() > MAX_LINE_LEN {
            let mut cut = self.line_buf.len() - MAX_LINE_LEN / 2;
            while !self.line_buf.is_char_boundary(cut) {
                cut += 1;
            }
            self.line_buf.drain(..cut);
        }
        lines
    }

    fn scan_candidates(&mut self) -> Vec<ChatCandidate> {
        let mut found = Vec::new();
        loop {
            let Some(start) = self.parse_buf.find(CHAT_MARKER) else {
                break;
            };
            let head_start = start + CHAT_MARKER.len();
            let Some(msg_rel) = self.parse_buf[start..].find(MSG_SEP) else {
                // The msg= field has not arrived. If a record boundary shows
                // up first, the record is malformed; skip past it.
                match find_record_end(&self.parse_buf, head_start) {
                    Some(end) => {
                        self.parse_buf.drain(..end);
                        continue;
                    }
                    None => break,
                }
            };
            let msg_start = start + msg_rel + MSG_SEP.len();
            let Some(end) = find_record_end(&self.parse_buf, msg_start) else {
                break; // message body may still be streaming in
            };
            let head = &self.parse_buf[head_start..start + msg_rel];
            match parse_head(head) {
                Some((from, id)) => {
                    let text = self.parse_buf[msg_start..end]
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    found.push(ChatCandidate {
                        from,
                        id_hex: format!("{:08x}", id),
                        text,
                    });
                    self.parse_buf.drain(..end);
                }
                None => {
                    // Malformed head; advance past the marker and rescan.
                    self.parse_buf.drain(..head_start);
                }
            }
        }
        found
    }

    fn trim_parse_buf(&mut self) {
        if self.parse_buf.len() > PARSE_BUF_CAP {
            let mut cut = self.parse_buf.len() - PARSE_BUF_KEEP;
            while !self.parse_buf.is_char_boundary(cut) {
                cut += 1;
            }
            self.parse_buf.drain(..cut);
        }
    }
}

enum EscScan {
    /// A whole sequence occupies this many bytes.
    Complete(usize),
    Incomplete,
}

/// Classify the escape sequence starting at `s` (which begins with ESC).
fn scan_escape(s: &str) -> EscScan {
    let b = s.as_bytes();
    if b.len() < 2 {
        return EscScan::Incomplete;
    }
    match b[1] {
        b'[' => {
            // CSI: parameter/intermediate bytes, then a final byte in @..~.
            let mut j = 2;
            while j < b.len() {
                if (0x40..=0x7E).contains(&b[j]) {
                    return EscScan::Complete(j + 1);
                }
                j += 1;
            }
            EscScan::Incomplete
        }
        b']' => {
            // OSC: runs to BEL or ESC-backslash.
            let mut j = 2;
            while j < b.len() {
                if b[j] == 0x07 {
                    return EscScan::Complete(j + 1);
                }
                if b[j] == 0x1B {
                    return match b.get(j + 1) {
                        Some(b'\\') => EscScan::Complete(j + 2),
                        // A stray ESC ends the OSC and starts a new sequence;
                        // leave it for the next scan.
                        Some(_) => EscScan::Complete(j),
                        None => EscScan::Incomplete,
                    };
                }
                j += 1;
            }
            EscScan::Incomplete
        }
        _ => {
            // Bare two-character escape.
            match s[1..].chars().next() {
                Some(c) => EscScan::Complete(1 + c.len_utf8()),
                None => EscScan::Incomplete,
            }
        }
    }
}

/// Parse `<fromhex>, id=0x<idhex>` (anything after the id is tolerated).
fn parse_head(head: &str) -> Option<(u32, u32)> {
    let hex_len = head
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(head.len());
    if hex_len == 0 || hex_len > 8 {
        return None;
    }
    let from = u32::from_str_radix(&head[..hex_len], 16).ok()?;
    let rest = head[hex_len..].strip_prefix(ID_SEP)?;
    let id_len = rest
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(rest.len());
    if id_len == 0 || id_len > 8 {
        return None;
    }
    let id = u32::from_str_radix(&rest[..id_len], 16).ok()?;
    Some((from, id))
}

/// Find where the record whose body starts at `from` ends: the next
/// recognized log-record start, or end-of-buffer when the buffer ends in a
/// newline (the line is finished). `None` means "wait for more data".
fn find_record_end(buf: &str, from: usize) -> Option<usize> {
    let mut search = from;
    while let Some(rel) = buf[search..].find('\n') {
        let nl = search + rel;
        if is_record_start(&buf[nl + 1..]) {
            return Some(nl + 1);
        }
        search = nl + 1;
    }
    if buf.ends_with('\n') {
        return Some(buf.len());
    }
    None
}

/// Does `s` begin a new firmware log record?
fn is_record_start(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    if s.starts_with(CHAT_MARKER) {
        return true;
    }
    const LEVELS: [&str; 6] = ["DEBUG", "INFO", "WARN", "ERROR", "CRIT", "TRACE"];
    LEVELS.iter().any(|lvl| {
        s.strip_prefix(lvl)
            .and_then(|rest| rest.chars().next())
            .map(|c| c == ' ' || c == '|' || c == ':')
            .unwrap_or(false)
    })
}
