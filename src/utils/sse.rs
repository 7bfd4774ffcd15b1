use axum::body::Bytes;

pub const DONE_MARKER: &str = "[DONE]";

/// Longest single line accepted from upstream before the stream is abandoned.
pub const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Splits an upstream byte stream into lines. Holds at most one partial line;
/// bytes are decoded only once a full line is available so multi-byte
/// characters split across chunks survive.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Bytes of `pending` already known to contain no newline.
    scanned: usize,
    max_line: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            max_line,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        let mut search_from = self.scanned;
        while let Some(offset) = self.pending[search_from..].iter().position(|b| *b == b'\n') {
            let end = search_from + offset;
            lines.push(decode_line(&self.pending[start..end]));
            start = end + 1;
            search_from = start;
        }
        if start > 0 {
            self.pending.drain(..start);
        }
        self.scanned = self.pending.len();
        lines
    }

    /// True once the unterminated line exceeds the limit.
    pub fn is_overflowing(&self) -> bool {
        self.pending.len() > self.max_line
    }

    pub fn max_line(&self) -> usize {
        self.max_line
    }

    /// Flushes a trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        Some(decode_line(&line))
    }
}

fn decode_line(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

pub fn data_frame(payload: &str) -> Bytes {
    Bytes::from(format!("data: {}\n\n", payload))
}

pub fn done_frame() -> Bytes {
    data_frame(DONE_MARKER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_split_across_chunks_are_joined() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"data: {\"a\"").is_empty());
        let lines = buf.push(b":1}\r\n\r\ndata: [DONE]\n");
        assert_eq!(lines, vec!["data: {\"a\":1}", "", "data: [DONE]"]);
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn multibyte_characters_split_across_chunks() {
        let text = "data: héllo\n".as_bytes();
        let (a, b) = text.split_at(8);
        let mut buf = LineBuffer::new();
        assert!(buf.push(a).is_empty());
        assert_eq!(buf.push(b), vec!["data: héllo"]);
    }

    #[test]
    fn unterminated_tail_is_flushed() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"{\"error\":").is_empty());
        assert!(buf.push(b"1}").is_empty());
        assert_eq!(buf.finish().as_deref(), Some("{\"error\":1}"));
    }

    #[test]
    fn long_lines_are_scanned_once_and_capped() {
        let mut buf = LineBuffer::with_limit(64 * 1024);
        let piece = [b'a'; 4096];
        for _ in 0..15 {
            assert!(buf.push(&piece).is_empty());
        }
        assert_eq!(buf.scanned, 15 * 4096);
        assert!(!buf.is_overflowing());
        buf.push(&piece);
        buf.push(&piece);
        assert!(buf.is_overflowing());
    }

    #[test]
    fn newline_after_a_long_run_is_found() {
        let mut buf = LineBuffer::with_limit(1024);
        assert!(buf.push(&[b'x'; 500]).is_empty());
        let lines = buf.push(b"yz\nnext");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].len(), 502);
        assert_eq!(buf.finish().as_deref(), Some("next"));
    }

    #[test]
    fn frames_use_sse_data_framing() {
        assert_eq!(&done_frame()[..], b"data: [DONE]\n\n");
    }
}
