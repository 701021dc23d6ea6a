//! Splits a byte stream into lines.

/// Longest line kept whole, in bytes. Longer runs are split at this length.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Buffers partial lines between reads.
///
/// Bytes are split on `\n` before decoding, so a multi-byte character cut
/// across two reads is reassembled intact. Invalid UTF-8 is replaced.
#[derive(Debug)]
pub struct LineDecoder {
    pending: Vec<u8>,
    /// Prefix of `pending` already known to hold no newline.
    scanned: usize,
    limit: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

impl LineDecoder {
    /// Create an empty decoder bounded by [`MAX_LINE_BYTES`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty decoder that never buffers more than `limit` bytes
    /// of one line.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            limit: limit.max(1),
        }
    }

    /// Feed a chunk, returning every line it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        loop {
            let from = self.scanned.min(self.pending.len());
            let newline = self
                .pending
                .get(from..)
                .and_then(|rest| rest.iter().position(|b| *b == b'\n'))
                .map(|offset| from.saturating_add(offset));
            match newline {
                Some(end) if end <= self.limit => {
                    let mut line: Vec<u8> = self.pending.drain(..=end).collect();
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    lines.push(lossy(&line));
                },
                _ if self.pending.len() > self.limit => {
                    let line: Vec<u8> = self.pending.drain(..self.limit).collect();
                    lines.push(lossy(&line));
                },
                _ => {
                    self.scanned = self.pending.len();
                    break;
                },
            }
            self.scanned = 0;
        }
        lines
    }

    /// Flush whatever is left once the stream ends.
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        Some(lossy(&line))
    }

    /// Bytes waiting for a newline.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_lines_are_buffered() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.feed(b"[10:00:00] [INFO]: hel").is_empty());
        assert_eq!(decoder.pending_len(), 22);
        assert_eq!(
            decoder.feed(b"lo\nsecond\r\nthi"),
            vec!["[10:00:00] [INFO]: hello", "second"]
        );
        assert_eq!(decoder.finish().as_deref(), Some("thi"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn test_split_multibyte_character() {
        let text = "caf\u{e9}\n".as_bytes();
        let mut decoder = LineDecoder::new();
        assert!(decoder.feed(&text[..4]).is_empty());
        assert_eq!(decoder.feed(&text[4..]), vec!["caf\u{e9}"]);
    }

    #[test]
    fn test_empty_lines_kept() {
        let mut decoder = LineDecoder::new();
        assert_eq!(decoder.feed(b"\n\nx\n"), vec!["", "", "x"]);
    }

    #[test]
    fn test_runaway_line_is_split_at_limit() {
        let mut decoder = LineDecoder::with_limit(8);
        assert!(decoder.feed(b"abcd").is_empty());
        assert_eq!(decoder.feed(b"efghijklmnopqrs"), vec!["abcdefgh", "ijklmnop"]);
        assert_eq!(decoder.pending_len(), 3);
        assert_eq!(decoder.feed(b"\nok\n"), vec!["qrs", "ok"]);
        assert_eq!(decoder.pending_len(), 0);
    }

    #[test]
    fn test_line_at_limit_stays_whole() {
        let mut decoder = LineDecoder::with_limit(4);
        assert_eq!(decoder.feed(b"abcd\n"), vec!["abcd"]);
        assert_eq!(decoder.feed(b"wxyz\n"), vec!["wxyz"]);
    }

    #[test]
    fn test_pending_stays_bounded_without_newlines() {
        let mut decoder = LineDecoder::new();
        let chunk = vec![b'x'; 8 * 1024];
        let mut emitted = 0usize;
        for _ in 0..32 {
            emitted = emitted.saturating_add(decoder.feed(&chunk).len());
            assert!(decoder.pending_len() <= MAX_LINE_BYTES);
        }
        assert_eq!(emitted, 3);
    }
}
