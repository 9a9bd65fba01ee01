//! Streaming UTF-8 transcription of terminal output
//!
//! Terminal reads split the byte stream at arbitrary points, so a multi-byte
//! character can straddle two chunks. The transcoder holds back an incomplete
//! trailing sequence until the next chunk completes it.

/// Turns a stream of byte chunks into text
#[derive(Debug, Default)]
pub struct Utf8Transcoder {
    pending: Vec<u8>,
}

impl Utf8Transcoder {
    /// Create an empty transcoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Transcribe the next chunk.
    ///
    /// Invalid sequences become U+FFFD; an incomplete sequence at the end of
    /// the chunk is kept for the next call.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = String::with_capacity(buf.len());
        let mut rest = &buf[..];
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(len) => {
                            tracing::trace!("Replacing {} invalid byte(s) in output", len);
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[len..];
                        }
                        None => {
                            self.pending = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush any held-back bytes
    pub fn finish(&mut self) -> String {
        let pending = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&pending).into_owned()
    }

    /// Number of bytes waiting for the rest of their character
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ascii_passes_through() {
        let mut t = Utf8Transcoder::new();
        assert_eq!(t.push(b"hello\r\n"), "hello\r\n");
        assert_eq!(t.pending_len(), 0);
    }

    #[test]
    fn test_split_character_is_joined() {
        let bytes = "终端".as_bytes();
        let mut t = Utf8Transcoder::new();
        assert_eq!(t.push(&bytes[..4]), "终");
        assert_eq!(t.pending_len(), 1);
        assert_eq!(t.push(&bytes[4..]), "端");
        assert_eq!(t.pending_len(), 0);
    }

    #[test]
    fn test_invalid_bytes_are_replaced() {
        let mut t = Utf8Transcoder::new();
        assert_eq!(t.push(b"a\xffb"), "a\u{FFFD}b");
    }

    #[test]
    fn test_finish_flushes_incomplete_tail() {
        let mut t = Utf8Transcoder::new();
        assert_eq!(t.push(b"x\xe7\xbb"), "x");
        assert_eq!(t.finish(), "\u{FFFD}");
        assert_eq!(t.pending_len(), 0);
    }
}
