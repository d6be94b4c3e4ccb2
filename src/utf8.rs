/// Streaming UTF-8 validation for payloads that arrive in arbitrary chunks.
///
/// Text payloads reach the parser split at whatever offsets the transport
/// produced, so a plain `str::from_utf8` over each chunk would reject a
/// multi-byte sequence that happens to straddle a chunk boundary. The
/// validator keeps the trailing incomplete sequence (at most 3 bytes)
/// between calls and re-checks it once the continuation bytes arrive.
/// `finish` then rejects a payload that ends mid-codepoint.
#[derive(Debug, Default)]
pub(crate) struct Utf8Validator {
    pending: [u8; 4],
    pending_len: usize,
}

impl Utf8Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates the next chunk. Returns false as soon as the data can no
    /// longer be a prefix of valid UTF-8.
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        let mut rest = chunk;

        if self.pending_len > 0 {
            let need = sequence_len(self.pending[0]);
            let take = (need - self.pending_len).min(rest.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&rest[..take]);
            self.pending_len += take;
            rest = &rest[take..];

            match std::str::from_utf8(&self.pending[..self.pending_len]) {
                Ok(_) => self.pending_len = 0,
                // error_len None means "ran out of input", still a valid prefix
                Err(e) if e.error_len().is_none() => return true,
                Err(_) => return false,
            }
        }

        match std::str::from_utf8(rest) {
            Ok(_) => true,
            Err(e) => {
                if e.error_len().is_some() {
                    return false;
                }
                let tail = &rest[e.valid_up_to()..];
                self.pending[..tail.len()].copy_from_slice(tail);
                self.pending_len = tail.len();
                true
            }
        }
    }

    /// Ends the payload; any dangling partial sequence makes it invalid.
    pub fn finish(&mut self) -> bool {
        let complete = self.pending_len == 0;
        self.pending_len = 0;
        complete
    }

    pub fn reset(&mut self) {
        self.pending_len = 0;
    }
}

// Declared length of the sequence started by `lead`. Invalid lead bytes
// claim 4 so the stashed bytes fit; from_utf8 rejects them on the next feed.
fn sequence_len(lead: u8) -> usize {
    if lead < 0x80 {
        1
    } else if lead >> 5 == 0b110 {
        2
    } else if lead >> 4 == 0b1110 {
        3
    } else {
        4
    }
}
