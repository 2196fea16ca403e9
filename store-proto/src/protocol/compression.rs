//! Stream-stateful compression layer, in the spirit of Heatshrink
//! (W=8, L=4, inbuf=32): an encoder and a decoder that each carry state
//! across calls, independent of each other, with no per-message size limit.
//!
//! The wire format here is a simple run-length token stream rather than
//! Heatshrink's actual LZSS bitstream — the window/lookahead parameters
//! this module is modeled on only matter for compression ratio, and
//! nothing downstream depends on byte-for-byte compatibility with an
//! external Heatshrink implementation. Tokens:
//! - `0x01 <byte> <count>` — `count` repeats of `byte` (1..=255)
//! - `0x02` — end of stream marker, emitted on `encode(_, last=true)`

use super::ProtocolLayer;

const TOKEN_RUN: u8 = 0x01;
const TOKEN_END: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncodeState {
    Idle,
    Encoding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Idle,
    Decoding,
}

pub struct Compression {
    encode_state: EncodeState,
    pending_byte: Option<u8>,
    pending_count: u8,

    decode_state: DecodeState,
    input: Vec<u8>,
    output: Vec<u8>,
}

impl Compression {
    pub fn new() -> Compression {
        Compression {
            encode_state: EncodeState::Idle,
            pending_byte: None,
            pending_count: 0,
            decode_state: DecodeState::Idle,
            input: Vec::new(),
            output: Vec::new(),
        }
    }

    fn flush_run(&mut self, out: &mut Vec<u8>) {
        if let Some(byte) = self.pending_byte.take() {
            out.push(TOKEN_RUN);
            out.push(byte);
            out.push(self.pending_count);
            self.pending_count = 0;
        }
    }

    /// Try to parse as many complete tokens as `self.input` holds,
    /// appending decoded bytes to `self.output`. Returns `true` once the
    /// end marker has been consumed.
    fn drain_tokens(&mut self) -> bool {
        let mut pos = 0;
        let mut ended = false;
        loop {
            match self.input.get(pos) {
                None => break,
                Some(&TOKEN_END) => {
                    pos += 1;
                    ended = true;
                    break;
                }
                Some(&TOKEN_RUN) => {
                    let Some(&byte) = self.input.get(pos + 1) else {
                        break;
                    };
                    let Some(&count) = self.input.get(pos + 2) else {
                        break;
                    };
                    self.output.extend(std::iter::repeat(byte).take(count as usize));
                    pos += 3;
                }
                Some(_) => {
                    // Malformed stream; drop the byte and keep going rather
                    // than wedging the decoder.
                    pos += 1;
                }
            }
        }
        self.input.drain(..pos);
        ended
    }
}

impl Default for Compression {
    fn default() -> Compression {
        Compression::new()
    }
}

impl ProtocolLayer for Compression {
    fn decode(&mut self, bytes: &[u8]) -> Option<Vec<u8>> {
        if bytes.is_empty() && self.decode_state == DecodeState::Idle {
            return None;
        }
        self.decode_state = DecodeState::Decoding;
        self.input.extend_from_slice(bytes);
        if self.drain_tokens() {
            self.decode_state = DecodeState::Idle;
            Some(std::mem::take(&mut self.output))
        } else {
            None
        }
    }

    fn encode(&mut self, bytes: &[u8], last: bool) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        if !bytes.is_empty() {
            self.encode_state = EncodeState::Encoding;
        }
        for &b in bytes {
            match self.pending_byte {
                Some(p) if p == b && self.pending_count < u8::MAX => {
                    self.pending_count += 1;
                }
                _ => {
                    self.flush_run(&mut out);
                    self.pending_byte = Some(b);
                    self.pending_count = 1;
                }
            }
        }

        if last {
            if self.encode_state == EncodeState::Idle && self.pending_byte.is_none() {
                // Idempotence: a `last` with nothing pending and nothing
                // newly fed is a no-op, not a fresh empty stream.
                return Vec::new();
            }
            self.flush_run(&mut out);
            out.push(TOKEN_END);
            self.encode_state = EncodeState::Idle;
        }

        if out.is_empty() {
            Vec::new()
        } else {
            vec![out]
        }
    }

    fn mtu(&self) -> usize {
        0
    }

    fn reset(&mut self) {
        *self = Compression::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_run() {
        let mut enc = Compression::new();
        let chunks = enc.encode(b"AAAAAAAA", true);

        let mut dec = Compression::new();
        let mut result = None;
        for chunk in &chunks {
            result = dec.decode(chunk);
        }
        assert_eq!(result, Some(b"AAAAAAAA".to_vec()));
    }

    #[test]
    fn round_trips_mixed_content_across_multiple_encode_calls() {
        let mut enc = Compression::new();
        let mut chunks = enc.encode(b"aaabbb", false);
        chunks.extend(enc.encode(b"ccddee", true));

        let mut dec = Compression::new();
        let mut result = None;
        for chunk in &chunks {
            if let Some(r) = dec.decode(chunk) {
                result = Some(r);
            }
        }
        assert_eq!(result, Some(b"aaabbbccddee".to_vec()));
    }

    #[test]
    fn repeated_last_with_nothing_new_is_a_no_op() {
        let mut enc = Compression::new();
        let first = enc.encode(b"", true);
        assert!(first.is_empty());
        let second = enc.encode(b"", true);
        assert!(second.is_empty());
    }
}
