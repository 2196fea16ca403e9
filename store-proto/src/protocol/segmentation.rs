//! Splits outbound payloads into chunks no larger than `mtu() - 1` (one
//! header byte per chunk), and reassembles them on the way back in.
//!
//! Header byte: `1` means more chunks follow, `0` marks the last chunk of
//! the message.

use super::ProtocolLayer;

const MORE: u8 = 1;
const END: u8 = 0;

pub struct Segmentation {
    max_payload: usize,
    buffer: Vec<u8>,
}

impl Segmentation {
    /// `max_payload` is the largest chunk payload (excluding the header
    /// byte) this layer will ever emit. `0` disables segmentation: every
    /// `encode` passes its input through untouched.
    pub fn new(max_payload: usize) -> Segmentation {
        Segmentation {
            max_payload,
            buffer: Vec::new(),
        }
    }
}

impl ProtocolLayer for Segmentation {
    fn decode(&mut self, bytes: &[u8]) -> Option<Vec<u8>> {
        let (&header, rest) = bytes.split_first()?;
        self.buffer.extend_from_slice(rest);
        if header == MORE {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    fn encode(&mut self, bytes: &[u8], last: bool) -> Vec<Vec<u8>> {
        if self.max_payload == 0 {
            let header = if last { END } else { MORE };
            let mut chunk = Vec::with_capacity(bytes.len() + 1);
            chunk.push(header);
            chunk.extend_from_slice(bytes);
            return vec![chunk];
        }

        if bytes.is_empty() {
            return vec![vec![if last { END } else { MORE }]];
        }

        let mut out = Vec::new();
        let mut pieces = bytes.chunks(self.max_payload).peekable();
        while let Some(piece) = pieces.next() {
            let is_last_piece = pieces.peek().is_none() && last;
            let mut chunk = Vec::with_capacity(piece.len() + 1);
            chunk.push(if is_last_piece { END } else { MORE });
            chunk.extend_from_slice(piece);
            out.push(chunk);
        }
        out
    }

    fn mtu(&self) -> usize {
        if self.max_payload == 0 {
            0
        } else {
            self.max_payload + 1
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_and_reassembles() {
        let mut enc = Segmentation::new(4);
        let chunks = enc.encode(b"0123456789", true);
        assert_eq!(chunks.len(), 3); // 4 + 4 + 2

        let mut dec = Segmentation::new(4);
        let mut result = None;
        for chunk in &chunks {
            result = dec.decode(chunk);
        }
        assert_eq!(result, Some(b"0123456789".to_vec()));
    }

    #[test]
    fn single_chunk_when_payload_fits() {
        let mut enc = Segmentation::new(64);
        let chunks = enc.encode(b"short", true);
        assert_eq!(chunks, vec![{
            let mut v = vec![END];
            v.extend_from_slice(b"short");
            v
        }]);
    }

    #[test]
    fn mtu_accounts_for_header_byte() {
        assert_eq!(Segmentation::new(64).mtu(), 65);
        assert_eq!(Segmentation::new(0).mtu(), 0);
    }
}
