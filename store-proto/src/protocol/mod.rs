//! Stackable protocol layers.
//!
//! Layers don't hold neighbour pointers to each other (a doubly-linked
//! chain of trait objects fights the borrow checker for no real benefit
//! here); instead a [`Stack`] owns them in a `Vec`, ordered from the
//! application-facing end (index 0) down to the transport-facing end
//! (the last element), and drives `decode`/`encode` through them in turn.
//! That's the same topology the node-pair model describes, just addressed
//! by position instead of by back-pointer.

pub mod compression;
pub mod segmentation;

/// One node in a protocol stack.
pub trait ProtocolLayer {
    /// Consume inbound bytes from below. Returns `Some(payload)` once a
    /// full logical unit is ready to pass further up; `None` if the layer
    /// is still buffering.
    fn decode(&mut self, bytes: &[u8]) -> Option<Vec<u8>>;

    /// Produce outbound chunks for the layer below. `last` marks the final
    /// piece of the current logical message (used by segmentation and
    /// compression to know when to finalize).
    fn encode(&mut self, bytes: &[u8], last: bool) -> Vec<Vec<u8>>;

    /// This layer's own framing overhead limit; 0 means unlimited.
    fn mtu(&self) -> usize {
        0
    }

    /// Force out any buffered-but-not-yet-emitted output.
    fn flush(&mut self) -> Vec<Vec<u8>> {
        Vec::new()
    }

    /// Hint that the most recent response may be discarded if a fresher
    /// one supersedes it before it's sent (used by layers that coalesce).
    fn purgeable_response(&mut self, _purgeable: bool) {}

    /// Drop all buffered state and go back to the layer's initial state.
    fn reset(&mut self) {}
}

pub struct Stack {
    /// index 0 = closest to the application; last = closest to transport.
    layers: Vec<Box<dyn ProtocolLayer>>,
}

impl Stack {
    pub fn new(layers: Vec<Box<dyn ProtocolLayer>>) -> Stack {
        assert!(!layers.is_empty(), "a protocol stack needs at least one layer");
        Stack { layers }
    }

    /// The effective MTU of the whole stack: the minimum of every layer's
    /// own limit, ignoring layers that report "unlimited" (0).
    pub fn mtu(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.mtu())
            .filter(|&m| m != 0)
            .min()
            .unwrap_or(0)
    }

    /// Feed bytes received from the transport up through every layer.
    /// Returns the fully reassembled application payload once the whole
    /// chain has agreed a message is complete.
    pub fn decode_from_transport(&mut self, bytes: &[u8]) -> Option<Vec<u8>> {
        let bottom = self.layers.len() - 1;
        let mut cur = self.layers[bottom].decode(bytes)?;
        for layer in self.layers[..bottom].iter_mut().rev() {
            cur = layer.decode(&cur)?;
        }
        Some(cur)
    }

    /// Push an application payload down through every layer, returning the
    /// chunks that should be written to the transport, in order.
    pub fn encode_to_transport(&mut self, bytes: &[u8], last: bool) -> Vec<Vec<u8>> {
        let mut chunks = self.layers[0].encode(bytes, last);
        for layer in self.layers.iter_mut().skip(1) {
            let mut next = Vec::new();
            let count = chunks.len();
            for (i, chunk) in chunks.iter().enumerate() {
                let is_last = last && i + 1 == count;
                next.extend(layer.encode(chunk, is_last));
            }
            chunks = next;
        }
        chunks
    }

    pub fn reset(&mut self) {
        for layer in &mut self.layers {
            layer.reset();
        }
    }
}
