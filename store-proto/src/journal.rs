//! Change tracking for one store: which keys changed and when, with a
//! 16-bit "short" sequence number windowed against a full 64-bit clock so
//! wire frames only ever need two bytes per change record.
//!
//! Keys are buffer offsets directly. The real generator maintains a
//! separate key-to-offset table for nested/aliased objects; since that
//! generator is out of scope here, offset-as-key is the natural
//! specialization — every variable still gets a stable, unique key.

use crate::store::Store;
use crate::varint;

pub const SHORT_SEQ_WINDOW: u64 = 1 << 16;
pub const SEQ_LOWER_MARGIN: u64 = SHORT_SEQ_WINDOW / 4;
const SEQ_CLEAN_THRESHOLD: u64 = SHORT_SEQ_WINDOW - SEQ_LOWER_MARGIN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: u32,
    pub len: u32,
    pub seq: u16,
    pub highest: u16,
}

pub struct StoreJournal {
    pub hash: String,
    buffer_size: u32,
    seq: u64,
    seq_lower: u64,
    partial_seq: bool,
    changes: Vec<ObjectInfo>,
    highest: Vec<u16>,
    dirty: bool,
}

fn to_short(seq: u64) -> u16 {
    seq as u16
}

fn to_long(seq: u64, short: u16) -> u64 {
    seq.saturating_sub((seq.wrapping_sub(u64::from(short))) & 0xFFFF)
}

impl StoreJournal {
    pub fn new(hash: impl Into<String>, buffer_size: u32) -> StoreJournal {
        StoreJournal {
            hash: hash.into(),
            buffer_size,
            seq: 0,
            seq_lower: 0,
            partial_seq: false,
            changes: Vec::new(),
            highest: Vec::new(),
            dirty: false,
        }
    }

    /// Pre-grow the change table to `n_variables` so steady-state writes
    /// never allocate.
    pub fn reserve_heap(&mut self, n_variables: usize) {
        self.changes.reserve(n_variables);
        self.highest.reserve(n_variables);
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    fn key_bytes(&self) -> usize {
        varint_bytes_for(self.buffer_size as u64)
    }

    /// Call from the store's write barrier whenever a write actually
    /// changed bytes. `key` identifies the object (its buffer offset);
    /// `len` is its byte length.
    pub fn changed(&mut self, key: u32, len: u32) {
        match self.changes.binary_search_by_key(&key, |o| o.key) {
            Ok(idx) => self.changes[idx].seq = to_short(self.seq + 1),
            Err(idx) => {
                self.changes.insert(
                    idx,
                    ObjectInfo {
                        key,
                        len,
                        seq: to_short(self.seq + 1),
                        highest: 0,
                    },
                );
            }
        }
        self.partial_seq = true;
        self.dirty = true;
        self.rebuild_if_dirty();
    }

    /// Recompute every node's `highest` from scratch. A seq change on any
    /// leaf, or an insertion anywhere, can move the max for an unbounded
    /// number of ancestors, so this just rebuilds the whole array rather
    /// than tracking which ancestors need fixing up.
    fn rebuild_if_dirty(&mut self) {
        if !self.dirty {
            return;
        }
        self.highest = vec![0u16; self.changes.len()];
        rebuild_highest(&self.changes, &mut self.highest, 0, self.changes.len());
        self.dirty = false;
    }

    /// Bump `seq` if there have been changes since the last bump, running
    /// the seq-window cleanup when the window has grown too large.
    pub fn bump_seq(&mut self) -> u64 {
        if self.partial_seq {
            self.seq += 1;
            self.partial_seq = false;
            self.rebuild_if_dirty();
        }
        if self.seq - self.seq_lower > SEQ_CLEAN_THRESHOLD {
            self.clean(self.seq - SEQ_LOWER_MARGIN);
        }
        self.seq
    }

    /// Clamp every record older than `oldest` up to `oldest`, keeping the
    /// tree shape but fixing up `seq`/`highest` fields.
    pub fn clean(&mut self, oldest: u64) {
        let oldest_short = to_short(oldest);
        for o in &mut self.changes {
            let long = to_long(self.seq, o.seq);
            if long < oldest {
                o.seq = oldest_short;
            }
        }
        self.seq_lower = oldest;
        self.dirty = true;
        self.rebuild_if_dirty();
    }

    pub fn has_changed_key(&self, key: u32, since: u64) -> bool {
        match self.changes.binary_search_by_key(&key, |o| o.key) {
            Ok(idx) => to_long(self.seq, self.changes[idx].seq) > since,
            Err(_) => false,
        }
    }

    pub fn has_changed(&self, since: u64) -> bool {
        if self.changes.is_empty() {
            return false;
        }
        let mid = self.changes.len() / 2;
        to_long(self.seq, self.highest[mid]) > since
    }

    /// DFS the change tree in key order, invoking `cb(key)` for every
    /// object whose seq is strictly newer than `since`.
    pub fn iterate_changed(&self, since: u64, mut cb: impl FnMut(u32)) {
        self.iterate_range(0, self.changes.len(), since, &mut cb);
    }

    fn iterate_range(&self, lo: usize, hi: usize, since: u64, cb: &mut impl FnMut(u32)) {
        if lo >= hi {
            return;
        }
        let mid = lo + (hi - lo) / 2;
        if to_long(self.seq, self.highest[mid]) <= since {
            return;
        }
        self.iterate_range(lo, mid, since, cb);
        if to_long(self.seq, self.changes[mid].seq) > since {
            cb(self.changes[mid].key);
        }
        self.iterate_range(mid + 1, hi, since, cb);
    }

    /// Encode every change newer than `since`, in key order, bumping `seq`
    /// first if there were pending changes. Returns the (possibly bumped)
    /// seq the caller should remember as its new "last sent" cursor.
    #[tracing::instrument(skip(self, store, out))]
    pub fn encode_updates(&mut self, store: &dyn Store, since: u64, out: &mut Vec<u8>) -> u64 {
        self.bump_seq();
        let key_bytes = self.key_bytes();

        let mut keys = Vec::new();
        self.iterate_changed(since, |key| keys.push(key));
        for key in keys {
            let len = self
                .changes
                .binary_search_by_key(&key, |o| o.key)
                .ok()
                .map(|idx| self.changes[idx].len)
                .unwrap_or(0);
            write_be(out, u64::from(key), key_bytes);
            varint::encode(u64::from(len), out);
            let start = key as usize;
            out.extend_from_slice(&store.buffer()[start..start + len as usize]);
        }
        self.seq
    }

    /// Emit the whole store buffer verbatim, for a Welcome frame. Clears
    /// the partial-seq flag and returns the current seq.
    pub fn encode_buffer(&mut self, store: &dyn Store, out: &mut Vec<u8>) -> u64 {
        out.extend_from_slice(store.buffer());
        self.partial_seq = false;
        self.seq
    }

    /// Parse `(key, length, data)` tuples written by [`encode_updates`]
    /// and apply them to `store`. Each applied key is recorded as changed
    /// unless `record_all` is false and the bytes were already identical.
    #[tracing::instrument(skip(self, data, store))]
    pub fn decode_updates(&mut self, mut data: &[u8], store: &mut dyn Store, record_all: bool) {
        let key_bytes = self.key_bytes();
        while !data.is_empty() {
            if data.len() < key_bytes {
                break;
            }
            let key = read_be(&data[..key_bytes]) as u32;
            data = &data[key_bytes..];
            let Ok(len) = varint::read(&mut data) else {
                break;
            };
            let len = len as usize;
            if data.len() < len {
                break;
            }
            let (payload, rest) = data.split_at(len);
            data = rest;

            let offset = key as usize;
            let changed = store.buffer()[offset..offset + len] != *payload;
            if changed {
                store.buffer_mut()[offset..offset + len].copy_from_slice(payload);
            }
            if changed || record_all {
                self.changed(key, len as u32);
            }
        }
        // `changed()` records each short seq as one ahead of `self.seq`,
        // anticipating the next bump; queries like `has_changed_key` assume
        // `self.seq` has already caught up to whatever was last recorded.
        self.bump_seq();
    }
}

fn varint_bytes_for(max_value: u64) -> usize {
    let mut n = 1;
    let mut v = max_value >> 8;
    while v > 0 {
        n += 1;
        v >>= 8;
    }
    n
}

fn write_be(out: &mut Vec<u8>, value: u64, bytes: usize) {
    for i in (0..bytes).rev() {
        out.push(((value >> (8 * i)) & 0xFF) as u8);
    }
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

fn rebuild_highest(changes: &[ObjectInfo], highest: &mut [u16], lo: usize, hi: usize) -> u16 {
    if lo >= hi {
        return 0;
    }
    let mid = lo + (hi - lo) / 2;
    let left = rebuild_highest(changes, highest, lo, mid);
    let right = rebuild_highest(changes, highest, mid + 1, hi);
    let h = changes[mid].seq.max(left).max(right);
    highest[mid] = h;
    h
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Endian, MemoryStore};

    #[test]
    fn changed_then_iterate_changed_in_key_order() {
        let mut j = StoreJournal::new("H1", 32);
        j.changed(0, 1);
        j.bump_seq(); // seq 1
        j.changed(8, 1);
        j.bump_seq(); // seq 2
        j.changed(16, 1);
        j.bump_seq(); // seq 3

        let mut seen = Vec::new();
        j.iterate_changed(0, |k| seen.push(k));
        assert_eq!(seen, vec![0, 8, 16]);

        // Since the very first change, key 0's seq is no longer newer.
        let mut seen_since_first = Vec::new();
        j.iterate_changed(1, |k| seen_since_first.push(k));
        assert_eq!(seen_since_first, vec![8, 16]);
    }

    #[test]
    fn has_changed_reflects_the_most_recent_write() {
        let mut j = StoreJournal::new("H1", 32);
        assert!(!j.has_changed(0));
        j.changed(4, 1);
        j.bump_seq();
        assert!(j.has_changed(0));
        let now = j.seq();
        assert!(!j.has_changed(now));
    }

    #[test]
    fn encode_then_decode_updates_round_trips() {
        let mut store = MemoryStore::new(32, Endian::host());
        store.buffer_mut()[4] = 0xAB;
        let mut journal = StoreJournal::new("H1", 32);
        journal.changed(4, 1);

        let mut wire = Vec::new();
        let new_seq = journal.encode_updates(&store, 0, &mut wire);
        assert!(new_seq >= 1);
        assert!(!wire.is_empty());

        let mut peer_store = MemoryStore::new(32, Endian::host());
        let mut peer_journal = StoreJournal::new("H1", 32);
        peer_journal.decode_updates(&wire, &mut peer_store, false);
        assert_eq!(peer_store.buffer()[4], 0xAB);
        assert!(peer_journal.has_changed_key(4, 0));
    }

    #[test]
    fn encode_buffer_is_a_verbatim_snapshot() {
        let mut store = MemoryStore::new(4, Endian::host());
        store.buffer_mut().copy_from_slice(&[1, 2, 3, 4]);
        let mut journal = StoreJournal::new("H1", 4);
        let mut out = Vec::new();
        journal.encode_buffer(&store, &mut out);
        assert_eq!(out, vec![1, 2, 3, 4]);
    }
}
