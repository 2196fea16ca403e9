//! Synchronizer + SyncConnection: replicates store buffers across peers by
//! exchanging Hello/Welcome/Update/Bye frames over whatever transport a
//! [`crate::protocol::Stack`] is wired to.
//!
//! A store is identified by its journal's hash wherever the wire format
//! needs a stable reference, which sidesteps carrying opaque "journal
//! reference" handles across a network boundary. `SyncConnection` tracks,
//! per peer, which ids it has handed out (`id_in`) and which ids the peer
//! has handed back (`id_out`, folded into [`StoreInfo`]); the pair of these
//! plus the journal's own seq cursor is what breaks update echo loops.
//!
//! Commands are lowercase when the referenced store is little-endian and
//! uppercase when big-endian, so a peer with the wrong build-time
//! `StoreInLittleEndian` setting is caught on the first frame rather than
//! silently misreading multi-byte fields.
//!
//! Bye's three documented forms collide structurally (a hash string could
//! start with `i`, `o`, or `?`), so every form here carries an explicit
//! one-byte tag ahead of its payload. Implementers are free to pick their
//! own disambiguation per the open question in the design notes; this one
//! keeps all four wire shapes trivially distinguishable.

use std::collections::HashMap;

use crate::journal::StoreJournal;
use crate::store::{Endian, Store};

const CMD_HELLO: u8 = b'h';
const CMD_WELCOME: u8 = b'w';
const CMD_UPDATE: u8 = b'u';
const CMD_BYE: u8 = b'b';

fn cmd_byte(base: u8, endian: Endian) -> u8 {
    match endian {
        Endian::Little => base.to_ascii_lowercase(),
        Endian::Big => base.to_ascii_uppercase(),
    }
}

fn declares_big(cmd: u8) -> bool {
    cmd.is_ascii_uppercase()
}

/// Per-(connection, store) bookkeeping once a store has reached `Synced`.
#[derive(Debug, Clone, Copy)]
pub struct StoreInfo {
    /// Last seq this connection has sent or applied for this store —
    /// the loop-avoidance cursor.
    pub seq: u64,
    /// The id the peer gave us (via their Hello/Welcome `idIn`) to address
    /// this store when we send them frames about it.
    pub id_out: u16,
    /// True iff we obtained our initial copy of this store from the peer
    /// (we sent Hello and received their Welcome).
    pub source: bool,
}

struct RegisteredStore {
    journal: StoreJournal,
    store: Box<dyn Store>,
}

/// Owns every store this process can synchronize, keyed by hash.
pub struct Synchronizer {
    stores: HashMap<String, RegisteredStore>,
}

impl Synchronizer {
    pub fn new() -> Synchronizer {
        Synchronizer {
            stores: HashMap::new(),
        }
    }

    pub fn register(&mut self, journal: StoreJournal, store: Box<dyn Store>) {
        let hash = journal.hash.clone();
        self.stores.insert(hash, RegisteredStore { journal, store });
    }

    pub fn known(&self, hash: &str) -> bool {
        self.stores.contains_key(hash)
    }

    pub fn buffer(&self, hash: &str) -> Option<&[u8]> {
        self.stores.get(hash).map(|r| r.store.buffer())
    }

    pub fn journal(&self, hash: &str) -> Option<&StoreJournal> {
        self.stores.get(hash).map(|r| &r.journal)
    }

    /// Run a write against a registered store's buffer and its journal
    /// together, the way a concrete `Store`'s write barrier would: `f`
    /// gets mutable access to both and is expected to call
    /// `journal.changed(key, len)` for whatever it actually touched.
    /// Returns `None` if `hash` isn't registered.
    pub fn with_store_mut<R>(
        &mut self,
        hash: &str,
        f: impl FnOnce(&mut dyn Store, &mut StoreJournal) -> R,
    ) -> Option<R> {
        let reg = self.stores.get_mut(hash)?;
        Some(f(reg.store.as_mut(), &mut reg.journal))
    }
}

impl Default for Synchronizer {
    fn default() -> Synchronizer {
        Synchronizer::new()
    }
}

/// State for one peer transport. A store with no entry in either map is
/// `Unlinked`; an entry in `id_in` but not `store` is `WaitWelcome`; an
/// entry in `store` is `Synced`.
pub struct SyncConnection {
    id_in_next: u16,
    id_in: HashMap<u16, String>,
    store: HashMap<String, StoreInfo>,
}

impl SyncConnection {
    pub fn new() -> SyncConnection {
        SyncConnection {
            id_in_next: 0,
            id_in: HashMap::new(),
            store: HashMap::new(),
        }
    }

    fn next_id(&mut self) -> u16 {
        let id = self.id_in_next;
        self.id_in_next = self.id_in_next.wrapping_add(1);
        id
    }

    pub fn store_info(&self, hash: &str) -> Option<&StoreInfo> {
        self.store.get(hash)
    }

    fn drop_hash(&mut self, hash: &str) {
        self.id_in.retain(|_, h| h.as_str() != hash);
        self.store.remove(hash);
    }

    /// User-requested: start syncing `hash` over this connection by
    /// sending Hello. No-op (returns nothing) if already linked or the
    /// store isn't registered locally.
    pub fn source(&mut self, sync: &Synchronizer, hash: &str) -> Vec<u8> {
        let Some(reg) = sync.stores.get(hash) else {
            return Vec::new();
        };
        if self.store.contains_key(hash) || self.id_in.values().any(|h| h.as_str() == hash) {
            return Vec::new();
        }
        let id = self.next_id();
        self.id_in.insert(id, hash.to_string());

        let mut out = vec![cmd_byte(CMD_HELLO, reg.store.endian())];
        out.extend_from_slice(hash.as_bytes());
        out.push(0);
        out.extend_from_slice(&id.to_be_bytes());
        out
    }

    /// Drain every store with pending changes into Update frames, advancing
    /// each connection's per-store cursor. Returns one frame per store that
    /// had something to say; callers push these into their transport's
    /// MessageFifo and are expected to retry on backpressure themselves.
    #[tracing::instrument(skip(self, sync))]
    pub fn process(&mut self, sync: &mut Synchronizer) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for (hash, info) in self.store.iter_mut() {
            let Some(reg) = sync.stores.get_mut(hash.as_str()) else {
                continue;
            };
            // `has_changed` assumes `seq` already reflects any pending
            // change; bump first so a change recorded since the last
            // `process()` call is actually visible to the check.
            reg.journal.bump_seq();
            if !reg.journal.has_changed(info.seq) {
                continue;
            }
            let mut out = vec![cmd_byte(CMD_UPDATE, reg.store.endian())];
            out.extend_from_slice(&info.id_out.to_be_bytes());
            let new_seq = reg.journal.encode_updates(reg.store.as_ref(), info.seq, &mut out);
            tracing::trace!(hash, since = info.seq, new_seq, "encoded update");
            info.seq = new_seq;
            frames.push(out);
        }
        frames
    }

    /// Dispatch one inbound frame, returning any bytes that should be sent
    /// back to the same peer in reply (Welcome, or a mismatch Bye).
    #[tracing::instrument(skip(self, sync, frame))]
    pub fn handle_frame(&mut self, sync: &mut Synchronizer, frame: &[u8]) -> Vec<u8> {
        let Some((&cmd, rest)) = frame.split_first() else {
            return Vec::new();
        };
        let big = declares_big(cmd);
        match cmd.to_ascii_lowercase() {
            CMD_HELLO => self.on_hello(sync, rest, big),
            CMD_WELCOME => self.on_welcome(sync, rest),
            CMD_UPDATE => self.on_update(sync, rest),
            CMD_BYE => self.on_bye(rest),
            _ => Vec::new(),
        }
    }

    fn on_hello(&mut self, sync: &mut Synchronizer, rest: &[u8], declared_big: bool) -> Vec<u8> {
        let Some(nul) = rest.iter().position(|&b| b == 0) else {
            return Vec::new();
        };
        let hash = String::from_utf8_lossy(&rest[..nul]).into_owned();
        let after = &rest[nul + 1..];
        if after.len() < 2 {
            return Vec::new();
        }
        let peer_id_in = u16::from_be_bytes([after[0], after[1]]);

        let Some(reg) = sync.stores.get_mut(&hash) else {
            tracing::warn!(hash, "hello for unknown store hash");
            return encode_bye_hash(&hash);
        };
        if (reg.store.endian() == Endian::Big) != declared_big {
            tracing::warn!(hash, declared_big, "endianness mismatch on hello");
            self.drop_hash(&hash);
            return encode_bye_hash(&hash);
        }

        let our_id = self.next_id();
        self.id_in.insert(our_id, hash.clone());

        let mut out = vec![cmd_byte(CMD_WELCOME, reg.store.endian())];
        out.extend_from_slice(&our_id.to_be_bytes());
        out.extend_from_slice(&peer_id_in.to_be_bytes());
        let seq = reg.journal.encode_buffer(reg.store.as_ref(), &mut out);

        self.store.insert(
            hash,
            StoreInfo {
                seq,
                id_out: peer_id_in,
                source: false,
            },
        );
        out
    }

    fn on_welcome(&mut self, sync: &mut Synchronizer, rest: &[u8]) -> Vec<u8> {
        if rest.len() < 4 {
            return Vec::new();
        }
        let peer_id_out = u16::from_be_bytes([rest[0], rest[1]]);
        let our_id_in = u16::from_be_bytes([rest[2], rest[3]]);
        let buffer = &rest[4..];

        let Some(hash) = self.id_in.get(&our_id_in).cloned() else {
            return Vec::new();
        };
        let Some(reg) = sync.stores.get_mut(&hash) else {
            return Vec::new();
        };
        if buffer.len() != reg.store.buffer().len() {
            return Vec::new();
        }
        reg.store.buffer_mut().copy_from_slice(buffer);
        let seq = reg.journal.seq();

        self.store.insert(
            hash,
            StoreInfo {
                seq,
                id_out: peer_id_out,
                source: true,
            },
        );
        Vec::new()
    }

    fn on_update(&mut self, sync: &mut Synchronizer, rest: &[u8]) -> Vec<u8> {
        if rest.len() < 2 {
            return Vec::new();
        }
        let addressed = u16::from_be_bytes([rest[0], rest[1]]);
        let updates = &rest[2..];

        let Some(hash) = self.id_in.get(&addressed).cloned() else {
            return Vec::new();
        };
        let Some(reg) = sync.stores.get_mut(&hash) else {
            return Vec::new();
        };
        reg.journal.decode_updates(updates, reg.store.as_mut(), false);
        let seq = reg.journal.seq();
        if let Some(info) = self.store.get_mut(&hash) {
            info.seq = seq;
        }
        Vec::new()
    }

    fn on_bye(&mut self, rest: &[u8]) -> Vec<u8> {
        match rest.split_first() {
            Some((b'h', tail)) => {
                let nul = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
                let hash = String::from_utf8_lossy(&tail[..nul]).into_owned();
                self.drop_hash(&hash);
            }
            Some((b'i', tail)) if tail.len() >= 2 => {
                let id = u16::from_be_bytes([tail[0], tail[1]]);
                if let Some(hash) = self.id_in.remove(&id) {
                    self.store.remove(&hash);
                }
            }
            Some((b'o', tail)) if tail.len() >= 2 => {
                let id = u16::from_be_bytes([tail[0], tail[1]]);
                let hit = self
                    .store
                    .iter()
                    .find(|(_, info)| info.id_out == id)
                    .map(|(h, _)| h.clone());
                if let Some(hash) = hit {
                    self.drop_hash(&hash);
                }
            }
            Some((b'?', _)) => {
                self.id_in.clear();
                self.store.clear();
            }
            _ => {}
        }
        Vec::new()
    }

    /// User-requested disconnect of one store: emit its Bye and drop it.
    pub fn disconnect(&mut self, sync: &Synchronizer, hash: &str) -> Vec<u8> {
        let endian = sync.stores.get(hash).map(|r| r.store.endian());
        self.drop_hash(hash);
        let Some(endian) = endian else {
            return Vec::new();
        };
        let mut out = vec![cmd_byte(CMD_BYE, endian)];
        out.push(b'h');
        out.extend_from_slice(hash.as_bytes());
        out.push(0);
        out
    }

    /// User-requested disconnect of the whole connection: reset-all Bye.
    pub fn disconnect_all(&mut self) -> Vec<u8> {
        self.id_in.clear();
        self.store.clear();
        vec![CMD_BYE, b'?']
    }
}

impl Default for SyncConnection {
    fn default() -> SyncConnection {
        SyncConnection::new()
    }
}

fn encode_bye_hash(hash: &str) -> Vec<u8> {
    let mut out = vec![CMD_BYE, b'h'];
    out.extend_from_slice(hash.as_bytes());
    out.push(0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn registered(hash: &str, size: usize) -> Synchronizer {
        let mut sync = Synchronizer::new();
        let journal = StoreJournal::new(hash, size as u32);
        let store = MemoryStore::new(size, Endian::host());
        sync.register(journal, Box::new(store));
        sync
    }

    #[test]
    fn hello_welcome_handshake_syncs_the_initial_buffer() {
        let mut a = registered("H1", 8);
        // Register and source an unrelated store first so `a`'s next-id
        // counter is past zero, making sure the idIn/idOut fields aren't
        // accidentally both zero and masking a swapped-field bug.
        {
            let journal = StoreJournal::new("H0", 8);
            a.register(journal, Box::new(MemoryStore::new(8, Endian::host())));
        }
        let mut b = registered("H1", 8);
        a.stores.get_mut("H1").unwrap().store.buffer_mut()[0] = 0x7a;

        let mut conn_a = SyncConnection::new();
        let mut conn_b = SyncConnection::new();

        let warmup = conn_a.source(&a, "H0");
        assert_eq!(warmup[0], b'h');

        let hello = conn_a.source(&a, "H1");
        assert_eq!(hello[0], b'h');

        let welcome = conn_b.handle_frame(&mut b, &hello);
        assert_eq!(welcome[0], b'w');

        let reply = conn_a.handle_frame(&mut a, &welcome);
        assert!(reply.is_empty());

        assert_eq!(b.buffer("H1").unwrap()[0], 0x7a);
        assert!(conn_a.store_info("H1").unwrap().source);
        assert!(!conn_b.store_info("H1").unwrap().source);
        assert_eq!(conn_a.store_info("H1").unwrap().id_out, 0);
    }

    #[test]
    fn update_after_synced_propagates_a_local_write() {
        let mut a = registered("H1", 8);
        let mut b = registered("H1", 8);

        let mut conn_a = SyncConnection::new();
        let mut conn_b = SyncConnection::new();

        let hello = conn_a.source(&a, "H1");
        let welcome = conn_b.handle_frame(&mut b, &hello);
        conn_a.handle_frame(&mut a, &welcome);

        {
            let reg = a.stores.get_mut("H1").unwrap();
            reg.store.buffer_mut()[3] = 0xEE;
            reg.journal.changed(3, 1);
        }

        let updates = conn_a.process(&mut a);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0][0], b'u');

        conn_b.handle_frame(&mut b, &updates[0]);
        assert_eq!(b.buffer("H1").unwrap()[3], 0xEE);

        // Nothing new happened, so a second process() call is silent.
        assert!(conn_a.process(&mut a).is_empty());
    }

    #[test]
    fn unknown_hash_hello_gets_bye_and_no_state() {
        let mut a = registered("H1", 8);
        let mut conn = SyncConnection::new();
        let hello = {
            let mut out = vec![cmd_byte(CMD_HELLO, Endian::host())];
            out.extend_from_slice(b"NOPE");
            out.push(0);
            out.extend_from_slice(&7u16.to_be_bytes());
            out
        };
        let reply = conn.handle_frame(&mut a, &hello);
        assert_eq!(reply[0], b'b');
        assert_eq!(reply[1], b'h');
        assert!(conn.store_info("NOPE").is_none());
    }

    #[test]
    fn disconnect_all_clears_every_mapping() {
        let a = registered("H1", 8);
        let mut conn = SyncConnection::new();
        conn.source(&a, "H1");
        assert!(!conn.id_in.is_empty());
        let bye = conn.disconnect_all();
        assert_eq!(bye, vec![b'b', b'?']);
        assert!(conn.id_in.is_empty());
        assert!(conn.store.is_empty());
    }
}
