//! End-to-end scenarios spanning directory lookup, journal change
//! tracking, the sync handshake, and the compression layer — each
//! mirroring one of the worked examples for its module, but driven
//! entirely through `store-proto`'s public API rather than any single
//! module's internals.

use expect_test::expect;
use store_proto::{
    find, Compression, Config, DebuggerConfig, Endian, MemoryStore, ProtocolLayer, Store,
    StoreJournal, SyncConnection, Synchronizer, TypeTag,
};

/// Branch on `a`; both alternatives dead-end, so the unique match leads
/// straight to a fixed uint8 record with offset 0 in the store buffer.
fn single_uint8_directory(name: u8) -> Vec<u8> {
    let tag = TypeTag::UINT8.raw();
    vec![name, 0x00, 0x00, 0x04, 0x80 | tag, 0x00]
}

#[test]
fn directory_lookup_resolves_the_worked_example() {
    let dir = single_uint8_directory(b'a');
    let entry = find(&dir, b"a").expect("lookup should succeed");
    assert_eq!(entry.offset_or_id, 0);
    assert_eq!(entry.length, 1);
    assert!(find(&dir, b"b").is_none());
}

#[test]
fn journal_iterate_changed_emits_keys_in_order_since_a_given_seq() {
    let mut journal = StoreJournal::new("H1", 32);
    journal.changed(0, 1);
    journal.bump_seq(); // seq 1
    journal.changed(8, 1);
    journal.bump_seq(); // seq 2
    journal.changed(16, 1);
    journal.bump_seq(); // seq 3

    // Key 0's change is the oldest, so querying since its own seq excludes
    // it and keeps the two later ones.
    let mut seen = Vec::new();
    journal.iterate_changed(1, |key| seen.push(key));
    assert_eq!(seen, vec![8, 16]);
}

#[test]
fn hello_welcome_update_exchange_converges_one_write() {
    let make = |hash: &str, seed: u8| {
        let mut sync = Synchronizer::new();
        let mut store = MemoryStore::new(4, Endian::host());
        store.buffer_mut()[0] = seed;
        sync.register(StoreJournal::new(hash, 4), Box::new(store));
        sync
    };
    let mut a = make("H1", 0x00);
    let mut b = make("H1", 0x11);
    let mut conn_a = SyncConnection::new();
    let mut conn_b = SyncConnection::new();

    let hello = conn_a.source(&a, "H1");
    expect![[r#"
        [
            104,
            72,
            49,
            0,
            0,
            0,
        ]
    "#]]
    .assert_debug_eq(&hello);

    let welcome = conn_b.handle_frame(&mut b, &hello);
    assert!(conn_a.handle_frame(&mut a, &welcome).is_empty());

    assert!(conn_a.store_info("H1").unwrap().source);
    assert_eq!(a.buffer("H1"), b.buffer("H1"));

    // A local write on b, propagated as an Update and applied on a.
    write_and_mark(&mut b, "H1", 0, 0x7a);

    let updates = conn_b.process(&mut b);
    assert_eq!(updates.len(), 1);
    assert!(conn_a.handle_frame(&mut a, &updates[0]).is_empty());
    assert_eq!(a.buffer("H1").unwrap()[0], 0x7a);
}

/// Helper standing in for a store's write barrier: write a byte and record
/// it in the store's journal, the way a concrete `Store` impl would from
/// inside its own `write_hook`.
fn write_and_mark(sync: &mut Synchronizer, hash: &str, offset: u32, value: u8) {
    sync.with_store_mut(hash, |store, journal| {
        store.buffer_mut()[offset as usize] = value;
        journal.changed(offset, 1);
    });
}

#[test]
fn two_way_sync_converges_after_alternating_writes() {
    let mut a = Synchronizer::new();
    let mut b = Synchronizer::new();
    a.register(StoreJournal::new("H1", 16), Box::new(MemoryStore::new(16, Endian::host())));
    b.register(StoreJournal::new("H1", 16), Box::new(MemoryStore::new(16, Endian::host())));

    let mut conn_a = SyncConnection::new();
    let mut conn_b = SyncConnection::new();

    let hello = conn_a.source(&a, "H1");
    let welcome = conn_b.handle_frame(&mut b, &hello);
    conn_a.handle_frame(&mut a, &welcome);

    for i in 0..200u32 {
        let (side, hash_conn, peer_conn) = if i % 2 == 0 {
            (&mut a, &mut conn_a, &mut conn_b)
        } else {
            (&mut b, &mut conn_b, &mut conn_a)
        };
        write_and_mark(side, "H1", (i % 16) as u32, (i % 256) as u8);

        let frames = hash_conn.process(side);
        let other = if i % 2 == 0 { &mut b } else { &mut a };
        for frame in frames {
            peer_conn.handle_frame(other, &frame);
        }
    }

    assert_eq!(a.buffer("H1"), b.buffer("H1"));
    let seq_a = a.journal("H1").unwrap().seq();
    let seq_b = b.journal("H1").unwrap().seq();
    assert!(seq_a.abs_diff(seq_b) <= 1);
}

#[test]
fn compression_layer_round_trips_a_run_in_one_decode_call() {
    let mut encoder = Compression::new();
    let chunks = encoder.encode(b"AAAAAAAA", true);

    let mut decoder = Compression::new();
    let mut result = None;
    for chunk in &chunks {
        if let Some(r) = decoder.decode(chunk) {
            result = Some(r);
        }
    }
    assert_eq!(result, Some(b"AAAAAAAA".to_vec()));
}

#[test]
fn config_feeds_debugger_capacities_through() {
    let config = Config::permissive(Endian::Little);
    let dbg_config: DebuggerConfig = (&config).into();
    assert_eq!(dbg_config.max_aliases, config.debugger_alias_max);
    assert_eq!(dbg_config.stream_count, config.debugger_stream_count);
}
