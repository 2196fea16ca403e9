//! Thin line-protocol demo: wires a [`store_proto::Debugger`] to
//! stdin/stdout against a single fixed, hand-built directory and store.
//!
//! The real directory bytes come from an external generator (out of scope
//! for this crate); this binary stands in a minimal directory by hand so
//! the debugger command layer has something to browse. It is a
//! demonstration of the library, not a feature surface of its own.

use std::io::{self, BufRead, Write};

use store_proto::{Config, Debugger, DebuggerConfig, Endian, MemoryStore, TypeTag};

/// One variable, `x`, a host-endian uint32 at buffer offset 0 — the same
/// shape as the directory worked example: branch on `x`, both alternatives
/// dead-ended, landing on the variable record.
fn demo_directory() -> Vec<u8> {
    let tag = TypeTag::UINT32.raw();
    vec![
        b'x', 0x00, 0x00, 0x04, // branch 'x', less/greater dead, equal -> 4
        0x80 | tag, 0x00, // variable record: fixed uint32, offset 0
    ]
}

fn main() {
    tracing_subscriber::fmt::init();

    let directory = demo_directory();
    let mut store = MemoryStore::new(4, Endian::host());
    let config = Config::permissive(Endian::host());
    let mut debugger = Debugger::new(DebuggerConfig::from(&config));

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                tracing::error!(?err, "reading stdin");
                break;
            }
        };
        let reply = debugger.handle(line.as_bytes(), &directory, &mut store);
        stdout.write_all(&reply).unwrap();
        stdout.write_all(b"\n").unwrap();
        stdout.flush().unwrap();
    }
}
