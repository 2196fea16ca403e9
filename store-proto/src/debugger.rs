//! Line-oriented ASCII command layer sitting on top of the directory,
//! variant, and store triad. Every command replies with `!` followed by
//! its payload on success, or the single byte `?` on any failure — a
//! lookup miss, a malformed hex string, a full alias table all degrade to
//! that one reply rather than propagating an error.
//!
//! Aliases and macros are kept here rather than in the store itself: they
//! are debugger-session state, not store state, and disappear with the
//! connection.

use std::collections::{HashMap, VecDeque};

use crate::directory;
use crate::store::Store;
use crate::typetag::{Class, TypeTag};
use crate::variant::Variant;

const OK: u8 = b'!';
const ERR: u8 = b'?';

pub struct DebuggerConfig {
    /// Max number of simultaneously bound aliases; 0 disables `a`.
    pub max_aliases: usize,
    /// Total bytes across every stored macro body; 0 disables `m`.
    pub macro_budget: usize,
    /// Number of trace streams; 0 disables `s`/`t`.
    pub stream_count: usize,
    /// Ring buffer capacity per stream, in bytes.
    pub stream_capacity: usize,
    pub identification: String,
    pub version: String,
    /// Gates `r`.
    pub enable_read: bool,
    /// Gates `w`.
    pub enable_write: bool,
    /// Gates `e`.
    pub enable_echo: bool,
    /// Gates `l`.
    pub enable_list: bool,
    /// Gates `i`.
    pub enable_identification: bool,
    /// Gates `R`.
    pub enable_read_mem: bool,
    /// Gates `W`.
    pub enable_write_mem: bool,
}

impl Default for DebuggerConfig {
    fn default() -> DebuggerConfig {
        DebuggerConfig {
            max_aliases: 8,
            macro_budget: 256,
            stream_count: 4,
            stream_capacity: 256,
            identification: "store-proto debugger".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            enable_read: true,
            enable_write: true,
            enable_echo: true,
            enable_list: true,
            enable_identification: true,
            enable_read_mem: true,
            enable_write_mem: true,
        }
    }
}

pub struct Debugger {
    config: DebuggerConfig,
    aliases: HashMap<u8, Vec<u8>>,
    macros: HashMap<u8, Vec<Vec<u8>>>,
    macro_bytes_used: usize,
    /// Bytes charged against `macro_budget` for each stored macro's raw
    /// body, keyed the same as `macros` — tracked separately so a redefine
    /// subtracts exactly what an earlier definition added.
    macro_len: HashMap<u8, usize>,
    streams: Vec<VecDeque<u8>>,
    stream_source: HashMap<usize, u8>,
}

impl Debugger {
    pub fn new(config: DebuggerConfig) -> Debugger {
        let streams = (0..config.stream_count).map(|_| VecDeque::new()).collect();
        Debugger {
            config,
            aliases: HashMap::new(),
            macros: HashMap::new(),
            macro_bytes_used: 0,
            macro_len: HashMap::new(),
            streams,
            stream_source: HashMap::new(),
        }
    }

    /// Process one command line (no trailing newline) and return the
    /// reply bytes.
    #[tracing::instrument(skip(self, line, directory, store))]
    pub fn handle(&mut self, line: &[u8], directory: &[u8], store: &mut dyn Store) -> Vec<u8> {
        let Some((&cmd, rest)) = line.split_first() else {
            tracing::warn!("empty command line");
            return vec![ERR];
        };
        let rest = strip_one_space(rest);
        match cmd {
            b'?' => self.cmd_capabilities(),
            b'r' if self.config.enable_read => self.cmd_read(rest, directory, store),
            b'w' if self.config.enable_write => self.cmd_write(rest, directory, store),
            b'e' if self.config.enable_echo => reply(rest),
            b'l' if self.config.enable_list => self.cmd_list(directory),
            b'a' => self.cmd_alias(rest),
            b'm' => self.cmd_macro(rest, directory, store),
            b'i' if self.config.enable_identification => reply(self.config.identification.as_bytes()),
            b'v' => reply(self.config.version.as_bytes()),
            b'R' if self.config.enable_read_mem => self.cmd_read_mem(rest, store),
            b'W' if self.config.enable_write_mem => self.cmd_write_mem(rest, store),
            b's' => self.cmd_stream(rest),
            b't' => self.cmd_trace(rest),
            _ => vec![ERR],
        }
    }

    /// Run every stream's bound macro once, appending its output to the
    /// stream's ring buffer (oldest bytes drop first on overflow). Called
    /// periodically by the embedder, not from `handle`.
    pub fn tick(&mut self, directory: &[u8], store: &mut dyn Store) {
        let bindings: Vec<(usize, u8)> = self.stream_source.iter().map(|(&id, &c)| (id, c)).collect();
        for (stream_id, macro_char) in bindings {
            let Some(cmds) = self.macros.get(&macro_char).cloned() else {
                continue;
            };
            let mut out = Vec::new();
            for cmd in &cmds {
                out.extend(self.handle(cmd, directory, store));
            }
            self.push_stream(stream_id, &out);
        }
    }

    fn push_stream(&mut self, id: usize, bytes: &[u8]) {
        let Some(stream) = self.streams.get_mut(id) else {
            return;
        };
        for &b in bytes {
            if stream.len() >= self.config.stream_capacity {
                stream.pop_front();
            }
            stream.push_back(b);
        }
    }

    fn cmd_capabilities(&self) -> Vec<u8> {
        let mut tags = Vec::new();
        if self.config.enable_read {
            tags.push("r");
        }
        if self.config.enable_write {
            tags.push("w");
        }
        if self.config.enable_echo {
            tags.push("e");
        }
        if self.config.enable_list {
            tags.push("l");
        }
        if self.config.enable_identification {
            tags.push("i");
        }
        tags.push("v");
        if self.config.enable_read_mem {
            tags.push("R");
        }
        if self.config.enable_write_mem {
            tags.push("W");
        }
        if self.config.max_aliases > 0 {
            tags.push("a");
        }
        if self.config.macro_budget > 0 {
            tags.push("m");
        }
        if self.config.stream_count > 0 {
            tags.push("s");
            tags.push("t");
        }
        reply(tags.join(" ").as_bytes())
    }

    fn resolve_alias<'n>(&'n self, name: &'n [u8]) -> &'n [u8] {
        if name.len() == 1 {
            if let Some(full) = self.aliases.get(&name[0]) {
                return full;
            }
        }
        name
    }

    fn cmd_read(&self, rest: &[u8], directory: &[u8], store: &dyn Store) -> Vec<u8> {
        let name = self.resolve_alias(rest);
        let Some(entry) = directory::find(directory, name) else {
            return vec![ERR];
        };
        let variant = Variant::from_entry(entry);
        let len = (variant.size() as usize).min(16);
        let mut buf = [0u8; 16];
        let written = variant.get(store, &mut buf[..len]);
        let hex = if variant.type_().is_arithmetic() {
            hex_shortest_le(&buf[..written])
        } else {
            hex_pairs(&buf[..written])
        };
        reply(hex.as_bytes())
    }

    fn cmd_write(&self, rest: &[u8], directory: &[u8], store: &mut dyn Store) -> Vec<u8> {
        let mut parts = rest.splitn(2, |&b| b == b' ');
        let Some(hex_value) = parts.next() else {
            return vec![ERR];
        };
        let Some(name) = parts.next() else {
            return vec![ERR];
        };
        let name = self.resolve_alias(name);
        let Some(entry) = directory::find(directory, name) else {
            return vec![ERR];
        };
        let variant = Variant::from_entry(entry);
        let size = (variant.size() as usize).min(16);

        let bytes = if variant.type_().is_arithmetic() {
            let Some(value) = parse_hex_u128(hex_value) else {
                return vec![ERR];
            };
            value.to_le_bytes()[..size].to_vec()
        } else {
            let Some(bytes) = parse_hex_bytes(hex_value) else {
                return vec![ERR];
            };
            bytes
        };

        if variant.set(store, &bytes) == 0 {
            vec![ERR]
        } else {
            reply(b"")
        }
    }

    fn cmd_list(&self, directory: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        directory::list(directory, b"", |name, entry| {
            out.extend_from_slice(type_name(entry.type_tag).as_bytes());
            out.push(b' ');
            out.extend_from_slice(entry.length.to_string().as_bytes());
            out.push(b' ');
            out.extend_from_slice(name);
            out.push(b'\n');
        });
        reply(&out)
    }

    fn cmd_alias(&mut self, rest: &[u8]) -> Vec<u8> {
        if self.config.max_aliases == 0 || rest.is_empty() {
            return vec![ERR];
        }
        let handle = rest[0];
        if rest.len() == 1 {
            self.aliases.remove(&handle);
            return reply(b"");
        }
        let name = strip_one_space(&rest[1..]);
        if name.is_empty() {
            return vec![ERR];
        }
        if !self.aliases.contains_key(&handle) && self.aliases.len() >= self.config.max_aliases {
            return vec![ERR];
        }
        self.aliases.insert(handle, name.to_vec());
        reply(b"")
    }

    fn cmd_macro(&mut self, rest: &[u8], directory: &[u8], store: &mut dyn Store) -> Vec<u8> {
        if self.config.macro_budget == 0 || rest.is_empty() {
            return vec![ERR];
        }
        let handle = rest[0];
        if rest.len() == 1 {
            let Some(cmds) = self.macros.get(&handle).cloned() else {
                return vec![ERR];
            };
            let mut out = Vec::new();
            for cmd in &cmds {
                out.extend(self.handle(cmd, directory, store));
            }
            return out;
        }

        let sep = rest[1];
        let body = &rest[2..];
        if body.len() + 1 > self.config.macro_budget {
            return vec![ERR];
        }
        let cmds: Vec<Vec<u8>> = body
            .split(|&b| b == sep)
            .filter(|c| !c.is_empty())
            .map(|c| c.to_vec())
            .collect();

        let previous = self.macro_len.get(&handle).copied().unwrap_or(0);
        let new_total = self.macro_bytes_used - previous + body.len();
        if new_total > self.config.macro_budget {
            return vec![ERR];
        }
        self.macro_bytes_used = new_total;
        self.macro_len.insert(handle, body.len());
        self.macros.insert(handle, cmds);
        reply(b"")
    }

    fn cmd_stream(&mut self, rest: &[u8]) -> Vec<u8> {
        let mut parts = rest.split(|&b| b == b' ');
        let Some(id_bytes) = parts.next() else {
            return vec![ERR];
        };
        let Some(id) = parse_decimal(id_bytes) else {
            return vec![ERR];
        };
        let Some(stream) = self.streams.get_mut(id) else {
            return vec![ERR];
        };
        let max = parts.next().and_then(parse_decimal).unwrap_or(usize::MAX);
        let n = stream.len().min(max);
        let drained: Vec<u8> = stream.drain(..n).collect();
        reply(&drained)
    }

    fn cmd_trace(&mut self, rest: &[u8]) -> Vec<u8> {
        if rest.len() < 2 {
            return vec![ERR];
        }
        let macro_char = rest[0];
        let Some(id) = parse_decimal(&rest[1..]) else {
            return vec![ERR];
        };
        if !self.macros.contains_key(&macro_char) || id >= self.streams.len() {
            return vec![ERR];
        }
        self.stream_source.insert(id, macro_char);
        reply(b"")
    }

    fn cmd_read_mem(&self, rest: &[u8], store: &dyn Store) -> Vec<u8> {
        let mut parts = rest.splitn(2, |&b| b == b' ');
        let (Some(addr_hex), Some(len_hex)) = (parts.next(), parts.next()) else {
            return vec![ERR];
        };
        let (Some(addr), Some(len)) = (parse_hex_u128(addr_hex), parse_hex_u128(len_hex)) else {
            return vec![ERR];
        };
        let (addr, len) = (addr as usize, len as usize);
        let buffer = store.buffer();
        if addr.checked_add(len).is_none() || addr + len > buffer.len() {
            return vec![ERR];
        }
        reply(hex_pairs(&buffer[addr..addr + len]).as_bytes())
    }

    fn cmd_write_mem(&self, rest: &[u8], store: &mut dyn Store) -> Vec<u8> {
        let mut parts = rest.splitn(2, |&b| b == b' ');
        let (Some(addr_hex), Some(data_hex)) = (parts.next(), parts.next()) else {
            return vec![ERR];
        };
        let Some(addr) = parse_hex_u128(addr_hex) else {
            return vec![ERR];
        };
        let Some(bytes) = parse_hex_bytes(data_hex) else {
            return vec![ERR];
        };
        let addr = addr as usize;
        if addr + bytes.len() > store.buffer().len() {
            return vec![ERR];
        }
        let changed = store.buffer()[addr..addr + bytes.len()] != bytes[..];
        if changed {
            store.buffer_mut()[addr..addr + bytes.len()].copy_from_slice(&bytes);
        }
        store.write_hook(addr as u32, bytes.len() as u32, changed);
        reply(b"")
    }
}

fn reply(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(OK);
    out.extend_from_slice(payload);
    out
}

fn strip_one_space(rest: &[u8]) -> &[u8] {
    rest.strip_prefix(b" ").unwrap_or(rest)
}

fn type_name(tag: TypeTag) -> &'static str {
    match (tag.class(), tag.size()) {
        (Some(Class::Bool), _) => "bool",
        (Some(Class::Int), 1) => "i8",
        (Some(Class::Int), 2) => "i16",
        (Some(Class::Int), 4) => "i32",
        (Some(Class::Int), 8) => "i64",
        (Some(Class::UInt), 1) => "u8",
        (Some(Class::UInt), 2) => "u16",
        (Some(Class::UInt), 4) => "u32",
        (Some(Class::UInt), 8) => "u64",
        (Some(Class::Float), 4) => "f32",
        (Some(Class::Float), 8) => "f64",
        (Some(Class::Blob), _) => "blob",
        (Some(Class::String), _) => "string",
        (Some(Class::Pointer), _) => "ptr",
        (Some(Class::Function), _) => "fn",
        _ => "?",
    }
}

fn hex_pairs(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Interpret `bytes` as a little-endian integer and render it with no
/// leading zero digits (but at least one), the way a register dump would.
fn hex_shortest_le(bytes: &[u8]) -> String {
    let mut value: u128 = 0;
    for (i, &b) in bytes.iter().enumerate().take(16) {
        value |= u128::from(b) << (8 * i);
    }
    format!("{value:x}")
}

fn parse_hex_u128(s: &[u8]) -> Option<u128> {
    if s.is_empty() {
        return None;
    }
    let s = std::str::from_utf8(s).ok()?;
    u128::from_str_radix(s, 16).ok()
}

fn parse_hex_bytes(s: &[u8]) -> Option<Vec<u8>> {
    if s.is_empty() || s.len() % 2 != 0 {
        return None;
    }
    let s = std::str::from_utf8(s).ok()?;
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

fn parse_decimal(s: &[u8]) -> Option<usize> {
    std::str::from_utf8(s).ok()?.parse().ok()
}
