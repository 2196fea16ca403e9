//! Directory trie codec: `find()` and `list()` over the read-only,
//! generator-produced directory bytes.
//!
//! Branch jump targets (`less`/`greater`/`equal`) are varint-encoded byte
//! offsets from the start of the directory buffer, pointing straight at the
//! target node. `0` doubles as "no target in that direction" — position 0
//! is always the root branch and can never legitimately be a jump
//! destination, so it's free to use as the dead-end sentinel the
//! abbreviation rule needs.

use crate::typetag::TypeTag;
use crate::varint;

const TERMINATOR: u8 = 0x00;
const BRANCH_LOW: u8 = 0x20;
const BRANCH_HIGH: u8 = 0x80;
const SEP: u8 = b'/';

/// A resolved directory entry: everything `find` needs to hand back a
/// `Variant` once it has located the name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub type_tag: TypeTag,
    /// Buffer offset for data variants, callable id for functions.
    pub offset_or_id: u64,
    pub length: u32,
}

fn read_varint_at(dir: &[u8], pos: usize) -> Option<(u64, usize)> {
    let mut p = pos;
    let mut value: u64 = 0;
    loop {
        let byte = *dir.get(p)?;
        value = (value << 7) | u64::from(byte & 0x7f);
        p += 1;
        if byte & 0x80 == 0 {
            return Some((value, p - pos));
        }
    }
}

fn is_dead_end(target: u64) -> bool {
    target == 0
}

/// Parse the variable record starting at `dir[pos]` (the type-tag byte
/// itself, i.e. *after* the `0x80` marker has already been stripped from
/// what the caller read). Returns the entry and the position just past it.
fn read_record(dir: &[u8], pos: usize, raw_tag: u8) -> Option<(Entry, usize)> {
    let type_tag = TypeTag::from_raw(raw_tag);
    let mut p = pos;
    let length = if type_tag.is_fixed() {
        u32::from(type_tag.size())
    } else {
        let len = u32::from(*dir.get(p)?);
        p += 1;
        len
    };
    let (offset_or_id, consumed) = read_varint_at(dir, p)?;
    p += consumed;
    Some((
        Entry {
            type_tag,
            offset_or_id,
            length,
        },
        p,
    ))
}

/// Walk `dir` following only unambiguous `equal` transitions, used when the
/// input path runs out in the middle of a branch run. Returns the resolved
/// entry if the remaining branches are all dead-ended on `less`/`greater`.
fn resolve_abbreviation(dir: &[u8], pos: usize) -> Option<Entry> {
    let mut dpos = pos;
    loop {
        let b = *dir.get(dpos)?;
        if b >= BRANCH_HIGH {
            let (entry, _) = read_record(dir, dpos + 1, b ^ BRANCH_HIGH)?;
            return Some(entry);
        }
        if !(BRANCH_LOW..BRANCH_HIGH).contains(&b) {
            return None;
        }
        let mut p = dpos + 1;
        let (less, c) = read_varint_at(dir, p)?;
        p += c;
        let (greater, c) = read_varint_at(dir, p)?;
        p += c;
        let (equal, c) = read_varint_at(dir, p)?;
        p += c;
        let _ = p;
        if !is_dead_end(less) || !is_dead_end(greater) {
            return None;
        }
        dpos = equal as usize;
    }
}

/// Resolve `name` (a `/`-separated path, without a leading `/`) against the
/// directory bytes. Returns `None` on any mismatch — lookup misses are not
/// an error condition here, just an absent result.
pub fn find(dir: &[u8], name: &[u8]) -> Option<Entry> {
    if name.is_empty() {
        return None;
    }

    let mut dpos = 0usize;
    let mut npos = 0usize;

    loop {
        let b = *dir.get(dpos)?;
        match b {
            TERMINATOR => return None,
            SEP => {
                dpos += 1;
                while npos < name.len() && name[npos] != SEP {
                    npos += 1;
                }
                if npos >= name.len() {
                    return None;
                }
                npos += 1;
            }
            b if b >= BRANCH_HIGH => {
                let (entry, _) = read_record(dir, dpos + 1, b ^ BRANCH_HIGH)?;
                return if npos == name.len() { Some(entry) } else { None };
            }
            b if (BRANCH_LOW..BRANCH_HIGH).contains(&b) => {
                let mut p = dpos + 1;
                let (less, c) = read_varint_at(dir, p)?;
                p += c;
                let (greater, c) = read_varint_at(dir, p)?;
                p += c;
                let (equal, c) = read_varint_at(dir, p)?;
                p += c;
                let _ = p;

                if npos >= name.len() {
                    return if is_dead_end(less) && is_dead_end(greater) {
                        resolve_abbreviation(dir, equal as usize)
                    } else {
                        None
                    };
                }

                let c = name[npos] as i8;
                match c.cmp(&(b as i8)) {
                    std::cmp::Ordering::Less => {
                        if is_dead_end(less) {
                            return None;
                        }
                        dpos = less as usize;
                    }
                    std::cmp::Ordering::Greater => {
                        if is_dead_end(greater) {
                            return None;
                        }
                        dpos = greater as usize;
                    }
                    std::cmp::Ordering::Equal => {
                        npos += 1;
                        if is_dead_end(equal) {
                            return None;
                        }
                        dpos = equal as usize;
                    }
                }
            }
            _ => return None,
        }
    }
}

/// DFS the trie, calling `callback(name, entry)` for every variable record
/// reachable under `prefix` (an empty prefix visits the whole directory).
pub fn list(dir: &[u8], prefix: &[u8], mut callback: impl FnMut(&[u8], Entry)) {
    let mut path = Vec::new();
    walk(dir, 0, prefix, &mut path, &mut callback);
}

fn walk(
    dir: &[u8],
    dpos: usize,
    prefix: &[u8],
    path: &mut Vec<u8>,
    callback: &mut impl FnMut(&[u8], Entry),
) {
    let Some(&b) = dir.get(dpos) else { return };
    match b {
        TERMINATOR => {}
        SEP => {
            let mut next = path.clone();
            next.push(SEP);
            let sub_prefix = strip_matched(prefix, path.len() + 1);
            walk(dir, dpos + 1, sub_prefix, &mut next, callback);
        }
        b if b >= BRANCH_HIGH => {
            if let Some((entry, _)) = read_record(dir, dpos + 1, b ^ BRANCH_HIGH) {
                if prefix_matches(prefix, path) {
                    callback(path, entry);
                }
            }
        }
        b if (BRANCH_LOW..BRANCH_HIGH).contains(&b) => {
            let mut p = dpos + 1;
            let Some((less, c)) = read_varint_at(dir, p) else {
                return;
            };
            p += c;
            let Some((greater, c)) = read_varint_at(dir, p) else {
                return;
            };
            p += c;
            let Some((equal, c)) = read_varint_at(dir, p) else {
                return;
            };
            let _ = c;

            if !prefix_could_match(prefix, path, b) {
                return;
            }

            if !is_dead_end(less) {
                walk(dir, less as usize, prefix, path, callback);
            }
            if !is_dead_end(greater) {
                walk(dir, greater as usize, prefix, path, callback);
            }
            if !is_dead_end(equal) {
                path.push(b);
                walk(dir, equal as usize, prefix, path, callback);
                path.pop();
            }
        }
        _ => {}
    }
}

fn prefix_matches(prefix: &[u8], path: &[u8]) -> bool {
    prefix.is_empty() || path.len() >= prefix.len() && path.starts_with(prefix)
        || prefix.starts_with(path)
}

fn prefix_could_match(prefix: &[u8], path: &[u8], next_char: u8) -> bool {
    if prefix.is_empty() || path.len() >= prefix.len() {
        return true;
    }
    prefix[path.len()] == next_char
}

fn strip_matched(prefix: &[u8], consumed: usize) -> &[u8] {
    if consumed >= prefix.len() {
        &[]
    } else {
        &prefix[consumed..]
    }
}
