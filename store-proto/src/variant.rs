//! Typed accessor over a directory entry: `get`/`set` with endianness
//! translation, backed by a [`Store`].

use crate::store::{Endian, Store};
use crate::typetag::TypeTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variant {
    type_tag: TypeTag,
    /// Buffer offset for data variants, callable id for functions.
    data_ptr_or_id: u64,
    length: u32,
}

impl Variant {
    pub const INVALID: Variant = Variant {
        type_tag: TypeTag::INVALID,
        data_ptr_or_id: 0,
        length: 0,
    };

    pub fn new(type_tag: TypeTag, data_ptr_or_id: u64, length: u32) -> Variant {
        Variant {
            type_tag,
            data_ptr_or_id,
            length,
        }
    }

    pub fn from_entry(entry: crate::directory::Entry) -> Variant {
        Variant::new(entry.type_tag, entry.offset_or_id, entry.length)
    }

    pub fn valid(&self) -> bool {
        self.type_tag.valid() && (self.type_tag.is_function() || self.length > 0)
    }

    pub fn type_(&self) -> TypeTag {
        self.type_tag
    }

    pub fn size(&self) -> u32 {
        self.length
    }

    /// Copy up to `dst.len()` bytes of this variant's current value into
    /// `dst`, translated into the host's byte order. Returns the number of
    /// bytes written. Functions are invoked instead of read.
    pub fn get(&self, store: &dyn Store, dst: &mut [u8]) -> usize {
        if !self.valid() {
            return 0;
        }
        if self.type_tag.is_function() {
            return store.call_get(self.data_ptr_or_id, dst);
        }

        let offset = self.data_ptr_or_id as usize;
        let len = (self.length as usize).min(dst.len());
        let buffer = store.buffer();
        if offset + len > buffer.len() {
            return 0;
        }
        let src = &buffer[offset..offset + len];

        if self.type_tag.is_arithmetic() && store.endian() != Endian::host() {
            for i in 0..len {
                dst[i] = src[len - 1 - i];
            }
        } else {
            dst[..len].copy_from_slice(src);
        }
        len
    }

    /// Write up to `src.len()` bytes into this variant, translating from
    /// host byte order into the store's declared endianness. Returns the
    /// number of bytes consumed. Fires the store's write-hook iff the
    /// written bytes actually changed anything.
    pub fn set(&self, store: &mut dyn Store, src: &[u8]) -> usize {
        if !self.valid() || self.type_tag.is_function() {
            if self.type_tag.is_function() {
                store.call_set(self.data_ptr_or_id, src);
                return src.len();
            }
            return 0;
        }

        let offset = self.data_ptr_or_id as usize;
        let len = (self.length as usize).min(src.len());
        if offset + len > store.buffer().len() {
            return 0;
        }

        let mut wire = src[..len].to_vec();
        if self.type_tag.is_arithmetic() && store.endian() != Endian::host() {
            wire.reverse();
        }

        let changed = store.buffer()[offset..offset + len] != wire[..];
        if changed {
            store.buffer_mut()[offset..offset + len].copy_from_slice(&wire);
        }
        store.write_hook(offset as u32, len as u32, changed);
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::typetag::Class;

    #[test]
    fn invalid_variant_reads_and_writes_nothing() {
        let mut store = MemoryStore::new(4, Endian::host());
        let v = Variant::INVALID;
        let mut dst = [0u8; 4];
        assert_eq!(v.get(&store, &mut dst), 0);
        assert_eq!(v.set(&mut store, &[1, 2, 3, 4]), 0);
    }

    #[test]
    fn same_endian_roundtrip_is_byte_for_byte() {
        let mut store = MemoryStore::new(4, Endian::host());
        let v = Variant::new(TypeTag::UINT32, 0, 4);
        assert_eq!(v.set(&mut store, &42u32.to_ne_bytes()), 4);
        let mut dst = [0u8; 4];
        assert_eq!(v.get(&store, &mut dst), 4);
        assert_eq!(u32::from_ne_bytes(dst), 42);
    }

    #[test]
    fn cross_endian_read_swaps_bytes() {
        let other = match Endian::host() {
            Endian::Little => Endian::Big,
            Endian::Big => Endian::Little,
        };
        // Store holds 42 encoded in `other`'s byte order; a variant backed
        // by a foreign-endian store must hand back host-native bytes.
        let bytes = match other {
            Endian::Little => 42u32.to_le_bytes(),
            Endian::Big => 42u32.to_be_bytes(),
        };
        let store = MemoryStore::from_bytes(bytes.to_vec(), other);
        let v = Variant::new(TypeTag::UINT32, 0, 4);
        let mut dst = [0u8; 4];
        assert_eq!(v.get(&store, &mut dst), 4);
        assert_eq!(u32::from_ne_bytes(dst), 42);
        assert_eq!(format!("{:x}", u32::from_ne_bytes(dst)), "2a");
    }

    #[test]
    fn write_hook_only_fires_changed_on_real_changes() {
        struct Spy {
            inner: MemoryStore,
            calls: Vec<bool>,
        }
        impl Store for Spy {
            fn buffer(&self) -> &[u8] {
                self.inner.buffer()
            }
            fn buffer_mut(&mut self) -> &mut [u8] {
                self.inner.buffer_mut()
            }
            fn endian(&self) -> Endian {
                self.inner.endian()
            }
            fn write_hook(&mut self, _offset: u32, _len: u32, changed: bool) {
                self.calls.push(changed);
            }
        }

        let mut store = Spy {
            inner: MemoryStore::new(1, Endian::host()),
            calls: Vec::new(),
        };
        let v = Variant::new(TypeTag::UINT8, 0, 1);
        v.set(&mut store, &[5]);
        v.set(&mut store, &[5]);
        v.set(&mut store, &[6]);
        assert_eq!(store.calls, vec![true, false, true]);
    }

    #[test]
    fn function_variant_invokes_callable() {
        struct Fn1 {
            inner: MemoryStore,
            last_set: Vec<u8>,
        }
        impl Store for Fn1 {
            fn buffer(&self) -> &[u8] {
                self.inner.buffer()
            }
            fn buffer_mut(&mut self) -> &mut [u8] {
                self.inner.buffer_mut()
            }
            fn endian(&self) -> Endian {
                self.inner.endian()
            }
            fn call_get(&self, id: u64, dst: &mut [u8]) -> usize {
                assert_eq!(id, 7);
                dst[0] = 9;
                1
            }
            fn call_set(&mut self, id: u64, src: &[u8]) {
                assert_eq!(id, 7);
                self.last_set = src.to_vec();
            }
        }
        let mut store = Fn1 {
            inner: MemoryStore::new(0, Endian::host()),
            last_set: Vec::new(),
        };
        let v = Variant::new(TypeTag::function(), 7, 1);
        assert_eq!(v.type_().class(), Some(Class::Function));
        let mut dst = [0u8; 1];
        assert_eq!(v.get(&store, &mut dst), 1);
        assert_eq!(dst[0], 9);
        assert_eq!(v.set(&mut store, &[3]), 1);
        assert_eq!(store.last_set, vec![3]);
    }
}
