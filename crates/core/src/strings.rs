//! String interning: one entry per distinct literal, stable within a compilation.
//!
//! Heap strings occupy a fixed stride of UTF-16 bytes in the data segment; short
//! ASCII strings never reach the intern table at all, since they are packed
//! directly into the pointer via [`crate::pointer::pack_sso`].

use crate::pointer::{pack_sso, PointerKind};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub struct InternedString {
    pub id: u32,
    /// Byte offset into the string data segment, or `None` for an SSO string that
    /// never touches memory.
    pub offset: Option<u32>,
    /// Length in UTF-16 code units.
    pub len_utf16: u32,
    /// Pre-computed NaN-boxed pointer bit pattern for this literal.
    pub bits: u64,
}

#[derive(Debug, Default)]
pub struct StringInternTable {
    by_value: HashMap<String, InternedString>,
    /// Accumulated UTF-16 bytes for the heap-string data segment, one entry per
    /// heap-allocated (non-SSO) string, in insertion order.
    pub heap_data: Vec<(u32, Vec<u8>)>,
    next_id: u32,
    cursor: u32,
}

impl StringInternTable {
    pub fn new(heap_base: u32) -> Self {
        StringInternTable {
            by_value: HashMap::new(),
            heap_data: Vec::new(),
            next_id: 0,
            cursor: heap_base,
        }
    }

    /// Intern `s`, returning a stable handle. Interning the same string twice
    /// returns entries with the same `id` (and therefore the same `bits`).
    pub fn intern(&mut self, s: &str) -> InternedString {
        if let Some(existing) = self.by_value.get(s) {
            return existing.clone();
        }
        let id = self.next_id;
        self.next_id += 1;
        let len_utf16 = s.encode_utf16().count() as u32;

        let entry = if let Some(bits) = pack_sso(s) {
            InternedString {
                id,
                offset: None,
                len_utf16,
                bits,
            }
        } else {
            let offset = self.cursor;
            let mut bytes = Vec::with_capacity(len_utf16 as usize * 2);
            for unit in s.encode_utf16() {
                bytes.extend_from_slice(&unit.to_le_bytes());
            }
            let stride = bytes.len() as u32;
            self.cursor += stride;
            self.heap_data.push((offset, bytes));
            let bits = crate::pointer::mkptr(PointerKind::String, len_utf16.min(u16::MAX as u32), offset);
            InternedString {
                id,
                offset: Some(offset),
                len_utf16,
                bits,
            }
        };

        self.by_value.insert(s.to_string(), entry.clone());
        entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_string_twice_yields_same_id() {
        let mut table = StringInternTable::new(1024);
        let a = table.intern("hello world");
        let b = table.intern("hello world");
        assert_eq!(a.id, b.id);
        assert_eq!(a.bits, b.bits);
    }

    #[test]
    fn short_ascii_strings_never_touch_the_heap() {
        let mut table = StringInternTable::new(1024);
        let s = table.intern("abc");
        assert!(s.offset.is_none());
        assert!(table.heap_data.is_empty());
    }

    #[test]
    fn long_strings_occupy_disjoint_heap_regions() {
        let mut table = StringInternTable::new(1024);
        let a = table.intern("this is a long string one");
        let b = table.intern("this is a long string two, longer");
        let off_a = a.offset.unwrap();
        let off_b = b.offset.unwrap();
        let len_a = table.heap_data.iter().find(|(o, _)| *o == off_a).unwrap().1.len() as u32;
        assert!(off_b >= off_a + len_a, "regions must not overlap");
    }
}
