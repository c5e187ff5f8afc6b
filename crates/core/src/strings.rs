//! The interned-string table.
//!
//! Every string literal that reaches the compiler is deduplicated here:
//! the first sighting allocates a string object, later sightings of the
//! same bytes reuse it, so two occurrences of `"x"` in a program share
//! one heap object. The table holds handles (plus the literal bytes for
//! probing), not owned objects. The strings themselves belong to the
//! heap, and the GC evicts entries whose object did not survive a
//! collection.

use std::rc::Rc;

use crate::heap::Heap;
use crate::object::{ObjKind, ObjRef, StrObj};
use crate::table::{Table, hash_bytes};

struct InternedKey {
    bytes: Rc<[u8]>,
}

#[derive(Default)]
pub struct StringInterner {
    entries: Table<InternedKey, ObjRef>,
}

impl StringInterner {
    pub fn new() -> Self {
        StringInterner {
            entries: Table::with_capacity(16),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return the canonical string object for `bytes`, allocating it on
    /// first sight.
    pub fn intern(&mut self, heap: &mut Heap, bytes: &[u8]) -> ObjRef {
        let hash = hash_bytes(bytes);
        if let Some(obj) = self.entries.get(hash, |key| &*key.bytes == bytes) {
            return *obj;
        }

        let shared: Rc<[u8]> = bytes.into();
        let obj = heap.alloc(ObjKind::Str(StrObj::from_rc(Rc::clone(&shared), hash)));
        self.entries
            .insert(hash, InternedKey { bytes: shared }, obj, |key| {
                &*key.bytes == bytes
            });
        obj
    }

    /// Drop entries whose object is not marked. Must run after the mark
    /// phase and before the sweep, so a dead interned string cannot be
    /// handed out again once its slot is reused.
    pub fn purge_dead(&mut self, heap: &Heap) {
        self.entries.retain(|_, obj| heap.is_marked(*obj));
    }
}
