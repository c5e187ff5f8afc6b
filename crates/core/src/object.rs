//! Heap object kinds.
//!
//! Every object is reached through an [`ObjRef`] handle into the
//! [`Heap`](crate::heap::Heap); nothing in the value model carries a raw
//! pointer. Object payloads that other objects need to inspect without
//! touching the heap again (dictionary key bytes, lambda code) are held
//! behind `Rc` so they can be cached alongside the handle.

use std::cell::Cell;
use std::rc::Rc;

use crate::frame::Variables;
use crate::table::{Table, hash_bytes};
use crate::value::Value;

/// Handle to a heap slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjRef(u32);

impl ObjRef {
    pub(crate) fn new(index: usize) -> Self {
        ObjRef(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// An immutable byte string with a lazily cached djb2 hash.
///
/// Crispy strings are byte-transparent: no encoding is assumed and none
/// is validated.
#[derive(Debug)]
pub struct StrObj {
    bytes: Rc<[u8]>,
    hash: Cell<Option<u32>>,
}

impl StrObj {
    pub fn new(bytes: &[u8]) -> Self {
        StrObj {
            bytes: bytes.into(),
            hash: Cell::new(None),
        }
    }

    pub fn from_rc(bytes: Rc<[u8]>, hash: u32) -> Self {
        StrObj {
            bytes,
            hash: Cell::new(Some(hash)),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_rc(&self) -> Rc<[u8]> {
        Rc::clone(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn hash(&self) -> u32 {
        match self.hash.get() {
            Some(hash) => hash,
            None => {
                let hash = hash_bytes(&self.bytes);
                self.hash.set(Some(hash));
                hash
            }
        }
    }
}

/// A compiled lambda.
///
/// The compiler produces a template (empty `chain`); loading the
/// template at run time produces a closure instance whose `chain` holds
/// the variable vectors of the lexically enclosing frames, outermost
/// first. Code and constants are shared between the template and every
/// closure made from it.
#[derive(Debug)]
pub struct LambdaObj {
    pub arity: u8,
    pub code: Rc<[u8]>,
    pub constants: Rc<Vec<Value>>,
    pub chain: Vec<Variables>,
}

/// A registered host function. The callable itself lives in the VM's
/// native registry under `id`; the object only carries what the call
/// site and the printer need.
#[derive(Debug)]
pub struct NativeObj {
    pub name: Rc<str>,
    pub arity: u8,
    pub system: bool,
    pub id: u16,
}

/// Dictionary key: the string object's handle plus its bytes and hash,
/// cached so probing a dictionary never needs the heap.
#[derive(Debug, Clone)]
pub struct DictKey {
    pub obj: ObjRef,
    pub bytes: Rc<[u8]>,
}

/// A dictionary: string keys to arbitrary values.
#[derive(Debug, Default)]
pub struct DictObj {
    entries: Table<DictKey, Value>,
}

impl DictObj {
    pub fn new() -> Self {
        DictObj {
            entries: Table::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, key: DictKey, value: Value) {
        let hash = hash_bytes(&key.bytes);
        let bytes = Rc::clone(&key.bytes);
        self.entries.insert(hash, key, value, |k| k.bytes == bytes);
    }

    /// Look up by key bytes; absent keys read as nil.
    pub fn get(&self, bytes: &[u8]) -> Value {
        self.entries
            .get(hash_bytes(bytes), |k| &*k.bytes == bytes)
            .copied()
            .unwrap_or(Value::Nil)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DictKey, &Value)> {
        self.entries.iter()
    }
}

/// The kinds of heap object.
#[derive(Debug)]
pub enum ObjKind {
    Str(StrObj),
    Lambda(LambdaObj),
    Native(NativeObj),
    Dict(DictObj),
    List(Vec<Value>),
}
