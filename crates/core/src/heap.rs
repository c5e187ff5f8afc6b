//! The object heap: slot storage, byte accounting, and the mark/sweep
//! primitives.
//!
//! Objects live in a slot vector; freed slots go on a free list and are
//! reused, so [`ObjRef`] handles stay stable for the lifetime of the
//! object they were issued for. The sweep phase walks every slot,
//! releases the unmarked ones, and clears the mark on survivors.
//!
//! The heap itself never decides *when* to collect; it only reports
//! whether the allocation high-water mark has been passed. The VM runs
//! collections at its allocation sites, where the full root set is in
//! scope; the compiler allocates without ever collecting, which is what
//! keeps half-emitted constant pools safe.

use tracing::trace;

use crate::object::{ObjKind, ObjRef};
use crate::value::Value;

struct HeapObject {
    marked: bool,
    /// Bytes charged at allocation time; the same amount is credited
    /// back when the slot is freed.
    size: usize,
    kind: ObjKind,
}

pub struct Heap {
    slots: Vec<Option<HeapObject>>,
    free: Vec<usize>,
    allocated: usize,
    threshold: usize,
}

impl Heap {
    pub fn new(threshold: usize) -> Self {
        Heap {
            slots: Vec::new(),
            free: Vec::new(),
            allocated: 0,
            threshold,
        }
    }

    /// Allocate an object and charge its size toward the collection
    /// threshold.
    pub fn alloc(&mut self, kind: ObjKind) -> ObjRef {
        let size = object_size(&kind);
        self.allocated += size;

        let object = HeapObject {
            marked: false,
            size,
            kind,
        };

        let obj = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(object);
                ObjRef::new(index)
            }
            None => {
                self.slots.push(Some(object));
                ObjRef::new(self.slots.len() - 1)
            }
        };

        trace!(target: "crispy::heap", obj = obj.index(), size, "allocated object");
        obj
    }

    /// True once allocations have reached the current threshold.
    pub fn should_collect(&self) -> bool {
        self.allocated >= self.threshold
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Count of live objects (test and diagnostics aid).
    pub fn live_objects(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn kind(&self, obj: ObjRef) -> &ObjKind {
        &self
            .slots[obj.index()]
            .as_ref()
            .expect("stale object handle")
            .kind
    }

    pub fn kind_mut(&mut self, obj: ObjRef) -> &mut ObjKind {
        &mut self
            .slots[obj.index()]
            .as_mut()
            .expect("stale object handle")
            .kind
    }

    pub fn is_marked(&self, obj: ObjRef) -> bool {
        self.slots[obj.index()]
            .as_ref()
            .map(|object| object.marked)
            .unwrap_or(false)
    }

    /// Mark `root` and everything reachable from it. Containers are
    /// descended iteratively: dict keys and values, list elements,
    /// lambda constant pools and captured variable vectors.
    /// Already-marked objects short-circuit, so cycles terminate.
    pub fn mark(&mut self, root: ObjRef) {
        let mut pending = vec![root];

        while let Some(obj) = pending.pop() {
            let object = match self.slots[obj.index()].as_mut() {
                Some(object) => object,
                None => continue,
            };
            if object.marked {
                continue;
            }
            object.marked = true;

            match &object.kind {
                ObjKind::Str(_) | ObjKind::Native(_) => {}
                ObjKind::List(items) => {
                    pending.extend(items.iter().filter_map(|value| value.as_object()));
                }
                ObjKind::Dict(dict) => {
                    for (key, value) in dict.iter() {
                        pending.push(key.obj);
                        if let Value::Object(obj) = value {
                            pending.push(*obj);
                        }
                    }
                }
                ObjKind::Lambda(lambda) => {
                    pending.extend(lambda.constants.iter().filter_map(|value| value.as_object()));
                    for variables in &lambda.chain {
                        pending.extend(
                            variables
                                .borrow()
                                .iter()
                                .filter_map(|value| value.as_object()),
                        );
                    }
                }
            }
        }
    }

    /// Mark every object reachable from a slice of values.
    pub fn mark_values(&mut self, values: &[Value]) {
        for value in values {
            if let Value::Object(obj) = value {
                self.mark(*obj);
            }
        }
    }

    /// Free every unmarked object, clear the marks on survivors, and
    /// return the number of bytes released.
    pub fn sweep(&mut self) -> usize {
        let mut freed = 0;

        for index in 0..self.slots.len() {
            let survives = match &self.slots[index] {
                Some(object) => object.marked,
                None => continue,
            };

            if survives {
                if let Some(object) = self.slots[index].as_mut() {
                    object.marked = false;
                }
            } else if let Some(object) = self.slots[index].take() {
                freed += object.size;
                self.free.push(index);
            }
        }

        self.allocated = self.allocated.saturating_sub(freed);
        freed
    }

    /// Re-size the collection threshold to twice the live set.
    pub fn rescale_threshold(&mut self) {
        self.threshold = self.allocated * 2;
    }

    // Convenience accessors used throughout the compiler and VM.

    pub fn str_bytes(&self, obj: ObjRef) -> Option<std::rc::Rc<[u8]>> {
        match self.kind(obj) {
            ObjKind::Str(s) => Some(s.bytes_rc()),
            _ => None,
        }
    }
}

fn object_size(kind: &ObjKind) -> usize {
    let base = std::mem::size_of::<HeapObject>();
    match kind {
        ObjKind::Str(s) => base + s.len(),
        ObjKind::List(items) => base + items.len() * std::mem::size_of::<Value>(),
        ObjKind::Lambda(lambda) => base + lambda.code.len(),
        ObjKind::Native(_) | ObjKind::Dict(_) => base,
    }
}
