//! Compile-time variable bookkeeping.
//!
//! Each lexical scope maps identifier bytes to the variable's slot
//! index, the 1-based number of the frame it was declared in, and
//! whether it may be reassigned (`var`) or not (`val`). Slot indices are
//! handed out by a single running counter across the open scope stack,
//! so closing a scope returns its slots to the pool.

use crispy_core::table::{Table, hash_bytes};

/// A resolved variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variable {
    /// Slot in the owning frame's variable vector.
    pub index: u8,
    /// 1-based frame-stack position of the declaring frame.
    pub frame: u8,
    /// False for `val` declarations and native names.
    pub assignable: bool,
}

/// One scope's symbol table.
#[derive(Debug, Default)]
pub struct Scope {
    entries: Table<Box<[u8]>, Variable>,
}

impl Scope {
    pub fn new() -> Self {
        Scope {
            entries: Table::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &[u8]) -> Option<Variable> {
        self.entries
            .get(hash_bytes(name), |key| &**key == name)
            .copied()
    }

    pub fn insert(&mut self, name: &[u8], variable: Variable) {
        self.entries
            .insert(hash_bytes(name), name.into(), variable, |key| {
                &**key == name
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_get() {
        let mut scope = Scope::new();
        let variable = Variable {
            index: 3,
            frame: 1,
            assignable: true,
        };
        scope.insert(b"x", variable);
        assert_eq!(scope.get(b"x"), Some(variable));
        assert_eq!(scope.get(b"y"), None);
        assert_eq!(scope.len(), 1);
    }

    #[test]
    fn test_reinsert_replaces() {
        let mut scope = Scope::new();
        scope.insert(
            b"x",
            Variable {
                index: 0,
                frame: 1,
                assignable: true,
            },
        );
        scope.insert(
            b"x",
            Variable {
                index: 1,
                frame: 1,
                assignable: false,
            },
        );
        assert_eq!(scope.len(), 1);
        assert_eq!(scope.get(b"x").unwrap().index, 1);
    }
}
