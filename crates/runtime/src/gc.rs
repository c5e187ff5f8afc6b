//! The garbage collector driver.
//!
//! The heap knows how to mark and sweep; this module knows where the
//! roots are. Roots: every run frame's constants and every variable
//! vector on its lexical chain, the persistent global pool and global
//! variables, the operand stack up to the stack pointer, the registered
//! native objects, and the VM's temporary roots (values a native is
//! holding while it allocates).
//!
//! Between mark and sweep the interned-string table evicts entries
//! whose object did not get marked, so a dead literal can never be
//! handed out again after its slot is reused. After the sweep the
//! threshold is re-sized to twice the live set.

use tracing::debug;

use crate::vm::Vm;

pub(crate) fn collect(vm: &mut Vm) {
    let before = vm.heap.allocated_bytes();

    vm.heap.mark_values(&vm.global_frame.constants);
    vm.heap.mark_values(&vm.global_vars.borrow());

    for frame in &vm.frames {
        vm.heap.mark_values(&frame.constants);
        for variables in &frame.chain {
            vm.heap.mark_values(&variables.borrow());
        }
    }

    vm.heap.mark_values(&vm.stack);
    vm.heap.mark_values(&vm.temp_roots);

    for (_, value) in &vm.native_values {
        if let Some(obj) = value.as_object() {
            vm.heap.mark(obj);
        }
    }

    vm.strings.purge_dead(&vm.heap);

    let freed = vm.heap.sweep();
    vm.heap.rescale_threshold();

    debug!(
        target: "crispy::gc",
        freed,
        before,
        remaining = vm.heap.allocated_bytes(),
        threshold = vm.heap.threshold(),
        "collection finished"
    );
}
