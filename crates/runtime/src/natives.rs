//! Native functions: the registry and the standard library.
//!
//! A native is a host function behind a small heap object; the callable
//! itself lives in the VM's registry and is found by id, so the object
//! model never stores a raw function pointer. Two calling conventions
//! exist: plain natives see only their arguments, system natives also
//! get the VM (to allocate, to read the heap, to signal errors).
//!
//! A system native reports an error by returning the message (as a
//! Crispy string) with the VM's `err_flag` set; the dispatch loop turns
//! that into a runtime error.

use std::io::{BufRead, Write};
use std::rc::Rc;

use crispy_core::object::ObjKind;
use crispy_core::value::{Value, stringify_value};

use crate::vm::Vm;

pub type PlainFn = fn(&[Value]) -> Value;
pub type SystemFn = fn(&[Value], &mut Vm) -> Value;

/// The two native calling conventions.
#[derive(Clone, Copy)]
pub enum NativeFn {
    Plain(PlainFn),
    System(SystemFn),
}

/// A registered native.
pub struct NativeDef {
    pub name: Rc<str>,
    pub arity: u8,
    pub func: NativeFn,
}

/// Register the standard library. All nine names are reserved in the
/// global scope of every program.
///
/// `println` and `print` are registered as system natives: rendering a
/// heap value requires the heap behind the handle, which plain natives
/// never see.
pub(crate) fn install_standard_library(vm: &mut Vm) {
    vm.register_native("println", 1, NativeFn::System(native_println));
    vm.register_native("print", 1, NativeFn::System(native_print));
    vm.register_native("exit", 1, NativeFn::System(native_exit));
    vm.register_native("str", 1, NativeFn::System(native_str));
    vm.register_native("len", 1, NativeFn::System(native_len));
    vm.register_native("split", 2, NativeFn::System(native_split));
    vm.register_native("input", 0, NativeFn::System(native_input));
    vm.register_native("list", 1, NativeFn::System(native_list));
    vm.register_native("num", 1, NativeFn::System(native_num));
}

fn native_println(args: &[Value], vm: &mut Vm) -> Value {
    println!("{}", stringify_value(vm.heap(), args[0]));
    Value::Nil
}

fn native_print(args: &[Value], vm: &mut Vm) -> Value {
    print!("{}", stringify_value(vm.heap(), args[0]));
    let _ = std::io::stdout().flush();
    Value::Nil
}

fn native_exit(args: &[Value], _vm: &mut Vm) -> Value {
    let code = args[0].as_number().map(|n| n as i32).unwrap_or(1);
    std::process::exit(code)
}

fn native_str(args: &[Value], vm: &mut Vm) -> Value {
    let text = stringify_value(vm.heap(), args[0]);
    vm.alloc_string(text.as_bytes())
}

fn native_len(args: &[Value], vm: &mut Vm) -> Value {
    let length = args[0].as_object().and_then(|obj| match vm.heap().kind(obj) {
        ObjKind::Str(s) => Some(s.len()),
        ObjKind::List(items) => Some(items.len()),
        ObjKind::Dict(dict) => Some(dict.len()),
        _ => None,
    });

    match length {
        Some(length) => Value::Number(length as f64),
        None => vm.native_error("len() expects a string, list or dictionary"),
    }
}

fn native_split(args: &[Value], vm: &mut Vm) -> Value {
    let text = args[0].as_object().and_then(|obj| vm.heap().str_bytes(obj));
    let separator = args[1].as_object().and_then(|obj| vm.heap().str_bytes(obj));

    let (Some(text), Some(separator)) = (text, separator) else {
        return vm.native_error("split() expects a string and a separator string");
    };
    if separator.is_empty() {
        return vm.native_error("split() separator must not be empty");
    }

    let mut parts = Vec::new();
    let mut piece_start = 0;
    let mut cursor = 0;
    while cursor + separator.len() <= text.len() {
        if text[cursor..].starts_with(&separator) {
            let part = vm.alloc_string(&text[piece_start..cursor]);
            vm.protect(part);
            parts.push(part);
            piece_start = cursor + separator.len();
            cursor = piece_start;
        } else {
            cursor += 1;
        }
    }
    let last = vm.alloc_string(&text[piece_start..]);
    vm.protect(last);
    parts.push(last);

    Value::Object(vm.alloc(ObjKind::List(parts)))
}

fn native_input(_args: &[Value], vm: &mut Vm) -> Value {
    let mut bytes = Vec::new();
    match std::io::stdin().lock().read_until(b'\n', &mut bytes) {
        Ok(0) => vm.native_error("input() reached end of input"),
        Ok(_) => {
            while bytes.last() == Some(&b'\n') || bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
            vm.alloc_string(&bytes)
        }
        Err(_) => vm.native_error("input() could not read from stdin"),
    }
}

fn native_list(args: &[Value], vm: &mut Vm) -> Value {
    match args[0] {
        Value::Number(n) if n >= 0.0 && n.floor() == n => {
            Value::Object(vm.alloc(ObjKind::List(vec![Value::Nil; n as usize])))
        }
        _ => vm.native_error("list() expects a non-negative integer length"),
    }
}

fn native_num(args: &[Value], vm: &mut Vm) -> Value {
    let parsed = args[0]
        .as_object()
        .and_then(|obj| vm.heap().str_bytes(obj))
        .and_then(|bytes| std::str::from_utf8(&bytes).ok().map(str::to_owned))
        .and_then(|text| text.trim().parse::<f64>().ok());

    match parsed {
        Some(number) => Value::Number(number),
        None => vm.native_error("num() expects a string containing a number"),
    }
}
