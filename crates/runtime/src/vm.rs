//! The virtual machine.
//!
//! A [`Vm`] owns every piece of shared state: the operand stack (fixed
//! capacity, overflow is fatal), the frame stack, the heap and interned
//! strings, the persistent compile session, and the native registry.
//! [`Vm::interpret`] compiles one unit into the global frame and runs
//! it; in interactive mode the same VM keeps its globals, constants,
//! and interned strings across inputs.
//!
//! The dispatch loop is a straight fetch/decode/execute over the
//! current frame's code. A lambda call pushes a fresh frame (sharing
//! the template's code and constants, with its own variables) and
//! recurses into the loop; `RETURN` unwinds one level. Runtime errors
//! propagate as `Result` values; stack overflow and division by zero
//! print a frame trace and terminate the process with exit code 42.

use std::rc::Rc;

use tracing::debug;

use crispy_core::bytecode::Op;
use crispy_core::frame::{FrameBuilder, RunFrame, Variables, new_variables, read_var, write_var};
use crispy_core::heap::Heap;
use crispy_core::object::{DictKey, DictObj, LambdaObj, NativeObj, ObjKind, ObjRef, StrObj};
use crispy_core::strings::StringInterner;
use crispy_core::value::{Value, compare_values, display_value, stringify_value, values_equal};
use crispy_core::{STACK_MAX, disasm};
use crispy_compiler::{Session, compile};

use crate::config::VmOptions;
use crate::error::{CompileError, InterpretError, RuntimeError};
use crate::gc;
use crate::natives::{NativeDef, NativeFn, install_standard_library};

type RunResult<T = ()> = Result<T, RuntimeError>;

pub struct Vm {
    pub(crate) stack: Vec<Value>,
    pub(crate) frames: Vec<RunFrame>,
    pub(crate) heap: Heap,
    pub(crate) strings: StringInterner,
    pub(crate) global_frame: FrameBuilder,
    pub(crate) global_vars: Variables,
    pub(crate) temp_roots: Vec<Value>,
    pub(crate) native_values: Vec<(Rc<str>, Value)>,
    natives: Vec<NativeDef>,
    session: Session,
    options: VmOptions,
    interactive: bool,
    /// Set by a system native to signal that its return value is an
    /// error message.
    pub err_flag: bool,
}

impl Vm {
    pub fn new(interactive: bool) -> Self {
        Self::with_options(interactive, VmOptions::default())
    }

    pub fn with_options(interactive: bool, options: VmOptions) -> Self {
        let mut vm = Vm {
            stack: Vec::with_capacity(STACK_MAX),
            frames: Vec::new(),
            heap: Heap::new(options.gc_threshold),
            strings: StringInterner::new(),
            global_frame: FrameBuilder::new(),
            global_vars: new_variables(),
            temp_roots: Vec::new(),
            native_values: Vec::new(),
            natives: Vec::new(),
            session: Session::new(),
            options,
            interactive,
            err_flag: false,
        };
        install_standard_library(&mut vm);
        vm
    }

    /// Register a host function. Must happen before the first compile;
    /// names registered later are never declared.
    pub fn register_native(&mut self, name: &str, arity: u8, func: NativeFn) {
        let name: Rc<str> = name.into();
        let id = self.natives.len() as u16;
        let obj = self.heap.alloc(ObjKind::Native(NativeObj {
            name: Rc::clone(&name),
            arity,
            system: matches!(func, NativeFn::System(_)),
            id,
        }));
        self.native_values.push((Rc::clone(&name), Value::Object(obj)));
        self.natives.push(NativeDef { name, arity, func });
    }

    /// Compile and execute one source unit.
    pub fn interpret(&mut self, source: &[u8]) -> Result<(), InterpretError> {
        if let Err(err) = self.compile_unit(source) {
            eprintln!("{err}");
            return Err(err.into());
        }

        if self.options.dump_bytecode {
            let name = if self.interactive { "input" } else { "main" };
            eprint!(
                "{}",
                disasm::disassemble(
                    &self.heap,
                    name,
                    &self.global_frame.code,
                    &self.global_frame.constants
                )
            );
        }

        match self.execute() {
            Ok(()) => {
                self.session.confirm_natives();
                Ok(())
            }
            Err(err) => {
                eprintln!("{err}");
                Err(err.into())
            }
        }
    }

    /// Shell entry point: same pipeline, but the session, globals, and
    /// constants of this VM carry over between calls.
    pub fn interpret_interactive(&mut self, source: &[u8]) -> Result<(), InterpretError> {
        self.interpret(source)
    }

    /// Read a global variable by name. Intended for embedders and
    /// tests; declared-but-unset slots read as nil.
    pub fn global(&self, name: &str) -> Option<Value> {
        let variable = self.session.resolve_global(name.as_bytes())?;
        Some(read_var(&self.global_vars, variable.index as usize))
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn allocated_bytes(&self) -> usize {
        self.heap.allocated_bytes()
    }

    /// Run a full mark/sweep cycle now.
    pub fn collect_garbage(&mut self) {
        gc::collect(self);
    }

    /// Render a value the way the shell would.
    pub fn display(&self, value: Value) -> String {
        display_value(&self.heap, value, true)
    }

    // ----- allocation ------------------------------------------------------

    /// Allocate through the GC trigger: when the live-byte high-water
    /// mark is reached, collect first (with everything interesting
    /// still rooted), then allocate.
    pub(crate) fn alloc(&mut self, kind: ObjKind) -> ObjRef {
        if !self.options.disable_gc && self.heap.should_collect() {
            gc::collect(self);
        }
        self.heap.alloc(kind)
    }

    pub(crate) fn alloc_string(&mut self, bytes: &[u8]) -> Value {
        Value::Object(self.alloc(ObjKind::Str(StrObj::new(bytes))))
    }

    /// Keep a value alive across upcoming allocations. The protection
    /// lasts until the current native call returns.
    pub(crate) fn protect(&mut self, value: Value) {
        self.temp_roots.push(value);
    }

    /// Set the error latch and wrap `message` for returning from a
    /// system native.
    pub(crate) fn native_error(&mut self, message: &str) -> Value {
        self.err_flag = true;
        self.alloc_string(message.as_bytes())
    }

    // ----- compile and run -------------------------------------------------

    fn compile_unit(&mut self, source: &[u8]) -> Result<(), CompileError> {
        self.global_frame.code.clear();
        compile(
            &mut self.session,
            &mut self.heap,
            &mut self.strings,
            &mut self.global_frame,
            &self.native_values,
            source,
            self.interactive,
        )
    }

    fn execute(&mut self) -> RunResult {
        let code: Rc<[u8]> = self.global_frame.code.as_slice().into();
        let constants = Rc::new(self.global_frame.constants.clone());

        self.frames.clear();
        self.frames
            .push(RunFrame::new(code, constants, vec![self.global_vars.clone()]));
        self.stack.clear();
        self.temp_roots.clear();

        debug!(
            target: "crispy::vm",
            code_bytes = self.global_frame.code.len(),
            constants = self.global_frame.constants.len(),
            "executing unit"
        );
        self.run()
    }

    // ----- dispatch loop ---------------------------------------------------

    fn run(&mut self) -> RunResult {
        loop {
            if self.options.trace_execution {
                self.trace_instruction();
            }

            let byte = self.read_byte()?;
            let op = Op::from_byte(byte)
                .ok_or_else(|| RuntimeError::new(format!("Unknown instruction {byte}")))?;

            match op {
                Op::Return => return Ok(()),
                Op::Nop => {}

                Op::True => self.push(Value::Boolean(true)),
                Op::False => self.push(Value::Boolean(false)),
                Op::Nil => self.push(Value::Nil),

                Op::Ldc => {
                    let value = self.read_constant(false)?;
                    let value = self.instantiate_lambda(value);
                    self.push(value);
                }
                Op::LdcW => {
                    let value = self.read_constant(true)?;
                    let value = self.instantiate_lambda(value);
                    self.push(value);
                }
                Op::Ldc0 => self.push(Value::Number(0.0)),
                Op::Ldc1 => self.push(Value::Number(1.0)),

                Op::Load => {
                    let index = self.read_byte()? as usize;
                    let value = read_var(self.frame().variables(), index);
                    self.push(value);
                }
                Op::Store => {
                    let index = self.read_byte()? as usize;
                    let value = self.pop()?;
                    write_var(self.frame().variables(), index, value);
                }
                Op::LoadOffset => {
                    let variables = self.read_chain_frame()?;
                    let index = self.read_byte()? as usize;
                    let value = read_var(&variables, index);
                    self.push(value);
                }
                Op::StoreOffset => {
                    let variables = self.read_chain_frame()?;
                    let index = self.read_byte()? as usize;
                    let value = self.pop()?;
                    write_var(&variables, index, value);
                }

                Op::Dup => {
                    let value = self.peek(0)?;
                    self.push(value);
                }
                Op::Pop => {
                    self.pop()?;
                }

                Op::Add => self.add()?,
                Op::Sub | Op::Mul | Op::Pow => self.numeric_binary(op)?,
                Op::Div => {
                    let (first, second) = self.pop_numbers("Operands must be numbers")?;
                    if second == 0.0 {
                        self.fatal("Cannot divide by zero");
                    }
                    self.push(Value::Number(first / second));
                }
                Op::Mod => {
                    let (first, second) =
                        self.pop_numbers("Modulo operator (%) only works on numbers")?;
                    let (first, second) = (first as i64, second as i64);
                    if second == 0 {
                        self.fatal("Cannot divide by zero");
                    }
                    self.push(Value::Number((first % second) as f64));
                }
                Op::Negate => {
                    let value = self.pop()?;
                    match value.as_number() {
                        Some(n) => self.push(Value::Number(-n)),
                        None => return Err(RuntimeError::new("Can only negate numbers")),
                    }
                }
                Op::Not => {
                    let value = self.pop_boolean("Operand of '!' must be a boolean")?;
                    self.push(Value::Boolean(!value));
                }

                Op::And => {
                    let second = self.pop_boolean("Operands of 'and' must be booleans")?;
                    let first = self.pop_boolean("Operands of 'and' must be booleans")?;
                    self.push(Value::Boolean(first && second));
                }
                Op::Or => {
                    let second = self.pop_boolean("Operands of 'or' must be booleans")?;
                    let first = self.pop_boolean("Operands of 'or' must be booleans")?;
                    self.push(Value::Boolean(first || second));
                }

                Op::Equal => {
                    let second = self.pop()?;
                    let first = self.pop()?;
                    let equal = values_equal(&self.heap, first, second);
                    self.push(Value::Boolean(equal));
                }
                Op::NotEqual => {
                    let second = self.pop()?;
                    let first = self.pop()?;
                    let equal = values_equal(&self.heap, first, second);
                    self.push(Value::Boolean(!equal));
                }
                Op::Lt | Op::Le | Op::Gt | Op::Ge => {
                    let second = self.pop()?;
                    let first = self.pop()?;
                    let ordering = self.order(first, second)?;
                    let result = match op {
                        Op::Lt => ordering.is_lt(),
                        Op::Le => ordering.is_le(),
                        Op::Gt => ordering.is_gt(),
                        _ => ordering.is_ge(),
                    };
                    self.push(Value::Boolean(result));
                }

                Op::Jmp => {
                    let address = self.read_address()?;
                    self.frame_mut().ip = address;
                }
                Op::Jmt | Op::Jmf => {
                    let condition = self.pop_boolean("Condition must be a boolean")?;
                    let address = self.read_address()?;
                    if condition == (op == Op::Jmt) {
                        self.frame_mut().ip = address;
                    }
                }
                Op::Jeq | Op::Jne => {
                    let second = self.pop()?;
                    let first = self.pop()?;
                    let address = self.read_address()?;
                    let equal = values_equal(&self.heap, first, second);
                    if equal == (op == Op::Jeq) {
                        self.frame_mut().ip = address;
                    }
                }
                Op::Jlt | Op::Jle | Op::Jgt | Op::Jge => {
                    let second = self.pop()?;
                    let first = self.pop()?;
                    let address = self.read_address()?;
                    let ordering = self.order(first, second)?;
                    let jump = match op {
                        Op::Jlt => ordering.is_lt(),
                        Op::Jle => ordering.is_le(),
                        Op::Jgt => ordering.is_gt(),
                        _ => ordering.is_ge(),
                    };
                    if jump {
                        self.frame_mut().ip = address;
                    }
                }

                Op::Inc1 | Op::Dec1 => {
                    let index = self.read_byte()? as usize;
                    let variables = self.frame().variables().clone();
                    let value = read_var(&variables, index);
                    let Some(n) = value.as_number() else {
                        return Err(RuntimeError::new("Can only increment numbers"));
                    };
                    let delta = if op == Op::Inc1 { 1.0 } else { -1.0 };
                    write_var(&variables, index, Value::Number(n + delta));
                }

                Op::Print => {
                    let value = self.pop()?;
                    println!("> {}", display_value(&self.heap, value, true));
                }

                Op::DictNew => {
                    let obj = self.alloc(ObjKind::Dict(DictObj::new()));
                    self.push(Value::Object(obj));
                }
                Op::DictPut => self.collection_put()?,
                Op::DictGet => {
                    let key = self.pop()?;
                    let receiver = self.pop()?;
                    let value = self.collection_get(receiver, key)?;
                    self.push(value);
                }
                Op::DictPeek => {
                    let key = self.peek(0)?;
                    let receiver = self.peek(1)?;
                    let value = self.collection_get(receiver, key)?;
                    self.push(value);
                }

                Op::Call => self.call()?,
            }
        }
    }

    // ----- operand stack ---------------------------------------------------

    fn push(&mut self, value: Value) {
        if self.stack.len() >= STACK_MAX {
            self.fatal("Stack overflow");
        }
        self.stack.push(value);
    }

    fn pop(&mut self) -> RunResult<Value> {
        self.stack
            .pop()
            .ok_or_else(|| RuntimeError::new("Operand stack underflow"))
    }

    fn peek(&self, depth: usize) -> RunResult<Value> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .and_then(|index| self.stack.get(index).copied())
            .ok_or_else(|| RuntimeError::new("Operand stack underflow"))
    }

    fn pop_boolean(&mut self, message: &str) -> RunResult<bool> {
        match self.pop()? {
            Value::Boolean(b) => Ok(b),
            _ => Err(RuntimeError::new(message)),
        }
    }

    fn pop_numbers(&mut self, message: &str) -> RunResult<(f64, f64)> {
        let second = self.pop()?;
        let first = self.pop()?;
        match (first.as_number(), second.as_number()) {
            (Some(a), Some(b)) => Ok((a, b)),
            _ => Err(RuntimeError::new(message)),
        }
    }

    // ----- instruction decoding --------------------------------------------

    fn frame(&self) -> &RunFrame {
        self.frames.last().expect("no active frame")
    }

    fn frame_mut(&mut self) -> &mut RunFrame {
        self.frames.last_mut().expect("no active frame")
    }

    fn read_byte(&mut self) -> RunResult<u8> {
        let frame = self.frame_mut();
        match frame.code.get(frame.ip).copied() {
            Some(byte) => {
                frame.ip += 1;
                Ok(byte)
            }
            None => Err(RuntimeError::new(
                "Instruction pointer ran off the code buffer",
            )),
        }
    }

    fn read_address(&mut self) -> RunResult<usize> {
        let high = self.read_byte()?;
        let low = self.read_byte()?;
        Ok(((high as usize) << 8) | low as usize)
    }

    fn read_constant(&mut self, wide: bool) -> RunResult<Value> {
        let index = if wide {
            self.read_address()?
        } else {
            self.read_byte()? as usize
        };
        self.frame()
            .constants
            .get(index)
            .copied()
            .ok_or_else(|| RuntimeError::new(format!("Bad constant index {index}")))
    }

    /// Lexical frame operand of `LOAD_OFFSET`/`STORE_OFFSET` (1-based).
    fn read_chain_frame(&mut self) -> RunResult<Variables> {
        let number = self.read_byte()? as usize;
        let chain = &self.frame().chain;
        if number == 0 || number > chain.len() {
            return Err(RuntimeError::new(format!(
                "Invalid frame reference {number}"
            )));
        }
        Ok(chain[number - 1].clone())
    }

    // ----- values and operators --------------------------------------------

    fn order(&self, first: Value, second: Value) -> RunResult<std::cmp::Ordering> {
        compare_values(&self.heap, first, second)
            .ok_or_else(|| RuntimeError::new("Cannot order these values"))
    }

    /// Loading a lambda template creates a closure carrying the current
    /// frame's lexical chain; that chain is what `LOAD_OFFSET` indexes
    /// when the closure is later called, no matter where.
    fn instantiate_lambda(&mut self, value: Value) -> Value {
        let Some(obj) = value.as_object() else {
            return value;
        };
        let (arity, code, constants) = match self.heap.kind(obj) {
            ObjKind::Lambda(template) => (
                template.arity,
                Rc::clone(&template.code),
                Rc::clone(&template.constants),
            ),
            _ => return value,
        };

        let chain = self
            .frames
            .last()
            .map(|frame| frame.chain.clone())
            .unwrap_or_default();
        let closure = self.alloc(ObjKind::Lambda(LambdaObj {
            arity,
            code,
            constants,
            chain,
        }));
        Value::Object(closure)
    }

    /// `ADD` dispatch: numbers add, strings concatenate, a list clones
    /// itself and appends the right operand. Operands stay on the stack
    /// until after the allocation so a collection in the middle cannot
    /// reclaim them.
    fn add(&mut self) -> RunResult {
        let second = self.peek(0)?;
        let first = self.peek(1)?;

        let result = match (first, second) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (Value::Object(a), _) => {
                if let Some(first_bytes) = self.heap.str_bytes(a) {
                    let second_bytes = second
                        .as_object()
                        .and_then(|obj| self.heap.str_bytes(obj))
                        .ok_or_else(|| {
                            RuntimeError::new(
                                "Only strings can be appended to strings. Consider using the 'str' function",
                            )
                        })?;
                    let mut bytes =
                        Vec::with_capacity(first_bytes.len() + second_bytes.len());
                    bytes.extend_from_slice(&first_bytes);
                    bytes.extend_from_slice(&second_bytes);
                    self.alloc_string(&bytes)
                } else {
                    let items = match self.heap.kind(a) {
                        ObjKind::List(items) => items.clone(),
                        _ => return Err(RuntimeError::new("Invalid target for addition")),
                    };
                    let mut items = items;
                    items.push(second);
                    Value::Object(self.alloc(ObjKind::List(items)))
                }
            }
            _ => return Err(RuntimeError::new("Operands must be numbers")),
        };

        self.pop()?;
        self.pop()?;
        self.push(result);
        Ok(())
    }

    fn numeric_binary(&mut self, op: Op) -> RunResult {
        let (first, second) = self.pop_numbers("Operands must be numbers")?;
        let result = match op {
            Op::Sub => first - second,
            Op::Mul => first * second,
            _ => first.powf(second),
        };
        self.push(Value::Number(result));
        Ok(())
    }

    // ----- collections -----------------------------------------------------

    /// `DICT_PUT`: store value under key in the collection that stays on
    /// the stack.
    fn collection_put(&mut self) -> RunResult {
        let value = self.pop()?;
        let key = self.pop()?;
        let receiver = self.peek(0)?;

        let Some(receiver) = receiver.as_object() else {
            return Err(RuntimeError::new(
                "Trying to access an element of a primitive value",
            ));
        };

        enum Target {
            Dict,
            List(usize),
        }

        let target = match self.heap.kind(receiver) {
            ObjKind::Dict(_) => Target::Dict,
            ObjKind::List(items) => Target::List(items.len()),
            _ => return Err(RuntimeError::new("Invalid receiver for set operation")),
        };

        match target {
            Target::Dict => {
                let (key_obj, bytes) = self.dict_key(key)?;
                if let ObjKind::Dict(dict) = self.heap.kind_mut(receiver) {
                    dict.insert(
                        DictKey {
                            obj: key_obj,
                            bytes,
                        },
                        value,
                    );
                }
            }
            Target::List(length) => {
                let index = list_index(key, length)?;
                if let ObjKind::List(items) = self.heap.kind_mut(receiver) {
                    items[index] = value;
                }
            }
        }
        Ok(())
    }

    /// Shared lookup behind `DICT_GET` and `DICT_PEEK`.
    fn collection_get(&self, receiver: Value, key: Value) -> RunResult<Value> {
        let Some(receiver) = receiver.as_object() else {
            return Err(RuntimeError::new(
                "Trying to access an element of a primitive value",
            ));
        };

        match self.heap.kind(receiver) {
            ObjKind::Dict(dict) => {
                let bytes = key
                    .as_object()
                    .and_then(|obj| self.heap.str_bytes(obj))
                    .ok_or_else(|| {
                        RuntimeError::new("Only strings can be used as indices for dictionaries")
                    })?;
                Ok(dict.get(&bytes))
            }
            ObjKind::List(items) => {
                let index = list_index(key, items.len())?;
                Ok(items[index])
            }
            _ => Err(RuntimeError::new("Invalid receiver for get operation")),
        }
    }

    fn dict_key(&self, key: Value) -> RunResult<(ObjRef, Rc<[u8]>)> {
        let obj = key.as_object().ok_or_else(|| {
            RuntimeError::new("Only strings can be used as indices for dictionaries")
        })?;
        let bytes = self.heap.str_bytes(obj).ok_or_else(|| {
            RuntimeError::new("Only strings can be used as indices for dictionaries")
        })?;
        Ok((obj, bytes))
    }

    // ----- calls -----------------------------------------------------------

    fn call(&mut self) -> RunResult {
        let argc = self.read_byte()? as usize;
        if self.stack.len() < argc + 1 {
            return Err(RuntimeError::new("Operand stack underflow"));
        }
        let callee_pos = self.stack.len() - argc - 1;
        let callee = self.stack[callee_pos];

        let Some(obj) = callee.as_object() else {
            return Err(RuntimeError::new("Trying to call a primitive value"));
        };

        enum Callee {
            Native {
                arity: u8,
                id: u16,
            },
            Lambda {
                arity: u8,
                code: Rc<[u8]>,
                constants: Rc<Vec<Value>>,
                chain: Vec<Variables>,
            },
        }

        let callee = match self.heap.kind(obj) {
            ObjKind::Native(native) => Callee::Native {
                arity: native.arity,
                id: native.id,
            },
            ObjKind::Lambda(lambda) => Callee::Lambda {
                arity: lambda.arity,
                code: Rc::clone(&lambda.code),
                constants: Rc::clone(&lambda.constants),
                chain: lambda.chain.clone(),
            },
            _ => return Err(RuntimeError::new("Trying to call a non-callable object")),
        };

        match callee {
            Callee::Native { arity, id } => self.call_native(arity, id, argc, callee_pos),
            Callee::Lambda {
                arity,
                code,
                constants,
                chain,
            } => self.call_lambda(arity, code, constants, chain, argc, callee_pos),
        }
    }

    fn call_native(&mut self, arity: u8, id: u16, argc: usize, callee_pos: usize) -> RunResult {
        if argc != arity as usize {
            return Err(RuntimeError::new(format!(
                "Invalid number of arguments. Expected {arity}, but got {argc}"
            )));
        }

        let args: Vec<Value> = self.stack[callee_pos + 1..].to_vec();
        self.stack.truncate(callee_pos);

        // The arguments just left the stack; pin them (and whatever the
        // native allocates via protect) for the duration of the call.
        let roots_before = self.temp_roots.len();
        self.temp_roots.extend_from_slice(&args);

        let result = match self.natives[id as usize].func {
            NativeFn::Plain(func) => func(&args),
            NativeFn::System(func) => func(&args, self),
        };

        self.temp_roots.truncate(roots_before);

        if self.err_flag {
            self.err_flag = false;
            let message = stringify_value(&self.heap, result);
            return Err(RuntimeError::new(message));
        }

        self.push(result);
        Ok(())
    }

    fn call_lambda(
        &mut self,
        arity: u8,
        code: Rc<[u8]>,
        constants: Rc<Vec<Value>>,
        chain: Vec<Variables>,
        argc: usize,
        callee_pos: usize,
    ) -> RunResult {
        if argc != arity as usize {
            return Err(RuntimeError::new(format!(
                "Invalid number of arguments. Expected {arity}, but got {argc}"
            )));
        }

        let args = self.stack.split_off(callee_pos + 1);

        let mut chain = chain;
        chain.push(new_variables());
        self.frames.push(RunFrame::new(code, constants, chain));

        // Arguments go back in reverse; the callee's store prelude pops
        // them into the parameter slots in declaration order.
        for arg in args.into_iter().rev() {
            self.push(arg);
        }

        let result = self.run();
        self.frames.pop();
        result?;

        let returned = self.pop()?;
        self.stack.truncate(callee_pos);
        self.push(returned);
        Ok(())
    }

    // ----- diagnostics -----------------------------------------------------

    fn trace_instruction(&self) {
        let frame = self.frame();
        if frame.ip >= frame.code.len() {
            return;
        }
        let (line, _) =
            disasm::disassemble_instruction(&self.heap, &frame.code, &frame.constants, frame.ip);
        eprintln!("[depth {} stack {}] {line}", self.frames.len(), self.stack.len());
    }

    /// Unrecoverable error: report, dump the remaining frames, and
    /// leave with the runtime-error exit code.
    fn fatal(&mut self, reason: &str) -> ! {
        eprintln!("{reason}");
        while let Some(frame) = self.frames.pop() {
            eprintln!("  frame #{} at ip {}", self.frames.len() + 1, frame.ip);
        }
        std::process::exit(42);
    }
}

/// Validate a list index: an integral, in-range number.
fn list_index(key: Value, length: usize) -> RunResult<usize> {
    let Value::Number(n) = key else {
        return Err(RuntimeError::new(
            "Only integers can be used as indices for lists",
        ));
    };
    if n.floor() != n {
        return Err(RuntimeError::new(
            "Only integers can be used as indices for lists",
        ));
    }
    if n < 0.0 || n as usize >= length {
        return Err(RuntimeError::new("Index out of bounds"));
    }
    Ok(n as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_index_validation() {
        assert_eq!(list_index(Value::Number(2.0), 3).unwrap(), 2);
        assert_eq!(
            list_index(Value::Number(3.0), 3).unwrap_err().message,
            "Index out of bounds"
        );
        assert_eq!(
            list_index(Value::Number(-1.0), 3).unwrap_err().message,
            "Index out of bounds"
        );
        assert_eq!(
            list_index(Value::Number(1.5), 3).unwrap_err().message,
            "Only integers can be used as indices for lists"
        );
        assert_eq!(
            list_index(Value::Nil, 3).unwrap_err().message,
            "Only integers can be used as indices for lists"
        );
    }

    #[test]
    fn test_global_lookup_on_fresh_vm() {
        let vm = Vm::new(false);
        assert_eq!(vm.global("nope"), None);
    }

    #[test]
    fn test_register_native_reserves_value() {
        let vm = Vm::new(false);
        // The standard library is installed at construction.
        assert_eq!(vm.native_values.len(), 9);
        assert_eq!(&*vm.native_values[0].0, "println");
        assert!(vm.native_values.iter().all(|(_, v)| v.as_object().is_some()));
    }
}
