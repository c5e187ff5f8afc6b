//! The bytecode instruction set.
//!
//! All operands are byte-aligned. Jump operands are absolute 16-bit
//! addresses (big-endian) within a single code buffer; jumps never cross
//! frames. The compiler only ever emits a subset of these: the
//! conditional comparison jumps (`JEQ`..`JGE`) are legacy instructions
//! kept alive in the interpreter and the disassembler.

macro_rules! opcodes {
    ($($(#[$doc:meta])* $name:ident = $mnemonic:literal,)*) => {
        /// One opcode byte.
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum Op {
            $($(#[$doc])* $name,)*
        }

        impl Op {
            const TABLE: &'static [Op] = &[$(Op::$name,)*];

            /// Decode one opcode byte.
            pub fn from_byte(byte: u8) -> Option<Op> {
                Self::TABLE.get(byte as usize).copied()
            }

            /// The mnemonic used by the disassembler.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Op::$name => $mnemonic,)*
                }
            }
        }
    };
}

opcodes! {
    /// No effect
    Nop = "OP_NOP",

    /// Push `true`
    True = "OP_TRUE",
    /// Push `false`
    False = "OP_FALSE",
    /// Push `nil`
    Nil = "OP_NIL",

    /// Add numbers; concatenate strings; append to a cloned list
    Add = "OP_ADD",
    Sub = "OP_SUB",
    Mul = "OP_MUL",
    /// Division by zero is fatal
    Div = "OP_DIV",
    /// Truncates both operands to integers
    Mod = "OP_MOD",
    Pow = "OP_POW",

    /// Strict boolean and (both sides already evaluated)
    And = "OP_AND",
    /// Strict boolean or
    Or = "OP_OR",

    Equal = "OP_EQUAL",
    NotEqual = "OP_NOT_EQUAL",
    Gt = "OP_GT",
    Lt = "OP_LT",
    Ge = "OP_GE",
    Le = "OP_LE",

    /// Push constant; operand: pool index (u8)
    Ldc = "OP_LDC",
    /// Push constant; operand: pool index (u16)
    LdcW = "OP_LDC_W",
    /// Push 0.0
    Ldc0 = "OP_LDC_0",
    /// Push 1.0
    Ldc1 = "OP_LDC_1",

    /// Pop into a variable slot; operand: slot (u8)
    Store = "OP_STORE",
    /// Push a variable slot; operand: slot (u8)
    Load = "OP_LOAD",
    /// Push a slot of an enclosing frame; operands: frame (u8), slot (u8)
    LoadOffset = "OP_LOAD_OFFSET",
    /// Pop into a slot of an enclosing frame; operands: frame (u8), slot (u8)
    StoreOffset = "OP_STORE_OFFSET",
    Dup = "OP_DUP",
    Pop = "OP_POP",

    /// Call the value below the arguments; operand: argument count (u8)
    Call = "OP_CALL",
    Negate = "OP_NEGATE",
    Not = "OP_NOT",

    /// Pop and echo (interactive shell only)
    Print = "OP_PRINT",

    /// Push an empty dictionary
    DictNew = "OP_DICT_NEW",
    /// Pop value and key, store into the collection left on the stack
    DictPut = "OP_DICT_PUT",
    /// Pop key and collection, push the element (or nil)
    DictGet = "OP_DICT_GET",
    /// Like `DICT_GET` but leaves collection and key in place
    DictPeek = "OP_DICT_PEEK",

    /// Unconditional jump; operand: absolute address (u16)
    Jmp = "OP_JMP",
    Jeq = "OP_JEQ",
    /// Pop a boolean, jump if true
    Jmt = "OP_JMT",
    /// Pop a boolean, jump if false
    Jmf = "OP_JMF",
    Jne = "OP_JNE",
    Jlt = "OP_JLT",
    Jle = "OP_JLE",
    Jgt = "OP_JGT",
    Jge = "OP_JGE",

    /// Increment a variable slot in place; operand: slot (u8)
    Inc1 = "OP_INC_1",
    /// Decrement a variable slot in place; operand: slot (u8)
    Dec1 = "OP_DEC_1",

    /// Return the top of stack to the caller
    Return = "OP_RETURN",
}

impl Op {
    /// Total operand bytes following the opcode.
    pub fn operand_bytes(self) -> usize {
        match self {
            Op::Ldc | Op::Store | Op::Load | Op::Call | Op::Inc1 | Op::Dec1 => 1,
            Op::LdcW
            | Op::LoadOffset
            | Op::StoreOffset
            | Op::Jmp
            | Op::Jeq
            | Op::Jmt
            | Op::Jmf
            | Op::Jne
            | Op::Jlt
            | Op::Jle
            | Op::Jgt
            | Op::Jge => 2,
            _ => 0,
        }
    }
}
