//! The single-pass compiler.
//!
//! Recursive descent with precedence climbing, emitting bytecode into
//! the current frame's code buffer as it parses. The frame being emitted
//! into is the top of a stack of [`FrameBuilder`]s: the persistent
//! global frame at the bottom, one builder per in-progress lambda above
//! it. Finished lambdas are wrapped into template objects and dropped
//! into the enclosing frame's constant pool.
//!
//! A [`Session`] carries everything that must survive a shell input:
//! the scope tables, the slot allocator, and the native-declaration
//! bookkeeping.

use std::rc::Rc;

use crispy_core::bytecode::Op;
use crispy_core::frame::FrameBuilder;
use crispy_core::heap::Heap;
use crispy_core::object::{LambdaObj, ObjKind};
use crispy_core::strings::StringInterner;
use crispy_core::value::Value;
use crispy_core::{SCOPES_MAX, disasm};

use crate::error::CompileError;
use crate::scanner::{Scanner, Token, TokenKind};
use crate::variables::{Scope, Variable};

type CompileResult<T = ()> = Result<T, CompileError>;

/// How a statement left the code buffer. Block expressions claim the
/// trailing `POP` of their last statement when (and only when) it was an
/// expression statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StmtEnd {
    ExprPop,
    Other,
}

/// Compiler state that persists across inputs of one VM.
///
/// In file mode a session compiles exactly one unit; in shell mode the
/// global scope, the slot allocator, and the native declarations carry
/// over from line to line.
pub struct Session {
    scopes: Vec<Scope>,
    vars_in_scope: u32,
    /// Pool index and variable slot of each registered native, once
    /// declared.
    native_slots: Option<Vec<(u16, u8)>>,
    /// Set by the VM after the first unit executed successfully; until
    /// then every unit re-emits the native store prelude.
    natives_stored: bool,
}

impl Session {
    pub fn new() -> Self {
        Session {
            scopes: vec![Scope::new()],
            vars_in_scope: 0,
            native_slots: None,
            natives_stored: false,
        }
    }

    /// Look up a name in the global scope.
    pub fn resolve_global(&self, name: &[u8]) -> Option<Variable> {
        self.scopes[0].get(name)
    }

    /// Tell the session that the native store prelude has actually run,
    /// so later units can skip it.
    pub fn confirm_natives(&mut self) {
        self.natives_stored = true;
    }

    fn repair(&mut self) {
        self.scopes.truncate(1);
        self.vars_in_scope = self.scopes[0].len() as u32;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Compile one source unit into `global.code`.
///
/// `natives` lists the host functions to reserve in the global scope
/// (name and the value wrapping the native object); they are declared on
/// first compile and re-stored until [`Session::confirm_natives`]. On
/// error the session's scope stack is restored to the global scope and
/// no bytecode from this unit is observable.
pub fn compile(
    session: &mut Session,
    heap: &mut Heap,
    strings: &mut StringInterner,
    global: &mut FrameBuilder,
    natives: &[(Rc<str>, Value)],
    source: &[u8],
    interactive: bool,
) -> CompileResult {
    let mut scanner = Scanner::new(source);
    let token = scanner.next_token();
    let next = scanner.next_token();

    let mut compiler = Compiler {
        scanner,
        previous: Token {
            kind: TokenKind::Error,
            lexeme: b"",
            line: 1,
        },
        token,
        next,
        session,
        heap,
        strings,
        global,
        lambdas: Vec::new(),
        interactive,
        print_expr: true,
    };

    let result = compiler.run(natives);
    if result.is_err() {
        compiler.session.repair();
    }
    debug_assert!(
        result.is_err() || compiler.lambdas.is_empty(),
        "lambda frames left open after a successful compile"
    );
    result
}

struct Compiler<'src, 'vm> {
    scanner: Scanner<'src>,
    previous: Token<'src>,
    token: Token<'src>,
    next: Token<'src>,
    session: &'vm mut Session,
    heap: &'vm mut Heap,
    strings: &'vm mut StringInterner,
    global: &'vm mut FrameBuilder,
    lambdas: Vec<FrameBuilder>,
    interactive: bool,
    print_expr: bool,
}

impl<'src> Compiler<'src, '_> {
    fn run(&mut self, natives: &[(Rc<str>, Value)]) -> CompileResult {
        if self.token.kind == TokenKind::Error {
            return Err(self.error_at_token());
        }

        if !self.session.natives_stored {
            self.declare_natives(natives)?;
        }

        loop {
            self.stmt()?;
            if self.check(TokenKind::Eof) {
                break;
            }
        }
        self.emit(Op::Return);
        Ok(())
    }

    // ----- token plumbing -------------------------------------------------

    fn advance(&mut self) -> CompileResult {
        self.previous = self.token;
        self.token = self.next;
        self.next = self.scanner.next_token();
        if self.token.kind == TokenKind::Error {
            return Err(self.error_at_token());
        }
        Ok(())
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.token.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> CompileResult<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) -> CompileResult<Token<'src>> {
        if self.check(kind) {
            let token = self.token;
            self.advance()?;
            Ok(token)
        } else {
            Err(self.error(message))
        }
    }

    fn consume_optional(&mut self, kind: TokenKind) -> CompileResult {
        if self.check(kind) {
            self.advance()?;
        }
        Ok(())
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        let line = if self.previous.kind == TokenKind::Error {
            self.token.line
        } else {
            self.previous.line
        };
        CompileError::new(line, message)
    }

    fn error_at_token(&self) -> CompileError {
        CompileError::new(
            self.token.line,
            String::from_utf8_lossy(self.token.lexeme).into_owned(),
        )
    }

    // ----- emission -------------------------------------------------------

    fn frame(&mut self) -> &mut FrameBuilder {
        match self.lambdas.last_mut() {
            Some(frame) => frame,
            None => &mut *self.global,
        }
    }

    /// 1-based number of the frame being compiled.
    fn frame_count(&self) -> u8 {
        (1 + self.lambdas.len()) as u8
    }

    fn emit(&mut self, op: Op) {
        self.frame().emit(op as u8);
    }

    fn emit_byte(&mut self, op: Op, arg: u8) {
        let frame = self.frame();
        frame.emit(op as u8);
        frame.emit(arg);
    }

    fn emit_pair(&mut self, op: Op, first: u8, second: u8) {
        let frame = self.frame();
        frame.emit(op as u8);
        frame.emit(first);
        frame.emit(second);
    }

    fn add_constant(&mut self, value: Value) -> CompileResult<u16> {
        match self.frame().add_constant(value) {
            Some(index) => Ok(index),
            None => Err(self.error("Too many constants")),
        }
    }

    fn emit_constant_at(&mut self, index: u16) {
        if index > u8::MAX as u16 {
            self.emit_pair(Op::LdcW, (index >> 8) as u8, (index & 0xFF) as u8);
        } else {
            self.emit_byte(Op::Ldc, index as u8);
        }
    }

    fn emit_constant(&mut self, value: Value) -> CompileResult {
        let index = self.add_constant(value)?;
        self.emit_constant_at(index);
        Ok(())
    }

    /// Emit a jump with a placeholder operand; returns the patch site.
    fn emit_jump(&mut self, op: Op) -> usize {
        self.emit_pair(op, 0xFF, 0xFF);
        self.frame().code.len() - 2
    }

    fn patch_jump_to(&mut self, site: usize, address: usize) -> CompileResult {
        if address > u16::MAX as usize {
            return Err(self.error("Jump too big"));
        }
        let code = &mut self.frame().code;
        code[site] = (address >> 8) as u8;
        code[site + 1] = (address & 0xFF) as u8;
        Ok(())
    }

    fn patch_jump(&mut self, site: usize) -> CompileResult {
        let address = self.frame().code.len();
        self.patch_jump_to(site, address)
    }

    // ----- scopes and variables -------------------------------------------

    fn open_scope(&mut self) -> CompileResult {
        if self.session.scopes.len() >= SCOPES_MAX {
            return Err(self.error("Too many nested scopes"));
        }
        self.session.scopes.push(Scope::new());
        Ok(())
    }

    fn close_scope(&mut self) {
        let scope = self.session.scopes.pop().expect("scope stack underflow");
        self.session.vars_in_scope -= scope.len() as u32;
    }

    fn resolve(&self, name: &[u8]) -> Option<Variable> {
        self.session
            .scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
    }

    fn resolve_or_err(&self, token: Token<'_>) -> CompileResult<Variable> {
        self.resolve(token.lexeme).ok_or_else(|| {
            self.error(format!(
                "Could not find variable with name {}",
                String::from_utf8_lossy(token.lexeme)
            ))
        })
    }

    fn declare_var(&mut self, name: &[u8], assignable: bool) -> CompileResult<Variable> {
        if self.session.vars_in_scope > u8::MAX as u32 {
            return Err(self.error("Too many variables in scope"));
        }
        let variable = Variable {
            index: self.session.vars_in_scope as u8,
            frame: self.frame_count(),
            assignable,
        };
        self.session.vars_in_scope += 1;
        self.session
            .scopes
            .last_mut()
            .expect("scope stack underflow")
            .insert(name, variable);
        Ok(variable)
    }

    fn define_var(&mut self, token: Token<'_>) -> CompileResult {
        let variable = self.resolve_or_err(token)?;
        self.emit_byte(Op::Store, variable.index);
        Ok(())
    }

    /// Reserve the registered natives in the global scope and emit the
    /// prelude that stores each native object into its slot.
    fn declare_natives(&mut self, natives: &[(Rc<str>, Value)]) -> CompileResult {
        if self.session.native_slots.is_none() {
            let mut slots = Vec::with_capacity(natives.len());
            for (name, value) in natives {
                let pool = self.add_constant(*value)?;
                let variable = self.declare_var(name.as_bytes(), false)?;
                slots.push((pool, variable.index));
            }
            self.session.native_slots = Some(slots);
        }

        let slots = self.session.native_slots.clone().unwrap_or_default();
        for (pool, slot) in slots {
            self.emit_constant_at(pool);
            self.emit_byte(Op::Store, slot);
        }
        Ok(())
    }

    // ----- statements -----------------------------------------------------

    fn stmt(&mut self) -> CompileResult<StmtEnd> {
        match self.token.kind {
            TokenKind::While => {
                self.print_expr = false;
                self.while_stmt()?;
                Ok(StmtEnd::Other)
            }
            TokenKind::OpenBrace => self.block_stmt(),
            TokenKind::Return => {
                if self.frame_count() <= 1 {
                    return Err(self.error("Cannot return from global scope"));
                }
                self.print_expr = false;
                self.advance()?;

                if !self.check(TokenKind::Semicolon) {
                    self.expr()?;
                    self.consume_optional(TokenKind::Semicolon)?;
                } else {
                    self.advance()?;
                    self.emit(Op::Nil);
                }
                self.emit(Op::Return);
                Ok(StmtEnd::Other)
            }
            TokenKind::Eof => {
                self.print_expr = false;
                Ok(StmtEnd::Other)
            }
            _ => self.simple_stmt(),
        }
    }

    fn simple_stmt(&mut self) -> CompileResult<StmtEnd> {
        match self.token.kind {
            TokenKind::Var => {
                self.print_expr = false;
                self.var_decl(true)?;
                Ok(StmtEnd::Other)
            }
            TokenKind::Val => {
                self.print_expr = false;
                self.var_decl(false)?;
                Ok(StmtEnd::Other)
            }
            _ => self.expr_stmt(),
        }
    }

    fn var_decl(&mut self, assignable: bool) -> CompileResult {
        self.advance()?;
        let message = if assignable {
            "Expected variable name after 'var'"
        } else {
            "Expected variable name after 'val'"
        };
        let identifier = self.consume(TokenKind::Identifier, message)?;

        let current = self.session.scopes.last().expect("scope stack underflow");
        if current.get(identifier.lexeme).is_some() {
            return Err(self.error(if assignable {
                "Cannot redeclare variable"
            } else {
                "Cannot redeclare value"
            }));
        }

        self.declare_var(identifier.lexeme, assignable)?;

        self.consume(TokenKind::Equals, "Expected '=' after variable name")?;
        self.expr()?;
        self.consume_optional(TokenKind::Semicolon)?;

        self.define_var(identifier)
    }

    fn expr_stmt(&mut self) -> CompileResult<StmtEnd> {
        self.expr()?;

        let end = if self.interactive && self.print_expr {
            self.print_expr = false;
            self.emit(Op::Print);
            StmtEnd::Other
        } else {
            self.emit(Op::Pop);
            StmtEnd::ExprPop
        };

        self.consume_optional(TokenKind::Semicolon)?;
        Ok(end)
    }

    fn while_stmt(&mut self) -> CompileResult {
        self.advance()?;
        let start = self.frame().code.len();
        self.expr()?;

        let exit_jump = self.emit_jump(Op::Jmf);
        self.block_stmt()?;

        let to_start = self.emit_jump(Op::Jmp);
        self.patch_jump_to(to_start, start)?;
        self.patch_jump(exit_jump)
    }

    fn block_stmt(&mut self) -> CompileResult<StmtEnd> {
        self.consume(TokenKind::OpenBrace, "Expected '{'")?;

        // Empty braces, or a first entry of the form `key:`, make this a
        // dictionary literal rather than a block.
        if self.check(TokenKind::CloseBrace) || self.next.kind == TokenKind::Colon {
            self.dict_expr()?;
            let end = if self.interactive && self.print_expr {
                self.print_expr = false;
                self.emit(Op::Print);
                StmtEnd::Other
            } else {
                self.emit(Op::Pop);
                StmtEnd::ExprPop
            };
            self.consume_optional(TokenKind::Semicolon)?;
            return Ok(end);
        }

        self.print_expr = false;
        self.open_scope()?;
        while !self.check(TokenKind::CloseBrace) && !self.check(TokenKind::Eof) {
            self.stmt()?;
        }
        self.close_scope();
        self.consume(TokenKind::CloseBrace, "Expected '}' after block")?;
        Ok(StmtEnd::Other)
    }

    // ----- expressions ----------------------------------------------------

    fn expr(&mut self) -> CompileResult {
        match self.token.kind {
            TokenKind::Fun => self.lambda(),
            TokenKind::OpenBrace => self.block_expr(),
            TokenKind::If => self.if_expr(),
            TokenKind::Identifier => self.assignment(),
            _ => self.logic_or(),
        }
    }

    fn lambda(&mut self) -> CompileResult {
        self.advance()?;

        self.open_scope()?;
        self.lambdas.push(FrameBuilder::new());

        let mut arity: u16 = 0;
        if !self.check(TokenKind::Arrow) {
            loop {
                let param = self.consume(TokenKind::Identifier, "Expected parameter name")?;
                self.declare_var(param.lexeme, true)?;
                self.define_var(param)?;
                arity += 1;
                if !self.matches(TokenKind::Comma)? {
                    break;
                }
            }
        }
        if arity > u8::MAX as u16 {
            return Err(self.error("Too many parameters. A lambda may only have 255 parameters"));
        }

        self.consume(TokenKind::Arrow, "Expected '->' after parameter list")?;

        // Drop the lambda object itself from the callee's stack.
        self.emit(Op::Pop);
        self.expr()?;
        self.emit(Op::Return);

        let builder = self.lambdas.pop().expect("lambda frame stack underflow");
        let code: Rc<[u8]> = builder.code.into();
        let constants = Rc::new(builder.constants);

        if tracing::enabled!(target: "crispy::disasm", tracing::Level::DEBUG) {
            tracing::debug!(
                target: "crispy::disasm",
                "\n{}",
                disasm::disassemble(self.heap, "lambda", &code, &constants)
            );
        }

        let lambda = self.heap.alloc(ObjKind::Lambda(LambdaObj {
            arity: arity as u8,
            code,
            constants,
            chain: Vec::new(),
        }));
        self.emit_constant(Value::Object(lambda))?;

        self.close_scope();
        Ok(())
    }

    fn block_expr(&mut self) -> CompileResult {
        self.consume(TokenKind::OpenBrace, "Expected '{'")?;

        if self.check(TokenKind::CloseBrace) || self.next.kind == TokenKind::Colon {
            return self.dict_expr();
        }

        self.print_expr = false;
        self.open_scope()?;

        let mut last = StmtEnd::Other;
        while !self.check(TokenKind::CloseBrace) && !self.check(TokenKind::Eof) {
            last = self.stmt()?;
        }

        // The block's value is its trailing expression; reclaim that
        // expression's POP. A block that ends in any other statement
        // evaluates to nil.
        if last == StmtEnd::ExprPop {
            self.frame().code.pop();
        } else {
            self.emit(Op::Nil);
        }

        self.close_scope();
        self.consume(TokenKind::CloseBrace, "Expected '}' after block")?;
        Ok(())
    }

    fn if_expr(&mut self) -> CompileResult {
        self.advance()?;
        self.expr()?;

        let false_jump = self.emit_jump(Op::Jmf);
        self.block_expr()?;

        let exit_jump = self.emit_jump(Op::Jmp);
        self.patch_jump(false_jump)?;

        if self.check(TokenKind::Else) {
            self.advance()?;
            if self.check(TokenKind::If) {
                self.if_expr()?;
            } else {
                self.block_expr()?;
            }
        } else {
            self.emit(Op::Nil);
        }
        self.patch_jump(exit_jump)
    }

    fn dict_expr(&mut self) -> CompileResult {
        self.emit(Op::DictNew);

        if !self.check(TokenKind::CloseBrace) && !self.check(TokenKind::Eof) {
            loop {
                match self.token.kind {
                    TokenKind::Str => self.string_constant(true)?,
                    TokenKind::Identifier => self.string_constant(false)?,
                    _ => return Err(self.error("Expected key in dictionary literal")),
                }
                self.advance()?;
                self.consume(
                    TokenKind::Colon,
                    "Expected ':' between key and value in dictionary",
                )?;
                self.expr()?;
                self.emit(Op::DictPut);

                if !self.matches(TokenKind::Comma)? {
                    break;
                }
            }
        }

        self.consume(TokenKind::CloseBrace, "Expected '}' after dictionary literal")?;
        Ok(())
    }

    fn assignment(&mut self) -> CompileResult {
        self.logic_or()?;
        let identifier = self.previous;

        if self.check(TokenKind::Equals) {
            self.emit(Op::Pop);
            self.advance()?;
            self.expr()?;

            let variable = self.resolve_or_err(identifier)?;
            if !variable.assignable {
                return Err(self.error("Cannot reassign val"));
            }

            self.emit(Op::Dup);
            if variable.frame != self.frame_count() {
                self.emit_pair(Op::StoreOffset, variable.frame, variable.index);
            } else {
                self.emit_byte(Op::Store, variable.index);
            }
        }
        Ok(())
    }

    fn logic_or(&mut self) -> CompileResult {
        self.logic_and()?;
        while self.matches(TokenKind::Or)? {
            self.logic_and()?;
            self.emit(Op::Or);
        }
        Ok(())
    }

    fn logic_and(&mut self) -> CompileResult {
        self.equality()?;
        while self.matches(TokenKind::And)? {
            self.equality()?;
            self.emit(Op::And);
        }
        Ok(())
    }

    fn equality(&mut self) -> CompileResult {
        self.comparison()?;
        loop {
            let op = match self.token.kind {
                TokenKind::EqualsEquals => Op::Equal,
                TokenKind::BangEquals => Op::NotEqual,
                _ => break,
            };
            self.advance()?;
            self.comparison()?;
            self.emit(op);
        }
        Ok(())
    }

    fn comparison(&mut self) -> CompileResult {
        self.arith_expr()?;
        loop {
            let op = match self.token.kind {
                TokenKind::Smaller => Op::Lt,
                TokenKind::SmallerEquals => Op::Le,
                TokenKind::Greater => Op::Gt,
                TokenKind::GreaterEquals => Op::Ge,
                _ => break,
            };
            self.advance()?;
            self.arith_expr()?;
            self.emit(op);
        }
        Ok(())
    }

    fn arith_expr(&mut self) -> CompileResult {
        self.term()?;
        loop {
            let op = match self.token.kind {
                TokenKind::Plus => Op::Add,
                TokenKind::Minus => Op::Sub,
                _ => break,
            };
            self.advance()?;
            self.term()?;
            self.emit(op);
        }
        Ok(())
    }

    fn term(&mut self) -> CompileResult {
        self.factor()?;
        loop {
            let op = match self.token.kind {
                TokenKind::Star => Op::Mul,
                TokenKind::Slash => Op::Div,
                TokenKind::Percent => Op::Mod,
                TokenKind::StarStar => Op::Pow,
                _ => break,
            };
            self.advance()?;
            self.factor()?;
            self.emit(op);
        }
        Ok(())
    }

    fn factor(&mut self) -> CompileResult {
        match self.token.kind {
            TokenKind::Bang => {
                self.advance()?;
                self.factor()?;
                self.emit(Op::Not);
            }
            TokenKind::Minus => {
                self.advance()?;
                self.factor()?;
                self.emit(Op::Negate);
            }
            _ => self.primary_expr()?,
        }
        Ok(())
    }

    fn primary_expr(&mut self) -> CompileResult {
        self.primary()?;

        loop {
            if self.matches(TokenKind::OpenParen)? {
                let mut args: u16 = 0;
                if !self.matches(TokenKind::CloseParen)? {
                    loop {
                        self.expr()?;
                        args += 1;
                        if !self.matches(TokenKind::Comma)? {
                            break;
                        }
                    }
                    self.consume(TokenKind::CloseParen, "Expected ')' after argument list")?;
                }
                if args > u8::MAX as u16 {
                    return Err(self.error("Too many arguments"));
                }
                self.emit_byte(Op::Call, args as u8);
            } else if self.matches(TokenKind::Dot)? {
                if !self.check(TokenKind::Identifier) {
                    return Err(self.error("Expected identifier after '.'"));
                }
                self.string_constant(false)?;
                self.advance()?;
                self.collection_access()?;
            } else if self.matches(TokenKind::OpenBracket)? {
                self.expr()?;
                self.consume(TokenKind::CloseBracket, "Expected ']' after expression")?;
                self.collection_access()?;
            } else {
                break;
            }
        }
        Ok(())
    }

    /// With collection and key on the stack, compile the access that
    /// follows: assignment, in-place increment or decrement, or a plain
    /// read.
    fn collection_access(&mut self) -> CompileResult {
        match self.token.kind {
            TokenKind::Equals => {
                self.advance()?;
                self.expr()?;
                self.emit(Op::DictPut);
            }
            TokenKind::PlusPlus => {
                self.advance()?;
                self.emit(Op::DictPeek);
                self.emit(Op::Ldc1);
                self.emit(Op::Add);
                self.emit(Op::DictPut);
            }
            TokenKind::MinusMinus => {
                self.advance()?;
                self.emit(Op::DictPeek);
                self.emit(Op::Ldc1);
                self.emit(Op::Sub);
                self.emit(Op::DictPut);
            }
            _ => self.emit(Op::DictGet),
        }
        Ok(())
    }

    fn primary(&mut self) -> CompileResult {
        match self.token.kind {
            TokenKind::Number => {
                let lexeme = self.token.lexeme;
                if lexeme == b"0" {
                    self.emit(Op::Ldc0);
                } else if lexeme == b"1" {
                    self.emit(Op::Ldc1);
                } else {
                    let number: f64 = std::str::from_utf8(lexeme)
                        .ok()
                        .and_then(|text| text.parse().ok())
                        .ok_or_else(|| self.error("Invalid number literal"))?;
                    self.emit_constant(Value::Number(number))?;
                }
                self.advance()
            }
            TokenKind::OpenParen => {
                self.advance()?;
                self.expr()?;
                if !self.check(TokenKind::CloseParen) {
                    return Err(self.error("Expected ')'"));
                }
                self.advance()
            }
            TokenKind::Identifier => {
                let identifier = self.token;
                let variable = self.resolve_or_err(identifier)?;
                if variable.frame != self.frame_count() {
                    self.emit_pair(Op::LoadOffset, variable.frame, variable.index);
                } else {
                    self.emit_byte(Op::Load, variable.index);
                }
                self.advance()?;

                if self.check(TokenKind::PlusPlus) || self.check(TokenKind::MinusMinus) {
                    let increment = self.token.kind == TokenKind::PlusPlus;
                    self.advance()?;

                    if !variable.assignable {
                        return Err(self.error("Cannot increment value"));
                    }

                    if variable.frame == self.frame_count() {
                        let op = if increment { Op::Inc1 } else { Op::Dec1 };
                        self.emit_byte(op, variable.index);
                    } else {
                        self.emit(Op::Dup);
                        self.emit(Op::Ldc1);
                        self.emit(if increment { Op::Add } else { Op::Sub });
                        self.emit_pair(Op::StoreOffset, variable.frame, variable.index);
                    }
                }
                Ok(())
            }
            TokenKind::Str => {
                self.string_constant(true)?;
                self.advance()
            }
            TokenKind::True => {
                self.emit(Op::True);
                self.advance()
            }
            TokenKind::False => {
                self.emit(Op::False);
                self.advance()
            }
            TokenKind::Nil => {
                self.emit(Op::Nil);
                self.advance()
            }
            _ => Err(self.error("Expected expression")),
        }
    }

    /// Intern the current token as a string and emit a load of it.
    /// `quoted` strips the surrounding quote bytes of a string literal.
    fn string_constant(&mut self, quoted: bool) -> CompileResult {
        let lexeme = self.token.lexeme;
        let bytes = if quoted {
            &lexeme[1..lexeme.len() - 1]
        } else {
            lexeme
        };
        let obj = self.strings.intern(self.heap, bytes);
        self.emit_constant(Value::Object(obj))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crispy_core::INITIAL_GC_THRESHOLD;
    use pretty_assertions::assert_eq;

    struct Fixture {
        session: Session,
        heap: Heap,
        strings: StringInterner,
        global: FrameBuilder,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                session: Session::new(),
                heap: Heap::new(INITIAL_GC_THRESHOLD),
                strings: StringInterner::new(),
                global: FrameBuilder::new(),
            }
        }

        fn compile(&mut self, source: &str) -> CompileResult {
            self.global.code.clear();
            compile(
                &mut self.session,
                &mut self.heap,
                &mut self.strings,
                &mut self.global,
                &[],
                source.as_bytes(),
                false,
            )
        }

        fn compile_interactive(&mut self, source: &str) -> CompileResult {
            self.global.code.clear();
            compile(
                &mut self.session,
                &mut self.heap,
                &mut self.strings,
                &mut self.global,
                &[],
                source.as_bytes(),
                true,
            )
        }
    }

    fn assert_compile_error(source: &str, message: &str) {
        let mut fixture = Fixture::new();
        let err = fixture.compile(source).unwrap_err();
        assert_eq!(err.message, message, "for source {source:?}");
    }

    #[test]
    fn test_arithmetic_bytecode() {
        let mut fixture = Fixture::new();
        fixture.compile("1 + 2 * 3;").unwrap();
        assert_eq!(
            fixture.global.code,
            vec![
                Op::Ldc1 as u8,
                Op::Ldc as u8,
                0,
                Op::Ldc as u8,
                1,
                Op::Mul as u8,
                Op::Add as u8,
                Op::Pop as u8,
                Op::Return as u8,
            ]
        );
        assert_eq!(
            fixture.global.constants,
            vec![Value::Number(2.0), Value::Number(3.0)]
        );
    }

    #[test]
    fn test_while_loop_jumps_back_to_condition() {
        let mut fixture = Fixture::new();
        fixture.compile("var i = 0; while i < 3 { i = i + 1; }").unwrap();
        assert_eq!(
            fixture.global.code,
            vec![
                Op::Ldc0 as u8,              // 0000 initializer
                Op::Store as u8, 0,          // 0001
                Op::Load as u8, 0,           // 0003 condition starts here
                Op::Ldc as u8, 0,            // 0005
                Op::Lt as u8,                // 0007
                Op::Jmf as u8, 0, 25,        // 0008 exit
                Op::Load as u8, 0,           // 0011 body: i = i + 1
                Op::Pop as u8,               // 0013
                Op::Load as u8, 0,           // 0014
                Op::Ldc1 as u8,              // 0016
                Op::Add as u8,               // 0017
                Op::Dup as u8,               // 0018
                Op::Store as u8, 0,          // 0019
                Op::Pop as u8,               // 0021
                Op::Jmp as u8, 0, 3,         // 0022 back to the condition
                Op::Return as u8,            // 0025
            ]
        );
    }

    #[test]
    fn test_if_else_patches_both_jumps() {
        let mut fixture = Fixture::new();
        fixture.compile("if true { 2; } else { 3; };").unwrap();
        assert_eq!(
            fixture.global.code,
            vec![
                Op::True as u8,        // 0000
                Op::Jmf as u8, 0, 9,   // 0001 to the else branch
                Op::Ldc as u8, 0,      // 0004 then value
                Op::Jmp as u8, 0, 11,  // 0006 over the else branch
                Op::Ldc as u8, 1,      // 0009 else value
                Op::Pop as u8,         // 0011 expression statement
                Op::Return as u8,      // 0012
            ]
        );
    }

    #[test]
    fn test_lambda_template_and_parameter_slots() {
        let mut fixture = Fixture::new();
        fixture.compile("val f = fun x -> x;").unwrap();

        // Global code stores the lambda constant into f's slot.
        assert_eq!(
            fixture.global.code,
            vec![
                Op::Ldc as u8,
                0,
                Op::Store as u8,
                0,
                Op::Return as u8,
            ]
        );

        let lambda = fixture.global.constants[0].as_object().unwrap();
        match fixture.heap.kind(lambda) {
            ObjKind::Lambda(l) => {
                assert_eq!(l.arity, 1);
                assert!(l.chain.is_empty());
                // f occupies slot 0, the parameter x slot 1.
                assert_eq!(
                    l.code.as_ref(),
                    &[
                        Op::Store as u8,
                        1,
                        Op::Pop as u8,
                        Op::Load as u8,
                        1,
                        Op::Return as u8,
                    ]
                );
            }
            other => panic!("expected lambda, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_lambda_reaches_enclosing_frame_by_offset() {
        let mut fixture = Fixture::new();
        fixture.compile("val make = fun x -> fun y -> x + y;").unwrap();

        let outer = fixture.global.constants[0].as_object().unwrap();
        let inner = match fixture.heap.kind(outer) {
            ObjKind::Lambda(l) => l.constants[0].as_object().unwrap(),
            other => panic!("expected lambda, got {other:?}"),
        };

        match fixture.heap.kind(inner) {
            ObjKind::Lambda(l) => {
                assert_eq!(
                    l.code.as_ref(),
                    &[
                        Op::Store as u8,
                        2,
                        Op::Pop as u8,
                        // x lives in frame 2 (make's frame), slot 1.
                        Op::LoadOffset as u8,
                        2,
                        1,
                        Op::Load as u8,
                        2,
                        Op::Add as u8,
                        Op::Return as u8,
                    ]
                );
            }
            other => panic!("expected lambda, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_braces_compile_to_dict() {
        let mut fixture = Fixture::new();
        fixture.compile("{};").unwrap();
        assert_eq!(
            fixture.global.code,
            vec![Op::DictNew as u8, Op::Pop as u8, Op::Return as u8]
        );
    }

    #[test]
    fn test_dict_literal_with_string_and_identifier_keys() {
        let mut fixture = Fixture::new();
        fixture.compile("{ \"a\": 1, b: 2 };").unwrap();
        assert_eq!(
            fixture.global.code,
            vec![
                Op::DictNew as u8,
                Op::Ldc as u8, 0,
                Op::Ldc1 as u8,
                Op::DictPut as u8,
                Op::Ldc as u8, 1,
                Op::Ldc as u8, 2,
                Op::DictPut as u8,
                Op::Pop as u8,
                Op::Return as u8,
            ]
        );
        // Key constants are interned strings with the exact bytes.
        let a = fixture.global.constants[0].as_object().unwrap();
        let b = fixture.global.constants[1].as_object().unwrap();
        assert_eq!(fixture.heap.str_bytes(a).unwrap().as_ref(), b"a");
        assert_eq!(fixture.heap.str_bytes(b).unwrap().as_ref(), b"b");
    }

    #[test]
    fn test_dict_access_forms() {
        let mut fixture = Fixture::new();
        fixture
            .compile("val d = {}; d.k = 1; d[\"k\"]; d.k++;")
            .unwrap();
        let code = &fixture.global.code;
        let count = |op: Op| code.iter().filter(|&&b| b == op as u8).count();
        assert_eq!(count(Op::DictPut), 2);
        assert_eq!(count(Op::DictGet), 1);
        assert_eq!(count(Op::DictPeek), 1);
    }

    #[test]
    fn test_repeated_literals_share_one_object() {
        let mut fixture = Fixture::new();
        fixture.compile("\"x\"; \"x\";").unwrap();
        assert_eq!(fixture.global.constants[0], fixture.global.constants[1]);
    }

    #[test]
    fn test_postfix_increment() {
        let mut fixture = Fixture::new();
        fixture.compile("var x = 1; x++;").unwrap();
        assert_eq!(
            fixture.global.code,
            vec![
                Op::Ldc1 as u8,
                Op::Store as u8, 0,
                Op::Load as u8, 0,
                Op::Inc1 as u8, 0,
                Op::Pop as u8,
                Op::Return as u8,
            ]
        );
    }

    #[test]
    fn test_interactive_top_level_expression_prints() {
        let mut fixture = Fixture::new();
        fixture.compile_interactive("1 + 2").unwrap();
        assert_eq!(
            fixture.global.code,
            vec![
                Op::Ldc1 as u8,
                Op::Ldc as u8,
                0,
                Op::Add as u8,
                Op::Print as u8,
                Op::Return as u8,
            ]
        );
    }

    #[test]
    fn test_interactive_declaration_does_not_print() {
        let mut fixture = Fixture::new();
        fixture.compile_interactive("var x = 2").unwrap();
        assert!(!fixture.global.code.contains(&(Op::Print as u8)));
    }

    #[test]
    fn test_return_without_value_yields_nil() {
        let mut fixture = Fixture::new();
        fixture.compile("val f = fun -> { return\n };").unwrap();
        let lambda = fixture.global.constants[0].as_object().unwrap();
        match fixture.heap.kind(lambda) {
            ObjKind::Lambda(l) => {
                assert_eq!(
                    l.code.as_ref(),
                    &[
                        Op::Pop as u8,
                        Op::Nil as u8,
                        Op::Return as u8,
                        // The block itself still produces a value.
                        Op::Nil as u8,
                        Op::Return as u8,
                    ]
                );
            }
            other => panic!("expected lambda, got {other:?}"),
        }
    }

    #[test]
    fn test_error_reassign_val() {
        assert_compile_error("val x = 1; x = 2;", "Cannot reassign val");
    }

    #[test]
    fn test_error_increment_val() {
        assert_compile_error("val x = 1; x++;", "Cannot increment value");
    }

    #[test]
    fn test_error_redeclaration() {
        assert_compile_error("var x = 1; var x = 2;", "Cannot redeclare variable");
        assert_compile_error("val x = 1; val x = 2;", "Cannot redeclare value");
    }

    #[test]
    fn test_error_unknown_variable() {
        assert_compile_error("y;", "Could not find variable with name y");
    }

    #[test]
    fn test_error_return_at_global_scope() {
        assert_compile_error("return 1;", "Cannot return from global scope");
    }

    #[test]
    fn test_error_unterminated_string() {
        let mut fixture = Fixture::new();
        let err = fixture.compile("\"abc").unwrap_err();
        assert_eq!(err.to_string(), "[Line 1] Unterminated String");
    }

    #[test]
    fn test_error_expected_expression() {
        assert_compile_error("1 + ;", "Expected expression");
    }

    #[test]
    fn test_error_too_many_variables() {
        let mut source = String::new();
        for i in 0..=256 {
            source.push_str(&format!("var v{i} = 0; "));
        }
        let mut fixture = Fixture::new();
        let err = fixture.compile(&source).unwrap_err();
        assert_eq!(err.message, "Too many variables in scope");

        // 256 declarations (slots 0..=255) still fit.
        let mut fixture = Fixture::new();
        let source: String = (0..256).map(|i| format!("var v{i} = 0; ")).collect();
        fixture.compile(&source).unwrap();
    }

    #[test]
    fn test_error_jump_too_big() {
        let mut source = String::from("var x = 0; while x < 1 { ");
        for _ in 0..7000 {
            source.push_str("x = x + 1; ");
        }
        source.push('}');
        let mut fixture = Fixture::new();
        let err = fixture.compile(&source).unwrap_err();
        assert_eq!(err.message, "Jump too big");
    }

    #[test]
    fn test_session_recovers_after_error() {
        let mut fixture = Fixture::new();
        fixture.compile("val x = 1; { var y = 2; z; }").unwrap_err();
        // The failed unit's inner scope is gone; the next one compiles.
        fixture.compile("var a = 5; a;").unwrap();
    }

    #[test]
    fn test_natives_are_reserved_and_redeclaration_fails() {
        let mut fixture = Fixture::new();
        let obj = fixture.heap.alloc(ObjKind::List(Vec::new()));
        let natives = vec![(Rc::from("probe"), Value::Object(obj))];

        fixture.global.code.clear();
        compile(
            &mut fixture.session,
            &mut fixture.heap,
            &mut fixture.strings,
            &mut fixture.global,
            &natives,
            b"probe;",
            false,
        )
        .unwrap();

        assert_eq!(
            fixture.global.code,
            vec![
                Op::Ldc as u8, 0,
                Op::Store as u8, 0,
                Op::Load as u8, 0,
                Op::Pop as u8,
                Op::Return as u8,
            ]
        );
        assert!(fixture.session.resolve_global(b"probe").is_some());

        fixture.global.code.clear();
        let err = compile(
            &mut fixture.session,
            &mut fixture.heap,
            &mut fixture.strings,
            &mut fixture.global,
            &natives,
            b"var probe = 1;",
            false,
        )
        .unwrap_err();
        assert_eq!(err.message, "Cannot redeclare variable");
    }

    #[test]
    fn test_native_prelude_skipped_after_confirmation() {
        let mut fixture = Fixture::new();
        let obj = fixture.heap.alloc(ObjKind::List(Vec::new()));
        let natives = vec![(Rc::from("probe"), Value::Object(obj))];

        fixture.global.code.clear();
        compile(
            &mut fixture.session,
            &mut fixture.heap,
            &mut fixture.strings,
            &mut fixture.global,
            &natives,
            b"1;",
            false,
        )
        .unwrap();
        assert!(fixture.global.code.starts_with(&[Op::Ldc as u8, 0]));

        fixture.session.confirm_natives();
        fixture.global.code.clear();
        compile(
            &mut fixture.session,
            &mut fixture.heap,
            &mut fixture.strings,
            &mut fixture.global,
            &natives,
            b"1;",
            false,
        )
        .unwrap();
        assert_eq!(
            fixture.global.code,
            vec![Op::Ldc1 as u8, Op::Pop as u8, Op::Return as u8]
        );
    }

    #[test]
    fn test_block_value_is_last_expression() {
        let mut fixture = Fixture::new();
        fixture.compile("val x = { 1; 2 };").unwrap();
        assert_eq!(
            fixture.global.code,
            vec![
                Op::Ldc1 as u8,
                Op::Pop as u8,
                Op::Ldc as u8, 0,
                Op::Store as u8, 0,
                Op::Return as u8,
            ]
        );
    }

    #[test]
    fn test_block_ending_in_declaration_is_nil() {
        let mut fixture = Fixture::new();
        fixture.compile("val x = { var y = 1; };").unwrap();
        assert_eq!(
            fixture.global.code,
            vec![
                Op::Ldc1 as u8,
                Op::Store as u8, 1,
                Op::Nil as u8,
                Op::Store as u8, 0,
                Op::Return as u8,
            ]
        );
    }

    #[test]
    fn test_strict_logic_operators_emit_and_or() {
        let mut fixture = Fixture::new();
        fixture.compile("true and false or true;").unwrap();
        assert_eq!(
            fixture.global.code,
            vec![
                Op::True as u8,
                Op::False as u8,
                Op::And as u8,
                Op::True as u8,
                Op::Or as u8,
                Op::Pop as u8,
                Op::Return as u8,
            ]
        );
    }

    #[test]
    fn test_power_operator() {
        let mut fixture = Fixture::new();
        fixture.compile("2 ** 3;").unwrap();
        assert_eq!(
            fixture.global.code,
            vec![
                Op::Ldc as u8, 0,
                Op::Ldc as u8, 1,
                Op::Pow as u8,
                Op::Pop as u8,
                Op::Return as u8,
            ]
        );
    }
}
