//! Compiler core: token cursor, symbol tables, scopes, type frames and
//! bytecode emission. Expression and statement parsing live in the sibling
//! `compiler_exprs` / `compiler_stmts` / `compiler_classes` modules; they are
//! all `impl Compiler` blocks over the state defined here.

use crate::compiler::class::ClassInfo;
use crate::compiler::function::{FunctionKind, ScriptFunction};
use crate::compiler::natives::{NativeFuncInfo, NativeRegistry};
use crate::compiler::preprocessor::Preprocessor;
use crate::compiler::variable::{flags as vf, ConstantInfo, VariableInfo};
use crate::compiler::{CompiledProgram, EmittedFunction};
use crate::error::{CompileError, DiagCode, Diagnostics, Stage};
use crate::lexer::scanner::Scanner;
use crate::lexer::token::{Token, TokenKind};
use crate::program::opcode::OpCode;
use crate::span::Span;
use crate::types::{check_compatibility, TypeCompatibility};
use crate::value::{DataType, Value, VarScope, VmPointer, NOT_SET};

/// A stable reference to a variable in one of the compiler's arenas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VarHandle {
    Global(usize),
    Local { func: usize, index: usize },
    Member { class: usize, index: usize },
}

/// Expected-type frame; see `type_begin`/`type_end`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TypeFrame {
    pub ty: DataType,
    pub ignore_expecting_on_set: bool,
}

/// Innermost-loop bookkeeping for `break`/`continue` patching.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopInfo {
    /// Code index the loop jumps back to.
    pub start: usize,
    /// Operand offset of the exit jump; absent on infinite `for` loops.
    pub exit_jump: Option<usize>,
    /// First instruction of the body; break scanning starts here.
    pub body: usize,
    /// Scope depth to discard down to when breaking out.
    pub scope_depth: i32,
}

/// Innermost-switch bookkeeping.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SwitchInfo {
    pub body: usize,
    pub scope_depth: i32,
}

#[derive(Debug, Clone)]
struct StringData {
    index: u32,
    text: String,
}

/// Resolved call target: a script function id or a native entry.
#[derive(Debug, Clone)]
pub(crate) enum Callee {
    Script(usize),
    Native(NativeFuncInfo),
}

pub struct Compiler<'d> {
    pub(crate) diags: &'d mut Diagnostics,
    source: String,
    flags: u8,
    file_name: String,
    pub(crate) verbose: bool,

    tokens: Vec<Token>,
    pub(crate) pos: usize,
    pub(crate) panic_mode: bool,

    pub(crate) functions: Vec<ScriptFunction>,
    pub(crate) current_function: usize,
    pub(crate) classes: Vec<ClassInfo>,
    pub(crate) current_class: Option<usize>,
    /// Stack of classes being instantiated (nested class fields).
    pub(crate) class_instances: Vec<usize>,
    pub(crate) globals: Vec<VariableInfo>,
    pub(crate) scope_depth: i32,
    pub(crate) locals_max: usize,
    pub(crate) current_array: Option<VarHandle>,

    pub(crate) type_stack: Vec<TypeFrame>,

    pub(crate) constants: Vec<ConstantInfo>,
    strings: Vec<StringData>,
    string_data: Vec<u8>,

    pub(crate) natives: NativeRegistry,

    pub(crate) loops: Vec<LoopInfo>,
    pub(crate) switches: Vec<SwitchInfo>,
}

impl<'d> Compiler<'d> {
    pub fn new(
        source: impl Into<String>,
        natives: NativeRegistry,
        flags: u8,
        file_name: impl Into<String>,
        verbose: bool,
        diags: &'d mut Diagnostics,
    ) -> Self {
        Self {
            diags,
            source: source.into(),
            flags,
            file_name: file_name.into(),
            verbose,
            tokens: Vec::new(),
            pos: 0,
            panic_mode: false,
            functions: Vec::new(),
            current_function: 0,
            classes: Vec::new(),
            current_class: None,
            class_instances: Vec::new(),
            globals: Vec::new(),
            scope_depth: 0,
            locals_max: 0,
            current_array: None,
            type_stack: Vec::new(),
            constants: Vec::new(),
            strings: Vec::new(),
            string_data: Vec::new(),
            natives,
            loops: Vec::new(),
            switches: Vec::new(),
        }
    }

    /// Run the whole pass: lex, preprocess, parse+emit, sanity check.
    pub fn compile(&mut self) -> Result<(), CompileError> {
        if self.source.trim().is_empty() {
            return Err(CompileError::LexFailed);
        }

        let source = std::mem::take(&mut self.source);
        self.tokens = Scanner::new(&source).scan_tokens(self.diags);
        self.source = source;

        if self.verbose {
            self.diags
                .note(Stage::Lexer, format!("{} tokens", self.tokens.len()));
        }

        Preprocessor::new().run(&self.tokens, self.diags);

        // Top-level statements land in an implicit script function.
        let top = self.create_function("", FunctionKind::Script, DataType::Void);
        debug_assert_eq!(top, 0);

        // The embedded file name must be string zero.
        if self.flags & crate::program::flags::EMBEDDED_FILE_NAME != 0 {
            let name = self.file_name.clone();
            self.add_string(&name);
        }

        self.skip_leading_trivia();

        while !self.is_at_end() {
            self.declaration();
        }

        self.emit_op(OpCode::End);

        if self.verbose {
            self.diags.note(
                Stage::Parser,
                format!(
                    "{} function(s), {} class(es), {} global slot(s)",
                    self.functions.len(),
                    self.classes.len(),
                    self.globals.len()
                ),
            );
        }

        self.sanity_check();

        if self.diags.has_errors() {
            return Err(CompileError::HasErrors(self.diags.error_count()));
        }
        Ok(())
    }

    /// Hand the finished streams to the binary writer.
    pub fn finish(self) -> CompiledProgram {
        let functions = self
            .functions
            .iter()
            .map(|f| EmittedFunction {
                id: f.id,
                name: f.name.clone(),
                span: f.span,
                return_type: f.return_type,
                total_args: f.total_arg_count(),
                code: f.code.clone(),
            })
            .collect();

        CompiledProgram {
            functions,
            constants: self.constants,
            string_data: self.string_data,
            globals_size_bytes: (self.globals.len() * 4) as u32,
            flags: self.flags,
            locals_max: self.locals_max,
        }
    }

    // ===== Token cursor =====

    fn token_at(&self, pos: usize) -> Token {
        if self.tokens.is_empty() {
            return Token::default();
        }
        if pos >= self.tokens.len() {
            return self.tokens.last().cloned().unwrap_or_default();
        }
        self.tokens[pos].clone()
    }

    pub(crate) fn current_token(&self) -> Token {
        self.token_at(self.pos)
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.current_token().kind == TokenKind::EndOfFile || self.pos >= self.tokens.len()
    }

    fn skip_leading_trivia(&mut self) {
        while self.pos < self.tokens.len() && self.tokens[self.pos].kind.is_skippable() {
            self.pos += 1;
        }
    }

    /// Advance to the next non-trivia token.
    pub(crate) fn advance_token(&mut self) {
        loop {
            self.pos += 1;
            if self.is_at_end() || !self.current_token().kind.is_skippable() {
                break;
            }
        }
    }

    /// Advance and return the token that was current.
    pub(crate) fn consume(&mut self) -> Token {
        let token = self.current_token();
        self.advance_token();
        token
    }

    /// Advance past an expected token; report a syntax error otherwise. The
    /// sign of `error_offset` picks the "after"/"before" wording.
    pub(crate) fn consume_expect(
        &mut self,
        expect: TokenKind,
        error_offset: i32,
        error_msg: &str,
    ) -> Token {
        let token = self.consume();
        self.expect_token(&token, expect, error_offset, error_msg);
        token
    }

    pub(crate) fn expect_token(
        &mut self,
        token: &Token,
        expect: TokenKind,
        error_offset: i32,
        error_msg: &str,
    ) -> bool {
        if expect != TokenKind::None && token.kind != expect {
            if !error_msg.is_empty() {
                self.error_at(error_msg.to_string(), token.span);
            } else if error_offset <= 0 {
                self.error_at(
                    format!("Expected '{}' after '{}'.", expect.spelling(), token.text),
                    token.span,
                );
            } else {
                self.error_at(
                    format!("Expected '{}' before '{}'.", expect.spelling(), token.text),
                    token.span,
                );
            }
            return false;
        }
        true
    }

    pub(crate) fn check(&self, kind: TokenKind) -> bool {
        self.current_token().kind == kind
    }

    /// Peek `num` non-trivia tokens ahead of the current one.
    pub(crate) fn check_ahead(&self, kind: TokenKind, num: usize) -> bool {
        let mut pos = self.pos;
        let mut remaining = num;
        while remaining > 0 {
            pos += 1;
            if pos >= self.tokens.len() {
                break;
            }
            if !self.tokens[pos].kind.is_skippable() {
                remaining -= 1;
            }
        }
        self.token_at(pos).kind == kind
    }

    pub(crate) fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance_token();
        true
    }

    /// The `num`-th non-trivia token before the current position.
    pub(crate) fn look_back(&self, num: usize) -> Token {
        let mut remaining = num;
        let mut pos = self.pos;
        while pos > 0 {
            pos -= 1;
            if !self.token_at(pos).kind.is_skippable() {
                remaining -= 1;
                if remaining == 0 {
                    return self.token_at(pos);
                }
            }
        }
        self.token_at(0)
    }

    pub(crate) fn prev_token(&self) -> Token {
        self.look_back(1)
    }

    // ===== Diagnostics =====

    pub(crate) fn error_at(&mut self, message: impl Into<String>, span: Span) {
        // Already in error; don't report more until synchronized.
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.diags
            .error(Stage::Parser, DiagCode::SyntaxError, span, message);
    }

    pub(crate) fn error(&mut self, message: impl Into<String>) {
        let span = self.prev_token().span;
        self.error_at(message, span);
    }

    pub(crate) fn warn_at(&mut self, message: impl Into<String>, span: Span) {
        self.diags.warning(Stage::Parser, span, message);
    }

    pub(crate) fn synchronize(&mut self) {
        self.panic_mode = false;

        while !self.is_at_end() {
            match self.current_token().kind {
                TokenKind::Void
                | TokenKind::Bool
                | TokenKind::Char
                | TokenKind::Byte
                | TokenKind::Short
                | TokenKind::UShort
                | TokenKind::Int
                | TokenKind::UInt
                | TokenKind::Float
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Switch
                | TokenKind::Return
                | TokenKind::Class => return,
                _ => self.advance_token(),
            }
        }
    }

    // ===== Type frames =====

    /// Open an expected-type frame. Returns what the enclosing context
    /// expects, mirroring the frame's own view before anything is set.
    pub(crate) fn type_begin(&mut self, ty: DataType) -> DataType {
        let inherited = self
            .type_stack
            .last()
            .map(|f| f.ignore_expecting_on_set)
            .unwrap_or(false);
        let expecting = self.type_stack.last().map(|f| f.ty).unwrap_or(DataType::None);
        self.type_stack.push(TypeFrame {
            ty,
            ignore_expecting_on_set: inherited,
        });
        expecting
    }

    pub(crate) fn type_set_ignore_expecting(&mut self) {
        if let Some(frame) = self.type_stack.last_mut() {
            frame.ignore_expecting_on_set = true;
        }
    }

    /// Record the type an expression produced. A frame only takes the first
    /// concrete type it sees unless `force`; a float expectation below wins
    /// over an integer production so promotions happen once.
    pub(crate) fn type_set_current(&mut self, ty: DataType, force: bool) -> DataType {
        if self.type_stack.is_empty() {
            return DataType::None;
        }

        if force {
            let frame = self.type_stack.last_mut().unwrap();
            frame.ty = ty;
            return frame.ty;
        }

        let current = self.type_stack.last().unwrap();
        if current.ty != DataType::None && current.ty <= DataType::String {
            return current.ty;
        }

        let ignore = current.ignore_expecting_on_set;
        let expecting = self.expecting();
        let frame = self.type_stack.last_mut().unwrap();
        if ignore {
            frame.ty = ty;
        } else {
            frame.ty = if expecting == DataType::Float {
                DataType::Float
            } else {
                ty
            };
        }
        frame.ty
    }

    /// What the context below the current frame expects.
    pub(crate) fn expecting(&self) -> DataType {
        let len = self.type_stack.len();
        if len == 0 {
            return DataType::None;
        }
        if len == 1 {
            return self.type_stack[0].ty;
        }
        for frame in self.type_stack[..len - 1].iter().rev() {
            if frame.ty != DataType::None {
                return frame.ty;
            }
        }
        DataType::None
    }

    pub(crate) fn current_type(&self) -> DataType {
        match self.type_stack.last() {
            None => DataType::None,
            Some(frame) if frame.ty == DataType::None => self.expecting(),
            Some(frame) => frame.ty,
        }
    }

    /// Compare `ty` against the current expectation; incompatibility is a
    /// compile error, anything else tells the caller which cast to emit.
    pub(crate) fn type_check(&mut self, ty: DataType, error_message: &str) -> TypeCompatibility {
        if self.type_stack.is_empty() {
            return TypeCompatibility::NotApplicable;
        }

        let expecting = self.current_type();
        let compat = check_compatibility(expecting, ty);
        if compat == TypeCompatibility::Incompatible {
            let span = self.prev_token().span;
            if !error_message.is_empty() {
                self.error_at(error_message.to_string(), span);
            } else {
                self.error_at(
                    format!("Incompatible type. Expected '{}'.", expecting),
                    span,
                );
            }
        }
        compat
    }

    pub(crate) fn type_end(&mut self) -> DataType {
        let data_type = self.current_type();
        self.type_stack.pop();
        data_type
    }

    // ===== Functions =====

    pub(crate) fn create_function(
        &mut self,
        name: &str,
        kind: FunctionKind,
        return_type: DataType,
    ) -> usize {
        let id = self.functions.len();
        let mut func = ScriptFunction::new(id, name, kind, return_type);
        func.enclosing = if self.functions.is_empty() {
            None
        } else {
            Some(self.current_function)
        };
        func.parent_class = self
            .current_class
            .map(|c| self.classes[c].name.clone())
            .unwrap_or_default();
        func.span = self.prev_token().span;

        self.functions.push(func);
        self.current_function = id;
        id
    }

    pub(crate) fn end_function(&mut self) -> usize {
        let completed = self.current_function;

        let height = self.functions[completed].total_locals_height();
        if height > self.locals_max {
            self.locals_max = height;
        }

        self.current_function = self.functions[completed].enclosing.unwrap_or(0);
        completed
    }

    pub(crate) fn func(&self) -> &ScriptFunction {
        &self.functions[self.current_function]
    }

    pub(crate) fn func_mut(&mut self) -> &mut ScriptFunction {
        let idx = self.current_function;
        &mut self.functions[idx]
    }

    pub(crate) fn find_script_function(&self, name: &str) -> Option<usize> {
        self.functions
            .iter()
            .find(|f| f.name == name && f.kind != FunctionKind::Native)
            .map(|f| f.id)
    }

    /// Native registry first, then the script function table.
    pub(crate) fn find_function(&self, name: &str) -> Option<Callee> {
        if let Some(native) = self.natives.resolve(name) {
            return Some(Callee::Native(native.clone()));
        }
        self.find_script_function(name).map(Callee::Script)
    }

    pub(crate) fn conditional_begin(&mut self) {
        self.func_mut().conditional_depth += 1;
    }

    pub(crate) fn conditional_end(&mut self) {
        let func = self.func_mut();
        if func.conditional_depth > 0 {
            func.conditional_depth -= 1;
        }
    }

    // ===== Scope =====

    pub(crate) fn current_scope(&self) -> VarScope {
        if self.scope_depth == 0 {
            VarScope::Global
        } else {
            VarScope::Local
        }
    }

    pub(crate) fn scope_begin(&mut self) {
        self.scope_depth += 1;
    }

    pub(crate) fn scope_end(&mut self, pop: bool) {
        self.scope_depth -= 1;

        let mut pop_count = 0;
        loop {
            let func = self.current_function;
            let Some(local) = self.functions[func].locals.last() else {
                break;
            };
            if local.depth <= self.scope_depth {
                break;
            }

            let index = self.functions[func].locals.len() - 1;
            self.destroy_variable(VarHandle::Local { func, index });

            self.functions[func].locals.pop();
            pop_count += 1;
        }

        // Returning from a function unwinds the stack anyway.
        if pop {
            self.emit_pop(pop_count);
        }
    }

    /// Emit pops for locals at or above `depth` without undeclaring them.
    /// Used by `break`/`continue`, which jump while the scope is still open.
    pub(crate) fn discard_locals(&mut self, depth: i32) -> usize {
        let func = self.current_function;
        let mut pops = 0;
        let mut index = self.functions[func].locals.len();
        while index > 0 {
            index -= 1;
            let local_depth = self.functions[func].locals[index].depth;
            if local_depth < depth {
                break;
            }
            self.destroy_variable(VarHandle::Local { func, index });
            pops += 1;
        }

        self.emit_pop(pops);
        pops
    }

    /// Scope-exit hook: unused-variable warning plus the destructor call for
    /// class heads.
    pub(crate) fn destroy_variable(&mut self, handle: VarHandle) {
        let var = self.var(handle).clone();

        if var.reads < 1 && !var.name.starts_with("__") && var.name != "this" {
            self.warn_at(format!("Variable '{}' is never used.", var.name), var.span);
        }

        if var.is_class_head() {
            let destructor = ClassInfo::destructor_name(&var.parent_class);
            if let Some(func_id) = self.find_script_function(&destructor) {
                self.emit_call_direct(func_id, Some(handle));
                // Discard the destructor's return value.
                self.emit_op(OpCode::Pop);
            }
        }
    }

    // ===== Variables =====

    pub(crate) fn var(&self, handle: VarHandle) -> &VariableInfo {
        match handle {
            VarHandle::Global(index) => &self.globals[index],
            VarHandle::Local { func, index } => &self.functions[func].locals[index],
            VarHandle::Member { class, index } => &self.classes[class].fields[index],
        }
    }

    pub(crate) fn var_mut(&mut self, handle: VarHandle) -> &mut VariableInfo {
        match handle {
            VarHandle::Global(index) => &mut self.globals[index],
            VarHandle::Local { func, index } => &mut self.functions[func].locals[index],
            VarHandle::Member { class, index } => &mut self.classes[class].fields[index],
        }
    }

    pub(crate) fn in_class_initialiser(&self) -> bool {
        match self.current_class {
            Some(class) => self.classes[class].init_function_id == Some(self.current_function),
            None => false,
        }
    }

    pub(crate) fn current_class_instance(&self) -> Option<usize> {
        self.class_instances.last().copied()
    }

    /// Create a variable record in the arena picked by scope and context.
    pub(crate) fn create_variable(
        &mut self,
        name: &str,
        scope: VarScope,
        data_type: DataType,
        flag_bits: u32,
    ) -> Option<VarHandle> {
        let mut var = VariableInfo::new(name, VmPointer::new(0xFFFF, data_type, scope), flag_bits);
        var.span = self.prev_token().span;

        if self.in_class_initialiser() {
            let class = self.current_class.unwrap();
            // A class-typed field names its own class so instance
            // flattening can recurse into it.
            var.parent_class = match self.current_class_instance() {
                Some(instance) if data_type == DataType::Class => {
                    self.classes[instance].name.clone()
                }
                _ => self.classes[class].name.clone(),
            };
            var.member_index = self.classes[class].fields.len() as i32;
        } else if let Some(instance_class) = self.current_class_instance() {
            var.parent_class = self.classes[instance_class].name.clone();
            var.size = self.classes[instance_class].size();
        }

        if var.is_function() || data_type == DataType::Function || data_type == DataType::NativeFunc
        {
            var.depth = 0;
        }

        if self.in_class_initialiser() {
            let class = self.current_class.unwrap();
            var.pointer.address = self.classes[class].fields.len() as u16;
            self.classes[class].fields.push(var);
            let index = self.classes[class].fields.len() - 1;
            return Some(VarHandle::Member { class, index });
        }

        // A class-typed variable flattens the class fields into the arena.
        if data_type == DataType::Class {
            if let Some(instance_class) = self.current_class_instance() {
                let class_name = self.classes[instance_class].name.clone();
                return self.add_class_members(scope, &class_name, name);
            }
        }

        match scope {
            VarScope::Global => {
                var.pointer.address = self.globals.len() as u16;
                self.globals.push(var);
                Some(VarHandle::Global(self.globals.len() - 1))
            }
            VarScope::Local | VarScope::Field => {
                let func = self.current_function;
                var.pointer.address = self.functions[func].locals.len() as u16;
                var.pointer.scope = VarScope::Local;
                self.functions[func].locals.push(var);
                let len = self.functions[func].locals.len();
                if len > self.functions[func].locals_max_height {
                    self.functions[func].locals_max_height = len;
                }
                Some(VarHandle::Local {
                    func,
                    index: len - 1,
                })
            }
            VarScope::StackAbsolute => None,
        }
    }

    /// Flatten a class's fields into the globals or locals arena for a new
    /// instance. Returns the head member handle.
    pub(crate) fn add_class_members(
        &mut self,
        scope: VarScope,
        class_name: &str,
        instance_name: &str,
    ) -> Option<VarHandle> {
        let class = self.resolve_class(class_name)?;

        let class_address = match scope {
            VarScope::Global => self.globals.len(),
            VarScope::Local => self.functions[self.current_function].locals.len(),
            _ => return None,
        };

        let field_count = self.classes[class].fields.len();
        for field_index in 0..field_count {
            let field = self.classes[class].fields[field_index].clone();

            if field.data_type() == DataType::Class {
                // A nested class field carries a whole instance.
                let nested = field.parent_class.clone();
                self.add_class_members(scope, &nested, &field.name);
                continue;
            }

            let address = match scope {
                VarScope::Global => self.globals.len(),
                _ => self.functions[self.current_function].locals.len(),
            };

            let mut member = field;
            member.parent_instance = instance_name.to_string();
            member.parent_address = class_address as i32;
            member.pointer.address = address as u16;
            member.pointer.scope = scope;
            // Members get initialised by the class init function.
            member.depth = self.scope_depth;

            match scope {
                VarScope::Global => self.globals.push(member),
                _ => {
                    let func = self.current_function;
                    self.functions[func].locals.push(member);
                    let len = self.functions[func].locals.len();
                    if len > self.functions[func].locals_max_height {
                        self.functions[func].locals_max_height = len;
                    }
                }
            }
        }

        match scope {
            VarScope::Global => Some(VarHandle::Global(class_address)),
            _ => Some(VarHandle::Local {
                func: self.current_function,
                index: class_address,
            }),
        }
    }

    pub(crate) fn resolve_class(&self, name: &str) -> Option<usize> {
        self.classes.iter().find(|c| c.name == name).map(|c| c.id)
    }

    pub(crate) fn resolve_global(&mut self, name: &str, parent: &str) -> Option<VarHandle> {
        for index in (0..self.globals.len()).rev() {
            let var = &self.globals[index];
            if var.matches(name, parent) || var.is_head_member_of(name) {
                if var.depth == NOT_SET {
                    self.error("Can't read global variable in its own initializer.");
                }
                return Some(VarHandle::Global(index));
            }
        }
        None
    }

    pub(crate) fn resolve_local(&mut self, name: &str, parent: &str) -> Option<VarHandle> {
        let func = self.current_function;
        for index in (0..self.functions[func].locals.len()).rev() {
            let var = &self.functions[func].locals[index];
            if var.matches(name, parent) || var.is_head_member_of(name) {
                if var.depth == NOT_SET {
                    self.error("Can't read local variable in its own initializer.");
                }
                return Some(VarHandle::Local { func, index });
            }
        }
        None
    }

    pub(crate) fn resolve_member(&mut self, class: usize, name: &str) -> Option<VarHandle> {
        for index in (0..self.classes[class].fields.len()).rev() {
            let var = &self.classes[class].fields[index];
            if var.name == name {
                if var.depth == NOT_SET {
                    self.error("Can't read field in its own initializer.");
                }
                return Some(VarHandle::Member { class, index });
            }
        }
        None
    }

    /// Resolution order: members of the class being compiled, then locals
    /// (innermost first), then globals.
    pub(crate) fn resolve_variable(
        &mut self,
        name: &str,
        parent_instance: &str,
    ) -> Option<VarHandle> {
        let mut handle = None;

        if let Some(class) = self.current_class {
            handle = self.resolve_member(class, name);
        }

        if handle.is_none() {
            handle = self.resolve_local(name, parent_instance);
        }

        if handle.is_none() {
            handle = self.resolve_global(name, parent_instance);
        }

        if handle.is_none() {
            if parent_instance.is_empty() {
                self.error(format!(
                    "Variable '{}' does not exist in the current scope.",
                    name
                ));
            } else {
                self.error(format!(
                    "Variable '{}' is not a member of '{}'.",
                    name, parent_instance
                ));
            }
        }

        handle
    }

    pub(crate) fn add_global(
        &mut self,
        token: &Token,
        data_type: DataType,
        flag_bits: u32,
    ) -> Option<VarHandle> {
        let name = token.text.clone();

        if self.natives.contains(&name) {
            self.error_at(
                format!("Native function with name '{}' already exists.", name),
                token.span,
            );
            return None;
        }
        if self.globals.iter().any(|v| v.matches(&name, "")) {
            self.error_at(format!("Variable '{}' already exists.", name), token.span);
            return None;
        }
        if self.globals.len() >= 0xFFFF {
            self.error_at("Maximum global variable count reached (65535).", token.span);
            return None;
        }

        let handle = self.create_variable(&name, VarScope::Global, data_type, flag_bits)?;
        self.var_mut(handle).span = token.span;
        Some(handle)
    }

    pub(crate) fn add_local(
        &mut self,
        token: &Token,
        data_type: DataType,
        flag_bits: u32,
    ) -> Option<VarHandle> {
        let name = token.text.clone();

        if self.natives.contains(&name) {
            self.error_at(
                format!("Native function with name '{}' already exists.", name),
                token.span,
            );
            return None;
        }
        let func = self.current_function;
        let exists_local = self.functions[func].locals.iter().any(|v| v.matches(&name, ""));
        let exists_global = self.globals.iter().any(|v| v.matches(&name, ""));
        if exists_local || exists_global {
            self.error_at(format!("Variable '{}' already exists.", name), token.span);
            return None;
        }
        if self.functions[func].locals.len() >= 0xFFFF {
            self.error_at("Maximum local variable count reached (65535).", token.span);
            return None;
        }

        let handle = self.create_variable(&name, VarScope::Local, data_type, flag_bits)?;
        self.var_mut(handle).span = token.span;
        Some(handle)
    }

    pub(crate) fn add_member(
        &mut self,
        token: &Token,
        data_type: DataType,
        flag_bits: u32,
    ) -> Option<VarHandle> {
        let Some(class) = self.current_class else {
            self.error_at("Cannot add fields outside of a class.", token.span);
            return None;
        };
        let name = token.text.clone();

        if self.natives.contains(&name) {
            self.error_at(
                format!("Native function with name '{}' already exists.", name),
                token.span,
            );
            return None;
        }
        if self.classes[class].fields.iter().any(|f| f.name == name) {
            self.error_at(format!("Field '{}' already exists.", name), token.span);
            return None;
        }
        if self.classes[class].fields.len() >= 0xFFFF {
            self.error_at("Class cannot have more than 65535 members.", token.span);
            return None;
        }

        let handle = self.create_variable(&name, self.current_scope(), data_type, flag_bits | vf::FIELD)?;
        self.var_mut(handle).span = token.span;
        Some(handle)
    }

    /// Consume the variable name and declare it in the right arena.
    pub(crate) fn parse_variable(
        &mut self,
        data_type: DataType,
        flag_bits: u32,
        error_message: &str,
    ) -> Option<VarHandle> {
        let token = self.consume_expect(TokenKind::Identifier, -2, error_message);
        self.declare_variable(&token, data_type, flag_bits)
    }

    pub(crate) fn declare_variable(
        &mut self,
        token: &Token,
        data_type: DataType,
        flag_bits: u32,
    ) -> Option<VarHandle> {
        if self.in_class_initialiser() {
            self.add_member(token, data_type, flag_bits)
        } else {
            match self.current_scope() {
                VarScope::Global => self.add_global(token, data_type, flag_bits),
                VarScope::Local | VarScope::Field => self.add_local(token, data_type, flag_bits),
                VarScope::StackAbsolute => None,
            }
        }
    }

    pub(crate) fn define_variable(&mut self, handle: Option<VarHandle>, input_type: DataType) {
        let Some(handle) = handle else { return };

        let global = self.current_scope() == VarScope::Global;
        self.mark_initialised();
        self.emit_set_variable(OpCode::Assign, handle, input_type);

        // Globals don't need to be left on the stack when defined.
        if global {
            self.emit_op(OpCode::Pop);
        }
    }

    pub(crate) fn mark_initialised(&mut self) {
        if self.in_class_initialiser() {
            let class = self.current_class.unwrap();
            if let Some(member) = self.classes[class].fields.last_mut() {
                if member.depth == NOT_SET {
                    member.depth = self.scope_depth;
                }
            }
        } else if self.current_scope() == VarScope::Global {
            if let Some(global) = self.globals.last_mut() {
                if global.depth == NOT_SET {
                    global.depth = 0;
                }
            }
        } else {
            let depth = self.scope_depth;
            if let Some(local) = self.func_mut().locals.last_mut() {
                local.depth = depth;
            }
        }
    }

    // ===== Constants & strings =====

    /// Pool lookup first; a new entry only when no prior constant has the
    /// same bit pattern and declared type.
    pub(crate) fn add_constant(&mut self, constant: ConstantInfo) -> usize {
        for (index, existing) in self.constants.iter().enumerate() {
            if *existing == constant {
                return index;
            }
        }
        self.constants.push(constant);
        self.constants.len() - 1
    }

    pub(crate) fn emit_constant(&mut self, constant: ConstantInfo) {
        let pos = self.add_constant(constant);

        if pos > 0xFF_FFFF {
            self.error("Maximum number of constants reached.");
            return;
        }

        if pos <= 0xFF {
            self.emit_op(OpCode::Constant);
            self.emit_byte(pos as u8);
        } else if pos <= 0xFFFF {
            self.emit_op(OpCode::Constant16);
            self.emit_byte(pos as u8);
            self.emit_byte((pos >> 8) as u8);
        } else {
            self.emit_op(OpCode::Constant24);
            self.emit_byte(pos as u8);
            self.emit_byte((pos >> 8) as u8);
            self.emit_byte((pos >> 16) as u8);
        }
    }

    /// Append a string to the pool, zero-padded to the next 4-byte boundary.
    /// Returns its starting byte offset.
    pub(crate) fn add_string(&mut self, text: &str) -> u32 {
        for existing in &self.strings {
            if existing.text == text {
                return existing.index;
            }
        }

        let index = self.string_data.len() as u32;
        self.string_data.extend_from_slice(text.as_bytes());
        loop {
            self.string_data.push(0);
            if self.string_data.len() % 4 == 0 {
                break;
            }
        }

        self.strings.push(StringData {
            index,
            text: text.to_string(),
        });
        index
    }

    pub(crate) fn emit_string(&mut self, text: &str) {
        let pos = self.add_string(text);

        if pos > 0xFF_FFFF {
            self.error("Maximum string storage size reached.");
            return;
        }

        if pos <= 0xFF {
            self.emit_op(OpCode::String);
            self.emit_byte(pos as u8);
        } else if pos <= 0xFFFF {
            self.emit_op(OpCode::String16);
            self.emit_byte(pos as u8);
            self.emit_byte((pos >> 8) as u8);
        } else {
            self.emit_op(OpCode::String24);
            self.emit_byte(pos as u8);
            self.emit_byte((pos >> 8) as u8);
            self.emit_byte((pos >> 16) as u8);
        }
    }

    // ===== Bytecode emission =====

    pub(crate) fn code_pos(&self) -> usize {
        self.func().code.len()
    }

    pub(crate) fn emit_byte(&mut self, byte: u8) {
        self.func_mut().code.push(byte);
    }

    pub(crate) fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    pub(crate) fn emit_short_arg(&mut self, op: OpCode, value: usize) {
        self.emit_op(op);
        self.emit_byte(value as u8);
        self.emit_byte((value >> 8) as u8);
    }

    pub(crate) fn emit_push(&mut self, mut count: usize) {
        if count == 0 {
            return;
        }
        if count == 1 {
            self.emit_op(OpCode::Push);
            return;
        }
        while count > 0xFF {
            self.emit_op(OpCode::PushN);
            self.emit_byte(0xFF);
            count -= 0xFF;
        }
        self.emit_op(OpCode::PushN);
        self.emit_byte(count as u8);
    }

    pub(crate) fn emit_pop(&mut self, mut count: usize) {
        if count == 0 {
            return;
        }
        if count == 1 {
            self.emit_op(OpCode::Pop);
            return;
        }
        while count > 0xFF {
            self.emit_op(OpCode::PopN);
            self.emit_byte(0xFF);
            count -= 0xFF;
        }
        self.emit_op(OpCode::PopN);
        self.emit_byte(count as u8);
    }

    /// Emit a 16-bit value; returns the offset of its first byte.
    pub(crate) fn emit_short(&mut self, value: usize) -> usize {
        self.emit_byte(value as u8);
        self.emit_byte((value >> 8) as u8);
        self.code_pos() - 2
    }

    pub(crate) fn patch_short(&mut self, offset: usize, value: usize) {
        let code = &mut self.func_mut().code;
        code[offset] = value as u8;
        code[offset + 1] = (value >> 8) as u8;
    }

    /// Emit a 32-bit value; returns the offset of its first byte.
    pub(crate) fn emit_int(&mut self, value: i32) -> usize {
        for byte in value.to_le_bytes() {
            self.emit_byte(byte);
        }
        self.code_pos() - 4
    }

    pub(crate) fn patch_int(&mut self, offset: usize, value: i32) {
        let bytes = value.to_le_bytes();
        let code = &mut self.func_mut().code;
        code[offset..offset + 4].copy_from_slice(&bytes);
    }

    /// Emit a jump with a 16-bit placeholder; returns the operand offset.
    pub(crate) fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_short_arg(op, 0xFFFF);
        self.code_pos() - 2
    }

    pub(crate) fn patch_jump(&mut self, offset: usize) {
        {
            let code = &self.func().code;
            if code[offset] != 0xFF && code[offset + 1] != 0xFF {
                // Jump has already been patched.
                return;
            }
        }

        // -2 to adjust for the jump offset bytes themselves.
        let jump = self.code_pos() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        self.patch_short(offset, jump);
    }

    pub(crate) fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);

        let offset = self.code_pos() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_byte(offset as u8);
        self.emit_byte((offset >> 8) as u8);
    }

    pub(crate) fn emit_array(&mut self) -> usize {
        self.emit_short_arg(OpCode::Array, 0xFFFF);
        self.code_pos() - 2
    }

    pub(crate) fn patch_array(&mut self, offset: usize, size: usize) {
        self.patch_short(offset, size);
    }

    pub(crate) fn emit_cast(&mut self, cast: TypeCompatibility, previous: bool) {
        match cast {
            TypeCompatibility::CastSignedToFloat | TypeCompatibility::CastUnsignedToFloat => {
                self.emit_op(if previous {
                    OpCode::CastPrevIntToFloat
                } else {
                    OpCode::CastIntToFloat
                });
            }
            TypeCompatibility::CastFloatToSigned | TypeCompatibility::CastFloatToUnsigned => {
                self.emit_op(if previous {
                    OpCode::CastPrevFloatToInt
                } else {
                    OpCode::CastFloatToInt
                });
            }
            _ => {}
        }
    }

    /// Push a constant pointer to the variable. Members of the class being
    /// compiled become field-scoped so `this`-relative addressing works.
    pub(crate) fn emit_pointer(&mut self, handle: VarHandle, is_member: bool) {
        let var = self.var(handle);
        let mut pointer = var.pointer;
        if is_member {
            pointer.scope = VarScope::Field;
            pointer.address = var.member_index as u16;
        }
        self.emit_constant(ConstantInfo::new(DataType::Pointer, Value::from_pointer(pointer)));
    }

    pub(crate) fn emit_absolute_pointer(&mut self, handle: VarHandle) {
        self.emit_pointer(handle, false);
        self.emit_op(OpCode::AbsolutePointer);
    }

    pub(crate) fn is_member_of_current_class(&self, handle: VarHandle) -> bool {
        match self.current_class {
            Some(class) => {
                let var = self.var(handle);
                !var.parent_class.is_empty() && var.parent_class == self.classes[class].name
            }
            None => false,
        }
    }

    pub(crate) fn emit_get_variable(&mut self, handle: VarHandle, output_type: DataType) {
        self.var_mut(handle).reads += 1;

        let cast = check_compatibility(output_type, self.var(handle).data_type());
        let is_member = self.is_member_of_current_class(handle);

        self.emit_pointer(handle, is_member);
        self.emit_op(OpCode::GetVariable);
        self.emit_cast(cast, false);
    }

    pub(crate) fn emit_set_variable(
        &mut self,
        assign_op: OpCode,
        handle: VarHandle,
        input_type: DataType,
    ) {
        if self.var(handle).is_const() && self.var(handle).writes > 0 {
            self.error("Cannot write to const variable after initialisation.");
            return;
        }

        let cast = check_compatibility(self.var(handle).data_type(), input_type);
        self.var_mut(handle).writes += 1;
        let is_member = self.is_member_of_current_class(handle);

        self.emit_cast(cast, false);
        self.emit_pointer(handle, is_member);
        self.emit_op(assign_op);
    }

    /// Read through a pointer+index pair already on the stack.
    pub(crate) fn emit_get_from_offset(&mut self, data_type: DataType, output_type: DataType) {
        let cast = check_compatibility(output_type, data_type);

        self.emit_op(match data_type {
            DataType::Int8 => OpCode::GetIndexedS8,
            DataType::Uint8 => OpCode::GetIndexedU8,
            DataType::Int16 => OpCode::GetIndexedS16,
            DataType::Uint16 => OpCode::GetIndexedU16,
            DataType::Uint32 => OpCode::GetIndexedU32,
            DataType::Float => OpCode::GetIndexedFloat,
            _ => OpCode::GetIndexedS32,
        });

        if let Some(array) = self.current_array {
            self.var_mut(array).reads += 1;
        }

        self.emit_cast(cast, false);
    }

    /// Write through a pointer+index pair; the value stays on the stack.
    pub(crate) fn emit_set_at_offset(&mut self, data_type: DataType, input_type: DataType) {
        let cast = check_compatibility(data_type, input_type);
        self.emit_cast(cast, false);

        self.emit_op(match data_type {
            DataType::Int8 => OpCode::SetIndexedS8,
            DataType::Uint8 => OpCode::SetIndexedU8,
            DataType::Int16 => OpCode::SetIndexedS16,
            DataType::Uint16 => OpCode::SetIndexedU16,
            DataType::Uint32 => OpCode::SetIndexedU32,
            DataType::Float => OpCode::SetIndexedFloat,
            _ => OpCode::SetIndexedS32,
        });
    }

    pub(crate) fn emit_call(&mut self, call_op: OpCode, arg_count: usize) {
        self.emit_op(call_op);
        self.emit_byte(arg_count as u8);
    }

    pub(crate) fn emit_return(&mut self) {
        self.emit_op(OpCode::Nil);
        self.emit_op(OpCode::Return);
    }

    // ===== Declarations =====

    pub(crate) fn declaration(&mut self) {
        if self.matches(TokenKind::Class) {
            self.class_declaration();
        } else if let Some((data_type, flag_bits)) = self.match_type_declaration() {
            self.type_declaration(data_type, flag_bits);
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    /// Match `const`/`*` qualifiers plus a type keyword or a known class
    /// name followed by an identifier.
    pub(crate) fn match_type_declaration(&mut self) -> Option<(DataType, u32)> {
        let mut flag_bits = vf::NORMAL;

        if self.matches(TokenKind::Const) {
            flag_bits |= vf::CONST;
        }
        if self.matches(TokenKind::Star) {
            flag_bits |= vf::POINTER;
        }

        let data_type = if self.matches(TokenKind::Void) {
            DataType::Void
        } else if self.matches(TokenKind::Bool) {
            DataType::Bool
        } else if self.matches(TokenKind::Char) {
            DataType::Int8
        } else if self.matches(TokenKind::Byte) {
            DataType::Uint8
        } else if self.matches(TokenKind::Short) {
            DataType::Int16
        } else if self.matches(TokenKind::UShort) {
            DataType::Uint16
        } else if self.matches(TokenKind::Int) {
            DataType::Int32
        } else if self.matches(TokenKind::UInt) {
            DataType::Uint32
        } else if self.matches(TokenKind::Float) {
            DataType::Float
        } else if self.matches(TokenKind::String) {
            DataType::String
        } else if self.match_class_instance() {
            DataType::Class
        } else {
            if flag_bits != vf::NORMAL {
                self.error("Expected type initializer.");
            }
            return None;
        };

        Some((data_type, flag_bits))
    }

    /// An identifier naming a known class, introducing an instance
    /// declaration.
    fn match_class_instance(&mut self) -> bool {
        if !self.check(TokenKind::Identifier) {
            return false;
        }
        if self.resolve_class(&self.current_token().text).is_none() {
            return false;
        }
        self.matches(TokenKind::Identifier)
    }

    pub(crate) fn type_declaration(&mut self, data_type: DataType, flag_bits: u32) {
        if data_type == DataType::Class {
            self.class_instance_declaration();
        } else if self.check_ahead(TokenKind::LeftParen, 1) {
            if self.current_class.is_some() {
                self.method_declaration(data_type);
            } else {
                self.function_declaration(data_type);
            }
        } else if self.check_ahead(TokenKind::LeftSquareBracket, 1) {
            self.array_declaration(data_type, flag_bits);
        } else {
            self.variable_declaration(data_type, flag_bits);
        }
    }

    // ===== Final checks =====

    fn sanity_check(&mut self) {
        let mut warnings: Vec<(String, Span, bool, bool)> = Vec::new();
        for var in &self.globals {
            // Compiler-synthesized entries (array slot padding) are exempt.
            if var.name.starts_with("__") {
                continue;
            }
            warnings.push((var.name.clone(), var.span, var.writes < 1, var.reads < 1));
        }

        for (name, span, unassigned, unused) in warnings {
            if unassigned {
                self.warn_at(format!("Variable '{}' is never assigned.", name), span);
            }
            if unused {
                self.warn_at(format!("Variable '{}' is never used.", name), span);
            }
        }
    }
}
