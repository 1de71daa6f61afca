//! Statement parsing: control flow, loops, switch tables, and the
//! variable/array/function declaration forms.

use crate::compiler::compiler::{Compiler, LoopInfo, SwitchInfo, VarHandle};
use crate::compiler::function::FunctionKind;
use crate::compiler::variable::{flags as vf, ConstantInfo};
use crate::lexer::scanner::parse_integer;
use crate::lexer::token::TokenKind;
use crate::program::opcode::OpCode;
use crate::types::{byte_size, check_compatibility, packed_count, TypeCompatibility};
use crate::value::{DataType, Value};
use std::collections::BTreeMap;

impl<'d> Compiler<'d> {
    /// Compiles a simple statement. Unlike expressions, statements leave no
    /// value on the stack.
    pub(crate) fn statement(&mut self) {
        if self.matches(TokenKind::Break) {
            self.break_statement();
        } else if self.matches(TokenKind::Continue) {
            self.continue_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::Switch) {
            self.switch_statement();
        } else if self.matches(TokenKind::LeftCurly) {
            self.scope_begin();
            self.block();
            self.scope_end(true);
        } else {
            self.expression_statement();
        }
    }

    pub(crate) fn block(&mut self) {
        while !self.check(TokenKind::RightCurly) && !self.is_at_end() {
            self.declaration();
        }
        self.consume_expect(TokenKind::RightCurly, -2, "Expected '}' after block.");
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume_expect(TokenKind::SemiColon, -2, "Expected ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    // ===== Branches =====

    fn if_statement(&mut self) {
        self.conditional_begin();

        self.consume_expect(TokenKind::LeftParen, -2, "Expected '(' after 'if' statement.");
        self.expression();
        self.consume_expect(TokenKind::RightParen, -2, "Expected ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);

        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);

        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        self.conditional_end();

        if self.matches(TokenKind::Else) {
            self.statement();
        }

        self.patch_jump(else_jump);
    }

    fn return_statement(&mut self) {
        if self.func().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }

        let expected = self.func().return_type;

        if self.matches(TokenKind::SemiColon) {
            if expected > DataType::Void {
                self.error(format!(
                    "Expected function return type of '{}'.",
                    expected
                ));
            }
            self.emit_return();
        } else {
            let expr_span = self.current_token().span;
            let return_type = self.expression();

            let compat = check_compatibility(expected, return_type);
            if compat == TypeCompatibility::Incompatible {
                self.error_at(
                    format!("Expected function return type of '{}'.", expected),
                    expr_span,
                );
            }
            self.consume_expect(TokenKind::SemiColon, -2, "Expected ';' after return value.");
            self.emit_cast(compat, false);
            self.emit_op(OpCode::Return);
        }

        // Only a return outside any conditional proves every path returns.
        if self.func().conditional_depth == 0 {
            self.func_mut().return_supplied = true;
        }
    }

    // ===== Loops =====

    fn loop_begin(&mut self) {
        self.loops.push(LoopInfo {
            start: self.code_pos(),
            exit_jump: None,
            body: 0,
            scope_depth: self.scope_depth,
        });
    }

    fn loop_body(&mut self) {
        let body = self.code_pos();
        if let Some(current) = self.loops.last_mut() {
            current.body = body;
        }
        self.statement();
    }

    fn loop_test_exit(&mut self) {
        let exit = self.emit_jump(OpCode::JumpIfFalse);
        if let Some(current) = self.loops.last_mut() {
            current.exit_jump = Some(exit);
        }
    }

    /// Close the innermost loop: jump back to the start, patch the exit,
    /// and turn break placeholders into real jumps.
    fn loop_end(&mut self) {
        let info = *self.loops.last().expect("loop stack underflow");

        let current = self.code_pos();
        let offset = current - info.start + 3;
        self.emit_short_arg(OpCode::Loop, offset);

        // Exit jump is absent on infinite `for` loops.
        if let Some(exit) = info.exit_jump {
            self.patch_jump(exit);
            self.emit_op(OpCode::Pop);
        }

        self.patch_breaks(info.body);

        self.loops.pop();
    }

    /// Scan for `OP_BREAK` placeholders from `from` and patch their operands
    /// forward to the current position. Placeholders still carry 0xFFFF, so
    /// `patch_jump` ignores byte patterns that merely look like a break.
    pub(crate) fn patch_breaks(&mut self, from: usize) {
        let mut i = from;
        while i < self.code_pos() {
            if self.func().code[i] == OpCode::Break as u8 {
                self.patch_jump(i + 1);
                i += 3;
            } else {
                i += 1;
            }
        }
    }

    fn while_statement(&mut self) {
        self.conditional_begin();
        self.loop_begin();

        self.consume_expect(TokenKind::LeftParen, -1, "Expected '(' after 'while' statement.");
        self.expression();
        self.consume_expect(TokenKind::RightParen, -2, "Expect ')' after condition.");

        self.loop_test_exit();
        self.emit_op(OpCode::Pop);

        self.loop_body();

        self.loop_end();
        self.conditional_end();
    }

    fn for_statement(&mut self) {
        self.scope_begin();
        self.consume_expect(TokenKind::LeftParen, -1, "Expected '(' after 'for' statement.");

        // Initializer
        if self.matches(TokenKind::SemiColon) {
            // No initializer.
        } else if let Some((data_type, flag_bits)) = self.match_type_declaration() {
            self.variable_declaration(data_type, flag_bits);
        } else {
            self.expression_statement();
        }

        self.conditional_begin();
        self.loop_begin();

        // Condition
        if !self.matches(TokenKind::SemiColon) {
            self.expression();
            self.consume_expect(TokenKind::SemiColon, -1, "Expected ';' after 'for' loop condition.");

            self.loop_test_exit();
            self.emit_op(OpCode::Pop);
        }

        // Post-loop expression runs after the body; jump over it on entry.
        if !self.matches(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.code_pos();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume_expect(TokenKind::RightParen, -1, "Expected ')' after 'for' loop clauses.");

            let start = self.loops.last().map(|l| l.start).unwrap_or(0);
            self.emit_loop(start);
            if let Some(current) = self.loops.last_mut() {
                current.start = increment_start;
            }
            self.patch_jump(body_jump);
        }

        self.loop_body();

        self.loop_end();
        self.conditional_end();
        self.scope_end(true);
    }

    fn break_statement(&mut self) {
        self.consume_expect(TokenKind::SemiColon, -3, "Expected ';' after 'break'.");

        if self.loops.is_empty() && self.switches.is_empty() {
            self.error("Cannot use 'break' outside of a loop or switch.");
            return;
        }

        // Discard locals belonging to whichever construct is innermost.
        let loop_depth = self.loops.last().map(|l| l.scope_depth);
        let switch_depth = self.switches.last().map(|s| s.scope_depth);
        let depth = match (loop_depth, switch_depth) {
            (None, Some(sd)) => sd,
            (Some(ld), Some(sd)) if sd > ld => sd,
            (Some(ld), _) => ld,
            (None, None) => unreachable!(),
        };
        self.discard_locals(depth + 1);

        // Placeholder jump; patched when the construct ends.
        self.emit_jump(OpCode::Break);
    }

    fn continue_statement(&mut self) {
        self.consume_expect(TokenKind::SemiColon, -3, "Expected ';' after 'continue'.");

        let Some(info) = self.loops.last().copied() else {
            self.error("Cannot use 'continue' outside of a loop.");
            return;
        };

        self.discard_locals(info.scope_depth + 1);

        // Backward jump to the loop start; the offset is already known.
        let offset = self.code_pos() - info.start + 3;
        self.emit_short_arg(OpCode::Continue, offset);
    }

    // ===== Switch =====

    /// Dense-table switch. The input value stays on the stack for
    /// `OP_SWITCH`, which reads `{tableEnd, min, max}` and indexes a table
    /// of 16-bit backward offsets built after the case bodies.
    fn switch_statement(&mut self) {
        self.scope_begin();
        self.switches.push(SwitchInfo {
            body: 0,
            scope_depth: self.scope_depth,
        });
        self.conditional_begin();

        self.consume_expect(TokenKind::LeftParen, -1, "Expected '(' after 'switch' statement.");

        let switch_span = self.current_token().span;
        let switch_type = self.expression();

        if switch_type == DataType::Float {
            self.error("Switch statement requires expression of integer type ('float' invalid).");
        }

        self.consume_expect(TokenKind::RightParen, -1, "Expected ')' after 'switch' expression.");
        self.consume_expect(TokenKind::LeftCurly, -1, "Expected '{' to start 'switch' body.");

        // [OP_SWITCH][tableEnd:u16][min:i32][max:i32]
        let switch_jump = self.emit_jump(OpCode::Switch);
        let min_pos = self.emit_int(0);
        let max_pos = self.emit_int(0);

        let body = self.code_pos();
        if let Some(current) = self.switches.last_mut() {
            current.body = body;
        }

        // Case label -> body address, ordered by label.
        let mut jump_table: BTreeMap<i32, usize> = BTreeMap::new();

        while self.matches(TokenKind::Case) {
            // Fall-through case labels share one body.
            loop {
                if !self.matches(TokenKind::IntegerLiteral) && !self.matches(TokenKind::FloatLiteral)
                {
                    self.error("Expected numerical literal in case label.");
                }

                let case_token = self.prev_token();
                let value = self.parse_numeric_literal();

                // Case labels must be integers compatible with the input.
                let compat = check_compatibility(switch_type, value.ty);
                if compat != TypeCompatibility::Match {
                    self.error("Case label type not compatible.");
                }

                let label = value.value.as_i32();
                if jump_table.contains_key(&label) {
                    self.error_at(
                        format!("case label '{}' already exists.", case_token.text),
                        case_token.span,
                    );
                } else {
                    jump_table.insert(label, self.code_pos());
                }

                self.consume_expect(TokenKind::Colon, -1, "Expected ':' after case label.");

                if !self.matches(TokenKind::Case) {
                    break;
                }
            }

            // Case body: any number of statements, no block required.
            while !self.check(TokenKind::Case)
                && !self.check(TokenKind::Default)
                && !self.check(TokenKind::RightCurly)
                && !self.is_at_end()
            {
                self.statement();
            }
        }

        // The default body runs for out-of-range values, and by fall-through
        // unless a break jumps out above.
        let default_case = self.code_pos();
        if self.matches(TokenKind::Default) {
            self.consume_expect(TokenKind::Colon, -1, "Expected ':' after default label.");
            while !self.check(TokenKind::RightCurly) && !self.is_at_end() {
                self.statement();
            }
        }

        self.consume_expect(TokenKind::RightCurly, -1, "Expected '}' to end 'switch' body.");

        if !jump_table.is_empty() {
            let case_min = *jump_table.keys().next().unwrap();
            let case_max = *jump_table.keys().next_back().unwrap();
            let case_range = case_max - case_min;

            if (jump_table.len() as i32 * 2) <= case_range {
                self.warn_at(
                    "Switch statement contains a large range and a small number of case labels. \
                     Consider using multiple condensed switch statements or if/else statements \
                     instead.",
                    switch_span,
                );
            }

            self.patch_int(min_pos, case_min);
            self.patch_int(max_pos, case_max);

            // Fall-through out of the last body jumps over the table.
            let table_start_jump = self.emit_jump(OpCode::Jump);

            // The default entry sits first so out-of-range values always
            // have a target.
            let default_jump = self.code_pos() - default_case;
            self.emit_short(default_jump);

            // Dense table over the whole range; gaps get the default.
            let mut label = case_min;
            loop {
                let address = jump_table.get(&label).copied().unwrap_or(default_case);
                let jump_back = self.code_pos() - address;
                self.emit_short(jump_back);
                if label == case_max {
                    break;
                }
                label += 1;
            }

            self.patch_jump(table_start_jump);
        }

        self.patch_jump(switch_jump);

        // Take care of break statements.
        let body = self.switches.last().map(|s| s.body).unwrap_or(0);
        self.patch_breaks(body);
        self.switches.pop();

        self.conditional_end();
        self.scope_end(true);
    }

    // ===== Declarations =====

    pub(crate) fn variable_declaration(&mut self, data_type: DataType, flag_bits: u32) {
        self.type_begin(data_type);

        let Some(variable) = self.parse_variable(data_type, flag_bits, "") else {
            self.type_end();
            return;
        };

        let input_type;
        let mut initialised = false;
        if self.matches(TokenKind::Assign) {
            initialised = true;
            let expr_span = self.current_token().span;
            input_type = self.expression();
            if input_type != self.var(variable).data_type() {
                let target = self.var(variable).data_type();
                self.warn_at(
                    format!(
                        "Expression will be implicitly cast to assignee type: {}",
                        target
                    ),
                    expr_span,
                );
            }
        } else {
            self.emit_op(OpCode::Nil);
            input_type = DataType::Int32;
        }
        self.consume_expect(TokenKind::SemiColon, -2, "Expected ';' after variable declaration.");

        self.define_variable(Some(variable), input_type);

        // The implicit zero store is not a user assignment; keep the
        // unassigned-at-end warning meaningful.
        if !initialised {
            self.var_mut(variable).writes = 0;
        }

        self.type_end();
    }

    /// `T name[N] = { ... };` — N elements packed into
    /// `ceil(N * sizeof(T) / 4)` value slots. The head variable owns the
    /// first slot; synthetic `__name__<i>` entries reserve the rest.
    pub(crate) fn array_declaration(&mut self, data_type: DataType, flag_bits: u32) {
        let flag_bits = flag_bits | vf::ARRAY;

        let Some(head) = self.parse_variable(data_type, flag_bits, "") else {
            return;
        };
        let name = self.var(head).name.clone();
        self.mark_initialised();

        let packed = packed_count(data_type);
        let mut count: Option<i32> = None;

        // Locals grow the stack at runtime; the size operand is patched once
        // known. Globals get their slots from the globals-area sizing.
        let array_code_pos = if self.current_scope() == crate::value::VarScope::Local {
            Some(self.emit_array())
        } else {
            None
        };

        self.consume_expect(TokenKind::LeftSquareBracket, -2, "Expected '[' after array name.");
        if self.matches(TokenKind::IntegerLiteral) {
            count = parse_integer(&self.prev_token().text);
        } else if !self.check(TokenKind::RightSquareBracket) {
            self.error("Array size must be an integer literal.");
        }
        self.consume_expect(TokenKind::RightSquareBracket, -2, "Expected ']' after array size");

        if self.matches(TokenKind::Assign) && self.matches(TokenKind::LeftCurly) {
            let mut init_count: i32 = 0;
            self.type_begin(data_type);

            loop {
                if init_count > 0 && init_count % packed as i32 == 0 {
                    // Past a pack-size boundary; reserve another slot.
                    let scope = self.current_scope();
                    let synthetic = format!("__{}__{}", name, init_count);
                    self.create_variable(&synthetic, scope, data_type, vf::NORMAL);
                }

                let Some(array_var) = self.resolve_variable(&name, "") else {
                    break;
                };
                self.var_mut(array_var).writes += 1;

                // [pointer][offset][value] for the indexed store.
                self.emit_absolute_pointer(array_var);
                self.emit_constant(ConstantInfo::new(DataType::Int32, Value::from_i32(init_count)));

                let expr_type = self.expression();

                let compat = check_compatibility(data_type, expr_type);
                if compat == TypeCompatibility::Incompatible {
                    self.error(format!("Value of type '{}' expected.", data_type));
                } else if compat != TypeCompatibility::Match {
                    self.warn_at(
                        format!(
                            "Value will be implicitly cast to type '{}'. Data may be lost.",
                            data_type
                        ),
                        self.prev_token().span,
                    );
                }

                self.emit_set_at_offset(data_type, expr_type);
                self.emit_pop(1);

                init_count += 1;
                if !self.matches(TokenKind::Comma) || self.is_at_end() {
                    break;
                }
            }

            self.type_end();
            self.consume_expect(TokenKind::RightCurly, -2, "Expected '}' after array initialization.");

            match count {
                Some(declared) if declared != init_count => {
                    self.error("Array explicit size and initialized size do not match.");
                }
                _ => count = Some(init_count),
            }
        } else if let Some(declared) = count {
            if declared > 0 {
                self.zero_initialise_array(head, &name, data_type, declared, packed);
            }
        }

        let count = count.unwrap_or(0);
        if count <= 0 {
            self.error("Cannot declare array with size of 0.");
            return;
        }

        // Size in value slots.
        let size = (byte_size(data_type) * count as usize + 3) / 4;
        if let Some(array_var) = self.resolve_variable(&name, "") {
            self.var_mut(array_var).size = size;
        }

        if let Some(pos) = array_code_pos {
            self.patch_array(pos, size);
        }

        self.consume_expect(TokenKind::SemiColon, -2, "Expected ';' after array declaration.");
    }

    /// Reserve arena slots past each pack boundary and write zeros through
    /// every value slot.
    fn zero_initialise_array(
        &mut self,
        head: VarHandle,
        name: &str,
        data_type: DataType,
        count: i32,
        packed: usize,
    ) {
        let mut boundary = packed as i32;
        while boundary < count {
            let scope = self.current_scope();
            let synthetic = format!("__{}__{}", name, boundary);
            if self.create_variable(&synthetic, scope, data_type, vf::NORMAL).is_none() {
                self.error("Failed to create array value");
            }
            boundary += packed as i32;
        }

        let slots = (byte_size(data_type) * count as usize + 3) / 4;
        for slot in 0..slots {
            self.emit_absolute_pointer(head);
            self.emit_constant(ConstantInfo::new(DataType::Int32, Value::from_i32(slot as i32)));
            self.emit_op(OpCode::Nil);
            // Whole-slot store, regardless of element width.
            self.emit_op(OpCode::SetIndexedS32);
            self.emit_pop(1);
        }
    }

    pub(crate) fn function_declaration(&mut self, data_type: DataType) {
        let token = self.consume_expect(TokenKind::Identifier, -2, "Expected function name.");
        self.function(&token.text, FunctionKind::Function, data_type);
    }

    /// Shared builder for functions, methods, constructors and destructors:
    /// parameter list, body block, implicit return, id bookkeeping.
    pub(crate) fn function(
        &mut self,
        name: &str,
        kind: FunctionKind,
        return_type: DataType,
    ) -> usize {
        let func_id = self.create_function(name, kind, return_type);

        self.scope_begin();

        self.consume_expect(TokenKind::LeftParen, -2, "Expected '(' after function name.");

        // Class methods take a hidden `this` pointer as argument zero.
        if kind == FunctionKind::ClassMethod {
            let class_name = self
                .current_class
                .map(|c| self.classes[c].name.clone())
                .unwrap_or_default();
            if let Some(this_var) = self.create_variable(
                "this",
                crate::value::VarScope::Local,
                DataType::Pointer,
                vf::POINTER | vf::CLASS | vf::CONST,
            ) {
                // Naming the owning class makes `this.member` resolve.
                self.var_mut(this_var).parent_class = class_name;
                self.mark_initialised();
            }
            self.func_mut().args.push(DataType::Pointer);
        }

        if !self.check(TokenKind::RightParen) {
            loop {
                if self.func().arg_count() >= 255 {
                    self.error("Can't have more than 255 parameters.");
                }

                if let Some((data_type, mut flag_bits)) = self.match_type_declaration() {
                    let mut class_name = None;
                    if data_type == DataType::Class {
                        flag_bits |= vf::CLASS;
                        class_name = Some(self.prev_token().text);
                        if flag_bits & vf::POINTER == 0 {
                            self.error("Classes should be passed by reference instead of value.");
                        }
                    }

                    if let Some(arg) =
                        self.parse_variable(data_type, flag_bits, "Expected parameter name.")
                    {
                        if let Some(class_name) = class_name {
                            if self.resolve_class(&class_name).is_some() {
                                self.var_mut(arg).parent_class = class_name;
                            }
                        }
                        let arg_type = self.var(arg).data_type();
                        self.func_mut().args.push(arg_type);
                        self.mark_initialised();
                    }
                } else {
                    self.error("Expected argument type.");
                }

                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume_expect(TokenKind::RightParen, -2, "Expected ')' after parameters.");

        self.consume_expect(TokenKind::LeftCurly, -2, "Expected '{' before function body.");
        eprintln!("DEBUG function(): entering block, current_token={:?}", self.current_token());
        self.block();
        eprintln!("DEBUG function(): after block, current_token={:?}", self.current_token());

        // No need to pop the stack when returning from a function.
        self.scope_end(false);

        if !self.func().return_supplied {
            if self.func().return_type == DataType::Void {
                self.emit_return();
            } else {
                let span = self.func().span;
                self.error_at("Function requires a return value.", span);
            }
        }

        self.end_function()
    }
}
