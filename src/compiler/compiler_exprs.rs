//! Expression parsing and emission: the Pratt ladder, literals, variables,
//! calls, indexing and the typed operator families.

use crate::compiler::compiler::{Callee, Compiler, VarHandle};
use crate::compiler::function::FunctionKind;
use crate::compiler::rules::{self, ParseFn, Precedence};
use crate::compiler::variable::ConstantInfo;
use crate::lexer::scanner::{parse_float, parse_integer};
use crate::lexer::token::{Token, TokenKind};
use crate::program::opcode::OpCode;
use crate::types::{check_compatibility, TypeCompatibility};
use crate::value::{DataType, Value};

/// Flattened call-target details used while parsing an argument list.
pub(crate) struct CalleeInfo {
    pub kind: FunctionKind,
    pub args: Vec<DataType>,
    pub is_parameterless: bool,
    pub max_args: usize,
}

impl CalleeInfo {
    /// User-visible argument count (the hidden `this` excluded).
    pub fn arg_count(&self) -> usize {
        self.args.len() - usize::from(self.kind == FunctionKind::ClassMethod)
    }
}

impl<'d> Compiler<'d> {
    /// Parse one full expression; returns the type it left on the stack.
    pub(crate) fn expression(&mut self) -> DataType {
        self.type_begin(DataType::None);
        self.parse_precedence(Precedence::Assignment);
        self.type_end()
    }

    pub(crate) fn parse_precedence(&mut self, precedence: Precedence) {
        let token = self.consume();

        let can_assign = precedence <= Precedence::Assignment;
        let prefix = rules::get(token.kind).prefix;
        if prefix == ParseFn::None {
            self.error_at("Expected expression.", token.span);
            return;
        }

        self.run_parse_fn(prefix, can_assign);

        // Infix operations of equal or higher precedence bind here.
        while precedence <= rules::get(self.current_token().kind).precedence {
            let infix = rules::get(self.consume().kind).infix;
            self.run_parse_fn(infix, can_assign);
        }

        if can_assign && self.matches(TokenKind::Assign) {
            self.error("Invalid assignment target.");
        }
    }

    fn run_parse_fn(&mut self, func: ParseFn, can_assign: bool) {
        match func {
            ParseFn::Grouping => self.grouping(),
            ParseFn::Literal => self.numeric_literal(),
            ParseFn::Unary => self.unary(),
            ParseFn::Binary => self.binary(),
            ParseFn::String => self.string(),
            ParseFn::Variable => self.variable(can_assign),
            ParseFn::And => self.and_expr(),
            ParseFn::Or => self.or_expr(),
            ParseFn::Ternary => self.ternary(),
            ParseFn::Call => self.call(),
            ParseFn::ArrayIndex => self.pointer_index(can_assign),
            ParseFn::VariablePrefix => self.variable_prefix(),
            ParseFn::VariablePostfix => self.variable_postfix(can_assign),
            ParseFn::None => {}
        }
    }

    // ===== Literals =====

    /// Read the literal token that got us here into a typed constant.
    pub(crate) fn parse_numeric_literal(&mut self) -> ConstantInfo {
        let token = self.prev_token();

        match token.kind {
            TokenKind::False => ConstantInfo::new(DataType::Bool, Value::from_bool(false)),
            TokenKind::True => ConstantInfo::new(DataType::Bool, Value::from_bool(true)),

            TokenKind::FloatLiteral => match parse_float(&token.text) {
                Some(value) => ConstantInfo::new(DataType::Float, Value::from_f32(value)),
                None => {
                    self.error_at("Failed to parse floating point literal", token.span);
                    ConstantInfo::new(DataType::Int32, Value::from_i32(0))
                }
            },

            TokenKind::IntegerLiteral => match parse_integer(&token.text) {
                Some(value) => ConstantInfo::new(DataType::Int32, Value::from_i32(value)),
                None => {
                    self.error_at("Failed to parse integer literal", token.span);
                    ConstantInfo::new(DataType::Int32, Value::from_i32(0))
                }
            },

            TokenKind::Null => ConstantInfo::new(DataType::Int32, Value::from_i32(0)),

            _ => ConstantInfo::new(DataType::Int32, Value::from_i32(0)),
        }
    }

    fn numeric_literal(&mut self) {
        let literal = self.parse_numeric_literal();

        self.emit_constant(literal);
        self.type_set_current(literal.ty, false);

        let compat = self.type_check(literal.ty, "");
        if compat == TypeCompatibility::CastSignedToFloat {
            let span = self.prev_token().span;
            self.warn_at(
                "Integer literal will be implicitly cast to surrounding float type.\n\
                 Add decimal place(s) to specify a floating point literal.",
                span,
            );
        } else if compat == TypeCompatibility::CastFloatToSigned {
            let span = self.prev_token().span;
            self.warn_at(
                "Floating point literal will be implicitly cast to surrounding integer type.\n\
                 Remove decimal place(s) to specify a integer literal.",
                span,
            );
        }

        self.emit_cast(compat, false);
    }

    fn string(&mut self) {
        let token = self.prev_token();
        self.emit_string(&token.text);
    }

    // ===== Variables and calls =====

    fn variable(&mut self, can_assign: bool) {
        let token = self.prev_token();

        if self.natives.contains(&token.text) {
            self.native_function(&token);
        } else if self.check_function(&token) {
            self.named_function(&token);
        } else {
            self.named_variable(&token, can_assign);
        }
    }

    fn check_function(&self, token: &Token) -> bool {
        match self.find_script_function(&token.text) {
            Some(id) => self.functions[id].kind == FunctionKind::Function,
            None => false,
        }
    }

    fn check_method(&self, token: &Token, parent: VarHandle) -> bool {
        let parent_var = self.var(parent);
        if !parent_var.is_class_head() {
            return false;
        }
        let Some(class) = self.resolve_class(&parent_var.parent_class) else {
            return false;
        };
        let mangled = crate::compiler::class::ClassInfo::method_name(
            &self.classes[class].name,
            &token.text,
        );
        self.classes[class].methods.iter().any(|m| *m == mangled)
    }

    fn named_variable(&mut self, token: &Token, can_assign: bool) {
        // `this` resolves like any other local; it is declared in slot 0 of
        // every method.
        let name = token.text.clone();

        let Some(mut variable) = self.resolve_variable(&name, "") else {
            return;
        };

        // Walk dot chains through class heads.
        while self.var(variable).is_class_head() && self.matches(TokenKind::Dot) {
            let member_token =
                self.consume_expect(TokenKind::Identifier, -2, "Expected identifier after '.'.");

            if self.check_method(&member_token, variable) {
                self.named_method(&member_token, variable);
                return;
            }

            let parent = self.var(variable).parent_instance.clone();
            match self.resolve_variable(&member_token.text, &parent) {
                Some(next) => variable = next,
                None => return,
            }
        }

        let var_type = self.var(variable).data_type();
        self.type_set_current(var_type, false);

        if self.var(variable).is_array() {
            // Arrays evaluate to a pointer to their first slot.
            self.emit_absolute_pointer(variable);
            self.current_array = Some(variable);
            return;
        }

        self.type_begin(var_type);

        if can_assign {
            if let Some(assign_token) = self.match_assignment() {
                self.assign_variable(variable, assign_token);
                self.type_end();
                return;
            }
        }
        let output = self.expecting();
        self.emit_get_variable(variable, output);

        self.type_end();
    }

    fn named_function(&mut self, token: &Token) {
        self.consume_expect(TokenKind::LeftParen, -2, "Expected '(' after function name");

        if let Some(func) = self.find_script_function(&token.text) {
            self.emit_call_direct(func, None);
        }
    }

    fn named_method(&mut self, token: &Token, parent: VarHandle) {
        self.consume_expect(TokenKind::LeftParen, -2, "Expected '(' after method name");

        let parent_class = self.var(parent).parent_class.clone();
        let mangled =
            crate::compiler::class::ClassInfo::method_name(&parent_class, &token.text);

        let method = self
            .find_script_function(&mangled)
            .filter(|id| self.functions[*id].kind == FunctionKind::ClassMethod);

        let Some(method) = method else {
            self.error_at(
                format!(
                    "Method '{}' is not a member of '{}'.",
                    token.text, parent_class
                ),
                token.span,
            );
            return;
        };

        self.emit_call_direct(method, Some(parent));
    }

    fn native_function(&mut self, token: &Token) {
        let Some(native) = self.natives.resolve(&token.text).cloned() else {
            self.error_at(
                format!("Failed to resolve native function '{}'.", token.text),
                token.span,
            );
            return;
        };

        self.emit_constant(ConstantInfo::new(
            DataType::NativeFunc,
            Value::from_function(native.id),
        ));

        if !self.check(TokenKind::LeftParen) {
            self.error_at(format!("Expected '(' after {}", token.text), token.span);
        }
    }

    /// Infix `(`: completes a call whose callee constant is already on the
    /// stack. User functions finish inside `named_function`, so in practice
    /// this handles native calls.
    fn call(&mut self) {
        let token = self.look_back(2);

        let Some(callee) = self.find_function(&token.text) else {
            self.error_at("Failed to resolve called function.", token.span);
            return;
        };

        let info = self.callee_info(&callee);

        // Native calls don't save a frame.
        if info.kind != FunctionKind::Native {
            self.emit_op(OpCode::Frame);
        }

        let parent = if info.kind == FunctionKind::ClassMethod {
            let parent_token = self.look_back(4);
            self.resolve_variable(&parent_token.text, "")
        } else {
            None
        };

        let arg_count = self.argument_list(&info, parent);

        let call_op = if info.kind == FunctionKind::Native {
            OpCode::CallNative
        } else {
            OpCode::Call
        };
        self.emit_call(call_op, arg_count);
    }

    pub(crate) fn callee_info(&self, callee: &Callee) -> CalleeInfo {
        match callee {
            Callee::Script(id) => {
                let func = &self.functions[*id];
                CalleeInfo {
                    kind: func.kind,
                    args: func.args.clone(),
                    is_parameterless: func.is_parameterless,
                    max_args: func.max_args(),
                }
            }
            Callee::Native(native) => CalleeInfo {
                kind: FunctionKind::Native,
                args: native.args.clone(),
                is_parameterless: false,
                max_args: 255,
            },
        }
    }

    /// Compile a call's argument expressions, casting each to the declared
    /// parameter type. Returns the emitted argument count including the
    /// hidden `this`.
    pub(crate) fn argument_list(
        &mut self,
        callee: &CalleeInfo,
        parent: Option<VarHandle>,
    ) -> usize {
        let expected = callee.arg_count();
        let mut arg_count = 0usize;
        let mut hidden = 0usize;

        if callee.kind == FunctionKind::ClassMethod {
            match parent {
                Some(handle) if self.var(handle).data_type() == DataType::Pointer => {
                    // Inside a method `this` already holds an absolute
                    // pointer; read its value.
                    self.emit_pointer(handle, false);
                    self.emit_op(OpCode::GetVariable);
                    hidden += 1;
                }
                Some(handle)
                    if !self.var(handle).parent_instance.is_empty()
                        && self.var(handle).member_index == 0 =>
                {
                    // Push a pointer to the instance as the first argument.
                    self.emit_absolute_pointer(handle);
                    hidden += 1;
                }
                _ => {
                    self.error("Can't call class method outside of class instance");
                }
            }
        }

        if !callee.is_parameterless && !self.check(TokenKind::RightParen) {
            loop {
                if arg_count >= callee.max_args {
                    self.error(format!(
                        "Can't have more than {} arguments.",
                        callee.max_args
                    ));
                }

                if arg_count >= expected {
                    // Still compile the expression so parsing can continue,
                    // but skip type checking.
                    self.expression();
                    arg_count += 1;
                    if !self.matches(TokenKind::Comma) {
                        break;
                    }
                    continue;
                }

                let arg_type = callee.args[arg_count + hidden];
                self.type_begin(arg_type);

                let expr_type = self.expression();
                let compat = check_compatibility(arg_type, expr_type);
                if compat == TypeCompatibility::Incompatible {
                    self.error(format!("Argument of type '{}' expected.", arg_type));
                }
                self.emit_cast(compat, false);

                self.type_end();
                arg_count += 1;

                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }

        if !callee.is_parameterless {
            self.consume_expect(TokenKind::RightParen, -2, "Expected ')' after arguments.");
        }

        if arg_count != expected {
            let what = if callee.kind == FunctionKind::ClassMethod {
                "Method"
            } else {
                "Function"
            };
            self.error(format!(
                "{} expects {} argument(s), but {} provided.",
                what, expected, arg_count
            ));
        }

        arg_count + hidden
    }

    /// Save the frame, push the callee id, compile arguments, call.
    pub(crate) fn emit_call_direct(&mut self, func_id: usize, parent: Option<VarHandle>) {
        self.emit_op(OpCode::Frame);

        self.emit_constant(ConstantInfo::new(
            DataType::Function,
            Value::from_function(func_id as u32),
        ));

        let info = self.callee_info(&Callee::Script(func_id));
        let arg_count = self.argument_list(&info, parent);

        self.emit_call(OpCode::Call, arg_count);
    }

    // ===== Assignment =====

    pub(crate) fn match_assignment(&mut self) -> Option<TokenKind> {
        let kind = self.current_token().kind;
        match kind {
            TokenKind::Assign
            | TokenKind::PlusEquals
            | TokenKind::MinusEquals
            | TokenKind::TimesEquals
            | TokenKind::DivideEquals
            | TokenKind::BitwiseAndEquals
            | TokenKind::BitwiseOrEquals
            | TokenKind::BitwiseXorEquals => {
                self.advance_token();
                Some(kind)
            }
            _ => None,
        }
    }

    fn assign_variable(&mut self, handle: VarHandle, assign_token: TokenKind) {
        let mut expr_type = self.current_type();

        if assign_token == TokenKind::Assign {
            expr_type = self.expression();
        } else {
            // Compound assignment reads the old value, then runs the binary
            // operator keyed off the compound token itself.
            let current = self.current_type();
            self.emit_get_variable(handle, current);
            self.binary();
        }

        self.emit_set_variable(OpCode::Assign, handle, expr_type);
    }

    fn assign_array_index(&mut self, array_type: DataType, assign_token: TokenKind) {
        let mut expr_type = self.current_type();

        if assign_token == TokenKind::Assign {
            expr_type = self.expression();
        } else {
            // Pointer and index get consumed twice: once for the read, once
            // for the write-back.
            self.emit_op(OpCode::Duplicate2);
            let current = self.current_type();
            self.emit_get_from_offset(array_type, current);
            self.binary();
        }

        if let Some(array) = self.current_array {
            self.var_mut(array).writes += 1;
        }

        self.emit_set_at_offset(array_type, expr_type);
    }

    // ===== Indexing =====

    fn pointer_index(&mut self, can_assign: bool) {
        // '[' is already consumed.
        let array_type = self.current_type();
        if array_type == DataType::None {
            self.error("Unexpected type.");
            return;
        }

        // Index expression, expected to resolve to an integer.
        self.type_begin(DataType::Int32);
        let index_type = self.expression();
        self.type_end();

        self.consume_expect(
            TokenKind::RightSquareBracket,
            -2,
            "Expected ']' after index expression.",
        );

        let cast = check_compatibility(DataType::Int32, index_type);
        self.emit_cast(cast, false);

        if can_assign {
            if let Some(assign_token) = self.match_assignment() {
                self.assign_array_index(array_type, assign_token);
                return;
            }
        }
        let output = self.current_type();
        self.emit_get_from_offset(array_type, output);
    }

    // ===== Prefix / postfix =====

    fn variable_prefix(&mut self) {
        let operator = self.prev_token();

        if !self.matches(TokenKind::Identifier) {
            self.error_at("Expected identifier after prefix operator.", operator.span);
            return;
        }

        let name = self.prev_token().text;
        let Some(variable) = self.resolve_variable(&name, "") else {
            return;
        };

        let is_member = self.is_member_of_current_class(variable);
        self.emit_pointer(variable, is_member);

        match operator.kind {
            TokenKind::PlusPlus => self.emit_op(OpCode::PrefixIncrease),
            TokenKind::MinusMinus => self.emit_op(OpCode::PrefixDecrease),
            _ => self.error_at("Invalid variable prefix operation.", operator.span),
        }

        // Cast the pushed value to the required type.
        let var_type = self.var(variable).data_type();
        let cast = self.type_check(var_type, "");
        self.emit_cast(cast, false);
    }

    fn variable_postfix(&mut self, can_assign: bool) {
        if !can_assign {
            self.error("Token is not assignable.");
            return;
        }

        // The read value is already on the stack; only the stored value
        // changes.
        let name = self.look_back(2).text;
        let Some(variable) = self.resolve_variable(&name, "") else {
            return;
        };

        let operator = self.prev_token();
        let is_member = self.is_member_of_current_class(variable);
        self.emit_pointer(variable, is_member);

        match operator.kind {
            TokenKind::PlusPlus => self.emit_op(OpCode::PlusPlus),
            TokenKind::MinusMinus => self.emit_op(OpCode::MinusMinus),
            _ => self.error_at("Invalid variable postfix operation.", operator.span),
        }
    }

    // ===== Operators =====

    fn unary(&mut self) {
        let operator = self.prev_token().kind;

        self.type_begin(DataType::None);

        // Compile the operand.
        self.parse_precedence(Precedence::Unary);

        let operand_type = self.type_stack.last().map(|f| f.ty).unwrap_or(DataType::None);

        match operator {
            TokenKind::Minus => self.emit_op(if operand_type == DataType::Float {
                OpCode::NegateF
            } else {
                OpCode::NegateI
            }),
            TokenKind::Exclamation => self.emit_op(OpCode::Not),
            TokenKind::BitwiseNot => self.emit_op(OpCode::BitNot),
            _ => {}
        }

        let expected = self.expecting();
        self.emit_cast(check_compatibility(expected, operand_type), false);

        self.type_end();
    }

    pub(crate) fn binary(&mut self) {
        let lhs_type = self.current_type();
        self.type_begin(DataType::None);

        let operator = self.prev_token().kind;
        let rule = rules::get(operator);
        self.parse_precedence(rule.precedence.next());

        let rhs_type = self.current_type();

        // f32 wins over everything; u32 only survives when both sides are
        // unsigned; everything else runs signed.
        let mut binary_type = if lhs_type == DataType::Float || rhs_type == DataType::Float {
            DataType::Float
        } else if lhs_type == DataType::Uint32 && rhs_type == DataType::Uint32 {
            DataType::Uint32
        } else {
            DataType::Int32
        };

        // Bitwise ops reject floats outright; modulus quietly truncates.
        match operator {
            TokenKind::BitwiseAnd
            | TokenKind::BitwiseAndEquals
            | TokenKind::BitwiseOr
            | TokenKind::BitwiseOrEquals
            | TokenKind::BitwiseXor
            | TokenKind::BitwiseXorEquals
            | TokenKind::ShiftLeft
            | TokenKind::ShiftRight => {
                if binary_type == DataType::Float {
                    self.error("Cannot use floating point numbers in binary operations.");
                }
                binary_type = DataType::Int32;
            }
            TokenKind::Percent => {
                if binary_type == DataType::Float {
                    let span = self.prev_token().span;
                    self.warn_at(
                        "'%' operator with floating point values will be implicitly cast to \
                         integer type. Data may be lost.",
                        span,
                    );
                }
                binary_type = DataType::Int32;
            }
            _ => {}
        }

        self.emit_cast(check_compatibility(binary_type, lhs_type), true);
        self.emit_cast(check_compatibility(binary_type, rhs_type), false);

        match operator {
            // Term
            TokenKind::Plus | TokenKind::PlusEquals => self.emit_add(binary_type),
            TokenKind::Minus | TokenKind::MinusEquals => self.emit_subtract(binary_type),

            // Factor
            TokenKind::Star | TokenKind::TimesEquals => self.emit_multiply(binary_type),
            TokenKind::Slash | TokenKind::DivideEquals => self.emit_divide(binary_type),
            TokenKind::Percent => self.emit_op(OpCode::Modulus),

            // Comparison
            TokenKind::Equals => self.emit_equal(binary_type),
            TokenKind::NotEqual => self.emit_not_equal(binary_type),
            TokenKind::LessThan => self.emit_less(binary_type),
            TokenKind::LessEqual => self.emit_less_or_equal(binary_type),
            TokenKind::GreaterThan => self.emit_greater(binary_type),
            TokenKind::GreaterEqual => self.emit_greater_or_equal(binary_type),

            // Bitwise
            TokenKind::BitwiseAnd | TokenKind::BitwiseAndEquals => self.emit_op(OpCode::BitAnd),
            TokenKind::BitwiseOr | TokenKind::BitwiseOrEquals => self.emit_op(OpCode::BitOr),
            TokenKind::BitwiseXor | TokenKind::BitwiseXorEquals => self.emit_op(OpCode::BitXor),
            TokenKind::ShiftLeft => self.emit_op(OpCode::BitShiftL),
            TokenKind::ShiftRight => self.emit_op(OpCode::BitShiftR),

            _ => {}
        }

        self.type_end();

        // If the resulting type does not match the required type, cast it.
        let compat = self.type_check(binary_type, "");
        self.emit_cast(compat, false);
    }

    fn and_expr(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_expr(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfTrue);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    /// `cond ? a : b`. Both arms contribute one result type; the enclosing
    /// expected type dictates a final cast.
    fn ternary(&mut self) {
        // The condition value is already on the stack; drop its type.
        self.type_set_current(DataType::None, true);
        let expecting_type = self.current_type();

        let false_jump = self.emit_jump(OpCode::JumpIfFalse);

        // True arm.
        self.emit_op(OpCode::Pop);
        self.expression();
        let exit_jump = self.emit_jump(OpCode::Jump);

        self.consume_expect(
            TokenKind::Colon,
            -1,
            "Expected ':' after ternary true result expression.",
        );

        // False arm.
        self.patch_jump(false_jump);
        self.emit_op(OpCode::Pop);
        let value_type = self.expression();

        self.patch_jump(exit_jump);

        let compat = self.type_check(value_type, "");
        if compat.is_cast() {
            let span = self.prev_token().span;
            self.warn_at(
                format!(
                    "Expression will be implicitly cast to assignee type: {}",
                    expecting_type
                ),
                span,
            );
        }
        self.emit_cast(compat, false);

        // Settle on the expected type so no further casting happens.
        self.type_set_current(expecting_type, false);
    }

    fn grouping(&mut self) {
        // Group type starts fresh and ignores any surrounding type.
        self.type_begin(DataType::None);
        self.type_set_ignore_expecting();

        let expr_type = self.expression();

        self.type_set_current(expr_type, false);
        let group_type = self.type_stack.last().map(|f| f.ty).unwrap_or(DataType::None);
        self.type_end();

        self.type_set_current(group_type, false);

        self.consume_expect(TokenKind::RightParen, -2, "");

        // Cast the group to match the surrounding type.
        let compat = self.type_check(expr_type, "");
        self.emit_cast(compat, false);
    }

    // ===== Typed operator families =====

    pub(crate) fn emit_add(&mut self, ty: DataType) {
        self.emit_op(match ty {
            DataType::Float => OpCode::AddF,
            DataType::Uint32 => OpCode::AddU,
            _ => OpCode::AddS,
        });
    }

    pub(crate) fn emit_subtract(&mut self, ty: DataType) {
        self.emit_op(match ty {
            DataType::Float => OpCode::SubF,
            DataType::Uint32 => OpCode::SubU,
            _ => OpCode::SubS,
        });
    }

    pub(crate) fn emit_multiply(&mut self, ty: DataType) {
        self.emit_op(match ty {
            DataType::Float => OpCode::MultF,
            DataType::Uint32 => OpCode::MultU,
            _ => OpCode::MultS,
        });
    }

    pub(crate) fn emit_divide(&mut self, ty: DataType) {
        self.emit_op(match ty {
            DataType::Float => OpCode::DivF,
            DataType::Uint32 => OpCode::DivU,
            _ => OpCode::DivS,
        });
    }

    pub(crate) fn emit_equal(&mut self, ty: DataType) {
        self.emit_op(match ty {
            DataType::Float => OpCode::EqualF,
            DataType::Uint32 => OpCode::EqualU,
            _ => OpCode::EqualS,
        });
    }

    pub(crate) fn emit_not_equal(&mut self, ty: DataType) {
        self.emit_op(match ty {
            DataType::Float => OpCode::NotEqualF,
            DataType::Uint32 => OpCode::NotEqualU,
            _ => OpCode::NotEqualS,
        });
    }

    pub(crate) fn emit_less(&mut self, ty: DataType) {
        self.emit_op(match ty {
            DataType::Float => OpCode::LessF,
            DataType::Uint32 => OpCode::LessU,
            _ => OpCode::LessS,
        });
    }

    pub(crate) fn emit_less_or_equal(&mut self, ty: DataType) {
        self.emit_op(match ty {
            DataType::Float => OpCode::LessOrEqualF,
            DataType::Uint32 => OpCode::LessOrEqualU,
            _ => OpCode::LessOrEqualS,
        });
    }

    pub(crate) fn emit_greater(&mut self, ty: DataType) {
        self.emit_op(match ty {
            DataType::Float => OpCode::GreaterF,
            DataType::Uint32 => OpCode::GreaterU,
            _ => OpCode::GreaterS,
        });
    }

    pub(crate) fn emit_greater_or_equal(&mut self, ty: DataType) {
        self.emit_op(match ty {
            DataType::Float => OpCode::GreaterOrEqualF,
            DataType::Uint32 => OpCode::GreaterOrEqualU,
            _ => OpCode::GreaterOrEqualS,
        });
    }
}
