//! Class declarations and instance creation.
//!
//! A class body compiles into a synthesized init function that writes field
//! defaults through the instance pointer. Declaring an instance flattens the
//! fields into the enclosing arena, calls the init function, and then the
//! constructor when one is invoked.

use crate::compiler::class::ClassInfo;
use crate::compiler::compiler::Compiler;
use crate::compiler::function::FunctionKind;
use crate::compiler::variable::{flags as vf, ConstantInfo, VariableInfo};
use crate::lexer::token::TokenKind;
use crate::program::opcode::OpCode;
use crate::value::{DataType, Value, VarScope, VmPointer};

impl<'d> Compiler<'d> {
    pub(crate) fn class_declaration(&mut self) {
        let token = self.consume_expect(TokenKind::Identifier, -1, "Expected class name.");
        let class_name = token.text.clone();

        if self.resolve_class(&class_name).is_some() {
            self.error_at(format!("class '{}' already exists.", class_name), token.span);
            return;
        }

        let class_id = self.create_class(&class_name);

        self.consume_expect(TokenKind::LeftCurly, -2, "Expected '{' before class body.");

        // Field declarations compile into the init function; methods nest
        // inside it like any other function declaration.
        let init_id = self.create_function(
            &ClassInfo::init_name(&class_name),
            FunctionKind::ClassInit,
            DataType::Void,
        );
        self.functions[init_id].is_parameterless = true;
        self.functions[init_id].args.push(DataType::Pointer);
        self.classes[class_id].init_function_id = Some(init_id);

        // `this` occupies slot 0 of the init function.
        let slot = self.functions[init_id].locals.len() as u16;
        let mut this_var = VariableInfo::new(
            "this",
            VmPointer::new(slot, DataType::Pointer, VarScope::Local),
            vf::NORMAL,
        );
        this_var.parent_class = class_name.clone();
        this_var.depth = self.scope_depth;
        self.functions[init_id].locals.push(this_var);

        while !self.check(TokenKind::RightCurly) && !self.is_at_end() {
            let destructor = self.matches(TokenKind::BitwiseNot);

            if let Some((field_type, field_flags)) = self.match_type_declaration() {
                if field_type == DataType::Class && self.prev_token().text == class_name {
                    // A member named after the class is the constructor.
                    if destructor {
                        self.destructor_declaration();
                    } else {
                        self.constructor_declaration();
                    }
                    eprintln!("DEBUG after ctor/dtor: current_token={:?} check_rc={}", self.current_token(), self.check(TokenKind::RightCurly));
                } else {
                    self.type_declaration(field_type, field_flags);
                }
            } else {
                self.error("Invalid token inside class declaration.");
                self.consume();
            }
        }

        // Close out the init function.
        self.emit_return();
        self.end_function();

        self.consume_expect(TokenKind::RightCurly, -2, "Expected '}' after class body.");

        self.end_class();
    }

    /// Slot footprint of an instance, nested class fields included.
    pub(crate) fn class_slot_count(&self, class_id: usize) -> usize {
        self.classes[class_id]
            .fields
            .iter()
            .map(|field| {
                if field.data_type() == DataType::Class {
                    self.resolve_class(&field.parent_class)
                        .map(|nested| self.class_slot_count(nested))
                        .unwrap_or(1)
                } else {
                    1
                }
            })
            .sum()
    }

    fn create_class(&mut self, name: &str) -> usize {
        let id = self.classes.len();
        let mut class = ClassInfo::new(name, id);
        class.span = self.prev_token().span;
        class.enclosing = self.current_class;
        class.parent_function_id = self.current_function;

        if self.current_scope() != VarScope::Global {
            self.error_at("Class types cannot be declared inside a local scope.", class.span);
        }

        self.classes.push(class);
        self.current_class = Some(id);
        id
    }

    fn end_class(&mut self) {
        let class_id = self.current_class.expect("class stack underflow");

        if self.classes[class_id].fields.is_empty() {
            let span = self.classes[class_id].span;
            self.error_at("Class body must contain at least one field.", span);
        }

        self.current_class = self.classes[class_id].enclosing;
    }

    pub(crate) fn method_declaration(&mut self, data_type: DataType) {
        let token = self.consume_expect(TokenKind::Identifier, -2, "Expected method name.");
        let class_name = self
            .current_class
            .map(|c| self.classes[c].name.clone())
            .unwrap_or_default();
        let mangled = ClassInfo::method_name(&class_name, &token.text);

        self.function(&mangled, FunctionKind::ClassMethod, data_type);

        if let Some(class) = self.current_class {
            self.classes[class].methods.push(mangled);
        }
    }

    fn constructor_declaration(&mut self) {
        let class_name = self
            .current_class
            .map(|c| self.classes[c].name.clone())
            .unwrap_or_default();
        let mangled = ClassInfo::constructor_name(&class_name);

        let func_id = self.function(&mangled, FunctionKind::ClassMethod, DataType::Void);

        if let Some(class) = self.current_class {
            self.classes[class].methods.push(mangled);
            self.classes[class].constructor_function_id = Some(func_id);
        }
    }

    fn destructor_declaration(&mut self) {
        let class_name = self
            .current_class
            .map(|c| self.classes[c].name.clone())
            .unwrap_or_default();
        let mangled = ClassInfo::destructor_name(&class_name);
        eprintln!("DEBUG destructor_declaration: current_token before function()={:?}", self.current_token());

        let func_id = self.function(&mangled, FunctionKind::ClassMethod, DataType::Void);
        // The automatic call at scope exit supplies no argument list.
        self.functions[func_id].is_parameterless = true;

        if let Some(class) = self.current_class {
            self.classes[class].methods.push(mangled);
        }
    }

    /// `ClassName name;` or `ClassName name(args);`
    pub(crate) fn class_instance_declaration(&mut self) {
        let token = self.prev_token();
        let class_name = token.text.clone();

        let Some(class_id) = self.resolve_class(&class_name) else {
            self.error_at(
                format!("class '{}' has not been defined in this scope.", class_name),
                token.span,
            );
            return;
        };
        self.class_instances.push(class_id);

        let Some(class_var) = self.parse_variable(DataType::Class, vf::NORMAL, "Expected class instance name.")
        else {
            // Variable probably already exists.
            self.class_instances.pop();
            return;
        };

        self.mark_initialised();

        if self.current_scope() == VarScope::Local {
            // Grow the stack to hold the whole instance.
            let size = self.class_slot_count(class_id);
            self.emit_push(size);
        }

        // Init call: field defaults run before any constructor. The return
        // value is unused and popped to keep statements stack-neutral.
        if let Some(init) = self.find_script_function(&ClassInfo::init_name(&class_name)) {
            self.emit_op(OpCode::Frame);
            self.emit_constant(ConstantInfo::new(
                DataType::Function,
                Value::from_function(init as u32),
            ));
            self.emit_absolute_pointer(class_var);
            self.emit_call(OpCode::Call, 1);
            self.emit_op(OpCode::Pop);
        } else {
            self.error_at(
                format!("Failed to resolve class initialisation for '{}'.", class_name),
                token.span,
            );
        }

        // Constructor call, when the declaration supplies arguments.
        if self.matches(TokenKind::LeftParen) {
            if let Some(ctor) = self.find_script_function(&ClassInfo::constructor_name(&class_name))
            {
                self.emit_call_direct(ctor, Some(class_var));
                self.emit_op(OpCode::Pop);
            } else {
                self.error_at(
                    format!("No constructor provided for class '{}'.", class_name),
                    token.span,
                );
            }
        } else if self.classes[class_id].has_constructor() {
            self.warn_at(
                format!(
                    "Class '{}' has a constructor but is initialized without it.",
                    class_name
                ),
                token.span,
            );
        }

        self.consume_expect(TokenKind::SemiColon, -2, "Expected ';' after class instance declaration.");

        self.class_instances.pop();
    }
}
