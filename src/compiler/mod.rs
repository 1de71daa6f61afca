//! The single-pass compiler: recursive-descent parsing with integrated type
//! checking and bytecode emission.

pub mod class;
#[allow(clippy::module_inception)]
pub mod compiler;
pub mod compiler_classes;
pub mod compiler_exprs;
pub mod compiler_stmts;
pub mod function;
pub mod natives;
pub mod preprocessor;
pub mod rules;
pub mod variable;

pub use compiler::Compiler;
pub use natives::{NativeFunctionParser, NativeRegistry};

use crate::compiler::variable::ConstantInfo;
use crate::span::Span;
use crate::value::DataType;

/// One function's finished code stream, ready for serialization.
#[derive(Debug, Clone)]
pub struct EmittedFunction {
    pub id: usize,
    pub name: String,
    pub span: Span,
    pub return_type: DataType,
    /// Argument count including the implicit `this` for methods.
    pub total_args: usize,
    pub code: Vec<u8>,
}

/// Finished compiler output handed to the binary writer.
#[derive(Debug, Clone)]
pub struct CompiledProgram {
    pub functions: Vec<EmittedFunction>,
    pub constants: Vec<ConstantInfo>,
    pub string_data: Vec<u8>,
    pub globals_size_bytes: u32,
    pub flags: u8,
    /// High-water mark of locals across all functions, for host stack sizing.
    pub locals_max: usize,
}
