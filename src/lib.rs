//! kitelang: a small, statically-typed, C-like scripting language for
//! embedded host applications.
//!
//! Scripts are compiled offline into a compact, self-contained binary image
//! and executed by a stack-based virtual machine that owns no memory of its
//! own: the host supplies the image bytes and one working buffer, and
//! provides native functions through a resolver installed at VM init.
//!
//! Pipeline: lexer -> single-pass compiler (type checking + emission) ->
//! binary writer -> VM decoder -> interpreter.

pub mod compiler;
pub mod error;
pub mod lexer;
pub mod program;
pub mod span;
pub mod types;
pub mod value;
pub mod vm;

use compiler::{CompiledProgram, Compiler, NativeRegistry};
use error::{CompileError, Diagnostics};

/// Compile a source string with the built-in native registry. Diagnostics
/// accumulate in `diags` either way.
pub fn compile(source: &str, diags: &mut Diagnostics) -> Result<CompiledProgram, CompileError> {
    compile_with_options(source, NativeRegistry::with_builtins(), 0, "", false, diags)
}

/// Compile with full control over natives, header flags and verbosity.
pub fn compile_with_options(
    source: &str,
    natives: NativeRegistry,
    flags: u8,
    file_name: &str,
    verbose: bool,
    diags: &mut Diagnostics,
) -> Result<CompiledProgram, CompileError> {
    let mut compiler = Compiler::new(source, natives, flags, file_name, verbose, diags);
    compiler.compile()?;
    Ok(compiler.finish())
}

/// Compile a source string straight to image bytes.
pub fn compile_to_image(source: &str, diags: &mut Diagnostics) -> Result<Vec<u8>, CompileError> {
    let program = compile(source, diags)?;
    Ok(program::writer::write_image(&program, diags))
}
