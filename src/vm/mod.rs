//! The stack-based virtual machine.

#[allow(clippy::module_inception)]
pub mod vm;

pub use vm::{Frame, Vm, FRAME_SIZE};

use crate::program::Program;
use crate::value::Value;

/// Interpreter status. `Ok` only ever holds mid-run; every exit path leaves
/// one of the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmStatus {
    Ok = 0,
    /// Host-requested cancellation.
    Stop,
    /// The top-level script ran to `OP_END`.
    End,

    // Errors
    Error,
    NoProgramLoaded,
    UnknownInstruction,
    StackUnderflow,
    StackOverflow,
    UnknownFieldScope,
    CallArgCountError,
    CallNotAFunction,
    CallFrameOverflow,
    NativeFunctionNotResolved,
}

impl VmStatus {
    pub fn is_error(self) -> bool {
        self as u8 >= VmStatus::Error as u8
    }
}

/// Context handed to a native function for the duration of one call.
pub struct NativeContext<'a, 'p> {
    /// Read-only view of the running program, for string-pool access.
    pub program: &'a Program<'p>,
    /// Host-opaque parameter supplied to `Vm::run`.
    pub sys: Option<&'a mut dyn std::any::Any>,
    /// Set by a native to cancel the interpreter between dispatches.
    pub stop: bool,
}

/// A host-provided native function.
pub type NativeFn = fn(ctx: &mut NativeContext<'_, '_>, arg_count: usize, args: &[Value]) -> Value;

/// Resolver supplied at VM init. Returning `None` aborts the run with
/// `NativeFunctionNotResolved`.
pub type ResolverFn = fn(func_id: u32, arg_count: u8) -> Option<NativeFn>;
