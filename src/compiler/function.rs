//! Function table entries.

use crate::compiler::variable::VariableInfo;
use crate::span::Span;
use crate::value::DataType;

/// What kind of code stream a function entry owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// Implicit holder of top-level statements; never user-callable.
    Script,
    Function,
    /// Compiler-synthesized `__<Class>__Init`.
    ClassInit,
    ClassMethod,
    Native,
}

/// A function being compiled. Ids are indices into the compiler's function
/// arena; at binary emission each id constant is patched to the function's
/// byte offset in the code section.
#[derive(Debug)]
pub struct ScriptFunction {
    pub id: usize,
    pub name: String,
    /// Owning class name for methods, resolved by name.
    pub parent_class: String,
    pub kind: FunctionKind,
    pub return_type: DataType,
    /// Argument types, including the implicit `this` pointer for methods.
    pub args: Vec<DataType>,
    /// Init and destructor calls parse no argument list at the call site.
    pub is_parameterless: bool,
    /// Enclosing function in the arena while compiling nested declarations.
    pub enclosing: Option<usize>,
    pub span: Span,

    pub code: Vec<u8>,
    pub locals: Vec<VariableInfo>,
    pub locals_max_height: usize,
    /// Number of enclosing conditional constructs at the current parse point.
    pub conditional_depth: usize,
    /// True once a `return` executed at conditional depth 0.
    pub return_supplied: bool,
}

impl ScriptFunction {
    pub fn new(id: usize, name: impl Into<String>, kind: FunctionKind, return_type: DataType) -> Self {
        Self {
            id,
            name: name.into(),
            parent_class: String::new(),
            kind,
            return_type,
            args: Vec::new(),
            is_parameterless: false,
            enclosing: None,
            span: Span::default(),
            code: Vec::new(),
            locals: Vec::new(),
            locals_max_height: 0,
            conditional_depth: 0,
            return_supplied: false,
        }
    }

    /// Argument count including the hidden `this`.
    pub fn total_arg_count(&self) -> usize {
        self.args.len()
    }

    /// User-visible argument count.
    pub fn arg_count(&self) -> usize {
        self.args.len() - usize::from(self.kind == FunctionKind::ClassMethod)
    }

    pub fn max_args(&self) -> usize {
        if self.kind == FunctionKind::ClassMethod {
            254
        } else {
            255
        }
    }

    pub fn total_locals_height(&self) -> usize {
        self.locals_max_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_arg_count_hides_this() {
        let mut func = ScriptFunction::new(1, "__P__get", FunctionKind::ClassMethod, DataType::Int32);
        func.args.push(DataType::Pointer);
        func.args.push(DataType::Int32);
        assert_eq!(func.total_arg_count(), 2);
        assert_eq!(func.arg_count(), 1);
        assert_eq!(func.max_args(), 254);
    }
}
