//! Class records.

use crate::compiler::variable::VariableInfo;
use crate::span::Span;

/// A class declaration. Fields keep their declaration order; their
/// `member_index` is the offset from the instance base pointer. Methods are
/// stored by mangled name (`__<Class>__<member>`) and looked up through the
/// function table, never by reference, so the class graph stays acyclic.
#[derive(Debug)]
pub struct ClassInfo {
    pub name: String,
    pub id: usize,
    pub span: Span,
    /// Enclosing class while nested declarations are being compiled.
    pub enclosing: Option<usize>,
    pub parent_function_id: usize,
    pub fields: Vec<VariableInfo>,
    pub methods: Vec<String>,
    pub init_function_id: Option<usize>,
    pub constructor_function_id: Option<usize>,
}

impl ClassInfo {
    pub fn new(name: impl Into<String>, id: usize) -> Self {
        Self {
            name: name.into(),
            id,
            span: Span::default(),
            enclosing: None,
            parent_function_id: 0,
            fields: Vec::new(),
            methods: Vec::new(),
            init_function_id: None,
            constructor_function_id: None,
        }
    }

    /// Instance footprint in value slots.
    pub fn size(&self) -> usize {
        self.fields.len()
    }

    pub fn has_constructor(&self) -> bool {
        self.constructor_function_id.is_some()
    }

    pub fn init_name(class_name: &str) -> String {
        format!("__{}__Init", class_name)
    }

    pub fn constructor_name(class_name: &str) -> String {
        format!("__{}__Constructor", class_name)
    }

    pub fn destructor_name(class_name: &str) -> String {
        format!("__{}__Destructor", class_name)
    }

    pub fn method_name(class_name: &str, member: &str) -> String {
        format!("__{}__{}", class_name, member)
    }
}
