//! Variable records and compile-time constants.

use crate::span::Span;
use crate::value::{DataType, Value, VarScope, VmPointer, NOT_SET};

/// Variable flag bits.
pub mod flags {
    pub const NORMAL: u32 = 0x00;
    pub const ARRAY: u32 = 0x01;
    pub const CLASS: u32 = 0x02;
    pub const FUNCTION: u32 = 0x04;
    pub const FIELD: u32 = 0x08;
    pub const POINTER: u32 = 0x10;
    pub const CONST: u32 = 0x20;
}

/// A typed constant destined for the constant pool.
///
/// Equality is bit-pattern equality with the declared type folded in, which
/// is exactly the deduplication rule for the pool.
#[derive(Debug, Clone, Copy)]
pub struct ConstantInfo {
    pub ty: DataType,
    pub value: Value,
}

impl ConstantInfo {
    pub fn new(ty: DataType, value: Value) -> Self {
        Self { ty, value }
    }
}

impl PartialEq for ConstantInfo {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && self.value.bits() == other.value.bits()
    }
}

/// A named variable: global, local, or class field.
#[derive(Debug, Clone)]
pub struct VariableInfo {
    pub name: String,
    pub span: Span,
    /// Class this variable is a field of, resolved by name, never by pointer.
    pub parent_class: String,
    /// Instance this variable belongs to, for flattened class members.
    pub parent_instance: String,
    pub pointer: VmPointer,
    pub flags: u32,
    pub parent_address: i32,
    /// Field offset within the declaring class.
    pub member_index: i32,
    /// Scope depth at declaration; NOT_SET until initialised.
    pub depth: i32,
    pub reads: u32,
    pub writes: u32,
    /// Slot count; arrays and class heads occupy more than one.
    pub size: usize,
}

impl VariableInfo {
    pub fn new(name: impl Into<String>, pointer: VmPointer, flags: u32) -> Self {
        Self {
            name: name.into(),
            span: Span::default(),
            parent_class: String::new(),
            parent_instance: String::new(),
            pointer,
            flags,
            parent_address: 0,
            member_index: 0,
            depth: NOT_SET,
            reads: 0,
            writes: 0,
            size: 1,
        }
    }

    pub fn data_type(&self) -> DataType {
        self.pointer.pointee
    }

    pub fn scope(&self) -> VarScope {
        self.pointer.scope
    }

    pub fn address(&self) -> u16 {
        self.pointer.address
    }

    pub fn is_function(&self) -> bool {
        self.flags & flags::FUNCTION != 0
    }

    pub fn is_array(&self) -> bool {
        self.flags & flags::ARRAY != 0
    }

    pub fn is_const(&self) -> bool {
        self.flags & flags::CONST != 0
    }

    /// The first slot of a class instance; member access goes through it.
    pub fn is_class_head(&self) -> bool {
        !self.parent_class.is_empty() && self.member_index == 0
    }

    pub fn is_head_member_of(&self, instance: &str) -> bool {
        !self.parent_instance.is_empty() && self.parent_instance == instance && self.member_index == 0
    }

    pub fn matches(&self, name: &str, parent: &str) -> bool {
        if self.parent_instance.is_empty() && parent.is_empty() && self.name == name {
            return true;
        }
        !self.parent_instance.is_empty() && self.parent_instance == parent && self.name == name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_equality_folds_type_in() {
        let int_zero = ConstantInfo::new(DataType::Int32, Value::from_i32(0));
        let bool_zero = ConstantInfo::new(DataType::Bool, Value::from_bool(false));
        assert_ne!(int_zero, bool_zero);
        assert_eq!(int_zero, ConstantInfo::new(DataType::Int32, Value::from_i32(0)));
    }

    #[test]
    fn class_head_detection() {
        let mut var = VariableInfo::new(
            "p",
            VmPointer::new(0, DataType::Int32, VarScope::Global),
            flags::NORMAL,
        );
        assert!(!var.is_class_head());
        var.parent_class = "P".into();
        assert!(var.is_class_head());
        var.member_index = 1;
        assert!(!var.is_class_head());
    }

    #[test]
    fn match_respects_parent_instance() {
        let mut var = VariableInfo::new(
            "a",
            VmPointer::new(0, DataType::Int32, VarScope::Global),
            flags::NORMAL,
        );
        assert!(var.matches("a", ""));
        var.parent_instance = "p".into();
        assert!(!var.matches("a", ""));
        assert!(var.matches("a", "p"));
    }
}
