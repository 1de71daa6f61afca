//! The type compatibility lattice and the size rules for packed storage.

use crate::value::{DataType, Value};

/// Outcome of comparing an expected type against an actual one.
///
/// Anything other than `Match`/`NotApplicable` names the cast the compiler
/// must emit to reconcile the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCompatibility {
    Incompatible,
    CastSignedToUnsigned,
    CastSignedToFloat,
    CastUnsignedToSigned,
    CastUnsignedToFloat,
    CastFloatToUnsigned,
    CastFloatToSigned,
    Match,
    NotApplicable,
}

impl TypeCompatibility {
    pub fn is_cast(self) -> bool {
        !matches!(
            self,
            TypeCompatibility::Match
                | TypeCompatibility::NotApplicable
                | TypeCompatibility::Incompatible
        )
    }
}

/// Compare an expected type against an input type.
///
/// The integer group bool..=i32 is freely interchangeable; u32 and f32 each
/// need an explicit reinterpretation; pointers accept the signed integers
/// (address arithmetic).
pub fn check_compatibility(expecting: DataType, input: DataType) -> TypeCompatibility {
    use DataType::*;
    use TypeCompatibility::*;

    if input == expecting {
        return Match;
    }

    if expecting == None || input == None {
        return NotApplicable;
    }

    if expecting >= Bool && expecting <= Int32 {
        if input >= Bool && input <= Int32 {
            return Match;
        }
        if input == Uint32 {
            return CastUnsignedToSigned;
        }
        if input == Float {
            return CastFloatToSigned;
        }
    }

    if expecting == Uint32 {
        if input == Float {
            return CastFloatToUnsigned;
        }
        return CastSignedToUnsigned;
    }

    if expecting == Float {
        if input >= Bool && input <= Int32 {
            return CastSignedToFloat;
        }
        return CastUnsignedToFloat;
    }

    if expecting == Pointer {
        if input >= Int8 && input <= Int32 {
            return Match;
        }
        if input == Float {
            return CastFloatToSigned;
        }
    }

    Incompatible
}

/// Storage footprint of a type in bytes. Everything not sub-word is one slot.
pub fn byte_size(data_type: DataType) -> usize {
    match data_type {
        DataType::Bool | DataType::Int8 | DataType::Uint8 => 1,
        DataType::Int16 | DataType::Uint16 => 2,
        _ => 4,
    }
}

/// How many values of `data_type` share one 4-byte slot.
pub fn packed_count(data_type: DataType) -> usize {
    std::mem::size_of::<Value>() / byte_size(data_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use DataType::*;
    use TypeCompatibility::*;

    #[test]
    fn integer_group_matches() {
        assert_eq!(check_compatibility(Int32, Bool), Match);
        assert_eq!(check_compatibility(Int8, Int32), Match);
        assert_eq!(check_compatibility(Uint16, Uint8), Match);
    }

    #[test]
    fn unsigned_and_float_need_casts() {
        assert_eq!(check_compatibility(Int32, Uint32), CastUnsignedToSigned);
        assert_eq!(check_compatibility(Int32, Float), CastFloatToSigned);
        assert_eq!(check_compatibility(Uint32, Float), CastFloatToUnsigned);
        assert_eq!(check_compatibility(Uint32, Int32), CastSignedToUnsigned);
        assert_eq!(check_compatibility(Float, Int32), CastSignedToFloat);
        assert_eq!(check_compatibility(Float, Uint32), CastUnsignedToFloat);
    }

    #[test]
    fn pointers_accept_signed_integers() {
        assert_eq!(check_compatibility(Pointer, Int32), Match);
        assert_eq!(check_compatibility(Pointer, Int8), Match);
        assert_eq!(check_compatibility(Pointer, Float), CastFloatToSigned);
        assert_eq!(check_compatibility(Pointer, String), Incompatible);
    }

    #[test]
    fn none_is_not_applicable() {
        assert_eq!(check_compatibility(None, Int32), NotApplicable);
        assert_eq!(check_compatibility(Float, None), NotApplicable);
    }

    #[test]
    fn packed_counts() {
        assert_eq!(packed_count(Uint8), 4);
        assert_eq!(packed_count(Int16), 2);
        assert_eq!(packed_count(Float), 1);
        assert_eq!(byte_size(Bool), 1);
    }
}
