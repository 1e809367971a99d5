//! Element Data Types
//!
//! Typed containers declare an element dtype. Arrays and slices store
//! tagged values regardless of dtype (the dtype constrains what writes are
//! accepted); vectors store raw elements and are restricted to the numeric
//! dtypes.

use num_enum::TryFromPrimitive;

/// Element type of a typed container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum DataType {
    I8 = 0,
    I16 = 1,
    I32 = 2,
    I64 = 3,
    U8 = 4,
    U16 = 5,
    U32 = 6,
    U64 = 7,
    F32 = 8,
    F64 = 9,
    Bool = 10,
    String = 11,
    /// Dynamically typed: elements are arbitrary tagged values
    Any = 12,
}

impl DataType {
    /// Raw element size in bytes (vector storage)
    pub fn elem_size(self) -> usize {
        match self {
            DataType::I8 | DataType::U8 | DataType::Bool => 1,
            DataType::I16 | DataType::U16 => 2,
            DataType::I32 | DataType::U32 | DataType::F32 => 4,
            DataType::I64 | DataType::U64 | DataType::F64 => 8,
            // Tagged-value storage kinds have no raw element size
            DataType::String | DataType::Any => 16,
        }
    }

    /// Numeric dtypes are the only ones vectors accept
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            DataType::I8
                | DataType::I16
                | DataType::I32
                | DataType::I64
                | DataType::U8
                | DataType::U16
                | DataType::U32
                | DataType::U64
                | DataType::F32
                | DataType::F64
        )
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::I8
                | DataType::I16
                | DataType::I32
                | DataType::I64
                | DataType::U8
                | DataType::U16
                | DataType::U32
                | DataType::U64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataType::F32 | DataType::F64)
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::I8 => "i8",
            DataType::I16 => "i16",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::U8 => "u8",
            DataType::U16 => "u16",
            DataType::U32 => "u32",
            DataType::U64 => "u64",
            DataType::F32 => "f32",
            DataType::F64 => "f64",
            DataType::Bool => "bool",
            DataType::String => "string",
            DataType::Any => "any",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elem_sizes() {
        assert_eq!(DataType::I8.elem_size(), 1);
        assert_eq!(DataType::I32.elem_size(), 4);
        assert_eq!(DataType::F64.elem_size(), 8);
        assert_eq!(DataType::Any.elem_size(), 16);
    }

    #[test]
    fn test_numeric_classification() {
        assert!(DataType::I64.is_numeric());
        assert!(DataType::F32.is_numeric());
        assert!(!DataType::Bool.is_numeric());
        assert!(!DataType::String.is_numeric());
        assert!(!DataType::Any.is_numeric());
        assert!(DataType::U16.is_integer());
        assert!(!DataType::F32.is_integer());
        assert!(DataType::F32.is_float());
    }

    #[test]
    fn test_from_raw() {
        assert_eq!(DataType::try_from(9u8).unwrap(), DataType::F64);
        assert!(DataType::try_from(40u8).is_err());
    }
}
