//! Element types stored in container datasets.

use crate::{Error, Result};

/// A fixed-width scalar element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScalarType {
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// Unsigned 8-bit integer.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 32-bit integer.
    U32,
    /// Unsigned 64-bit integer.
    U64,
}

impl ScalarType {
    /// Returns the packed size of this scalar in bytes.
    pub fn size(&self) -> usize {
        match *self {
            ScalarType::F32 | ScalarType::U32 => 4,
            ScalarType::F64 | ScalarType::U64 => 8,
            ScalarType::U8 => 1,
            ScalarType::U16 => 2,
        }
    }
}

/// The type of a single compound field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// One-byte boolean.
    Bool,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// Unsigned 8-bit integer.
    U8,
    /// Unsigned 16-bit integer.
    U16,
    /// Unsigned 32-bit integer.
    U32,
    /// Unsigned 64-bit integer.
    U64,
    /// A variable-length string; only legal in variable-length datasets.
    String,
    /// A fixed array of 32-bit floats.
    F32Array(u32),
}

impl FieldKind {
    /// Returns the packed size of this field, or `None` for strings.
    pub fn fixed_size(&self) -> Option<usize> {
        match *self {
            FieldKind::Bool | FieldKind::U8 => Some(1),
            FieldKind::U16 => Some(2),
            FieldKind::F32 | FieldKind::U32 => Some(4),
            FieldKind::F64 | FieldKind::U64 => Some(8),
            FieldKind::String => None,
            FieldKind::F32Array(n) => Some(4 * n as usize),
        }
    }
}

/// One field of a compound element, declared in dataset order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    /// The field name.
    pub name: String,
    /// The field type.
    pub kind: FieldKind,
}

impl FieldDef {
    /// Creates a new field definition.
    pub fn new(name: &str, kind: FieldKind) -> FieldDef {
        FieldDef {
            name: name.to_string(),
            kind,
        }
    }
}

/// A compound element declared field by field.
///
/// Offsets are packed: each field begins where the previous one ends.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompoundLayout {
    fields: Vec<FieldDef>,
}

impl CompoundLayout {
    /// Creates a layout from its fields.
    pub fn new(fields: Vec<FieldDef>) -> CompoundLayout {
        CompoundLayout { fields }
    }

    /// Returns the fields in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Returns the index of the named field.
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Returns true when every field has a fixed width.
    pub fn is_fixed(&self) -> bool {
        self.fields.iter().all(|f| f.kind.fixed_size().is_some())
    }

    /// Returns the packed element size, or `None` if any field is variable.
    pub fn packed_size(&self) -> Option<usize> {
        self.fields
            .iter()
            .map(|f| f.kind.fixed_size())
            .try_fold(0, |acc, size| size.map(|s| acc + s))
    }

    /// Returns the packed byte offset of the field at `index`.
    ///
    /// Fails with [Error::TypeMismatch] when a variable-length field
    /// precedes it, since no fixed offset exists then.
    pub fn field_offset(&self, index: usize) -> Result<usize> {
        if index >= self.fields.len() {
            return Err(Error::NotFound(format!("compound field #{index}")));
        }
        self.fields[..index]
            .iter()
            .map(|f| f.kind.fixed_size())
            .try_fold(0, |acc, size| size.map(|s| acc + s))
            .ok_or_else(|| {
                Error::TypeMismatch("field offset behind a variable-length field".to_string())
            })
    }
}

/// The element type of a dataset.
#[derive(Clone, Debug, PartialEq)]
pub enum ElementType {
    /// A fixed-width scalar.
    Scalar(ScalarType),
    /// A compound record.
    Compound(CompoundLayout),
}

impl ElementType {
    /// Returns the packed element size, or `None` for variable elements.
    pub fn packed_size(&self) -> Option<usize> {
        match self {
            ElementType::Scalar(scalar) => Some(scalar.size()),
            ElementType::Compound(layout) => layout.packed_size(),
        }
    }

    /// Returns the compound layout, if this is a compound element.
    pub fn as_compound(&self) -> Option<&CompoundLayout> {
        match self {
            ElementType::Compound(layout) => Some(layout),
            ElementType::Scalar(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_sizes() {
        let layout = CompoundLayout::new(vec![
            FieldDef::new("row", FieldKind::U32),
            FieldDef::new("depth", FieldKind::F32),
            FieldDef::new("track_code", FieldKind::U8),
            FieldDef::new("list_series", FieldKind::U16),
        ]);
        assert_eq!(Some(11), layout.packed_size());
        assert_eq!(4, layout.field_offset(1).unwrap());
        assert_eq!(9, layout.field_offset(3).unwrap());
    }

    #[test]
    fn variable_layout_has_no_packed_size() {
        let layout = CompoundLayout::new(vec![
            FieldDef::new("name", FieldKind::String),
            FieldDef::new("value", FieldKind::F32),
        ]);
        assert_eq!(None, layout.packed_size());
        assert!(!layout.is_fixed());
        assert!(layout.field_offset(1).is_err());
    }

    #[test]
    fn array_field_size() {
        assert_eq!(Some(40), FieldKind::F32Array(10).fixed_size());
    }
}
