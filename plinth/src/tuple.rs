//! Schema and value primitives: field types, fields, tuple descriptors and
//! tuples. All on-disk encodings are big-endian; see the individual
//! `serialize_into` implementations for the exact layouts.

use crate::error::{DbError, DbResult};
use crate::RecordId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// The closed set of column types. Strings carry their maximum payload
/// length; every value of a type occupies a fixed number of bytes on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Int,
    String(usize),
}

impl Type {
    /// Encoded length in bytes: INT is 4, STRING(n) is a 4-byte length
    /// prefix plus n payload bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            Type::Int => 4,
            Type::String(n) => 4 + n,
        }
    }

    /// Decode one field of this type from the front of `buf`.
    pub fn parse(&self, buf: &[u8]) -> DbResult<Field> {
        if buf.len() < self.byte_len() {
            return Err(DbError::InvalidState(format!(
                "field needs {} bytes, got {}",
                self.byte_len(),
                buf.len()
            )));
        }
        match *self {
            Type::Int => {
                let raw: [u8; 4] = buf[0..4].try_into().expect("sliced to 4 bytes");
                Ok(Field::Int(i32::from_be_bytes(raw)))
            }
            Type::String(max_len) => {
                let raw: [u8; 4] = buf[0..4].try_into().expect("sliced to 4 bytes");
                let len = u32::from_be_bytes(raw) as usize;
                if len > max_len {
                    return Err(DbError::InvalidState(format!(
                        "string length {} exceeds declared maximum {}",
                        len, max_len
                    )));
                }
                let value = String::from_utf8(buf[4..4 + len].to_vec())
                    .map_err(|e| DbError::InvalidState(format!("invalid utf-8 in string field: {e}")))?;
                Ok(Field::String { value, max_len })
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "INT"),
            Type::String(n) => write!(f, "STRING({})", n),
        }
    }
}

/// A single column value. Immutable once built; hashable so it can key
/// aggregation groups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Int(i32),
    String { value: String, max_len: usize },
}

impl Field {
    /// Build a string field, truncating the value to at most `max_len`
    /// bytes without splitting a character.
    pub fn string(value: impl Into<String>, max_len: usize) -> Self {
        let mut value = value.into();
        if value.len() > max_len {
            let mut cut = max_len;
            while !value.is_char_boundary(cut) {
                cut -= 1;
            }
            value.truncate(cut);
        }
        Field::String { value, max_len }
    }

    pub fn field_type(&self) -> Type {
        match self {
            Field::Int(_) => Type::Int,
            Field::String { max_len, .. } => Type::String(*max_len),
        }
    }

    /// Append the on-disk encoding of this field to `out`.
    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        match self {
            Field::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
            Field::String { value, max_len } => {
                out.extend_from_slice(&(value.len() as u32).to_be_bytes());
                out.extend_from_slice(value.as_bytes());
                out.resize(out.len() + (max_len - value.len()), 0);
            }
        }
    }
}

impl PartialOrd for Field {
    /// Values order within a variant only; comparing an int against a
    /// string yields `None`.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => Some(a.cmp(b)),
            (Field::String { value: a, .. }, Field::String { value: b, .. }) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{}", v),
            Field::String { value, .. } => write!(f, "{}", value),
        }
    }
}

/// One entry of a tuple descriptor.
#[derive(Debug, Clone)]
pub struct TdItem {
    pub field_type: Type,
    pub name: Option<String>,
}

/// The schema of a tuple: an ordered sequence of typed, optionally named
/// fields. Equality and hashing consider the type sequence only, so two
/// descriptors that differ just in names are interchangeable.
#[derive(Debug, Clone)]
pub struct TupleDesc {
    items: Vec<TdItem>,
}

impl TupleDesc {
    /// Build a descriptor from parallel type and name vectors. Panics if
    /// the vectors disagree in length or are empty; a schema always has at
    /// least one field.
    pub fn new(types: Vec<Type>, names: Vec<Option<String>>) -> Self {
        assert!(!types.is_empty(), "a tuple descriptor needs at least one field");
        assert_eq!(types.len(), names.len(), "types and names must align");
        let items = types
            .into_iter()
            .zip(names)
            .map(|(field_type, name)| TdItem { field_type, name })
            .collect();
        Self { items }
    }

    pub fn unnamed(types: Vec<Type>) -> Self {
        let names = vec![None; types.len()];
        Self::new(types, names)
    }

    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    pub fn field_type(&self, i: usize) -> DbResult<Type> {
        self.items
            .get(i)
            .map(|item| item.field_type)
            .ok_or_else(|| DbError::NotFound(format!("field index {i}")))
    }

    pub fn field_name(&self, i: usize) -> DbResult<Option<&str>> {
        self.items
            .get(i)
            .map(|item| item.name.as_deref())
            .ok_or_else(|| DbError::NotFound(format!("field index {i}")))
    }

    /// Index of the first field carrying `name`.
    pub fn index_of(&self, name: &str) -> DbResult<usize> {
        self.items
            .iter()
            .position(|item| item.name.as_deref() == Some(name))
            .ok_or_else(|| DbError::NotFound(format!("field named {name:?}")))
    }

    /// Fixed byte size of every tuple conforming to this descriptor.
    pub fn tuple_size(&self) -> usize {
        self.items.iter().map(|item| item.field_type.byte_len()).sum()
    }

    /// Concatenate two descriptors, `a`'s fields first.
    pub fn merge(a: &TupleDesc, b: &TupleDesc) -> TupleDesc {
        let items = a.items.iter().chain(b.items.iter()).cloned().collect();
        TupleDesc { items }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TdItem> {
        self.items.iter()
    }
}

impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(other.items.iter())
                .all(|(a, b)| a.field_type == b.field_type)
    }
}

impl Eq for TupleDesc {}

impl Hash for TupleDesc {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for item in &self.items {
            item.field_type.hash(state);
        }
    }
}

impl fmt::Display for TupleDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match &item.name {
                Some(name) => write!(f, "{}({})", item.field_type, name)?,
                None => write!(f, "{}", item.field_type)?,
            }
        }
        Ok(())
    }
}

/// A row: a descriptor, one field per schema entry, and an optional record
/// id pointing back at the slot that stores it.
#[derive(Debug, Clone)]
pub struct Tuple {
    desc: Arc<TupleDesc>,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    /// Build a tuple, checking arity and per-field types against `desc`.
    pub fn new(desc: Arc<TupleDesc>, fields: Vec<Field>) -> DbResult<Self> {
        if fields.len() != desc.num_fields() {
            return Err(DbError::SchemaMismatch(format!(
                "expected {} fields, got {}",
                desc.num_fields(),
                fields.len()
            )));
        }
        for (i, field) in fields.iter().enumerate() {
            let expected = desc.field_type(i)?;
            if field.field_type() != expected {
                return Err(DbError::SchemaMismatch(format!(
                    "field {} is {}, schema wants {}",
                    i,
                    field.field_type(),
                    expected
                )));
            }
        }
        Ok(Self {
            desc,
            fields,
            record_id: None,
        })
    }

    pub fn desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn field(&self, i: usize) -> DbResult<&Field> {
        self.fields
            .get(i)
            .ok_or_else(|| DbError::NotFound(format!("field index {i}")))
    }

    pub fn set_field(&mut self, i: usize, field: Field) -> DbResult<()> {
        let expected = self.desc.field_type(i)?;
        if field.field_type() != expected {
            return Err(DbError::SchemaMismatch(format!(
                "field {} is {}, schema wants {}",
                i,
                field.field_type(),
                expected
            )));
        }
        self.fields[i] = field;
        Ok(())
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.record_id = rid;
    }

    /// Append the fixed-size body encoding (fields in schema order).
    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        for field in &self.fields {
            field.serialize_into(out);
        }
    }

    /// Decode a tuple body from the front of `buf`.
    pub fn parse(desc: &Arc<TupleDesc>, buf: &[u8]) -> DbResult<Self> {
        let mut fields = Vec::with_capacity(desc.num_fields());
        let mut offset = 0;
        for i in 0..desc.num_fields() {
            let field_type = desc.field_type(i)?;
            fields.push(field_type.parse(&buf[offset..])?);
            offset += field_type.byte_len();
        }
        Ok(Self {
            desc: desc.clone(),
            fields,
            record_id: None,
        })
    }
}

/// Content equality: same schema types and same field values. The record
/// id is a location, not part of the value.
impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.desc == other.desc && self.fields == other.fields
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "\t")?;
            }
            write!(f, "{}", field)?;
        }
        Ok(())
    }
}
