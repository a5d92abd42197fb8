use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::Read;

use crate::error::{DbError, Result};
use crate::page::PageId;

/// The longest string a STRING field can carry. Longer values are truncated
/// when serialized.
pub const MAX_STRING_LEN: usize = 128;

/// The closed set of field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    Str,
}

impl Type {
    /// The exact number of bytes a field of this type occupies on a page.
    pub fn len(&self) -> usize {
        match self {
            Type::Int => 4,
            Type::Str => MAX_STRING_LEN + 4,
        }
    }

    /// Reads one field of this type from `r` using its on-disk encoding.
    pub fn parse(&self, r: &mut impl Read) -> Result<Field> {
        match self {
            Type::Int => {
                let mut buf = [0u8; 4];
                r.read_exact(&mut buf)?;
                Ok(Field::Int(i32::from_be_bytes(buf)))
            }
            Type::Str => {
                let mut len_buf = [0u8; 4];
                r.read_exact(&mut len_buf)?;
                let len = u32::from_be_bytes(len_buf) as usize;
                if len > MAX_STRING_LEN {
                    return Err(DbError::BadPageData(format!(
                        "string length prefix {} exceeds maximum {}",
                        len, MAX_STRING_LEN
                    )));
                }
                let mut content = [0u8; MAX_STRING_LEN];
                r.read_exact(&mut content)?;
                Ok(Field::Str(
                    String::from_utf8_lossy(&content[..len]).into_owned(),
                ))
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "int"),
            Type::Str => write!(f, "string"),
        }
    }
}

/// Comparison operators applicable to a pair of fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Equals,
    GreaterThan,
    LessThan,
    LessThanOrEq,
    GreaterThanOrEq,
    Like,
    NotEquals,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Equals => "=",
            CmpOp::GreaterThan => ">",
            CmpOp::LessThan => "<",
            CmpOp::LessThanOrEq => "<=",
            CmpOp::GreaterThanOrEq => ">=",
            CmpOp::Like => "LIKE",
            CmpOp::NotEquals => "<>",
        };
        write!(f, "{}", s)
    }
}

/// A typed value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    pub fn field_type(&self) -> Type {
        match self {
            Field::Int(_) => Type::Int,
            Field::Str(_) => Type::Str,
        }
    }

    /// Appends the field's on-disk encoding to `out`. Always writes exactly
    /// `self.field_type().len()` bytes. Overlong strings are truncated and the
    /// unused tail is zero-padded.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Field::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
            Field::Str(s) => {
                let bytes = s.as_bytes();
                let len = bytes.len().min(MAX_STRING_LEN);
                out.extend_from_slice(&(len as u32).to_be_bytes());
                out.extend_from_slice(&bytes[..len]);
                out.resize(out.len() + (MAX_STRING_LEN - len), 0);
            }
        }
    }

    /// Evaluates `self op other`. Comparisons across types are false, except
    /// NOT_EQUALS which is true. LIKE is substring containment on strings and
    /// equality on integers.
    pub fn compare(&self, op: CmpOp, other: &Field) -> bool {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => match op {
                CmpOp::Equals => a == b,
                CmpOp::GreaterThan => a > b,
                CmpOp::LessThan => a < b,
                CmpOp::LessThanOrEq => a <= b,
                CmpOp::GreaterThanOrEq => a >= b,
                CmpOp::Like => a == b,
                CmpOp::NotEquals => a != b,
            },
            (Field::Str(a), Field::Str(b)) => match op {
                CmpOp::Equals => a == b,
                CmpOp::GreaterThan => a > b,
                CmpOp::LessThan => a < b,
                CmpOp::LessThanOrEq => a <= b,
                CmpOp::GreaterThanOrEq => a >= b,
                CmpOp::Like => a.contains(b.as_str()),
                CmpOp::NotEquals => a != b,
            },
            _ => op == CmpOp::NotEquals,
        }
    }
}

impl PartialOrd for Field {
    fn partial_cmp(&self, other: &Field) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => a.partial_cmp(b),
            (Field::Str(a), Field::Str(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{}", v),
            Field::Str(s) => write!(f, "{}", s),
        }
    }
}

/// One schema entry: a type plus an optional field name.
#[derive(Debug, Clone)]
pub struct TdItem {
    pub field_type: Type,
    pub name: Option<String>,
}

/// The schema of a tuple: an ordered, non-empty sequence of typed items.
/// Immutable after construction. Equality ignores field names.
#[derive(Debug, Clone)]
pub struct TupleDesc {
    items: Vec<TdItem>,
}

impl TupleDesc {
    /// Builds a schema from parallel type and name vectors.
    ///
    /// Panics when the vectors disagree in length or are empty; a schema
    /// always has at least one field.
    pub fn new(types: Vec<Type>, names: Vec<Option<String>>) -> Self {
        assert_eq!(types.len(), names.len(), "type/name arity mismatch");
        assert!(!types.is_empty(), "a schema needs at least one field");
        let items = types
            .into_iter()
            .zip(names)
            .map(|(field_type, name)| TdItem { field_type, name })
            .collect();
        TupleDesc { items }
    }

    /// Builds a schema with anonymous fields.
    pub fn with_types(types: Vec<Type>) -> Self {
        let names = vec![None; types.len()];
        TupleDesc::new(types, names)
    }

    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    pub fn field_type(&self, i: usize) -> Result<Type> {
        self.items
            .get(i)
            .map(|item| item.field_type)
            .ok_or(DbError::FieldIndex(i))
    }

    pub fn field_name(&self, i: usize) -> Result<Option<&str>> {
        self.items
            .get(i)
            .map(|item| item.name.as_deref())
            .ok_or(DbError::FieldIndex(i))
    }

    /// Finds the first field whose name equals `name`. Unnamed fields never
    /// match.
    pub fn field_name_to_index(&self, name: &str) -> Result<usize> {
        self.items
            .iter()
            .position(|item| item.name.as_deref() == Some(name))
            .ok_or_else(|| DbError::NoSuchField(name.to_string()))
    }

    /// The number of bytes a tuple of this schema occupies on a page.
    pub fn size(&self) -> usize {
        self.items.iter().map(|item| item.field_type.len()).sum()
    }

    /// Concatenates two schemas, `a`'s fields first.
    pub fn merge(a: &TupleDesc, b: &TupleDesc) -> TupleDesc {
        let items = a.items.iter().chain(b.items.iter()).cloned().collect();
        TupleDesc { items }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TdItem> {
        self.items.iter()
    }
}

impl PartialEq for TupleDesc {
    fn eq(&self, other: &TupleDesc) -> bool {
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
            write!(f, "{}", item.field_type)?;
            if let Some(name) = &item.name {
                write!(f, "({})", name)?;
            }
        }
        Ok(())
    }
}

/// The physical location of a tuple: a page plus a slot index within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    pid: PageId,
    slot: usize,
}

impl RecordId {
    pub fn new(pid: PageId, slot: usize) -> Self {
        RecordId { pid, slot }
    }

    pub fn page_id(&self) -> PageId {
        self.pid
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

/// A row value: a schema, one optional field per schema slot, and the
/// location it is stored at (absent until it lands on a page).
#[derive(Debug, Clone)]
pub struct Tuple {
    desc: TupleDesc,
    fields: Vec<Option<Field>>,
    rid: Option<RecordId>,
}

impl Tuple {
    pub fn new(desc: TupleDesc) -> Self {
        let fields = vec![None; desc.num_fields()];
        Tuple {
            desc,
            fields,
            rid: None,
        }
    }

    /// Convenience constructor for a fully-populated tuple.
    ///
    /// Panics when the field count disagrees with the schema.
    pub fn with_fields(desc: TupleDesc, fields: Vec<Field>) -> Self {
        assert_eq!(desc.num_fields(), fields.len(), "field arity mismatch");
        Tuple {
            desc,
            fields: fields.into_iter().map(Some).collect(),
            rid: None,
        }
    }

    pub fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    /// Swaps in a new schema, discarding all field values.
    pub fn reset_desc(&mut self, desc: TupleDesc) {
        self.fields = vec![None; desc.num_fields()];
        self.desc = desc;
        self.rid = None;
    }

    pub fn field(&self, i: usize) -> Option<&Field> {
        self.fields.get(i).and_then(|f| f.as_ref())
    }

    pub fn set_field(&mut self, i: usize, f: Field) -> Result<()> {
        let slot = self.fields.get_mut(i).ok_or(DbError::FieldIndex(i))?;
        *slot = Some(f);
        Ok(())
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.rid
    }

    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.rid = rid;
    }

    /// True when every field holds the same value as `other`'s. Record ids
    /// and field names are not compared.
    pub fn fields_eq(&self, other: &Tuple) -> bool {
        self.fields == other.fields
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "\t")?;
            }
            match field {
                Some(v) => write!(f, "{}", v)?,
                None => write!(f, "null")?,
            }
        }
        Ok(())
    }
}
