//! Schemas and rows.

use std::fmt;
use std::sync::Arc;

use bytes::{Buf, BufMut};

use crate::error::{DbError, DbResult};
use crate::types::{Field, Type};
use crate::RecordId;

/// One column of a [`TupleDesc`].
#[derive(Debug, Clone)]
pub struct TdItem {
    pub field_type: Type,
    pub field_name: Option<String>,
}

impl fmt::Display for TdItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field_name {
            Some(name) => write!(f, "{}({})", self.field_type, name),
            None => write!(f, "{}(null)", self.field_type),
        }
    }
}

/// Schema of a tuple. Equality looks at types only; names are labels.
#[derive(Debug, Clone)]
pub struct TupleDesc {
    items: Vec<TdItem>,
}

impl TupleDesc {
    /// `names` may be shorter than `types`; missing names are anonymous.
    pub fn new(types: &[Type], names: &[&str]) -> DbResult<Self> {
        if types.is_empty() {
            return Err(DbError::UnsupportedOp(
                "a tuple descriptor needs at least one field".to_string(),
            ));
        }
        let items = types
            .iter()
            .enumerate()
            .map(|(i, &field_type)| TdItem {
                field_type,
                field_name: names.get(i).map(|n| n.to_string()),
            })
            .collect();
        Ok(Self { items })
    }

    pub fn from_items(items: Vec<TdItem>) -> DbResult<Self> {
        if items.is_empty() {
            return Err(DbError::UnsupportedOp(
                "a tuple descriptor needs at least one field".to_string(),
            ));
        }
        Ok(Self { items })
    }

    pub fn anonymous(types: &[Type]) -> DbResult<Self> {
        Self::new(types, &[])
    }

    pub fn num_fields(&self) -> usize {
        self.items.len()
    }

    pub fn items(&self) -> &[TdItem] {
        &self.items
    }

    pub fn field_type(&self, i: usize) -> DbResult<Type> {
        self.items
            .get(i)
            .map(|item| item.field_type)
            .ok_or_else(|| DbError::NoSuchElement(format!("field index {}", i)))
    }

    pub fn field_name(&self, i: usize) -> DbResult<Option<&str>> {
        self.items
            .get(i)
            .map(|item| item.field_name.as_deref())
            .ok_or_else(|| DbError::NoSuchElement(format!("field index {}", i)))
    }

    /// Index of the first field carrying `name`.
    pub fn field_name_to_index(&self, name: &str) -> DbResult<usize> {
        self.items
            .iter()
            .position(|item| item.field_name.as_deref() == Some(name))
            .ok_or_else(|| DbError::NoSuchElement(format!("field '{}'", name)))
    }

    /// Size in bytes of one tuple with this schema.
    pub fn size(&self) -> usize {
        self.items.iter().map(|item| item.field_type.size()).sum()
    }

    pub fn merge(first: &TupleDesc, second: &TupleDesc) -> TupleDesc {
        let mut items = first.items.clone();
        items.extend(second.items.iter().cloned());
        TupleDesc { items }
    }

    /// Copy of this schema with every name rewritten as `prefix.name`.
    pub fn with_prefix(&self, prefix: &str) -> TupleDesc {
        let items = self
            .items
            .iter()
            .map(|item| TdItem {
                field_type: item.field_type,
                field_name: Some(format!(
                    "{}.{}",
                    prefix,
                    item.field_name.as_deref().unwrap_or("null")
                )),
            })
            .collect();
        TupleDesc { items }
    }
}

impl PartialEq for TupleDesc {
    fn eq(&self, other: &Self) -> bool {
        self.items.len() == other.items.len()
            && self
                .items
                .iter()
                .zip(&other.items)
                .all(|(a, b)| a.field_type == b.field_type)
    }
}

impl Eq for TupleDesc {}

impl fmt::Display for TupleDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", item)?;
        }
        Ok(())
    }
}

/// A row: fields matching `desc`, plus where it lives on disk (if anywhere).
#[derive(Debug, Clone)]
pub struct Tuple {
    desc: Arc<TupleDesc>,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
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
                    "field {} is {}, expected {}",
                    i,
                    field.field_type(),
                    expected
                )));
            }
        }
        Ok(Self {
            desc,
            fields: fields.into_iter().map(Field::normalized).collect(),
            record_id: None,
        })
    }

    pub fn tuple_desc(&self) -> &Arc<TupleDesc> {
        &self.desc
    }

    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.record_id = rid;
    }

    pub fn field(&self, i: usize) -> DbResult<&Field> {
        self.fields
            .get(i)
            .ok_or_else(|| DbError::NoSuchElement(format!("field index {}", i)))
    }

    pub fn set_field(&mut self, i: usize, field: Field) -> DbResult<()> {
        let expected = self.desc.field_type(i)?;
        if field.field_type() != expected {
            return Err(DbError::SchemaMismatch(format!(
                "field {} is {}, got {}",
                i,
                expected,
                field.field_type()
            )));
        }
        self.fields[i] = field.normalized();
        Ok(())
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<Field> {
        self.fields
    }

    /// Writes exactly `desc.size()` bytes.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        for field in &self.fields {
            field.serialize(buf);
        }
    }

    pub fn parse(desc: Arc<TupleDesc>, buf: &mut impl Buf) -> DbResult<Self> {
        let fields = desc
            .items()
            .iter()
            .map(|item| item.field_type.parse(buf))
            .collect::<DbResult<Vec<_>>>()?;
        Ok(Self {
            desc,
            fields,
            record_id: None,
        })
    }
}

/// Tuples compare by content; the record id is location, not value.
impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        *self.desc == *other.desc && self.fields == other.fields
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::STRING_LEN;

    fn two_ints() -> Arc<TupleDesc> {
        Arc::new(TupleDesc::new(&[Type::Int, Type::Int], &["a", "b"]).unwrap())
    }

    #[test]
    fn test_tuple_desc_equality_ignores_names() {
        let named = TupleDesc::new(&[Type::Int, Type::String], &["x", "y"]).unwrap();
        let anon = TupleDesc::anonymous(&[Type::Int, Type::String]).unwrap();
        let other = TupleDesc::anonymous(&[Type::String, Type::Int]).unwrap();
        assert_eq!(named, anon);
        assert_ne!(named, other);
        assert_eq!(named.size(), 4 + 132);
    }

    #[test]
    fn test_empty_tuple_desc_rejected() {
        assert!(matches!(
            TupleDesc::anonymous(&[]),
            Err(DbError::UnsupportedOp(_))
        ));
    }

    #[test]
    fn test_merge_and_lookup() {
        let left = TupleDesc::new(&[Type::Int], &["a"]).unwrap();
        let right = TupleDesc::new(&[Type::String, Type::Int], &["b", "c"]).unwrap();
        let merged = TupleDesc::merge(&left, &right);
        assert_eq!(merged.num_fields(), 3);
        assert_eq!(merged.field_name_to_index("c").unwrap(), 2);
        assert_eq!(merged.field_type(1).unwrap(), Type::String);
        assert!(merged.field_name_to_index("zzz").is_err());
    }

    #[test]
    fn test_prefix_stringifies_missing_names() {
        let desc = TupleDesc::new(&[Type::Int, Type::Int], &["a"]).unwrap();
        let prefixed = desc.with_prefix("t");
        assert_eq!(prefixed.field_name(0).unwrap(), Some("t.a"));
        assert_eq!(prefixed.field_name(1).unwrap(), Some("t.null"));
    }

    #[test]
    fn test_set_field_validates() {
        let mut t = Tuple::new(two_ints(), vec![Field::Int(1), Field::Int(2)]).unwrap();
        t.set_field(1, Field::Int(7)).unwrap();
        assert_eq!(t.field(1).unwrap(), &Field::Int(7));
        assert!(matches!(
            t.set_field(0, Field::string("x")),
            Err(DbError::SchemaMismatch(_))
        ));
        assert!(t.set_field(5, Field::Int(0)).is_err());
    }

    #[test]
    fn test_raw_long_strings_are_truncated() {
        let desc = Arc::new(TupleDesc::new(&[Type::String], &["s"]).unwrap());
        let t = Tuple::new(desc.clone(), vec![Field::Str("a".repeat(200))]).unwrap();
        assert_eq!(t.field(0).unwrap().as_str().unwrap().len(), STRING_LEN);

        // 127 ASCII bytes then a two-byte char straddling the limit
        let mut s = "b".repeat(STRING_LEN - 1);
        s.push('é');
        let t = Tuple::new(desc.clone(), vec![Field::Str(s)]).unwrap();
        assert_eq!(t.field(0).unwrap().as_str().unwrap(), "b".repeat(STRING_LEN - 1));

        let mut buf = Vec::new();
        t.serialize(&mut buf);
        assert_eq!(Tuple::parse(desc, &mut buf.as_slice()).unwrap(), t);
    }

    #[test]
    fn test_tuple_bytes() {
        let t = Tuple::new(two_ints(), vec![Field::Int(-1), Field::Int(9)]).unwrap();
        let mut buf = Vec::new();
        t.serialize(&mut buf);
        assert_eq!(buf.len(), 8);
        let back = Tuple::parse(two_ints(), &mut buf.as_slice()).unwrap();
        assert_eq!(back, t);
        assert_eq!(t.to_string(), "-1\t9");
    }
}
