//! Primitive column types and the values stored in them.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use bytes::{Buf, BufMut};

use crate::error::{DbError, DbResult};

/// Maximum payload of a `STRING` field, in bytes.
pub const STRING_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    String,
}

impl Type {
    /// Fixed on-disk size of a value of this type.
    pub fn size(&self) -> usize {
        match self {
            Type::Int => 4,
            Type::String => STRING_LEN + 4,
        }
    }

    /// Decodes one value of this type from the front of `buf`.
    pub fn parse(&self, buf: &mut impl Buf) -> DbResult<Field> {
        if buf.remaining() < self.size() {
            return Err(DbError::Db(format!(
                "truncated {} field: need {} bytes, have {}",
                self,
                self.size(),
                buf.remaining()
            )));
        }
        match self {
            Type::Int => Ok(Field::Int(buf.get_i32())),
            Type::String => {
                let len = (buf.get_i32().max(0) as usize).min(STRING_LEN);
                let mut payload = [0u8; STRING_LEN];
                buf.copy_to_slice(&mut payload);
                Ok(Field::Str(
                    String::from_utf8_lossy(&payload[..len]).into_owned(),
                ))
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "INT"),
            Type::String => write!(f, "STRING"),
        }
    }
}

impl FromStr for Type {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" => Ok(Type::Int),
            "string" => Ok(Type::String),
            other => Err(DbError::UnsupportedOp(format!("unknown type '{}'", other))),
        }
    }
}

/// Comparison operators usable in predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEq,
    GreaterThan,
    GreaterThanOrEq,
    Like,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::Equals => "=",
            Op::NotEquals => "<>",
            Op::LessThan => "<",
            Op::LessThanOrEq => "<=",
            Op::GreaterThan => ">",
            Op::GreaterThanOrEq => ">=",
            Op::Like => "LIKE",
        };
        write!(f, "{}", s)
    }
}

/// A single value. Strings never exceed `STRING_LEN` bytes once built
/// through [`Field::string`] or decoded from a page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Int(i32),
    Str(String),
}

impl Field {
    pub fn int(v: i32) -> Self {
        Field::Int(v)
    }

    /// Builds a string field, truncating to `STRING_LEN` bytes on a char boundary.
    pub fn string(s: impl Into<String>) -> Self {
        let mut s = s.into();
        if s.len() > STRING_LEN {
            let mut cut = STRING_LEN;
            while !s.is_char_boundary(cut) {
                cut -= 1;
            }
            s.truncate(cut);
        }
        Field::Str(s)
    }

    /// Applies the `STRING_LEN` limit to a string built directly as `Field::Str`.
    pub fn normalized(self) -> Self {
        match self {
            Field::Str(s) => Field::string(s),
            other => other,
        }
    }

    pub fn field_type(&self) -> Type {
        match self {
            Field::Int(_) => Type::Int,
            Field::Str(_) => Type::String,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Field::Int(v) => Some(*v),
            Field::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Str(s) => Some(s),
            Field::Int(_) => None,
        }
    }

    /// Writes exactly `field_type().size()` bytes.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        match self {
            Field::Int(v) => buf.put_i32(*v),
            Field::Str(s) => {
                let bytes = s.as_bytes();
                let len = bytes.len().min(STRING_LEN);
                buf.put_i32(len as i32);
                buf.put_slice(&bytes[..len]);
                buf.put_bytes(0, STRING_LEN - len);
            }
        }
    }

    /// Evaluates `self op other`. Values of different types never match.
    pub fn compare(&self, op: Op, other: &Field) -> bool {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => match op {
                Op::Like => a == b,
                _ => ordering_matches(op, a.cmp(b)),
            },
            (Field::Str(a), Field::Str(b)) => match op {
                Op::Like => a.contains(b.as_str()),
                _ => ordering_matches(op, a.cmp(b)),
            },
            _ => false,
        }
    }
}

fn ordering_matches(op: Op, ord: Ordering) -> bool {
    match op {
        Op::Equals => ord == Ordering::Equal,
        Op::NotEquals => ord != Ordering::Equal,
        Op::LessThan => ord == Ordering::Less,
        Op::LessThanOrEq => ord != Ordering::Greater,
        Op::GreaterThan => ord == Ordering::Greater,
        Op::GreaterThanOrEq => ord != Ordering::Less,
        Op::Like => ord == Ordering::Equal,
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
