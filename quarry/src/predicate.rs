//! Comparisons between tuple fields and constants or other fields.

use std::fmt;

use bedrock::{DbResult, Field, Op, Tuple};

/// `tuple[field] <op> operand`.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    field: usize,
    op: Op,
    operand: Field,
}

impl Predicate {
    pub fn new(field: usize, op: Op, operand: Field) -> Self {
        Self { field, op, operand }
    }

    pub fn field(&self) -> usize {
        self.field
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn operand(&self) -> &Field {
        &self.operand
    }

    /// Fails only if `field` is out of range for `t`.
    pub fn filter(&self, t: &Tuple) -> DbResult<bool> {
        Ok(t.field(self.field)?.compare(self.op, &self.operand))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f = {} op = {} operand = {}", self.field, self.op, self.operand)
    }
}

/// `left[field1] <op> right[field2]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoinPredicate {
    field1: usize,
    op: Op,
    field2: usize,
}

impl JoinPredicate {
    pub fn new(field1: usize, op: Op, field2: usize) -> Self {
        Self { field1, op, field2 }
    }

    pub fn field1(&self) -> usize {
        self.field1
    }

    pub fn field2(&self) -> usize {
        self.field2
    }

    pub fn op(&self) -> Op {
        self.op
    }

    pub fn filter(&self, left: &Tuple, right: &Tuple) -> DbResult<bool> {
        Ok(left
            .field(self.field1)?
            .compare(self.op, right.field(self.field2)?))
    }
}
