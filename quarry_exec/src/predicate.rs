use std::fmt;

use granite::tuple::{CmpOp, Field, Tuple};

/// Compares one field of a tuple against a constant.
#[derive(Debug, Clone)]
pub struct Predicate {
    field: usize,
    op: CmpOp,
    operand: Field,
}

impl Predicate {
    pub fn new(field: usize, op: CmpOp, operand: Field) -> Self {
        Predicate { field, op, operand }
    }

    pub fn field(&self) -> usize {
        self.field
    }

    pub fn op(&self) -> CmpOp {
        self.op
    }

    pub fn operand(&self) -> &Field {
        &self.operand
    }

    /// True when the tuple's field satisfies `field op operand`. A tuple with
    /// the field unset never matches.
    pub fn filter(&self, t: &Tuple) -> bool {
        t.field(self.field)
            .is_some_and(|f| f.compare(self.op, &self.operand))
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{} {} {}", self.field, self.op, self.operand)
    }
}

/// Compares a field of one tuple against a field of another.
#[derive(Debug, Clone)]
pub struct JoinPredicate {
    field1: usize,
    op: CmpOp,
    field2: usize,
}

impl JoinPredicate {
    pub fn new(field1: usize, op: CmpOp, field2: usize) -> Self {
        JoinPredicate { field1, op, field2 }
    }

    pub fn field1(&self) -> usize {
        self.field1
    }

    pub fn field2(&self) -> usize {
        self.field2
    }

    pub fn op(&self) -> CmpOp {
        self.op
    }

    pub fn filter(&self, t1: &Tuple, t2: &Tuple) -> bool {
        match (t1.field(self.field1), t2.field(self.field2)) {
            (Some(a), Some(b)) => a.compare(self.op, b),
            _ => false,
        }
    }
}
