use super::OpIterator;
use crate::errors::{ExecError, Result};
use crate::predicate::Predicate;
use granite::tuple::{Tuple, TupleDesc};

/// Passes through the child's tuples that satisfy the predicate.
pub struct Filter {
    pred: Predicate,
    child: Box<dyn OpIterator>,
    opened: bool,
    peeked: Option<Tuple>,
}

impl Filter {
    pub fn new(pred: Predicate, child: Box<dyn OpIterator>) -> Self {
        Filter {
            pred,
            child,
            opened: false,
            peeked: None,
        }
    }

    pub fn predicate(&self) -> &Predicate {
        &self.pred
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>> {
        while self.child.has_next()? {
            let t = self.child.next()?;
            if self.pred.filter(&t) {
                return Ok(Some(t));
            }
        }
        Ok(None)
    }
}

impl OpIterator for Filter {
    fn open(&mut self) -> Result<()> {
        self.child.open()?;
        self.opened = true;
        self.peeked = None;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        if !self.opened {
            return Err(ExecError::NotOpen);
        }
        if self.peeked.is_none() {
            self.peeked = self.fetch_next()?;
        }
        Ok(self.peeked.is_some())
    }

    fn next(&mut self) -> Result<Tuple> {
        if !self.has_next()? {
            return Err(ExecError::NoSuchElement);
        }
        Ok(self.peeked.take().expect("has_next ensured a tuple"))
    }

    fn rewind(&mut self) -> Result<()> {
        if !self.opened {
            return Err(ExecError::NotOpen);
        }
        self.child.rewind()?;
        self.peeked = None;
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
        self.opened = false;
        self.peeked = None;
    }

    fn tuple_desc(&self) -> &TupleDesc {
        self.child.tuple_desc()
    }

    fn set_children(&mut self, mut children: Vec<Box<dyn OpIterator>>) {
        if let Some(child) = children.pop() {
            self.child = child;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::TupleIterator;
    use granite::tuple::{CmpOp, Field, Type};

    fn int_rows(values: &[i32]) -> TupleIterator {
        let td = TupleDesc::with_types(vec![Type::Int]);
        let tuples = values
            .iter()
            .map(|v| Tuple::with_fields(td.clone(), vec![Field::Int(*v)]))
            .collect();
        TupleIterator::new(td, tuples)
    }

    fn drain(op: &mut dyn OpIterator) -> Vec<i32> {
        let mut out = Vec::new();
        while op.has_next().unwrap() {
            let t = op.next().unwrap();
            match t.field(0).unwrap() {
                Field::Int(v) => out.push(*v),
                other => panic!("unexpected field {:?}", other),
            }
        }
        out
    }

    #[test]
    fn keeps_only_matching_tuples() {
        let child = int_rows(&[1, 5, 2, 8, 3]);
        let pred = Predicate::new(0, CmpOp::GreaterThan, Field::Int(2));
        let mut filter = Filter::new(pred, Box::new(child));
        filter.open().unwrap();
        assert_eq!(drain(&mut filter), vec![5, 8, 3]);

        filter.rewind().unwrap();
        assert_eq!(drain(&mut filter), vec![5, 8, 3]);
        filter.close();
    }

    #[test]
    fn empty_result_reports_no_such_element() {
        let child = int_rows(&[1, 2]);
        let pred = Predicate::new(0, CmpOp::GreaterThan, Field::Int(10));
        let mut filter = Filter::new(pred, Box::new(child));
        filter.open().unwrap();
        assert!(!filter.has_next().unwrap());
        assert!(matches!(filter.next(), Err(ExecError::NoSuchElement)));
    }
}
