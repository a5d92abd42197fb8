use std::cmp::Ordering;

use super::OpIterator;
use crate::errors::{ExecError, Result};
use granite::tuple::{Tuple, TupleDesc};

/// Materializes the child and yields its tuples sorted on one field.
pub struct OrderBy {
    child: Box<dyn OpIterator>,
    field: usize,
    asc: bool,
    desc: TupleDesc,
    results: Vec<Tuple>,
    cursor: usize,
    opened: bool,
}

impl OrderBy {
    pub fn new(field: usize, asc: bool, child: Box<dyn OpIterator>) -> Self {
        let desc = child.tuple_desc().clone();
        OrderBy {
            child,
            field,
            asc,
            desc,
            results: Vec::new(),
            cursor: 0,
            opened: false,
        }
    }

    pub fn sort_field(&self) -> usize {
        self.field
    }

    pub fn is_ascending(&self) -> bool {
        self.asc
    }
}

impl OpIterator for OrderBy {
    fn open(&mut self) -> Result<()> {
        self.child.open()?;
        self.results.clear();
        while self.child.has_next()? {
            self.results.push(self.child.next()?);
        }
        let field = self.field;
        let asc = self.asc;
        // Stable sort; tuples with an unset sort field keep their relative
        // position.
        self.results.sort_by(|a, b| {
            let ord = match (a.field(field), b.field(field)) {
                (Some(x), Some(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            };
            if asc {
                ord
            } else {
                ord.reverse()
            }
        });
        self.cursor = 0;
        self.opened = true;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        if !self.opened {
            return Err(ExecError::NotOpen);
        }
        Ok(self.cursor < self.results.len())
    }

    fn next(&mut self) -> Result<Tuple> {
        if !self.has_next()? {
            return Err(ExecError::NoSuchElement);
        }
        let t = self.results[self.cursor].clone();
        self.cursor += 1;
        Ok(t)
    }

    fn rewind(&mut self) -> Result<()> {
        if !self.opened {
            return Err(ExecError::NotOpen);
        }
        self.cursor = 0;
        Ok(())
    }

    fn close(&mut self) {
        self.child.close();
        self.results.clear();
        self.cursor = 0;
        self.opened = false;
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn set_children(&mut self, mut children: Vec<Box<dyn OpIterator>>) {
        if let Some(child) = children.pop() {
            self.desc = child.tuple_desc().clone();
            self.child = child;
        }
    }
}
