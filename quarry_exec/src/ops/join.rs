use super::OpIterator;
use crate::errors::{ExecError, Result};
use crate::predicate::JoinPredicate;
use granite::tuple::{Tuple, TupleDesc};

/// Tuple-nested-loops join. For every left tuple the right child is rewound
/// and re-scanned; each satisfying pair is emitted as left fields followed by
/// right fields, so the output order is stable in the left child's order.
pub struct Join {
    jp: JoinPredicate,
    left: Box<dyn OpIterator>,
    right: Box<dyn OpIterator>,
    desc: TupleDesc,
    current_left: Option<Tuple>,
    opened: bool,
    peeked: Option<Tuple>,
}

impl Join {
    pub fn new(
        jp: JoinPredicate,
        left: Box<dyn OpIterator>,
        right: Box<dyn OpIterator>,
    ) -> Self {
        let desc = TupleDesc::merge(left.tuple_desc(), right.tuple_desc());
        Join {
            jp,
            left,
            right,
            desc,
            current_left: None,
            opened: false,
            peeked: None,
        }
    }

    pub fn join_predicate(&self) -> &JoinPredicate {
        &self.jp
    }

    fn merge_tuples(&self, l: &Tuple, r: &Tuple) -> Result<Tuple> {
        let mut out = Tuple::new(self.desc.clone());
        let mut i = 0;
        for j in 0..l.desc().num_fields() {
            if let Some(f) = l.field(j) {
                out.set_field(i, f.clone())?;
            }
            i += 1;
        }
        for j in 0..r.desc().num_fields() {
            if let Some(f) = r.field(j) {
                out.set_field(i, f.clone())?;
            }
            i += 1;
        }
        Ok(out)
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>> {
        loop {
            if self.current_left.is_none() {
                if !self.left.has_next()? {
                    return Ok(None);
                }
                self.current_left = Some(self.left.next()?);
                self.right.rewind()?;
            }
            let l = self.current_left.clone().expect("left tuple present");
            while self.right.has_next()? {
                let r = self.right.next()?;
                if self.jp.filter(&l, &r) {
                    return Ok(Some(self.merge_tuples(&l, &r)?));
                }
            }
            self.current_left = None;
        }
    }
}

impl OpIterator for Join {
    fn open(&mut self) -> Result<()> {
        self.left.open()?;
        self.right.open()?;
        self.opened = true;
        self.current_left = None;
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
        self.left.rewind()?;
        self.right.rewind()?;
        self.current_left = None;
        self.peeked = None;
        Ok(())
    }

    fn close(&mut self) {
        self.left.close();
        self.right.close();
        self.opened = false;
        self.current_left = None;
        self.peeked = None;
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn set_children(&mut self, mut children: Vec<Box<dyn OpIterator>>) {
        if children.len() == 2 {
            self.right = children.pop().expect("two children");
            self.left = children.pop().expect("two children");
            self.desc = TupleDesc::merge(self.left.tuple_desc(), self.right.tuple_desc());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::TupleIterator;
    use granite::tuple::{CmpOp, Field, Type};

    fn left_rows() -> TupleIterator {
        let td = TupleDesc::with_types(vec![Type::Int]);
        let tuples = [1, 2, 3]
            .iter()
            .map(|v| Tuple::with_fields(td.clone(), vec![Field::Int(*v)]))
            .collect();
        TupleIterator::new(td, tuples)
    }

    fn right_rows() -> TupleIterator {
        let td = TupleDesc::with_types(vec![Type::Int, Type::Str]);
        let tuples = [(1, "x"), (2, "y"), (4, "z")]
            .iter()
            .map(|(v, s)| {
                Tuple::with_fields(
                    td.clone(),
                    vec![Field::Int(*v), Field::Str((*s).to_string())],
                )
            })
            .collect();
        TupleIterator::new(td, tuples)
    }

    #[test]
    fn equi_join_emits_matching_pairs_with_merged_schema() {
        let jp = JoinPredicate::new(0, CmpOp::Equals, 0);
        let mut join = Join::new(jp, Box::new(left_rows()), Box::new(right_rows()));
        assert_eq!(join.tuple_desc().num_fields(), 3);

        join.open().unwrap();
        let mut results = Vec::new();
        while join.has_next().unwrap() {
            let t = join.next().unwrap();
            let key = match t.field(0).unwrap() {
                Field::Int(v) => *v,
                other => panic!("unexpected field {:?}", other),
            };
            let tag = match t.field(2).unwrap() {
                Field::Str(s) => s.clone(),
                other => panic!("unexpected field {:?}", other),
            };
            results.push((key, tag));
        }
        join.close();
        assert_eq!(results, vec![(1, "x".to_string()), (2, "y".to_string())]);
    }

    #[test]
    fn rewind_restarts_both_children() {
        let jp = JoinPredicate::new(0, CmpOp::Equals, 0);
        let mut join = Join::new(jp, Box::new(left_rows()), Box::new(right_rows()));
        join.open().unwrap();
        let mut first = 0;
        while join.has_next().unwrap() {
            join.next().unwrap();
            first += 1;
        }
        join.rewind().unwrap();
        let mut second = 0;
        while join.has_next().unwrap() {
            join.next().unwrap();
            second += 1;
        }
        assert_eq!(first, 2);
        assert_eq!(second, first);
    }

    #[test]
    fn inequality_join_pairs_every_smaller_left() {
        // left < right.key: 1 pairs with 2 and 4; 2 with 4; 3 with 4.
        let jp = JoinPredicate::new(0, CmpOp::LessThan, 0);
        let mut join = Join::new(jp, Box::new(left_rows()), Box::new(right_rows()));
        join.open().unwrap();
        let mut count = 0;
        while join.has_next().unwrap() {
            join.next().unwrap();
            count += 1;
        }
        assert_eq!(count, 4);
    }
}
