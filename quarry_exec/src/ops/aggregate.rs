use std::collections::HashMap;
use std::fmt;

use super::OpIterator;
use crate::errors::{ExecError, Result};
use granite::error::DbError;
use granite::tuple::{Field, Tuple, TupleDesc, Type};

/// The aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggOp {
    Min,
    Max,
    Sum,
    Avg,
    Count,
}

impl fmt::Display for AggOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggOp::Min => "min",
            AggOp::Max => "max",
            AggOp::Sum => "sum",
            AggOp::Avg => "avg",
            AggOp::Count => "count",
        };
        write!(f, "{}", s)
    }
}

/// Accumulates tuples into per-group aggregate state. The group key is the
/// group-by field's value, or a single anonymous group when grouping is off.
pub trait Aggregator {
    fn merge(&mut self, t: &Tuple) -> Result<()>;

    /// One `(group value, aggregate)` tuple per group, or a single
    /// `(aggregate)` tuple without grouping. Order is unspecified.
    fn results(&self) -> Vec<Tuple>;
}

fn result_desc(gtype: Option<Type>) -> TupleDesc {
    match gtype {
        Some(t) => TupleDesc::with_types(vec![t, Type::Int]),
        None => TupleDesc::with_types(vec![Type::Int]),
    }
}

fn result_tuple(desc: &TupleDesc, group: &Option<Field>, value: i32) -> Tuple {
    match group {
        Some(g) => Tuple::with_fields(desc.clone(), vec![g.clone(), Field::Int(value)]),
        None => Tuple::with_fields(desc.clone(), vec![Field::Int(value)]),
    }
}

/// MIN/MAX/SUM/AVG/COUNT over an integer field. AVG keeps the running sum
/// and count separately and divides (integer division) when results are
/// produced.
pub struct IntAggregator {
    gfield: Option<usize>,
    gtype: Option<Type>,
    afield: usize,
    op: AggOp,
    accums: HashMap<Option<Field>, i32>,
    counts: HashMap<Option<Field>, i32>,
}

impl IntAggregator {
    pub fn new(gfield: Option<usize>, gtype: Option<Type>, afield: usize, op: AggOp) -> Self {
        IntAggregator {
            gfield,
            gtype,
            afield,
            op,
            accums: HashMap::new(),
            counts: HashMap::new(),
        }
    }

    fn group_key(&self, t: &Tuple) -> Result<Option<Field>> {
        match self.gfield {
            Some(i) => Ok(Some(
                t.field(i).ok_or(DbError::FieldIndex(i))?.clone(),
            )),
            None => Ok(None),
        }
    }
}

impl Aggregator for IntAggregator {
    fn merge(&mut self, t: &Tuple) -> Result<()> {
        let group = self.group_key(t)?;
        let v = match t.field(self.afield) {
            Some(Field::Int(v)) => *v,
            _ => return Err(DbError::SchemaMismatch.into()),
        };
        match self.op {
            AggOp::Count => {
                *self.counts.entry(group).or_insert(0) += 1;
            }
            AggOp::Avg => {
                *self.accums.entry(group.clone()).or_insert(0) += v;
                *self.counts.entry(group).or_insert(0) += 1;
            }
            AggOp::Sum => {
                *self.accums.entry(group).or_insert(0) += v;
            }
            AggOp::Min => {
                self.accums
                    .entry(group)
                    .and_modify(|m| *m = (*m).min(v))
                    .or_insert(v);
            }
            AggOp::Max => {
                self.accums
                    .entry(group)
                    .and_modify(|m| *m = (*m).max(v))
                    .or_insert(v);
            }
        }
        Ok(())
    }

    fn results(&self) -> Vec<Tuple> {
        let desc = result_desc(self.gtype);
        match self.op {
            AggOp::Count => self
                .counts
                .iter()
                .map(|(g, c)| result_tuple(&desc, g, *c))
                .collect(),
            AggOp::Avg => self
                .accums
                .iter()
                .map(|(g, sum)| result_tuple(&desc, g, sum / self.counts[g]))
                .collect(),
            _ => self
                .accums
                .iter()
                .map(|(g, v)| result_tuple(&desc, g, *v))
                .collect(),
        }
    }
}

/// COUNT over a string field; every other operator is rejected when the
/// aggregator is constructed.
pub struct StringAggregator {
    gfield: Option<usize>,
    gtype: Option<Type>,
    counts: HashMap<Option<Field>, i32>,
}

impl StringAggregator {
    pub fn new(
        gfield: Option<usize>,
        gtype: Option<Type>,
        _afield: usize,
        op: AggOp,
    ) -> Result<Self> {
        if op != AggOp::Count {
            return Err(ExecError::Unsupported(format!("{} over strings", op)));
        }
        Ok(StringAggregator {
            gfield,
            gtype,
            counts: HashMap::new(),
        })
    }
}

impl Aggregator for StringAggregator {
    fn merge(&mut self, t: &Tuple) -> Result<()> {
        let group = match self.gfield {
            Some(i) => Some(t.field(i).ok_or(DbError::FieldIndex(i))?.clone()),
            None => None,
        };
        *self.counts.entry(group).or_insert(0) += 1;
        Ok(())
    }

    fn results(&self) -> Vec<Tuple> {
        let desc = result_desc(self.gtype);
        self.counts
            .iter()
            .map(|(g, c)| result_tuple(&desc, g, *c))
            .collect()
    }
}

/// Group-by over one aggregate field. `open` drains the child into the
/// aggregator in a single pass, then iteration serves the materialized
/// groups.
pub struct Aggregate {
    child: Box<dyn OpIterator>,
    afield: usize,
    gfield: Option<usize>,
    op: AggOp,
    desc: TupleDesc,
    results: Vec<Tuple>,
    cursor: usize,
    opened: bool,
}

impl Aggregate {
    pub fn new(
        child: Box<dyn OpIterator>,
        afield: usize,
        gfield: Option<usize>,
        op: AggOp,
    ) -> Result<Self> {
        let desc = Self::output_desc(child.as_ref(), afield, gfield, op)?;
        Ok(Aggregate {
            child,
            afield,
            gfield,
            op,
            desc,
            results: Vec::new(),
            cursor: 0,
            opened: false,
        })
    }

    fn output_desc(
        child: &dyn OpIterator,
        afield: usize,
        gfield: Option<usize>,
        op: AggOp,
    ) -> Result<TupleDesc> {
        let child_desc = child.tuple_desc();
        let atype = child_desc.field_type(afield)?;
        if atype == Type::Str && op != AggOp::Count {
            return Err(ExecError::Unsupported(format!("{} over strings", op)));
        }
        let agg_name = format!(
            "{}({})",
            op,
            child_desc.field_name(afield)?.unwrap_or("null")
        );
        match gfield {
            Some(i) => {
                let gtype = child_desc.field_type(i)?;
                let gname = child_desc.field_name(i)?.map(str::to_string);
                Ok(TupleDesc::new(
                    vec![gtype, Type::Int],
                    vec![gname, Some(agg_name)],
                ))
            }
            None => Ok(TupleDesc::new(vec![Type::Int], vec![Some(agg_name)])),
        }
    }

    fn build_aggregator(&self) -> Result<Box<dyn Aggregator>> {
        let child_desc = self.child.tuple_desc();
        let gtype = match self.gfield {
            Some(i) => Some(child_desc.field_type(i)?),
            None => None,
        };
        match child_desc.field_type(self.afield)? {
            Type::Int => Ok(Box::new(IntAggregator::new(
                self.gfield,
                gtype,
                self.afield,
                self.op,
            ))),
            Type::Str => Ok(Box::new(StringAggregator::new(
                self.gfield,
                gtype,
                self.afield,
                self.op,
            )?)),
        }
    }
}

impl OpIterator for Aggregate {
    fn open(&mut self) -> Result<()> {
        self.child.open()?;
        let mut agg = self.build_aggregator()?;
        while self.child.has_next()? {
            let t = self.child.next()?;
            agg.merge(&t)?;
        }
        self.results = agg.results();
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
            self.child = child;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::TupleIterator;

    fn grouped_rows() -> TupleIterator {
        let td = TupleDesc::new(
            vec![Type::Str, Type::Int],
            vec![Some("g".to_string()), Some("v".to_string())],
        );
        let rows = [("a", 1), ("a", 3), ("b", 2)]
            .iter()
            .map(|(g, v)| {
                Tuple::with_fields(
                    td.clone(),
                    vec![Field::Str((*g).to_string()), Field::Int(*v)],
                )
            })
            .collect();
        TupleIterator::new(td, rows)
    }

    fn drain_pairs(op: &mut dyn OpIterator) -> Vec<(String, i32)> {
        let mut out = Vec::new();
        while op.has_next().unwrap() {
            let t = op.next().unwrap();
            let g = match t.field(0).unwrap() {
                Field::Str(s) => s.clone(),
                other => panic!("unexpected group {:?}", other),
            };
            let v = match t.field(1).unwrap() {
                Field::Int(v) => *v,
                other => panic!("unexpected value {:?}", other),
            };
            out.push((g, v));
        }
        out.sort();
        out
    }

    #[test]
    fn grouped_avg_uses_integer_division() {
        let mut agg =
            Aggregate::new(Box::new(grouped_rows()), 1, Some(0), AggOp::Avg).unwrap();
        agg.open().unwrap();
        let pairs = drain_pairs(&mut agg);
        assert_eq!(pairs, vec![("a".to_string(), 2), ("b".to_string(), 2)]);
        agg.close();
    }

    #[test]
    fn grouped_min_max_sum_count() {
        for (op, expected) in [
            (AggOp::Min, vec![("a".to_string(), 1), ("b".to_string(), 2)]),
            (AggOp::Max, vec![("a".to_string(), 3), ("b".to_string(), 2)]),
            (AggOp::Sum, vec![("a".to_string(), 4), ("b".to_string(), 2)]),
            (AggOp::Count, vec![("a".to_string(), 2), ("b".to_string(), 1)]),
        ] {
            let mut agg =
                Aggregate::new(Box::new(grouped_rows()), 1, Some(0), op).unwrap();
            agg.open().unwrap();
            assert_eq!(drain_pairs(&mut agg), expected, "op {}", op);
        }
    }

    #[test]
    fn ungrouped_sum_yields_single_int_tuple() {
        let mut agg = Aggregate::new(Box::new(grouped_rows()), 1, None, AggOp::Sum).unwrap();
        assert_eq!(agg.tuple_desc().num_fields(), 1);
        agg.open().unwrap();
        let t = agg.next().unwrap();
        assert_eq!(t.field(0), Some(&Field::Int(6)));
        assert!(!agg.has_next().unwrap());
    }

    #[test]
    fn string_count_is_supported_and_grouped() {
        // Count the string column itself, grouped by it.
        let mut agg = Aggregate::new(Box::new(grouped_rows()), 0, Some(0), AggOp::Count).unwrap();
        agg.open().unwrap();
        let pairs = drain_pairs(&mut agg);
        assert_eq!(pairs, vec![("a".to_string(), 2), ("b".to_string(), 1)]);
    }

    #[test]
    fn string_aggregates_other_than_count_fail_at_construction() {
        for op in [AggOp::Min, AggOp::Max, AggOp::Sum, AggOp::Avg] {
            let result = Aggregate::new(Box::new(grouped_rows()), 0, Some(0), op);
            assert!(
                matches!(result, Err(ExecError::Unsupported(_))),
                "op {} should be unsupported over strings",
                op
            );
        }
    }

    #[test]
    fn rewind_replays_materialized_groups() {
        let mut agg =
            Aggregate::new(Box::new(grouped_rows()), 1, Some(0), AggOp::Avg).unwrap();
        agg.open().unwrap();
        let first = drain_pairs(&mut agg);
        agg.rewind().unwrap();
        let second = drain_pairs(&mut agg);
        assert_eq!(first, second);
    }

    #[test]
    fn output_schema_names_the_aggregate() {
        let agg = Aggregate::new(Box::new(grouped_rows()), 1, Some(0), AggOp::Avg).unwrap();
        assert_eq!(agg.tuple_desc().field_name(0).unwrap(), Some("g"));
        assert_eq!(agg.tuple_desc().field_name(1).unwrap(), Some("avg(v)"));
    }
}
