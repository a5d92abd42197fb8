//! Pull-based operator iterators.
//!
//! Every operator exposes the same lifecycle: `open`, `has_next`/`next`,
//! `rewind`, `close`. `next` on a drained operator fails with
//! [`ExecError::NoSuchElement`]; a closed operator may be opened again.
//! Operators form a tree whose leaves are table scans; iterating the root
//! pulls tuples up through the tree, and every page touch goes through the
//! buffer pool under the operator's transaction.

mod aggregate;
mod dml;
mod filter;
mod join;
mod order_by;
mod project;
mod scan;
mod support;

pub use aggregate::{AggOp, Aggregate, Aggregator, IntAggregator, StringAggregator};
pub use dml::{Delete, Insert};
pub use filter::Filter;
pub use join::Join;
pub use order_by::OrderBy;
pub use project::Project;
pub use scan::SeqScan;
pub use support::TupleIterator;

use crate::errors::Result;
use granite::tuple::{Tuple, TupleDesc};

/// The uniform pull contract all operators implement.
pub trait OpIterator {
    fn open(&mut self) -> Result<()>;

    fn has_next(&mut self) -> Result<bool>;

    /// The next tuple; fails with [`crate::ExecError::NoSuchElement`] when
    /// the operator is exhausted.
    fn next(&mut self) -> Result<Tuple>;

    /// Restarts iteration from the first tuple.
    fn rewind(&mut self) -> Result<()>;

    fn close(&mut self);

    /// The schema of the tuples this operator produces.
    fn tuple_desc(&self) -> &TupleDesc;

    /// Replaces this operator's children. Childless operators ignore it.
    fn set_children(&mut self, children: Vec<Box<dyn OpIterator>>) {
        let _ = children;
    }
}
