use std::sync::Arc;

use super::OpIterator;
use crate::errors::{ExecError, Result};
use granite::buffer_pool::BufferPool;
use granite::heap_file::HeapFileIterator;
use granite::transaction::TransactionId;
use granite::tuple::{Tuple, TupleDesc};

/// Scans every tuple of a table through the buffer pool under READ locks.
/// The visible schema carries the table alias as a `alias.field` prefix on
/// every field name; the tuples themselves keep the table's schema.
pub struct SeqScan {
    desc: TupleDesc,
    iter: HeapFileIterator,
    opened: bool,
}

impl SeqScan {
    pub fn new(
        pool: &Arc<BufferPool>,
        tid: TransactionId,
        table_id: u32,
        alias: &str,
    ) -> Result<Self> {
        let file = pool.catalog().db_file(table_id)?;
        let base = file.tuple_desc().clone();
        let types = base.iter().map(|item| item.field_type).collect();
        let names = base
            .iter()
            .map(|item| {
                Some(format!(
                    "{}.{}",
                    alias,
                    item.name.as_deref().unwrap_or("null")
                ))
            })
            .collect();
        let desc = TupleDesc::new(types, names);
        let iter = HeapFileIterator::new(file, tid, Arc::clone(pool));
        Ok(SeqScan {
            desc,
            iter,
            opened: false,
        })
    }
}

impl OpIterator for SeqScan {
    fn open(&mut self) -> Result<()> {
        self.iter.open();
        self.opened = true;
        Ok(())
    }

    fn has_next(&mut self) -> Result<bool> {
        if !self.opened {
            return Err(ExecError::NotOpen);
        }
        Ok(self.iter.has_next()?)
    }

    fn next(&mut self) -> Result<Tuple> {
        if !self.has_next()? {
            return Err(ExecError::NoSuchElement);
        }
        Ok(self.iter.next()?)
    }

    fn rewind(&mut self) -> Result<()> {
        if !self.opened {
            return Err(ExecError::NotOpen);
        }
        self.iter.rewind();
        Ok(())
    }

    fn close(&mut self) {
        self.iter.close();
        self.opened = false;
    }

    fn tuple_desc(&self) -> &TupleDesc {
        &self.desc
    }
}
