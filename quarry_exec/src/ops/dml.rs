use std::sync::Arc;

use super::OpIterator;
use crate::errors::{ExecError, Result};
use granite::buffer_pool::BufferPool;
use granite::error::DbError;
use granite::transaction::TransactionId;
use granite::tuple::{Field, Tuple, TupleDesc, Type};

fn count_desc() -> TupleDesc {
    TupleDesc::with_types(vec![Type::Int])
}

fn count_tuple(desc: &TupleDesc, count: i32) -> Tuple {
    Tuple::with_fields(desc.clone(), vec![Field::Int(count)])
}

/// Drains its child into a table through the buffer pool and yields a single
/// one-field tuple carrying the insert count. The count is produced once per
/// operator instance; after that the operator is exhausted, rewind included.
pub struct Insert {
    pool: Arc<BufferPool>,
    tid: TransactionId,
    child: Box<dyn OpIterator>,
    table_id: u32,
    desc: TupleDesc,
    done: bool,
    opened: bool,
    peeked: Option<Tuple>,
}

impl Insert {
    pub fn new(
        pool: Arc<BufferPool>,
        tid: TransactionId,
        child: Box<dyn OpIterator>,
        table_id: u32,
    ) -> Result<Self> {
        let table_desc = pool.catalog().tuple_desc(table_id)?;
        if *child.tuple_desc() != table_desc {
            return Err(DbError::SchemaMismatch.into());
        }
        Ok(Insert {
            pool,
            tid,
            child,
            table_id,
            desc: count_desc(),
            done: false,
            opened: false,
            peeked: None,
        })
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let mut count = 0;
        while self.child.has_next()? {
            let mut t = self.child.next()?;
            self.pool.insert_tuple(self.tid, self.table_id, &mut t)?;
            count += 1;
        }
        Ok(Some(count_tuple(&self.desc, count)))
    }
}

impl OpIterator for Insert {
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
        &self.desc
    }

    fn set_children(&mut self, mut children: Vec<Box<dyn OpIterator>>) {
        if let Some(child) = children.pop() {
            self.child = child;
        }
    }
}

/// Deletes every tuple its child produces (located by record id) and yields
/// a single one-field count tuple, once per operator instance.
pub struct Delete {
    pool: Arc<BufferPool>,
    tid: TransactionId,
    child: Box<dyn OpIterator>,
    desc: TupleDesc,
    done: bool,
    opened: bool,
    peeked: Option<Tuple>,
}

impl Delete {
    pub fn new(pool: Arc<BufferPool>, tid: TransactionId, child: Box<dyn OpIterator>) -> Self {
        Delete {
            pool,
            tid,
            child,
            desc: count_desc(),
            done: false,
            opened: false,
            peeked: None,
        }
    }

    fn fetch_next(&mut self) -> Result<Option<Tuple>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        let mut count = 0;
        while self.child.has_next()? {
            let mut t = self.child.next()?;
            self.pool.delete_tuple(self.tid, &mut t)?;
            count += 1;
        }
        Ok(Some(count_tuple(&self.desc, count)))
    }
}

impl OpIterator for Delete {
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
        &self.desc
    }

    fn set_children(&mut self, mut children: Vec<Box<dyn OpIterator>>) {
        if let Some(child) = children.pop() {
            self.child = child;
        }
    }
}
