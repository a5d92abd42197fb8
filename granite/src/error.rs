use std::io;
use thiserror::Error;

use crate::page::PageId;

/// Errors surfaced by the storage engine.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("buffer pool exhausted: every cached page is dirty")]
    CacheExhausted,

    #[error("page has no empty slot")]
    PageFull,

    #[error("tuple schema does not match the table schema")]
    SchemaMismatch,

    #[error("tuple is not stored on the page")]
    TupleNotFound,

    #[error("no table with id {0}")]
    NoSuchTable(u32),

    #[error("no table named {0:?}")]
    NoSuchTableName(String),

    #[error("no field named {0:?}")]
    NoSuchField(String),

    #[error("field index {0} out of range")]
    FieldIndex(usize),

    #[error("page {0} does not belong to this file")]
    TableIdMismatch(PageId),

    #[error("malformed page image: {0}")]
    BadPageData(String),

    #[error("invalid catalog schema: {0}")]
    InvalidSchema(String),

    #[error("no more tuples")]
    NoSuchElement,

    #[error("transaction aborted")]
    TransactionAborted,
}

pub type Result<T> = std::result::Result<T, DbError>;
