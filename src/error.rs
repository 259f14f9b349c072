//! Error kinds raised by the storage core (spec.md §7).
//!
//! Mirrors the teacher's hand-rolled `Error` enum + manual `Display` (no
//! `thiserror`); everything still flows through `anyhow::Result` at call
//! sites via the `From<Error> for anyhow::Error` blanket impl.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Disk
    FileExists(String),
    FileNotExists(String),
    FileNotOpen(String),
    FileReopen(String),
    FileReadError(String),
    FileWriteError(String),
    FileDeleteError(String),

    // Buffer
    NoFreeFrame,

    // Table
    RecordExists,
    RecordMiss,
    RecLenError,
    PageMiss,

    // Schema / record
    TypeMismatch(String, String),
    StringOverflow(usize, usize),
    UnexpectedNull(String),
    UnsupportedOp(String),

    // Index
    IndexFail(String),

    // Lifecycle
    TableExists(String),
    TableMiss(String),
    DbExists(String),
    DbMiss(String),
    DbNotOpen,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::FileExists(p) => write!(f, "FILE_EXISTS: {p}"),
            Error::FileNotExists(p) => write!(f, "FILE_NOT_EXISTS: {p}"),
            Error::FileNotOpen(p) => write!(f, "FILE_NOT_OPEN: {p}"),
            Error::FileReopen(p) => write!(f, "FILE_REOPEN: {p}"),
            Error::FileReadError(p) => write!(f, "FILE_READ_ERROR: {p}"),
            Error::FileWriteError(p) => write!(f, "FILE_WRITE_ERROR: {p}"),
            Error::FileDeleteError(p) => write!(f, "FILE_DELETE_ERROR: {p}"),
            Error::NoFreeFrame => write!(f, "NO_FREE_FRAME"),
            Error::RecordExists => write!(f, "RECORD_EXISTS"),
            Error::RecordMiss => write!(f, "RECORD_MISS"),
            Error::RecLenError => write!(f, "RECLEN_ERROR"),
            Error::PageMiss => write!(f, "PAGE_MISS"),
            Error::TypeMismatch(expected, actual) => {
                write!(f, "TYPE_MISSMATCH: expected {expected}, got {actual}")
            }
            Error::StringOverflow(max, actual) => {
                write!(f, "STRING_OVERFLOW: max {max}, got {actual}")
            }
            Error::UnexpectedNull(field) => write!(f, "UNEXPECTED_NULL: {field}"),
            Error::UnsupportedOp(op) => write!(f, "UNSUPPORTED_OP: {op}"),
            Error::IndexFail(why) => write!(f, "INDEX_FAIL: {why}"),
            Error::TableExists(name) => write!(f, "TABLE_EXIST: {name}"),
            Error::TableMiss(name) => write!(f, "TABLE_MISS: {name}"),
            Error::DbExists(name) => write!(f, "DB_EXISTS: {name}"),
            Error::DbMiss(name) => write!(f, "DB_MISS: {name}"),
            Error::DbNotOpen => write!(f, "DB_NOT_OPEN"),
        }
    }
}

impl std::error::Error for Error {}
