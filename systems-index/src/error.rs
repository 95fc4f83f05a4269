//! Error types for the codec, the node store and store startup.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Integer field of a node record, used to say which slot failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Field {
    ChildOffset,
    NextSiblingOffset,
    TerminalCount,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Field::ChildOffset => "child offset",
            Field::NextSiblingOffset => "next sibling offset",
            Field::TerminalCount => "terminal count",
        })
    }
}

/// A node record could not be encoded or decoded.
#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error("corrupt record: {0} bytes, expected {}", crate::node::RECORD_SIZE)]
    BadLength(usize),

    #[error("corrupt record: unterminated varint in {0} slot")]
    MalformedVarint(Field),

    #[error("{field} {value} does not fit its slot")]
    OutOfRange { field: Field, value: i64 },
}

/// A node store operation failed while the store was running.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error on index file {file} at offset {offset}")]
    Io {
        file: u64,
        offset: i64,
        #[source]
        source: io::Error,
    },

    #[error("short read on index file {file} at offset {offset}: got {got} bytes")]
    ShortRead { file: u64, offset: i64, got: usize },

    #[error("offset {offset} is outside the store (tail at {tail})")]
    OutOfBounds { offset: i64, tail: i64 },

    #[error("node store is closed")]
    Closed,

    #[error("record at offset {offset} was reserved but never written; reopen the store")]
    Hole { offset: i64 },

    #[error(transparent)]
    Corrupt(#[from] CodecError),
}

/// The node store could not be brought up.
#[derive(thiserror::Error, Debug)]
pub enum StartupError {
    #[error("records per file must be positive")]
    ZeroCapacity,

    #[error("unable to prepare index directory {path}")]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to inspect index file {path}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("index file {0} is missing; files must be numbered from 0 without gaps")]
    MissingFile(PathBuf),

    #[error("index file {path} holds {len} bytes, expected {expected}")]
    BadFileSize {
        path: PathBuf,
        len: u64,
        expected: u64,
    },
}
