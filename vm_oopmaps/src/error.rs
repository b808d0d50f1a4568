use crate::memory::{Address, MemoryError};
use thiserror::Error;

/// Ways an oop map set can disagree with the reader's idea of the format.
/// Any of these means the table and the reader are out of sync; none are
/// recoverable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Corruption {
    #[error("oop map set has no maps")]
    EmptyMapSet,
    #[error("map offset {offset} is outside the {size}-byte shared data region")]
    MapOffsetOutOfBounds { offset: i64, size: u64 },
    #[error("read at {addr} runs past the end of the shared data region at {limit}")]
    ReadPastEnd { addr: Address, limit: Address },
    #[error("negative {what} count {count}")]
    NegativeCount { what: &'static str, count: i64 },
    #[error("unknown oop map value type {0:#x}")]
    UnknownValueType(u16),
    #[error("negative content register {0}")]
    NegativeRegister(i32),
    #[error("more than {limit} callee-saved entries in one map")]
    CalleeSavedOverflow { limit: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("corrupt oop map data: {0}")]
    CorruptMapData(#[from] Corruption),
    #[error("no oop map at pc offset {pc_offset} ({count} maps, next pc offset {nearest:?})")]
    MapNotFound {
        pc_offset: i64,
        count: usize,
        nearest: Option<i64>,
    },
    #[error("oop map pair {index} out of bounds of {count} pairs")]
    PairIndexOutOfBounds { index: usize, count: usize },
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

pub type Result<T> = std::result::Result<T, Error>;
