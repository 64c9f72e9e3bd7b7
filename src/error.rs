use thiserror::Error;

use crate::{Key, Time, Weight};

/// Errors returned by tree mutations, historical reads and sortition.
///
/// Every error leaves the tree exactly as it was before the failing call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("key {key} has not been assigned (next key is {next_key})")]
    InvalidKey { key: Key, next_key: Key },

    #[error("value of node ({level}, {index}) would leave the representable range")]
    Overflow { level: u32, index: u64 },

    #[error("offset {offset} is outside the total weight {total}")]
    OutOfRange { offset: Weight, total: Weight },

    #[error("write to node ({level}, {index}) at time {time} is older than its last checkpoint at {last}")]
    TimeTravel {
        level: u32,
        index: u64,
        time: Time,
        last: Time,
    },

    #[error("leaf key space is exhausted")]
    KeySpaceExhausted,

    #[error("next key cannot move backwards from {next_key} to {requested}")]
    KeyRegression { requested: Key, next_key: Key },

    #[error("corrupt journal: {0}")]
    CorruptJournal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
