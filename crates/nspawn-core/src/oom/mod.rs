//! Out-of-memory correlation: kernel log tail, line parser and the actor
//! routing kills to tasks.

mod journal;
mod listener;
mod parse;

pub use journal::JournalTail;
pub use listener::OomListener;
pub use parse::{JournalRecord, parse_line};
