//! Matching and scoring core.
//!
//! `matcher` resolves an outflow against historical unused inflows;
//! `scorer` is the pure weight/score computation over the matched trades.

pub mod matcher;
pub mod scorer;

pub use matcher::{DbInflowSource, EntryMatcher, EntryOrigin, InflowSource, MatchedEntry};
