//! Denormalized lookup indices.
//!
//! Both managers only stage writes into a caller-owned batch; the consistency engine is
//! the one place that decides which index writes accompany which entity writes.

pub mod names;
pub mod tags;

pub use names::{NameIndexManager, NameScope};
pub use tags::{TagIndexManager, TagScope};
