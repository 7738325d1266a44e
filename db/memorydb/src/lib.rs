//! In-memory backing store for the state database stack.

mod memorydb;
pub use memorydb::{MemoryDB, MemoryDBError};
