//! Refcounted in-memory overlay over a backing state database.
//!
//! Trie commits write nodes here; flushing the buffered writes to the
//! backing store is a separate explicit step, so a block can be executed
//! and discarded without touching disk.

mod overlaydb;
pub use overlaydb::{OverlayDB, OverlayDBError};
