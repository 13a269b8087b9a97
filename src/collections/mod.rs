//! Concurrent collections.
//!
//! - [`ConcurrentMap`]: sharded hash map whose read-modify-write operations
//!   are atomic per key

mod map;

pub use map::ConcurrentMap;
