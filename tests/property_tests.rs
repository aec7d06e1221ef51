//! Property-based tests.
//!
//! Universally quantified invariants: router matching and precedence,
//! worker-pool queue ordering, cache key patterns, and the IPC frame
//! codec.

mod property;
