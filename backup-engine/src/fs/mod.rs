//! File system helpers: tree traversal and durable JSON writes.

pub mod atomic;
pub mod walker;
