//! Deterministic, pure logic shared by the sandbox components.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! values and return deterministic outputs suitable for tests.

pub mod boundary;
pub mod capacity;
pub mod diff;
pub mod restart;
pub mod types;
