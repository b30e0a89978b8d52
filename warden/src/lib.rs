//! Sandboxed file and process gateway for driving an external AI command-line tool.
//!
//! The crate keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (lexical path handling, diffing,
//!   failure classification, restart decisions). No I/O.
//! - **[`io`]**: Side-effecting components (path validation against the real
//!   filesystem, file operations, process supervision, one-shot execution).
//!
//! [`session`] ties one workspace to its gateways, and [`rpc`] exposes the
//! request/response surface used by the CLI and the UI server.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod rpc;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
