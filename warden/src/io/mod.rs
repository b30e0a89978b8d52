//! Side-effecting components: filesystem access, child processes, and events.

pub mod config;
pub mod events;
pub mod execution;
pub mod file_gateway;
pub mod path_validator;
pub mod process;
pub mod supervisor;
