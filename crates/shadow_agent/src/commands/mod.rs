//! CLI command implementations.

pub mod adapter_host;
pub mod simulate;
pub mod topics;
