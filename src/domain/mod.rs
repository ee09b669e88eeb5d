//! Domain types and the ports the orchestrator consumes.
//!
//! Nothing in this module performs I/O. Adapters live in `infrastructure`.

pub mod device;
pub mod events;
pub mod ports;
pub mod reader;
pub mod session;
pub mod token;
