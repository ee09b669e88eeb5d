//! Adapters implementing the domain ports.

pub mod http_backend;
pub mod in_memory;
pub mod simulated_reader;
