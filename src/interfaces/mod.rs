//! Surfaces through which a host drives the orchestrator.

pub mod console;
