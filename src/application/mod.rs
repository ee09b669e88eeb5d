//! Application layer containing the payment-terminal orchestration.
//!
//! The `Orchestrator` runs as a single actor task that owns every state
//! transition: reader supervision, the active payment flow and the poller's
//! lifetime. Other components talk to it only through its command channel,
//! and all backend calls are funnelled through one serial worker.

pub mod flow;
pub mod gate;
pub mod lifecycle;
pub mod orchestrator;
pub mod poller;
pub mod serial;
pub mod supervisor;
pub mod token_cache;
