//! Frame relay between the tun device and standard streams
//!
//! Provides:
//! - The readiness-driven forwarding loop
//! - Per-direction pending buffers with partial-write handling

pub mod forward;
pub mod pending;

pub use forward::{DEFAULT_BUFFER_LEN, Endpoint, Outcome, Session, run};
