//! Transparent frame fragmentation and reassembly.
//!
//! Oversize request and payload frames are split into a head frame plus a
//! chain of PAYLOAD continuations linked by the FOLLOWS flag. The outbound
//! [`Fragmenter`] caps every emitted frame at the configured MTU; the inbound
//! [`Reassembler`] joins chains back into one logical frame before dispatch.

pub mod fragmenter;
pub mod reassembler;

pub use fragmenter::{Fragmenter, MIN_FRAGMENT_MTU};
pub use reassembler::Reassembler;

#[cfg(test)]
mod tests;
