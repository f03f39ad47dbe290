//! Workspace root crate.
//!
//! This crate re-exports the main building blocks so integration tests can depend on a single crate.

pub use hal::*;
pub use policy::*;
pub use ring::*;
pub use sampler::*;
pub use sim::*;
