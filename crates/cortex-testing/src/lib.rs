//! Shared fixtures for cortex integration tests.

mod fixtures;
mod world;

pub use fixtures::*;
pub use world::TestWorld;
