//! Testing infrastructure for mergegate.
//!
//! - **Mocks**: [`MockValidator`], a validator with canned findings, delays
//!   and panics for exercising orchestration
//! - **Fixtures**: temporary git repositories and ready-made change sets
//!   (test-only)

#[cfg(test)]
pub mod fixtures;
pub mod mocks;

#[cfg(test)]
pub use fixtures::*;
pub use mocks::*;
