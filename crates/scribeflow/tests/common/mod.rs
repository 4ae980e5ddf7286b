//! Shared test utilities for scribeflow integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring a temp-dir audio store, an in-memory database and a
//!   mock transcription backend
//! - Builders and recording collaborators for assembling scenarios

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
