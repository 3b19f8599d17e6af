//! # Bulksend Testing Utils
//!
//! Shared testing utilities for the bulk message dispatch pipeline.
//!
//! ## Features
//!
//! - **Mock Sender**: scripted per-phone outcomes, call recording and latency
//! - **Mock Send Log Store**: in-memory store enforcing the status graph
//! - **Test Data Builders**: recipients and send-log records with sensible defaults
//! - **Helpers**: condition polling and test logging setup
//!
//! ## Usage
//!
//! Add this crate as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! bulksend-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use builders::*;
pub use helpers::*;
pub use mocks::*;
