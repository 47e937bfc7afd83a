//! Process-wide tracing setup shared by services and tests.

pub mod tracing;

pub use crate::tracing::{init, init_for_tests, init_with_filter};
