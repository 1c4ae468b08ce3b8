//! Shared storage integration tests.
//!
//! Tests the EventBackend interface against all implementations.
//! Each implementation module imports these test functions and runs them.

pub mod backend_tests;
