//! Failure-handling building blocks.

pub mod retry;

pub use retry::{retry, RetryConfig};
