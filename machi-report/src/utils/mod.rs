//! Utility modules

pub mod retry;

pub use retry::{retry_after_turn, retry_with_backoff, RetryPolicy};
