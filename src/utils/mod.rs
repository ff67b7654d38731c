//! Utility modules
//!
//! Contains retry logic and string helpers.

pub mod retry;
pub mod string;

pub use retry::{is_transient_status, is_transient_transport, RetryPolicy};
pub use string::{mask_email, non_empty, normalize_email, truncate_str};
