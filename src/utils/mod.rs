pub mod backoff;

pub use backoff::{BackoffCounter, exponential_backoff};
