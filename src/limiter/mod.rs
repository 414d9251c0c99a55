//! Per-identity rate limiting over rolling call windows.

mod budget;
mod rate_limiter;

pub use budget::RateLimits;
pub use rate_limiter::{Admission, RateLimiter};
