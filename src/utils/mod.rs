pub mod fingerprint;
pub mod rate_limiter;
pub mod time;

pub use fingerprint::config_fingerprint;
pub use rate_limiter::{limiters_for, RateLimiter, SlidingWindow};
pub use time::{Clock, TokioClock};
