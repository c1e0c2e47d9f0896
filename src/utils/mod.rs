pub mod fetch;
pub mod rate_limit;
pub mod retry;

pub use fetch::{
    FetchError, HttpTransport, OutboundRequest, OutboundResponse, RetryClient, TaggedResult, Transport,
};
pub use rate_limit::{RateDecision, RateLimitCounter, RateLimitPolicy, RateLimiter};
pub use retry::{retry_with_backoff, RetryConfig};
