mod config;
mod crawler;
mod fetcher;
mod headers;
mod limiter;
mod retry;
mod traits;
mod walker;

pub use config::{
    CrawlerConfig, DelayRange, LimiterConfig, PacingConfig, RetryConfig, TimeoutConfig,
};
pub use crawler::{CrawlRunStats, Crawler};
pub use fetcher::{domain_of, DebugDump, FetchOutcome, PageFetcher, ReqwestTransport};
pub use headers::random_headers;
pub use limiter::RateLimiter;
pub use retry::{RetryDecision, RetryPolicy};
pub use traits::{Extract, PageMeta, PageStore, ProductFields, Transport, TransportResponse};
pub use walker::{ComboFilter, ListingWalker, ProductCandidate, WalkerBatch};

pub use anyhow;
