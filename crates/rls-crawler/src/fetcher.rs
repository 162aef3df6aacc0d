use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::HeaderMap;
use tokio::time;
use url::Url;

use crate::config::TimeoutConfig;
use crate::headers::random_headers;
use crate::limiter::RateLimiter;
use crate::retry::{RetryDecision, RetryPolicy};
use crate::traits::{Transport, TransportResponse};

/// Body markers the target site serves when it suspects automation.
/// Matching any of them makes a 200 response a soft block.
const BLOCK_SIGNATURES: &[&str] = &[
    "To discuss automated access to Amazon data please contact",
    "api-services-support@amazon.com",
    "Sorry, we just need to make sure you're not a robot",
];

/// Terminal result of one fetch attempt sequence. `SoftBlock` and
/// `TransientError` also classify single attempts inside the retry loop;
/// callers only ever see `Success`, `HardBlock` or `Exhausted`.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Success { status: u16, body: String },
    SoftBlock { reason: String },
    HardBlock { reason: String },
    TransientError { reason: String },
    Exhausted,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::Success { status, .. } => write!(f, "success (status {status})"),
            FetchOutcome::SoftBlock { reason } => write!(f, "soft block: {reason}"),
            FetchOutcome::HardBlock { reason } => write!(f, "hard block: {reason}"),
            FetchOutcome::TransientError { reason } => write!(f, "transient error: {reason}"),
            FetchOutcome::Exhausted => write!(f, "retry budget exhausted"),
        }
    }
}

fn classify(resp: TransportResponse) -> FetchOutcome {
    match resp.status {
        200 => match BLOCK_SIGNATURES.iter().find(|sig| resp.body.contains(**sig)) {
            Some(sig) => FetchOutcome::SoftBlock {
                reason: format!("anti-automation signature: {sig:?}"),
            },
            None => FetchOutcome::Success {
                status: resp.status,
                body: resp.body,
            },
        },
        429 | 503 => FetchOutcome::TransientError {
            reason: format!("status {}", resp.status),
        },
        status => FetchOutcome::HardBlock {
            reason: format!("status {status}"),
        },
    }
}

/// Host part of a URL; the partition key for rate limiting.
pub fn domain_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string())
}

/// Fetches one URL through the transport: admission first, then request,
/// classification, and policy-driven retries. Every outcome is fed back to
/// the limiter.
pub struct PageFetcher<T> {
    transport: T,
    limiter: Arc<RateLimiter>,
    debug: Option<DebugDump>,
}

impl<T: Transport> PageFetcher<T> {
    pub fn new(transport: T, limiter: Arc<RateLimiter>, debug: Option<DebugDump>) -> Self {
        Self {
            transport,
            limiter,
            debug,
        }
    }

    pub async fn fetch(&self, url: &str, policy: &RetryPolicy) -> FetchOutcome {
        let domain = domain_of(url);
        let mut attempt = 0;

        loop {
            self.limiter.acquire(&domain).await;

            let classified = match self.transport.get(url, random_headers()).await {
                Ok(resp) => {
                    // Dump the body as served, blocked pages included.
                    if resp.status == 200 {
                        if let Some(debug) = &self.debug {
                            debug.save(url, &resp.body).await;
                        }
                    }
                    classify(resp)
                }
                Err(e) => FetchOutcome::TransientError {
                    reason: format!("transport: {e:#}"),
                },
            };

            match classified {
                FetchOutcome::Success { status, body } => {
                    self.limiter.report(&domain, true).await;
                    log::debug!("fetched {url} ({} bytes)", body.len());
                    return FetchOutcome::Success { status, body };
                }
                FetchOutcome::HardBlock { reason } => {
                    self.limiter.report(&domain, false).await;
                    log::error!("failed to fetch {url}: {reason}");
                    return FetchOutcome::HardBlock { reason };
                }
                FetchOutcome::SoftBlock { reason } | FetchOutcome::TransientError { reason } => {
                    self.limiter.report(&domain, false).await;
                    attempt += 1;
                    match policy.decide(attempt) {
                        RetryDecision::RetryAfter(delay) => {
                            log::warn!(
                                "{url} attempt {attempt}: {reason}; retrying in {:.2}s",
                                delay.as_secs_f64()
                            );
                            time::sleep(delay).await;
                        }
                        RetryDecision::GiveUp => {
                            log::error!(
                                "{url}: {reason}; giving up after {attempt} attempts"
                            );
                            return FetchOutcome::Exhausted;
                        }
                    }
                }
                FetchOutcome::Exhausted => unreachable!("not an attempt classification"),
            }
        }
    }
}

/// Default transport over a shared reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeouts: &TimeoutConfig, proxy: Option<&str>) -> Result<Self> {
        let mut builder = reqwest::ClientBuilder::new()
            .gzip(true)
            .deflate(true)
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .timeout(Duration::from_secs(timeouts.total_secs));
        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy).context("invalid proxy url")?);
        }
        let client = builder.build().context("building http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, headers: HeaderMap) -> Result<TransportResponse> {
        let resp = self.client.get(url).headers(headers).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(TransportResponse { status, body })
    }
}

/// Side-channel dump of raw bodies for offline debugging. Never fails the
/// fetch: write errors are logged and dropped.
pub struct DebugDump {
    dir: PathBuf,
}

impl DebugDump {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub async fn save(&self, url: &str, body: &str) {
        let name = format!(
            "{}_{}.html",
            sanitize(url),
            Utc::now().format("%Y%m%d_%H%M%S%3f")
        );
        let path = self.dir.join(name);
        let res = async {
            tokio::fs::create_dir_all(&self.dir).await?;
            tokio::fs::write(&path, body).await
        }
        .await;
        match res {
            Ok(()) => log::debug!("saved debug html to {}", path.display()),
            Err(e) => log::error!("failed to save debug html to {}: {e}", path.display()),
        }
    }
}

fn sanitize(url: &str) -> String {
    let tail = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url);
    tail.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(60)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_200_is_success() {
        let outcome = classify(TransportResponse {
            status: 200,
            body: "<html>ok</html>".into(),
        });
        assert!(outcome.is_success());
    }

    #[test]
    fn throttling_statuses_are_transient() {
        for status in [429, 503] {
            let outcome = classify(TransportResponse {
                status,
                body: String::new(),
            });
            assert!(matches!(outcome, FetchOutcome::TransientError { .. }));
        }
    }

    #[test]
    fn other_statuses_are_hard_blocks() {
        for status in [404, 500, 301] {
            let outcome = classify(TransportResponse {
                status,
                body: String::new(),
            });
            assert!(matches!(outcome, FetchOutcome::HardBlock { .. }));
        }
    }

    #[test]
    fn bot_signature_in_200_body_is_soft_block() {
        let outcome = classify(TransportResponse {
            status: 200,
            body: "Sorry, we just need to make sure you're not a robot".into(),
        });
        assert!(matches!(outcome, FetchOutcome::SoftBlock { .. }));
    }

    #[test]
    fn domain_of_extracts_host() {
        assert_eq!(
            domain_of("https://www.amazon.in/dp/B0TEST1234?th=1"),
            "www.amazon.in"
        );
        assert_eq!(domain_of("not a url"), "not a url");
    }

    #[test]
    fn sanitize_keeps_filenames_safe() {
        let name = sanitize("https://www.amazon.in/dp/B0TEST1234");
        assert_eq!(name, "B0TEST1234");
        assert!(sanitize("https://x.test/a?b=c&d=e").chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }
}
