use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tokio::time;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{CrawlerConfig, DelayRange};
use crate::fetcher::{DebugDump, FetchOutcome, PageFetcher};
use crate::limiter::RateLimiter;
use crate::retry::RetryPolicy;
use crate::traits::{Extract, PageMeta, PageStore, Transport};
use crate::walker::{ComboFilter, ListingWalker, ProductCandidate, WalkerBatch};

/// Mutated only by the crawler driving the run; read-only once the run
/// has finished.
#[derive(Debug, Clone)]
pub struct CrawlRunStats {
    pub total_products: u64,
    pub pages_per_url: HashMap<String, u32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub completed: bool,
}

impl CrawlRunStats {
    fn new() -> Self {
        Self {
            total_products: 0,
            pages_per_url: HashMap::new(),
            started_at: Utc::now(),
            finished_at: None,
            completed: false,
        }
    }

    pub fn pages_crawled(&self) -> u32 {
        self.pages_per_url.values().sum()
    }
}

/// Top-level driver: walks every configured search URL, fetches each
/// discovered product page, and persists the raw bodies. Failures on a
/// single page or product are logged and skipped; only errors escaping
/// that handling abort a pass, and a pass is retried with linear backoff
/// up to the configured cap.
pub struct Crawler<T, S, E> {
    config: CrawlerConfig,
    fetcher: PageFetcher<T>,
    store: S,
    extractor: E,
    filter: ComboFilter,
    listing_policy: RetryPolicy,
    product_policy: RetryPolicy,
    cancel: CancellationToken,
}

impl<T, S, E> Crawler<T, S, E>
where
    T: Transport,
    S: PageStore,
    E: Extract,
{
    pub fn new(
        config: CrawlerConfig,
        transport: T,
        store: S,
        extractor: E,
        cancel: CancellationToken,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::from_config(config.limiter));
        let debug = config.debug_dir.clone().map(DebugDump::new);
        let fetcher = PageFetcher::new(transport, limiter, debug);
        let filter = ComboFilter::new(config.combo_keywords.iter().cloned());
        let listing_policy = RetryPolicy::new(config.listing_retry);
        let product_policy = RetryPolicy::new(config.product_retry);
        Self {
            config,
            fetcher,
            store,
            extractor,
            filter,
            listing_policy,
            product_policy,
            cancel,
        }
    }

    /// Run to completion or retry exhaustion, returning the run's stats.
    pub async fn run(&self) -> CrawlRunStats {
        log::info!("starting crawler");
        let mut stats = CrawlRunStats::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.run_once(&mut stats).await {
                Ok(()) => {
                    stats.completed = true;
                    log::info!(
                        "crawling completed, total products processed: {}",
                        stats.total_products
                    );
                    break;
                }
                Err(e) if self.cancel.is_cancelled() => {
                    log::info!("crawl stopped: {e:#}");
                    break;
                }
                Err(e) => {
                    log::error!("error in crawler run: {e:#}");
                    if attempt >= self.config.run_retries {
                        log::error!("max retries reached for crawler run");
                        break;
                    }
                    let delay =
                        Duration::from_secs(self.config.run_retry_delay_secs * attempt as u64);
                    log::warn!("retrying entire crawl in {}s", delay.as_secs());
                    if self.sleep_or_cancel(delay).await.is_err() {
                        break;
                    }
                }
            }
        }

        stats.finished_at = Some(Utc::now());
        stats
    }

    async fn run_once(&self, stats: &mut CrawlRunStats) -> Result<()> {
        let total = self.config.search_urls.len();
        for (index, raw_url) in self.config.search_urls.iter().enumerate() {
            self.check_cancelled()?;
            log::info!("processing search URL {}/{total}", index + 1);

            let base = match Url::parse(raw_url) {
                Ok(url) => url,
                Err(e) => {
                    log::error!("invalid search URL {raw_url}: {e}");
                    continue;
                }
            };

            self.walk_url(raw_url, base, stats).await?;

            if index + 1 < total {
                self.pace(self.config.pacing.between_urls).await?;
            }
        }
        Ok(())
    }

    async fn walk_url(&self, raw_url: &str, base: Url, stats: &mut CrawlRunStats) -> Result<()> {
        let mut walker = ListingWalker::new(
            &self.fetcher,
            &self.extractor,
            &self.filter,
            &self.listing_policy,
            base,
            self.config.max_pages,
        );

        loop {
            self.check_cancelled()?;
            match walker.next_batch().await {
                WalkerBatch::Page { page, candidates } => {
                    log::info!("processing page {page}");
                    *stats.pages_per_url.entry(raw_url.to_string()).or_insert(0) += 1;

                    for candidate in candidates {
                        self.check_cancelled()?;
                        if self.crawl_product(&candidate).await? {
                            stats.total_products += 1;
                        }
                        self.pace(self.config.pacing.between_products).await?;
                    }
                    self.pace(self.config.pacing.between_pages).await?;
                }
                WalkerBatch::Done { page } => {
                    log::info!("no more products found after page {page}");
                    return Ok(());
                }
                WalkerBatch::Failed { page } => {
                    log::error!("giving up on this search URL at page {page}");
                    return Ok(());
                }
            }
        }
    }

    /// Fetch, validate and persist one product page. `Ok(false)` means the
    /// candidate was skipped; only systemic failures (persistence) escape.
    async fn crawl_product(&self, candidate: &ProductCandidate) -> Result<bool> {
        let body = match self.fetcher.fetch(&candidate.url, &self.product_policy).await {
            FetchOutcome::Success { body, .. } => body,
            outcome => {
                log::warn!("skipping {}: {outcome}", candidate.url);
                return Ok(false);
            }
        };

        let Some(fields) = self.extractor.product_fields(&body) else {
            log::warn!("no product title found for {}", candidate.url);
            return Ok(false);
        };

        if self.filter.matches(&fields.title) {
            log::debug!("skipping combo deal product: {}", fields.title);
            return Ok(false);
        }

        let meta = PageMeta {
            title: fields.title,
            asin: candidate.asin.clone(),
            crawled_at: Utc::now(),
            price: fields.price,
            rating: fields.rating,
            review_count: fields.review_count,
        };
        self.store
            .upsert(&candidate.url, &body, &meta)
            .await
            .with_context(|| format!("storing {}", candidate.url))?;

        log::info!("successfully crawled {}", candidate.url);
        Ok(true)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            bail!("crawl cancelled");
        }
        Ok(())
    }

    async fn pace(&self, range: DelayRange) -> Result<()> {
        self.sleep_or_cancel(range.sample()).await
    }

    async fn sleep_or_cancel(&self, delay: Duration) -> Result<()> {
        tokio::select! {
            _ = time::sleep(delay) => Ok(()),
            _ = self.cancel.cancelled() => bail!("crawl cancelled"),
        }
    }
}
