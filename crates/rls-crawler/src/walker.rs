use url::Url;

use crate::fetcher::{FetchOutcome, PageFetcher};
use crate::retry::RetryPolicy;
use crate::traits::{Extract, Transport};

/// A product link discovered on a listing page, pending fetch.
#[derive(Debug, Clone)]
pub struct ProductCandidate {
    pub asin: String,
    pub url: String,
    pub title: String,
    pub listed_price: Option<String>,
}

/// Case-insensitive substring filter for bundled/combo offers.
#[derive(Debug, Clone)]
pub struct ComboFilter {
    keywords: Vec<String>,
}

impl ComboFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.into().to_lowercase())
                .collect(),
        }
    }

    pub fn matches(&self, title: &str) -> bool {
        let title = title.to_lowercase();
        self.keywords.iter().any(|k| title.contains(k.as_str()))
    }
}

#[derive(Debug, Clone, Copy)]
enum WalkerState {
    Fetching(u32),
    Extracting(u32),
    /// Pagination ended naturally at this page.
    Done(u32),
    /// Fetching this page failed; pagination for the URL stops here.
    Failed(u32),
}

/// One step of pagination: a batch of candidates, or a terminal state.
/// `Done` (a fetched page with no products left) is distinct from `Failed`
/// (the page could not be fetched).
#[derive(Debug, Clone)]
pub enum WalkerBatch {
    Page {
        page: u32,
        candidates: Vec<ProductCandidate>,
    },
    Done {
        page: u32,
    },
    Failed {
        page: u32,
    },
}

/// Paginates one search URL, yielding candidate batches until a page comes
/// back empty, a fetch fails, or `max_pages` is reached. Not restartable
/// mid-sequence; a new walker starts over at page 1.
pub struct ListingWalker<'a, T, E> {
    fetcher: &'a PageFetcher<T>,
    extractor: &'a E,
    filter: &'a ComboFilter,
    policy: &'a RetryPolicy,
    base_url: Url,
    max_pages: u32,
    state: WalkerState,
}

impl<'a, T, E> ListingWalker<'a, T, E>
where
    T: Transport,
    E: Extract,
{
    pub fn new(
        fetcher: &'a PageFetcher<T>,
        extractor: &'a E,
        filter: &'a ComboFilter,
        policy: &'a RetryPolicy,
        base_url: Url,
        max_pages: u32,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            filter,
            policy,
            base_url,
            max_pages,
            state: WalkerState::Fetching(1),
        }
    }

    pub async fn next_batch(&mut self) -> WalkerBatch {
        let page = match self.state {
            WalkerState::Fetching(p) | WalkerState::Extracting(p) => p,
            WalkerState::Done(p) => return WalkerBatch::Done { page: p },
            WalkerState::Failed(p) => return WalkerBatch::Failed { page: p },
        };

        if page > self.max_pages {
            self.state = WalkerState::Done(page - 1);
            return WalkerBatch::Done { page: page - 1 };
        }

        let url = self.page_url(page);
        let body = match self.fetcher.fetch(url.as_str(), self.policy).await {
            FetchOutcome::Success { body, .. } => body,
            outcome => {
                log::error!("listing page {page} of {}: {outcome}", self.base_url);
                self.state = WalkerState::Failed(page);
                return WalkerBatch::Failed { page };
            }
        };

        self.state = WalkerState::Extracting(page);
        let extracted = self.extractor.listing_candidates(&body);
        let mut candidates = extracted;
        let found = candidates.len();
        candidates.retain(|c| {
            let keep = !self.filter.matches(&c.title);
            if !keep {
                log::debug!("skipping combo deal: {}", c.title);
            }
            keep
        });

        if candidates.is_empty() {
            if found == 0 {
                log::warn!("no products found on page {page}");
            }
            self.state = WalkerState::Done(page);
            return WalkerBatch::Done { page };
        }

        log::info!("found {} valid products on page {page}", candidates.len());
        self.state = WalkerState::Fetching(page + 1);
        WalkerBatch::Page { page, candidates }
    }

    fn page_url(&self, page: u32) -> Url {
        let mut url = self.base_url.clone();
        url.query_pairs_mut().append_pair("page", &page.to_string());
        url
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use reqwest::header::HeaderMap;

    use super::*;
    use crate::config::{DelayRange, LimiterConfig, RetryConfig};
    use crate::limiter::RateLimiter;
    use crate::traits::{ProductFields, TransportResponse};

    struct FixedTransport {
        status: u16,
        body: &'static str,
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn get(&self, _url: &str, _headers: HeaderMap) -> anyhow::Result<TransportResponse> {
            Ok(TransportResponse {
                status: self.status,
                body: self.body.to_string(),
            })
        }
    }

    /// Yields one candidate per "item" occurrence in the body.
    struct CountingExtractor;

    impl Extract for CountingExtractor {
        fn listing_candidates(&self, body: &str) -> Vec<ProductCandidate> {
            body.matches("item")
                .enumerate()
                .map(|(i, _)| ProductCandidate {
                    asin: format!("ASIN{i}"),
                    url: format!("https://site.test/dp/ASIN{i}"),
                    title: format!("Dell Laptop {i}"),
                    listed_price: None,
                })
                .collect()
        }

        fn product_fields(&self, _body: &str) -> Option<ProductFields> {
            None
        }
    }

    fn test_fetcher<T: Transport>(transport: T) -> PageFetcher<T> {
        let conf = LimiterConfig {
            initial_rate: 100.0,
            jitter: DelayRange {
                min_secs: 0.0,
                max_secs: 0.0,
            },
            ..LimiterConfig::default()
        };
        PageFetcher::new(transport, Arc::new(RateLimiter::new(conf)), None)
    }

    fn no_retry() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 1,
            base_delay_secs: 0.0,
            jitter: None,
            max_delay_secs: 1.0,
        })
    }

    fn base() -> Url {
        Url::parse("https://site.test/s?k=laptop").unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn empty_page_yields_done_not_failed() {
        let fetcher = test_fetcher(FixedTransport {
            status: 200,
            body: "<html>nothing here</html>",
        });
        let extractor = CountingExtractor;
        let filter = ComboFilter::new(Vec::<String>::new());
        let policy = no_retry();
        let mut walker = ListingWalker::new(&fetcher, &extractor, &filter, &policy, base(), 5);

        assert!(matches!(
            walker.next_batch().await,
            WalkerBatch::Done { page: 1 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_error_yields_failed() {
        let fetcher = test_fetcher(FixedTransport {
            status: 404,
            body: "",
        });
        let extractor = CountingExtractor;
        let filter = ComboFilter::new(Vec::<String>::new());
        let policy = no_retry();
        let mut walker = ListingWalker::new(&fetcher, &extractor, &filter, &policy, base(), 5);

        assert!(matches!(
            walker.next_batch().await,
            WalkerBatch::Failed { page: 1 }
        ));
        // Terminal state is sticky.
        assert!(matches!(
            walker.next_batch().await,
            WalkerBatch::Failed { page: 1 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn yields_candidates_then_stops_at_max_pages() {
        let fetcher = test_fetcher(FixedTransport {
            status: 200,
            body: "item item item",
        });
        let extractor = CountingExtractor;
        let filter = ComboFilter::new(Vec::<String>::new());
        let policy = no_retry();
        let mut walker = ListingWalker::new(&fetcher, &extractor, &filter, &policy, base(), 2);

        match walker.next_batch().await {
            WalkerBatch::Page { page, candidates } => {
                assert_eq!(page, 1);
                assert_eq!(candidates.len(), 3);
            }
            other => panic!("expected a page batch, got {other:?}"),
        }
        assert!(matches!(
            walker.next_batch().await,
            WalkerBatch::Page { page: 2, .. }
        ));
        assert!(matches!(
            walker.next_batch().await,
            WalkerBatch::Done { page: 2 }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn page_parameter_is_appended() {
        let fetcher = test_fetcher(FixedTransport {
            status: 200,
            body: "",
        });
        let extractor = CountingExtractor;
        let filter = ComboFilter::new(Vec::<String>::new());
        let policy = no_retry();
        let walker = ListingWalker::new(&fetcher, &extractor, &filter, &policy, base(), 5);

        assert_eq!(
            walker.page_url(3).as_str(),
            "https://site.test/s?k=laptop&page=3"
        );
    }

    #[test]
    fn combo_filter_excludes_bundles_only() {
        let filter = ComboFilter::new(["combo", "with bag", "+ mouse"]);
        assert!(filter.matches("Dell Laptop with Bag"));
        assert!(filter.matches("HP Pavilion COMBO offer"));
        assert!(filter.matches("Lenovo + Mouse"));
        assert!(!filter.matches("Dell Laptop 15 inch"));
    }
}
