use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use rls_crawler::{
    Crawler, CrawlerConfig, Extract, PageMeta, PageStore, ProductCandidate, ProductFields,
    Transport, TransportResponse,
};
use tokio_util::sync::CancellationToken;

/// Fixed URL -> response map; unknown URLs come back 404.
#[derive(Clone, Default)]
struct MapTransport {
    responses: Arc<HashMap<String, (u16, String)>>,
}

impl MapTransport {
    fn new<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, u16, &'static str)>,
    {
        Self {
            responses: Arc::new(
                responses
                    .into_iter()
                    .map(|(url, status, body)| (url.to_string(), (status, body.to_string())))
                    .collect(),
            ),
        }
    }
}

#[async_trait]
impl Transport for MapTransport {
    async fn get(&self, url: &str, _headers: HeaderMap) -> anyhow::Result<TransportResponse> {
        let (status, body) = self
            .responses
            .get(url)
            .cloned()
            .unwrap_or((404, String::new()));
        Ok(TransportResponse { status, body })
    }
}

/// Line-oriented stub markup: `card:ASIN|TITLE` on listing pages,
/// `title:`/`price:` on product pages.
struct LineExtractor;

impl Extract for LineExtractor {
    fn listing_candidates(&self, body: &str) -> Vec<ProductCandidate> {
        body.lines()
            .filter_map(|line| line.strip_prefix("card:"))
            .filter_map(|card| {
                let (asin, title) = card.split_once('|')?;
                Some(ProductCandidate {
                    asin: asin.to_string(),
                    url: format!("https://site.test/dp/{asin}"),
                    title: title.to_string(),
                    listed_price: None,
                })
            })
            .collect()
    }

    fn product_fields(&self, body: &str) -> Option<ProductFields> {
        let title = body.lines().find_map(|line| line.strip_prefix("title:"))?;
        Some(ProductFields {
            title: title.to_string(),
            price: body
                .lines()
                .find_map(|line| line.strip_prefix("price:"))
                .map(String::from),
            rating: None,
            review_count: None,
        })
    }
}

#[derive(Clone, Default)]
struct MemStore {
    pages: Arc<Mutex<HashMap<String, (String, PageMeta)>>>,
}

#[async_trait]
impl PageStore for MemStore {
    async fn upsert(&self, url: &str, body: &str, meta: &PageMeta) -> anyhow::Result<()> {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), (body.to_string(), meta.clone()));
        Ok(())
    }
}

struct FailStore;

#[async_trait]
impl PageStore for FailStore {
    async fn upsert(&self, _url: &str, _body: &str, _meta: &PageMeta) -> anyhow::Result<()> {
        anyhow::bail!("database unavailable")
    }
}

const SEARCH: &str = "https://site.test/s?k=laptop";

fn site() -> MapTransport {
    MapTransport::new([
        (
            "https://site.test/s?k=laptop&page=1",
            200,
            "card:A1|Dell Laptop 15 inch\ncard:A2|Dell Laptop with Bag\ncard:A3|HP Pavilion 14\ncard:A4|Acer Aspire 5",
        ),
        ("https://site.test/s?k=laptop&page=2", 200, "no cards here"),
        (
            "https://site.test/dp/A1",
            200,
            "title:Dell Laptop 15 inch\nprice:45,990",
        ),
        // Clean listing title but the detail page reveals a bundle.
        (
            "https://site.test/dp/A3",
            200,
            "title:HP Pavilion 14 with Mouse",
        ),
        // Not a product page: no title line.
        ("https://site.test/dp/A4", 200, "lost interstitial"),
    ])
}

fn config() -> CrawlerConfig {
    CrawlerConfig {
        search_urls: vec![SEARCH.to_string()],
        max_pages: 5,
        ..CrawlerConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn full_run_persists_valid_products_only() {
    let store = MemStore::default();
    let crawler = Crawler::new(
        config(),
        site(),
        store.clone(),
        LineExtractor,
        CancellationToken::new(),
    );

    let stats = crawler.run().await;

    assert!(stats.completed);
    assert_eq!(stats.total_products, 1);
    assert_eq!(stats.pages_per_url.get(SEARCH), Some(&1));

    let pages = store.pages.lock().unwrap();
    assert_eq!(pages.len(), 1);
    let (body, meta) = pages.get("https://site.test/dp/A1").unwrap();
    assert!(body.contains("Dell Laptop 15 inch"));
    assert_eq!(meta.asin, "A1");
    assert_eq!(meta.title, "Dell Laptop 15 inch");
    assert_eq!(meta.price.as_deref(), Some("45,990"));
}

#[tokio::test(start_paused = true)]
async fn persistence_failure_exhausts_run_retries() {
    let conf = CrawlerConfig {
        run_retries: 2,
        ..config()
    };
    let crawler = Crawler::new(
        conf,
        site(),
        FailStore,
        LineExtractor,
        CancellationToken::new(),
    );

    let stats = crawler.run().await;
    assert!(!stats.completed);
    assert_eq!(stats.total_products, 0);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_run() {
    let store = MemStore::default();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let crawler = Crawler::new(config(), site(), store.clone(), LineExtractor, cancel);
    let stats = crawler.run().await;

    assert!(!stats.completed);
    assert!(store.pages.lock().unwrap().is_empty());
}
