use std::fs::File;
use std::path::PathBuf;
use std::time::Instant;
use std::{env, io};

use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use rls_crawler::{Crawler, CrawlerConfig, ReqwestTransport};
use rls_extract::HtmlExtractor;
use rls_store::RawPageStore;
use tokio::runtime;
use tokio_util::sync::CancellationToken;

/// Raw Listing Scraper
#[derive(Debug, Parser)]
#[clap(version)]
pub struct Args {
    #[clap(subcommand)]
    pub cmd: SubCommand,
}

#[derive(Debug, clap::Subcommand)]
pub enum SubCommand {
    #[clap(name = "crawl")]
    Crawl(CrawlArgs),
    #[clap(name = "cleanup")]
    Cleanup(CleanupArgs),
    #[clap(hide = true)]
    Completion,
}

/// Crawl configured search URLs and store raw product pages
#[derive(Debug, clap::Args)]
pub struct CrawlArgs {
    /// Optional crawler yaml configuration file
    #[clap(env = "RLS_CONFIG", parse(from_os_str), long, short)]
    pub config: Option<PathBuf>,
    /// Search URL(s) to crawl, appended to the configured list
    #[clap(long)]
    pub search_url: Vec<String>,
    /// Override the listing page cap per search URL
    #[clap(long)]
    pub max_pages: Option<u32>,
    /// Override the database URL
    #[clap(long)]
    pub database: Option<String>,
    /// Route all requests through this proxy
    #[clap(long)]
    pub proxy: Option<String>,
    /// Dump raw response bodies into this directory
    #[clap(parse(from_os_str), long)]
    pub debug_dir: Option<PathBuf>,
    /// Disable feedback-driven rate adjustment
    #[clap(long)]
    pub fixed_rate: bool,
    /// When quiet no logs are outputted
    #[clap(long, short)]
    pub quiet: bool,
}

impl TryFrom<&CrawlArgs> for CrawlerConfig {
    type Error = anyhow::Error;

    fn try_from(args: &CrawlArgs) -> Result<Self, Self::Error> {
        let mut conf = if let Some(file) = args.config.as_ref().map(File::open) {
            serde_yaml::from_reader(file?)?
        } else {
            CrawlerConfig::default()
        };
        conf.search_urls.extend(args.search_url.iter().cloned());
        if let Some(max_pages) = args.max_pages {
            conf.max_pages = max_pages;
        }
        if let Some(database) = &args.database {
            conf.database = database.to_string();
        }
        if let Some(proxy) = &args.proxy {
            conf.proxy = Some(proxy.to_string());
        }
        if let Some(debug_dir) = &args.debug_dir {
            conf.debug_dir = Some(debug_dir.clone());
        }
        if args.fixed_rate {
            conf.limiter.adaptive = false;
        }
        Ok(conf)
    }
}

pub fn crawl(args: CrawlArgs) -> anyhow::Result<()> {
    let conf: CrawlerConfig = (&args).try_into()?;
    anyhow::ensure!(
        !conf.search_urls.is_empty(),
        "no search URLs configured, provide a config file or --search-url"
    );

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(async move {
        let start = Instant::now();

        let store = RawPageStore::connect(&conf.database).await?;
        let extractor = HtmlExtractor::new(&conf.product_base);
        let transport = ReqwestTransport::new(&conf.timeouts, conf.proxy.as_deref())?;

        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("stop requested, finishing current step");
                stop.cancel();
            }
        });

        let crawler = Crawler::new(conf, transport, store, extractor, cancel);
        let stats = crawler.run().await;

        log::info!(
            "run {} in {:.0?}: {} products over {} pages",
            if stats.completed { "completed" } else { "ended early" },
            start.elapsed(),
            stats.total_products,
            stats.pages_crawled(),
        );
        Ok(())
    })
}

/// Delete stored pages that have not been refreshed recently
#[derive(Debug, clap::Args)]
pub struct CleanupArgs {
    /// Database URL
    #[clap(long, default_value = "sqlite://data/raw_pages.db")]
    pub database: String,
    /// Age threshold in days
    #[clap(long, default_value = "30")]
    pub days: i64,
}

pub fn cleanup(args: CleanupArgs) -> anyhow::Result<()> {
    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(async move {
        let store = RawPageStore::connect(&args.database).await?;
        let removed = store.cleanup_older_than(args.days).await?;
        log::info!("removed {removed} stale pages");
        store.close().await;
        Ok(())
    })
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.cmd {
        SubCommand::Crawl(args) => {
            if !args.quiet {
                if env::var("RUST_LOG").is_err() {
                    env::set_var("RUST_LOG", "rls=info,rls_crawler=info,rls_store=info");
                }
                env_logger::init();
            }
            crawl(args)
        }
        SubCommand::Cleanup(args) => {
            if env::var("RUST_LOG").is_err() {
                env::set_var("RUST_LOG", "rls=info,rls_store=info");
            }
            env_logger::init();
            cleanup(args)
        }
        SubCommand::Completion => {
            generate(Shell::Bash, &mut Args::command(), "rls", &mut io::stdout());
            Ok(())
        }
    }
}
