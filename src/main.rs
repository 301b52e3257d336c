mod change_detection;
mod circuit_breaker;
mod cli;
mod config;
mod domain_filter;
mod engine;
mod fetcher;
mod health;
mod language;
mod logging;
mod models;
mod queue;
mod rate_limiter;
mod retry;
mod robots;
mod scrape;
mod url_utils;
mod worker_pool;
mod writer;

use cli::{Cli, Commands};
use config::Config;
use engine::CrawlEngine;
use fetcher::HttpFetcherFactory;
use models::CrawlRequest;
use url_utils::normalize_url_for_cli;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Crawl {
            seed_url,
            depth,
            no_subpages,
            mode,
            format,
            job_id,
            data_dir,
        } => {
            let mut config = Config::from_env();
            config.crawler.data_dir = data_dir.clone();
            config.crawler.output_dir = format!("{}/results", data_dir);

            logging::init_logging(format!("{}/logs", data_dir))?;

            let seed = normalize_url_for_cli(&seed_url);
            let request = CrawlRequest {
                seed_url: seed.clone(),
                include_subpages: !no_subpages,
                depth,
                operation_mode: mode.into(),
                output_format: format.into(),
                university_name: None,
                process_id: job_id,
            };

            tracing::info!(seed = %seed, depth, "starting crawl");

            let engine = CrawlEngine::new(config.clone())?;

            // Ctrl-C cancels cooperatively: in-flight navigations finish,
            // the writer flushes, fingerprints persist
            let cancel = engine.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, cancelling crawl");
                    cancel.cancel();
                }
            });

            let factory = HttpFetcherFactory::new(
                config.politeness.clone(),
                config.crawler.rendering_mode,
                config.resilience.request_timeout,
            );
            let report = engine.run(request, &factory).await?;

            println!("Crawl complete");
            println!("  discovered:  {}", report.discovered);
            println!("  processed:   {}", report.processed);
            println!("  unchanged:   {}", report.unchanged);
            println!("  skipped:     {}", report.skipped);
            println!("  failed:      {}", report.failed);
            println!("  duration:    {} ms", report.duration_ms);
            println!("  rate:        {:.2} pages/s", report.pages_per_second);
            println!("  output:      {}", report.output_path);
        }

        Commands::ShowConfig => {
            let config = Config::from_env();
            println!("{:#?}", config);
        }
    }

    Ok(())
}
