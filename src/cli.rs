use clap::{Parser, Subcommand, ValueEnum};

use crate::models::{OperationMode, OutputFormat};

/// sitegrazer cli
#[derive(Parser)]
#[command(name = "sitegrazer")]
#[command(about = "Polite web crawler and content extractor")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    CrawlOnly,
    ScrapeOnly,
    CrawlAndScrape,
}

impl From<ModeArg> for OperationMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::CrawlOnly => OperationMode::CrawlOnly,
            ModeArg::ScrapeOnly => OperationMode::ScrapeOnly,
            ModeArg::CrawlAndScrape => OperationMode::CrawlAndScrape,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatArg {
    Json,
    Markdown,
    Summary,
    LinksOnly,
    Html,
}

impl From<FormatArg> for OutputFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::Json => OutputFormat::Json,
            FormatArg::Markdown => OutputFormat::Markdown,
            FormatArg::Summary => OutputFormat::Summary,
            FormatArg::LinksOnly => OutputFormat::LinksOnly,
            FormatArg::Html => OutputFormat::Html,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Crawl a site starting from a seed URL
    Crawl {
        /// The starting URL, depth 0
        #[arg(short, long, help = "Seed URL to begin crawling from")]
        seed_url: String,

        /// link distance from the seed
        #[arg(
            short,
            long,
            default_value = "2",
            help = "Maximum link depth (clamped to 5 by engine policy)"
        )]
        depth: u32,

        /// crawl only the seed page
        #[arg(long, help = "Do not follow links off the seed page")]
        no_subpages: bool,

        /// operation mode
        #[arg(short, long, value_enum, default_value = "crawl-and-scrape")]
        mode: ModeArg,

        /// output format
        #[arg(short, long, value_enum, default_value = "json")]
        format: FormatArg,

        /// explicit job identifier
        #[arg(long, help = "Job id used for result file names")]
        job_id: Option<String>,

        /// data dir for fingerprints, results, and logs
        #[arg(long, default_value = "./data", help = "Directory for crawler state")]
        data_dir: String,
    },

    /// Print the effective configuration and exit
    ShowConfig,
}

impl Cli {
    /// parse args
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
