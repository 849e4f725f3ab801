use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueHint};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use kakomon::commands::crawl::StartOverride;
use kakomon::commands::{crawl, repair, reset, stats};
use kakomon::config::{CrawlConfig, DEFAULT_BASE_URL, DataPaths, DelayRange, RefreshConfig, RepairConfig};
use kakomon::crawl::StopFlag;

#[derive(Parser, Debug)]
#[command(
    name = "kakomon",
    version,
    about = "Builds a flashcard deck from a past-exam question site.",
    long_about = None,
    propagate_version = true,
    arg_required_else_help = true,
    disable_help_subcommand = true
)]
struct Cli {
    /// Directory holding the card store and the crawl checkpoint
    #[arg(long, global = true, value_name = "DIR", value_hint = ValueHint::DirPath)]
    data_dir: Option<PathBuf>,
    /// More output; repeat for more detailed logging
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct SiteArgs {
    /// Site root
    #[arg(long, value_name = "URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,
    /// Per-request timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = 15)]
    timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk every subject, resuming from the last checkpoint
    Crawl {
        #[command(flatten)]
        site: SiteArgs,
        /// Start at this subject instead of the checkpoint
        #[arg(long, value_name = "ID")]
        subject: Option<u32>,
        /// Start at this listing page
        #[arg(long, value_name = "N")]
        page: Option<u32>,
        /// Last subject to walk
        #[arg(long, value_name = "ID", default_value_t = 10)]
        last_subject: u32,
        /// Minimum seconds to wait before each question
        #[arg(long, value_name = "SECS", default_value_t = 5.0)]
        min_delay: f64,
        /// Maximum seconds to wait before each question
        #[arg(long, value_name = "SECS", default_value_t = 10.0)]
        max_delay: f64,
        /// Keep going after each subject instead of pausing
        #[arg(long, default_value_t = false)]
        no_pause: bool,
    },
    /// Fetch unseen questions from a single listing page
    Grab {
        /// Listing page URL
        #[arg(value_name = "URL", value_hint = ValueHint::Url)]
        list_url: String,
        #[command(flatten)]
        site: SiteArgs,
        /// Maximum number of questions to fetch (1-100)
        #[arg(long, value_name = "COUNT", default_value_t = 10)]
        limit: usize,
    },
    /// Re-fetch cards whose explanation is missing or broken
    Repair {
        #[command(flatten)]
        site: SiteArgs,
        /// Requests in flight at once
        #[arg(long, value_name = "COUNT", default_value_t = 5)]
        workers: usize,
    },
    /// Re-fetch every card and rewrite its explanation
    Refresh {
        #[command(flatten)]
        site: SiteArgs,
    },
    /// Show collection stats
    Stats,
    /// Delete the card store and the crawl checkpoint
    Reset {
        /// Skip the confirmation prompt
        #[arg(long, short = 'y', default_value_t = false)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run_cli().await {
        eprintln!("{:?}", err);
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let paths = DataPaths::resolve(cli.data_dir)?;
    let verbose = cli.verbose > 0;
    let stop = stop_on_ctrl_c();

    match cli.command {
        Command::Crawl {
            site,
            subject,
            page,
            last_subject,
            min_delay,
            max_delay,
            no_pause,
        } => {
            let first = subject.unwrap_or(1).min(last_subject);
            let config = CrawlConfig {
                base_url: site.base_url,
                subjects: first..=last_subject,
                item_delay: DelayRange::new(min_delay, max_delay)?,
                pause_after_subject: !no_pause,
                timeout: Duration::from_secs(site.timeout),
                ..CrawlConfig::default()
            };
            crawl::run(&paths, config, StartOverride { subject, page }, stop, verbose).await?;
        }
        Command::Grab {
            list_url,
            site,
            limit,
        } => {
            let config = CrawlConfig {
                base_url: site.base_url,
                timeout: Duration::from_secs(site.timeout),
                ..CrawlConfig::default()
            };
            crawl::grab(&paths, config, &list_url, limit, stop, verbose).await?;
        }
        Command::Repair { site, workers } => {
            let config = RepairConfig {
                base_url: site.base_url,
                workers,
                ..RepairConfig::default()
            };
            repair::run(&paths, config, Duration::from_secs(site.timeout), stop, verbose).await?;
        }
        Command::Refresh { site } => {
            let config = RefreshConfig {
                base_url: site.base_url,
                ..RefreshConfig::default()
            };
            repair::refresh(&paths, config, Duration::from_secs(site.timeout), stop, verbose)
                .await?;
        }
        Command::Stats => {
            stats::run(&paths)?;
        }
        Command::Reset { yes } => {
            reset::run(&paths, yes)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// First Ctrl-C finishes the in-flight request and stops; a second one exits.
fn stop_on_ctrl_c() -> StopFlag {
    let stop = StopFlag::new();
    let flag = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Stopping after the current request...");
            flag.request();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            std::process::exit(130);
        }
    });
    stop
}
