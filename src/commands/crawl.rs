use anyhow::{Result, bail};

use crate::commands::ConsoleObserver;
use crate::config::{CrawlConfig, DataPaths};
use crate::crawl::{CrawlContext, CrawlOutcome, CrawlReport, StopFlag};
use crate::http::HttpFetcher;
use crate::palette::Palette;
use crate::progress::Progress;
use crate::utils::pluralize;

pub const MAX_GRAB_LIMIT: usize = 100;

/// Where to start when the user overrides the checkpoint.
#[derive(Clone, Copy, Debug, Default)]
pub struct StartOverride {
    pub subject: Option<u32>,
    pub page: Option<u32>,
}

pub async fn run(
    paths: &DataPaths,
    config: CrawlConfig,
    start: StartOverride,
    stop: StopFlag,
    verbose: bool,
) -> Result<CrawlReport> {
    if config.subjects.is_empty() {
        bail!(
            "Subject range {}..={} is empty",
            config.subjects.start(),
            config.subjects.end()
        );
    }

    let fetcher = HttpFetcher::new(config.timeout)?;
    let mut ctx = CrawlContext::new(fetcher, config, paths, stop);
    let resume = ctx.resume_point()?;
    let start = match (start.subject, start.page) {
        (None, None) => resume,
        (subject, page) => Progress {
            subject: subject.unwrap_or(resume.subject),
            page: page.unwrap_or(1).max(1),
        },
    };

    if !ctx.subjects().contains(&start.subject) {
        bail!("Subject {} is outside the crawl range", start.subject);
    }

    println!(
        "{} {} {}",
        Palette::dim("Known cards:"),
        Palette::paint(Palette::INFO, ctx.seen().len()),
        Palette::dim(format!(
            "(starting at subject {}, page {})",
            start.subject, start.page
        ))
    );

    let report = ctx.run(start, &ConsoleObserver { verbose }).await?;
    print_report(&report);
    if let CrawlOutcome::Paused(at) = report.outcome {
        println!(
            "Run again to continue from subject {}, page {}.",
            Palette::paint(Palette::ACCENT, at.subject),
            Palette::paint(Palette::ACCENT, at.page)
        );
    }
    Ok(report)
}

pub async fn grab(
    paths: &DataPaths,
    config: CrawlConfig,
    list_url: &str,
    limit: usize,
    stop: StopFlag,
    verbose: bool,
) -> Result<CrawlReport> {
    if !(1..=MAX_GRAB_LIMIT).contains(&limit) {
        bail!("Limit must be between 1 and {MAX_GRAB_LIMIT}, got {limit}");
    }

    let fetcher = HttpFetcher::new(config.timeout)?;
    let mut ctx = CrawlContext::new(fetcher, config, paths, stop);
    let report = ctx.grab(list_url, limit, &ConsoleObserver { verbose }).await?;
    print_report(&report);
    Ok(report)
}

fn print_report(report: &CrawlReport) {
    println!(
        "{} {}",
        Palette::dim("New:"),
        Palette::paint(Palette::SUCCESS, pluralize("card", report.appended))
    );
    if !report.failed.is_empty() {
        println!(
            "{} {}",
            Palette::dim("Failed:"),
            Palette::paint(Palette::DANGER, report.failed.len())
        );
        for url in &report.failed {
            println!("  {}", Palette::dim(url));
        }
    }
}
