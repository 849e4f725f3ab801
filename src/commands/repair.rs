use anyhow::{Context, Result};

use crate::commands::ConsoleObserver;
use crate::config::{DataPaths, RefreshConfig, RepairConfig};
use crate::crawl::StopFlag;
use crate::http::HttpFetcher;
use crate::palette::Palette;
use crate::repair::{RefreshReport, RepairReport, refresh_all, repair, repair_targets};
use crate::store::RecordStore;
use crate::utils::pluralize;

pub async fn run(
    paths: &DataPaths,
    config: RepairConfig,
    timeout: std::time::Duration,
    stop: StopFlag,
    verbose: bool,
) -> Result<RepairReport> {
    let store = RecordStore::new(&paths.records);
    let mut records = store
        .try_load()
        .with_context(|| "Refusing to repair a store that could not be read")?;

    let targets = repair_targets(&records);
    if targets.is_empty() {
        println!(
            "{}",
            Palette::paint(Palette::SUCCESS, "No cards need repair.")
        );
        return Ok(RepairReport::default());
    }
    println!(
        "Repairing {} with up to {} requests in flight...",
        Palette::paint(Palette::INFO, pluralize("card", targets.len())),
        config.workers
    );

    let fetcher = HttpFetcher::new(timeout)?;
    let report = repair(
        &fetcher,
        &store,
        &mut records,
        &config,
        &stop,
        &ConsoleObserver { verbose },
    )
    .await?;

    println!(
        "{} {}  {} {}  {} {}",
        Palette::dim("Fixed:"),
        Palette::paint(Palette::SUCCESS, report.fixed.len()),
        Palette::dim("No explanation:"),
        Palette::paint(Palette::WARNING, report.unfixable.len()),
        Palette::dim("Failed:"),
        Palette::paint(Palette::DANGER, report.failed.len()),
    );
    if report.stopped {
        println!("{}", Palette::paint(Palette::WARNING, "Stopped early."));
    }
    Ok(report)
}

pub async fn refresh(
    paths: &DataPaths,
    config: RefreshConfig,
    timeout: std::time::Duration,
    stop: StopFlag,
    verbose: bool,
) -> Result<RefreshReport> {
    let store = RecordStore::new(&paths.records);
    let mut records = store
        .try_load()
        .with_context(|| "Refusing to refresh a store that could not be read")?;
    println!(
        "Refreshing {}...",
        Palette::paint(Palette::INFO, pluralize("card", records.len()))
    );

    let fetcher = HttpFetcher::new(timeout)?;
    let report = refresh_all(
        &fetcher,
        &store,
        &mut records,
        &config,
        &stop,
        &ConsoleObserver { verbose },
    )
    .await?;

    println!(
        "{} {}  {} {}  {} {}  {} {}",
        Palette::dim("Updated:"),
        Palette::paint(Palette::SUCCESS, report.updated.len()),
        Palette::dim("No explanation:"),
        Palette::paint(Palette::WARNING, report.unfixable.len()),
        Palette::dim("Removed:"),
        Palette::paint(Palette::WARNING, report.removed.len()),
        Palette::dim("Failed:"),
        Palette::paint(Palette::DANGER, report.failed.len()),
    );
    if report.stopped {
        println!("{}", Palette::paint(Palette::WARNING, "Stopped early."));
    }
    Ok(report)
}
