use anyhow::{Context, Result};

use crate::config::DataPaths;
use crate::palette::Palette;
use crate::progress::ProgressFile;
use crate::stats::CollectionStats;
use crate::store::RecordStore;
use crate::utils::strip_controls_and_escapes;

pub fn run(paths: &DataPaths) -> Result<CollectionStats> {
    let records = RecordStore::new(&paths.records)
        .try_load()
        .with_context(|| format!("Failed to read {}", paths.records.display()))?;
    let stats = CollectionStats::from_records(&records);
    let progress = ProgressFile::new(&paths.progress).load()?;

    println!("{}", Palette::paint(Palette::ACCENT, "Collection Summary"));
    println!(
        "{} {}",
        Palette::dim("Cards stored:"),
        Palette::paint(Palette::INFO, stats.num_cards)
    );
    let broken_color = if stats.broken > 0 {
        Palette::WARNING
    } else {
        Palette::SUCCESS
    };
    println!(
        "{} {} {}",
        Palette::dim("Needing repair:"),
        Palette::paint(broken_color, stats.broken),
        Palette::dim(format!("({:.0}%)", stats.broken_ratio() * 100.0))
    );
    if stats.duplicates > 0 {
        println!(
            "{} {}",
            Palette::dim("Duplicate sources:"),
            Palette::paint(Palette::WARNING, stats.duplicates)
        );
    }
    match progress {
        Some(at) => println!(
            "{} subject {}, page {}",
            Palette::dim("Checkpoint:"),
            at.subject,
            at.page
        ),
        None => println!("{} none", Palette::dim("Checkpoint:")),
    }

    println!("\n{}", Palette::paint(Palette::ACCENT, "By Subject"));
    for (subject, count) in &stats.by_subject {
        println!(
            "  {} {}",
            strip_controls_and_escapes(subject),
            Palette::paint(Palette::INFO, count)
        );
    }

    println!("\n{}", Palette::paint(Palette::ACCENT, "By Level"));
    for (level, count) in &stats.by_level {
        println!(
            "  {} {}",
            strip_controls_and_escapes(level),
            Palette::paint(Palette::INFO, count)
        );
    }

    Ok(stats)
}
