use anyhow::Result;

use crate::config::DataPaths;
use crate::palette::Palette;
use crate::progress::ProgressFile;
use crate::store::RecordStore;
use crate::utils::ask_yn;

/// Deletes the card store and the crawl checkpoint. Returns whether anything
/// was removed.
pub fn run(paths: &DataPaths, assume_yes: bool) -> Result<bool> {
    if !assume_yes {
        let confirmed = ask_yn(&format!(
            "This deletes {} and {}.",
            Palette::paint(Palette::DANGER, paths.records.display()),
            Palette::paint(Palette::DANGER, paths.progress.display())
        ))?;
        if !confirmed {
            println!("Aborting; nothing deleted.");
            return Ok(false);
        }
    }

    let removed_records = RecordStore::new(&paths.records).clear()?;
    let removed_progress = ProgressFile::new(&paths.progress).clear()?;
    let removed = removed_records || removed_progress;
    if removed {
        println!("{}", Palette::paint(Palette::SUCCESS, "Store and checkpoint cleared."));
    } else {
        println!("Nothing to clear.");
    }
    Ok(removed)
}
