pub mod crawl;
pub mod repair;
pub mod reset;
pub mod stats;

use crate::crawl::{CrawlEvent, CrawlOutcome, Observer};
use crate::palette::Palette;
use crate::repair::RepairStatus;
use crate::utils::strip_controls_and_escapes;

/// Prints crawl events as coloured status lines.
pub struct ConsoleObserver {
    /// Also print per-request waits and progress percentages.
    pub verbose: bool,
}

impl Observer for ConsoleObserver {
    fn on_event(&self, event: &CrawlEvent) {
        match event {
            CrawlEvent::Waiting(_) | CrawlEvent::Progress(_) if !self.verbose => {}
            CrawlEvent::Waiting(_) | CrawlEvent::Progress(_) => {
                println!("{}", Palette::dim(event));
            }
            CrawlEvent::Listing { .. } => println!("{}", Palette::paint(Palette::ACCENT, event)),
            CrawlEvent::Fetching { .. } => {
                println!("{}", strip_controls_and_escapes(&event.to_string()));
            }
            CrawlEvent::Saved { .. } | CrawlEvent::SubjectDone { .. } => {
                println!("{}", Palette::paint(Palette::SUCCESS, event));
            }
            CrawlEvent::ItemFailed { .. } | CrawlEvent::PageFailed { .. } => {
                println!("{}", Palette::paint(Palette::DANGER, event));
            }
            CrawlEvent::Repaired { status, .. } => {
                let color = match status {
                    RepairStatus::Fixed => Palette::SUCCESS,
                    RepairStatus::Unfixable | RepairStatus::Removed => Palette::WARNING,
                    RepairStatus::Failed => Palette::DANGER,
                };
                println!("{}", Palette::paint(color, event));
            }
            CrawlEvent::Finished { outcome, .. } => {
                let color = match outcome {
                    CrawlOutcome::Done => Palette::SUCCESS,
                    CrawlOutcome::Paused(_) | CrawlOutcome::Stopped => Palette::WARNING,
                };
                println!("{}", Palette::paint(color, event));
            }
        }
    }
}
