use std::env;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use rand::Rng;

use crate::utils::get_data_dir;

pub const DATA_DIR_ENV: &str = "KAKOMON_DATA_DIR";
pub const DEFAULT_BASE_URL: &str = "https://sharousi-kakomon.com";

const RECORDS_FILE_NAME: &str = "sharousi_data.json";
const PROGRESS_FILE_NAME: &str = "bulk_progress.json";

/// Uniform random pause, in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DelayRange {
    pub min: f64,
    pub max: f64,
}

impl DelayRange {
    pub fn new(min: f64, max: f64) -> Result<Self> {
        if !min.is_finite() || !max.is_finite() || min < 0.0 {
            bail!("Delay bounds must be finite and non-negative, got {min}..{max}");
        }
        if min > max {
            bail!("Delay minimum {min}s is larger than the maximum {max}s");
        }
        Ok(Self { min, max })
    }

    pub const fn fixed(seconds: f64) -> Self {
        Self {
            min: seconds,
            max: seconds,
        }
    }

    pub const ZERO: DelayRange = DelayRange::fixed(0.0);

    /// Draws a fresh duration from `[min, max]`.
    pub fn sample(&self) -> Duration {
        let seconds = if self.max > self.min {
            rand::rng().random_range(self.min..=self.max)
        } else {
            self.min
        };
        Duration::from_secs_f64(seconds)
    }
}

#[derive(Clone, Debug)]
pub struct CrawlConfig {
    pub base_url: String,
    pub subjects: RangeInclusive<u32>,
    /// Pause before every detail fetch.
    pub item_delay: DelayRange,
    /// Pause between listing pages.
    pub page_delay: DelayRange,
    pub pause_after_subject: bool,
    pub timeout: Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            subjects: 1..=10,
            item_delay: DelayRange { min: 5.0, max: 10.0 },
            page_delay: DelayRange { min: 2.0, max: 4.0 },
            pause_after_subject: true,
            timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RepairConfig {
    pub base_url: String,
    pub workers: usize,
    pub max_attempts: usize,
    /// Pause before each attempt, drawn per worker.
    pub jitter: DelayRange,
    /// Extra pause after a transport failure.
    pub retry_backoff: Duration,
    /// Persist after this many completed items.
    pub save_every: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            workers: 5,
            max_attempts: 5,
            jitter: DelayRange { min: 2.0, max: 5.0 },
            retry_backoff: Duration::from_secs(1),
            save_every: 10,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RefreshConfig {
    pub base_url: String,
    pub max_attempts: usize,
    pub delay: DelayRange,
    pub retry_backoff: Duration,
    pub save_every: usize,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            max_attempts: 3,
            delay: DelayRange { min: 0.5, max: 1.0 },
            retry_backoff: Duration::from_secs(1),
            save_every: 10,
        }
    }
}

/// Where the record store and progress checkpoint live.
#[derive(Clone, Debug)]
pub struct DataPaths {
    pub records: PathBuf,
    pub progress: PathBuf,
}

impl DataPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            records: dir.join(RECORDS_FILE_NAME),
            progress: dir.join(PROGRESS_FILE_NAME),
        }
    }

    /// `--data-dir`, then the environment variable, then the platform data dir.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self> {
        if let Some(dir) = explicit {
            std::fs::create_dir_all(&dir)?;
            return Ok(Self::in_dir(&dir));
        }

        if let Ok(value) = env::var(DATA_DIR_ENV)
            && !value.trim().is_empty()
        {
            let dir = PathBuf::from(value.trim());
            std::fs::create_dir_all(&dir)?;
            return Ok(Self::in_dir(&dir));
        }

        Ok(Self::in_dir(&get_data_dir()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rejects_inverted_or_negative_ranges() {
        assert!(DelayRange::new(5.0, 3.0).is_err());
        assert!(DelayRange::new(-1.0, 3.0).is_err());
        assert!(DelayRange::new(1.0, f64::INFINITY).is_err());
        assert!(DelayRange::new(3.0, 3.0).is_ok());
    }

    #[test]
    fn samples_stay_in_range() {
        let range = DelayRange::new(0.01, 0.02).unwrap();
        for _ in 0..100 {
            let d = range.sample().as_secs_f64();
            assert!((0.0099..=0.0201).contains(&d), "{d}");
        }
        assert_eq!(DelayRange::ZERO.sample(), Duration::ZERO);
    }

    #[test]
    fn explicit_dir_wins() {
        let dir = tempdir().unwrap();
        let paths = DataPaths::resolve(Some(dir.path().join("data"))).unwrap();
        assert_eq!(paths.records, dir.path().join("data").join("sharousi_data.json"));
        assert_eq!(paths.progress, dir.path().join("data").join("bulk_progress.json"));
        assert!(dir.path().join("data").is_dir());
    }

    #[test]
    fn defaults_match_site_pacing() {
        let crawl = CrawlConfig::default();
        assert_eq!(crawl.subjects, 1..=10);
        assert!(crawl.item_delay.min >= 5.0);
        assert_eq!(RepairConfig::default().workers, 5);
    }
}
