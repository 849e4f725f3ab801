use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::card::{CardRecord, compose_front};
use crate::config::{CrawlConfig, DataPaths};
use crate::detail::fetch_detail;
use crate::explain::{Explanation, fetch_explanation};
use crate::http::{Fetch, FetchError};
use crate::listing::{ListItem, fetch_list, list_page, listing_url};
use crate::progress::{Progress, ProgressFile};
use crate::repair::RepairStatus;
use crate::store::{BufferedWriter, RecordStore};

/// Cooperative stop request. Sampled before each item fetch; an in-flight
/// request always completes first.
#[derive(Clone, Debug, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// Every configured subject was walked.
    Done,
    /// Stopped or paused between subjects; `Progress` is where to resume.
    Paused(Progress),
    /// A single-list grab was stopped early.
    Stopped,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CrawlEvent {
    Listing { subject: u32, page: u32 },
    Waiting(Duration),
    Fetching {
        subject_name: String,
        page: u32,
        index: usize,
        total: usize,
        url: String,
    },
    Saved { url: String, total: usize },
    ItemFailed { url: String, reason: String },
    PageFailed { url: String, reason: String },
    SubjectDone { subject: u32, page: u32 },
    Repaired {
        url: String,
        status: RepairStatus,
        done: usize,
        total: usize,
    },
    Progress(f32),
    Finished { outcome: CrawlOutcome, records: usize },
}

impl fmt::Display for CrawlEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlEvent::Listing { subject, page } => {
                write!(f, "Walking subject {subject}, page {page}")
            }
            CrawlEvent::Waiting(delay) => {
                write!(f, "Waiting {:.1}s before the next request", delay.as_secs_f64())
            }
            CrawlEvent::Fetching {
                subject_name,
                page,
                index,
                total,
                url,
            } => write!(f, "[{subject_name}] p.{page} ({index}/{total}) {url}"),
            CrawlEvent::Saved { url, total } => write!(f, "Saved {url} ({total} cards)"),
            CrawlEvent::ItemFailed { url, reason } => write!(f, "Skipped {url}: {reason}"),
            CrawlEvent::PageFailed { url, reason } => {
                write!(f, "Listing {url} failed: {reason}")
            }
            CrawlEvent::SubjectDone { subject, page } => {
                write!(f, "Subject {subject} has no questions on page {page}")
            }
            CrawlEvent::Repaired {
                url,
                status,
                done,
                total,
            } => write!(f, "({done}/{total}) {status}: {url}"),
            CrawlEvent::Progress(fraction) => write!(f, "{:.0}%", fraction * 100.0),
            CrawlEvent::Finished { outcome, records } => match outcome {
                CrawlOutcome::Done => write!(f, "Finished with {records} cards stored"),
                CrawlOutcome::Paused(at) => write!(
                    f,
                    "Paused with {records} cards stored; resume at subject {}, page {}",
                    at.subject, at.page
                ),
                CrawlOutcome::Stopped => write!(f, "Stopped with {records} cards stored"),
            },
        }
    }
}

/// Receives status updates from long-running passes.
pub trait Observer {
    fn on_event(&self, event: &CrawlEvent);
}

impl Observer for () {
    fn on_event(&self, _event: &CrawlEvent) {}
}

#[derive(Clone, Debug)]
pub struct CrawlReport {
    pub outcome: CrawlOutcome,
    pub appended: usize,
    pub failed: Vec<String>,
    pub records: usize,
}

/// Everything a crawl carries between requests.
pub struct CrawlContext<F> {
    fetcher: F,
    config: CrawlConfig,
    store: RecordStore,
    progress: ProgressFile,
    seen: HashSet<String>,
    stop: StopFlag,
}

impl<F: Fetch> CrawlContext<F> {
    pub fn new(fetcher: F, config: CrawlConfig, paths: &DataPaths, stop: StopFlag) -> Self {
        let store = RecordStore::new(&paths.records);
        let seen = match store.try_load() {
            Ok(records) => records.into_iter().map(|card| card.source).collect(),
            Err(err) => {
                warn!("could not read existing cards, duplicates may be fetched: {err}");
                HashSet::new()
            }
        };

        Self {
            fetcher,
            config,
            store,
            progress: ProgressFile::new(&paths.progress),
            seen,
            stop,
        }
    }

    pub fn subjects(&self) -> &std::ops::RangeInclusive<u32> {
        &self.config.subjects
    }

    pub fn seen(&self) -> &HashSet<String> {
        &self.seen
    }

    /// The stored checkpoint, or the first page of the first configured subject.
    pub fn resume_point(&self) -> Result<Progress> {
        let first = Progress {
            subject: *self.config.subjects.start(),
            page: 1,
        };
        let stored = self.progress.load()?;
        Ok(stored
            .filter(|p| self.config.subjects.contains(&p.subject) && p.page >= 1)
            .unwrap_or(first))
    }

    /// Walks subjects from `start` to the end of the configured range.
    pub async fn run(&mut self, start: Progress, observer: &dyn Observer) -> Result<CrawlReport> {
        let last_subject = *self.config.subjects.end();
        let subject_count = (last_subject.saturating_sub(start.subject) + 1) as f32;
        let mut writer = BufferedWriter::new(&self.store);
        let mut appended = 0;
        let mut failed = Vec::new();
        let mut stored = None;

        info!(
            "crawl starting at subject {}, page {}",
            start.subject, start.page
        );

        for subject in start.subject..=last_subject {
            let mut page = if subject == start.subject {
                start.page
            } else {
                1
            };

            loop {
                let here = Progress { subject, page };
                if let Err(err) = self.progress.save(here) {
                    warn!("{err:#}");
                }
                observer.on_event(&CrawlEvent::Listing { subject, page });

                let listing =
                    match list_page(&self.fetcher, &self.config.base_url, subject, page).await {
                        Ok(listing) => listing,
                        Err(err) => {
                            let url = listing_url(&self.config.base_url, subject, page);
                            warn!("listing {url} failed: {err}");
                            observer.on_event(&CrawlEvent::PageFailed {
                                url: url.clone(),
                                reason: err.to_string(),
                            });
                            failed.push(url);
                            // The checkpoint still points here, so a rerun retries this page.
                            stored = flush(&mut writer).or(stored);
                            let outcome = CrawlOutcome::Paused(here);
                            return Ok(self.finish(outcome, appended, failed, stored, observer));
                        }
                    };

                if listing.items.is_empty() {
                    observer.on_event(&CrawlEvent::SubjectDone { subject, page });
                    break;
                }

                let fresh: Vec<ListItem> = listing
                    .items
                    .into_iter()
                    .filter(|item| !self.seen.contains(&item.url))
                    .collect();
                let total = fresh.len();

                for (i, item) in fresh.into_iter().enumerate() {
                    if self.stop.is_requested() {
                        stored = flush(&mut writer).or(stored);
                        let outcome = CrawlOutcome::Paused(here);
                        return Ok(self.finish(outcome, appended, failed, stored, observer));
                    }

                    let delay = self.config.item_delay.sample();
                    observer.on_event(&CrawlEvent::Waiting(delay));
                    tokio::time::sleep(delay).await;

                    observer.on_event(&CrawlEvent::Fetching {
                        subject_name: listing.subject_name.clone(),
                        page,
                        index: i + 1,
                        total,
                        url: item.url.clone(),
                    });

                    match fetch_card(
                        &self.fetcher,
                        &self.config.base_url,
                        &item.url,
                        &listing.subject_name,
                        &item.level,
                    )
                    .await
                    {
                        Ok(card) => {
                            self.seen.insert(card.source.clone());
                            writer.push(card);
                            appended += 1;
                            stored = flush(&mut writer).or(stored);
                            if let Some(total) = stored {
                                observer.on_event(&CrawlEvent::Saved {
                                    url: item.url.clone(),
                                    total,
                                });
                            }
                        }
                        Err(err) => {
                            warn!("{} failed: {err}", item.url);
                            observer.on_event(&CrawlEvent::ItemFailed {
                                url: item.url.clone(),
                                reason: err.to_string(),
                            });
                            failed.push(item.url);
                        }
                    }

                    let within = (i + 1) as f32 / total as f32;
                    let done = (subject - start.subject) as f32 + within;
                    observer.on_event(&CrawlEvent::Progress((done / subject_count).min(1.0)));
                }

                let next_page = page.checked_add(1).filter(|_| listing.has_next);
                let Some(next_page) = next_page else {
                    observer.on_event(&CrawlEvent::SubjectDone { subject, page });
                    break;
                };
                page = next_page;
                tokio::time::sleep(self.config.page_delay.sample()).await;
            }

            if self.config.pause_after_subject && subject < last_subject {
                let next = Progress {
                    subject: subject + 1,
                    page: 1,
                };
                if let Err(err) = self.progress.save(next) {
                    warn!("{err:#}");
                }
                stored = flush(&mut writer).or(stored);
                let outcome = CrawlOutcome::Paused(next);
                return Ok(self.finish(outcome, appended, failed, stored, observer));
            }
        }

        stored = flush(&mut writer).or(stored);
        Ok(self.finish(CrawlOutcome::Done, appended, failed, stored, observer))
    }

    /// Fetches up to `limit` unseen questions from one listing page.
    pub async fn grab(
        &mut self,
        list_url: &str,
        limit: usize,
        observer: &dyn Observer,
    ) -> Result<CrawlReport> {
        let listing = fetch_list(&self.fetcher, list_url, 1)
            .await
            .with_context(|| format!("Failed to read listing {list_url}"))?;

        let targets: Vec<ListItem> = listing
            .items
            .into_iter()
            .filter(|item| !self.seen.contains(&item.url))
            .take(limit)
            .collect();
        let total = targets.len();

        let mut writer = BufferedWriter::new(&self.store);
        let mut appended = 0;
        let mut failed = Vec::new();
        let mut stored = None;

        for (i, item) in targets.into_iter().enumerate() {
            if self.stop.is_requested() {
                stored = flush(&mut writer).or(stored);
                return Ok(self.finish(CrawlOutcome::Stopped, appended, failed, stored, observer));
            }

            if i > 0 {
                let delay = self.config.item_delay.sample();
                observer.on_event(&CrawlEvent::Waiting(delay));
                tokio::time::sleep(delay).await;
            }

            observer.on_event(&CrawlEvent::Fetching {
                subject_name: listing.subject_name.clone(),
                page: 1,
                index: i + 1,
                total,
                url: item.url.clone(),
            });

            match fetch_card(
                &self.fetcher,
                &self.config.base_url,
                &item.url,
                &listing.subject_name,
                &item.level,
            )
            .await
            {
                Ok(card) => {
                    self.seen.insert(card.source.clone());
                    writer.push(card);
                    appended += 1;
                    stored = flush(&mut writer).or(stored);
                }
                Err(err) => {
                    warn!("{} failed: {err}", item.url);
                    observer.on_event(&CrawlEvent::ItemFailed {
                        url: item.url.clone(),
                        reason: err.to_string(),
                    });
                    failed.push(item.url);
                }
            }
            observer.on_event(&CrawlEvent::Progress((i + 1) as f32 / total as f32));
        }

        stored = flush(&mut writer).or(stored);
        Ok(self.finish(CrawlOutcome::Done, appended, failed, stored, observer))
    }

    fn finish(
        &self,
        outcome: CrawlOutcome,
        appended: usize,
        failed: Vec<String>,
        stored: Option<usize>,
        observer: &dyn Observer,
    ) -> CrawlReport {
        let records = match self.store.try_load() {
            Ok(records) => records.len(),
            Err(_) => stored.unwrap_or_default(),
        };
        observer.on_event(&CrawlEvent::Finished { outcome, records });
        info!("crawl finished: {outcome:?}, {appended} new, {records} stored");
        CrawlReport {
            outcome,
            appended,
            failed,
            records,
        }
    }
}

// Failed saves stay buffered for the next flush.
fn flush(writer: &mut BufferedWriter<'_>) -> Option<usize> {
    match writer.flush() {
        Ok(total) => total,
        Err(err) => {
            warn!("could not save {} pending cards: {err}", writer.pending());
            None
        }
    }
}

/// Detail page, then explanation, composed into a card.
pub async fn fetch_card<F: Fetch>(
    fetcher: &F,
    base_url: &str,
    url: &str,
    subject: &str,
    level: &str,
) -> Result<CardRecord, FetchError> {
    let detail = fetch_detail(fetcher, url).await?;
    let explanation = match &detail.q_id {
        Some(q_id) => fetch_explanation(fetcher, base_url, q_id, url).await,
        None => Explanation::lookup_failed(),
    };
    Ok(CardRecord::new(
        url,
        compose_front(&explanation.sections),
        subject,
        level,
    ))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;

    pub const BASE: &str = "https://example.com";

    #[derive(Default)]
    pub struct Collect {
        pub events: Mutex<Vec<CrawlEvent>>,
        pub stop_after_saves: Option<(usize, StopFlag)>,
    }

    impl Observer for Collect {
        fn on_event(&self, event: &CrawlEvent) {
            let mut events = self.events.lock().unwrap();
            events.push(event.clone());
            if let Some((limit, stop)) = &self.stop_after_saves {
                let saves = events
                    .iter()
                    .filter(|e| matches!(e, CrawlEvent::Saved { .. }))
                    .count();
                if saves >= *limit {
                    stop.request();
                }
            }
        }
    }

    pub fn listing_html(title: &str, hrefs: &[&str], next_page: Option<u32>) -> String {
        let rows: String = hrefs
            .iter()
            .map(|href| format!(r#"<tr><td>R5</td><td><a href="{href}">q</a></td><td>A</td></tr>"#))
            .collect();
        let next = next_page
            .map(|p| format!(r#"<a href="?page={p}">{p}</a>"#))
            .unwrap_or_default();
        format!("<html><head><title>{title}-kakomon</title></head><body><table>{rows}</table>{next}</body></html>")
    }

    pub fn detail_html(q_id: u32) -> String {
        format!(
            r#"<div class="q_body">question {q_id}</div><input onclick="answer({q_id}, 1)">"#
        )
    }

    pub fn explanation_html(text: &str) -> String {
        format!(r#"<div class="kaisetu">{text}</div><div class="joubun">article</div>"#)
    }

    /// Serves a detail page and explanation for `/q/{id}/1/1/a`.
    pub fn serve_question(fetcher: &crate::http::fake::FakeFetcher, id: u32) -> String {
        let url = format!("{BASE}/q/{id}/1/1/a");
        fetcher.page(&url, 200, &detail_html(id));
        fetcher.answer(
            &format!("{BASE}/q/check_q_a.php"),
            &id.to_string(),
            200,
            &explanation_html(&format!("explanation {id}")),
        );
        url
    }

    pub fn quiet_config() -> CrawlConfig {
        CrawlConfig {
            base_url: BASE.to_string(),
            item_delay: crate::config::DelayRange::ZERO,
            page_delay: crate::config::DelayRange::ZERO,
            pause_after_subject: false,
            ..CrawlConfig::default()
        }
    }
}
