use std::fmt;

use futures::StreamExt;
use futures::{future, stream};
use tracing::{debug, info, warn};

use crate::card::{
    CardRecord, NO_OFFICIAL_EXPLANATION, PAGE_REMOVED, Sections, compose_front, is_broken_front,
};
use crate::config::{DelayRange, RefreshConfig, RepairConfig};
use crate::crawl::{CrawlEvent, Observer, StopFlag};
use crate::detail::fetch_detail;
use crate::explain::{Explanation, Outcome, fetch_explanation};
use crate::http::{Fetch, FetchError};
use crate::store::{RecordStore, StoreError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepairStatus {
    Fixed,
    /// The site publishes no explanation; the front now carries a placeholder.
    Unfixable,
    /// Detail page is gone (404).
    Removed,
    /// Attempts exhausted, front untouched.
    Failed,
}

impl fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RepairStatus::Fixed => "fixed",
            RepairStatus::Unfixable => "no explanation",
            RepairStatus::Removed => "page removed",
            RepairStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Indices into the collection, in ascending order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub fixed: Vec<usize>,
    /// Includes removed pages.
    pub unfixable: Vec<usize>,
    pub failed: Vec<usize>,
    /// Stopped before every target was attempted.
    pub stopped: bool,
}

impl RepairReport {
    fn record(&mut self, index: usize, status: RepairStatus) {
        match status {
            RepairStatus::Fixed => self.fixed.push(index),
            RepairStatus::Unfixable | RepairStatus::Removed => self.unfixable.push(index),
            RepairStatus::Failed => self.failed.push(index),
        }
    }

    fn sort(&mut self) {
        self.fixed.sort_unstable();
        self.unfixable.sort_unstable();
        self.failed.sort_unstable();
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub updated: Vec<usize>,
    /// Rewritten, but the site has no explanation for them.
    pub unfixable: Vec<usize>,
    pub removed: Vec<usize>,
    pub failed: Vec<usize>,
    pub stopped: bool,
}

pub fn repair_targets(records: &[CardRecord]) -> Vec<usize> {
    records
        .iter()
        .enumerate()
        .filter(|(_, card)| card.is_broken())
        .map(|(i, _)| i)
        .collect()
}

enum Lookup {
    Answered(Explanation),
    Removed,
    Retry { reason: String, backoff: bool },
}

async fn lookup<F: Fetch>(fetcher: &F, base_url: &str, url: &str) -> Lookup {
    let detail = match fetch_detail(fetcher, url).await {
        Ok(detail) => detail,
        Err(err) if err.is_not_found() => return Lookup::Removed,
        Err(err @ FetchError::Status(_)) => {
            return Lookup::Retry {
                reason: err.to_string(),
                backoff: false,
            };
        }
        Err(err) => {
            return Lookup::Retry {
                reason: err.to_string(),
                backoff: true,
            };
        }
    };

    let Some(q_id) = detail.q_id else {
        return Lookup::Retry {
            reason: "no question id on page".to_string(),
            backoff: false,
        };
    };

    let explanation = fetch_explanation(fetcher, base_url, &q_id, url).await;
    if explanation.outcome == Outcome::Failed {
        return Lookup::Retry {
            reason: explanation.sections.explanation,
            backoff: true,
        };
    }
    Lookup::Answered(explanation)
}

/// Front for an answered lookup. Anything that would still be broken gets the
/// placeholder explanation, keeping any article or point text.
fn answered_front(explanation: Explanation) -> (RepairStatus, String) {
    let front = compose_front(&explanation.sections);
    if !is_broken_front(Some(&front)) {
        return (RepairStatus::Fixed, front);
    }
    let placeholder = Sections {
        explanation: NO_OFFICIAL_EXPLANATION.to_string(),
        ..explanation.sections
    };
    (RepairStatus::Unfixable, compose_front(&placeholder))
}

fn removed_front(front: Option<String>) -> String {
    let front = front.unwrap_or_default();
    if front.ends_with(PAGE_REMOVED) {
        front
    } else {
        format!("{front}{PAGE_REMOVED}")
    }
}

async fn repair_one<F: Fetch>(
    fetcher: &F,
    config: &RepairConfig,
    url: &str,
    front: Option<String>,
) -> (RepairStatus, Option<String>) {
    if url.is_empty() {
        return (RepairStatus::Failed, None);
    }

    for attempt in 1..=config.max_attempts {
        tokio::time::sleep(config.jitter.sample()).await;

        match lookup(fetcher, &config.base_url, url).await {
            Lookup::Removed => return (RepairStatus::Removed, Some(removed_front(front))),
            Lookup::Answered(explanation) => {
                let (status, front) = answered_front(explanation);
                return (status, Some(front));
            }
            Lookup::Retry { reason, backoff } => {
                debug!("{url} attempt {attempt}/{}: {reason}", config.max_attempts);
                if backoff {
                    tokio::time::sleep(config.retry_backoff).await;
                }
            }
        }
    }

    (RepairStatus::Failed, None)
}

/// Re-fetches every broken record with `config.workers` requests in flight.
/// Fronts are merged back by index as workers finish; the collection is
/// saved every `save_every` completions and once at the end. Once `stop` is
/// raised no new targets start; in-flight ones finish.
pub async fn repair<F: Fetch>(
    fetcher: &F,
    store: &RecordStore,
    records: &mut [CardRecord],
    config: &RepairConfig,
    stop: &StopFlag,
    observer: &dyn Observer,
) -> Result<RepairReport, StoreError> {
    let jobs: Vec<(usize, String, Option<String>)> = repair_targets(records)
        .into_iter()
        .map(|i| (i, records[i].source.clone(), records[i].front.clone()))
        .collect();
    let total = jobs.len();
    let mut report = RepairReport::default();
    if total == 0 {
        return Ok(report);
    }
    info!("repairing {total} records with {} workers", config.workers);

    let mut tasks = stream::iter(jobs)
        .take_while(|_| future::ready(!stop.is_requested()))
        .map(|(index, url, front)| async move {
            let (status, front) = repair_one(fetcher, config, &url, front).await;
            (index, url, status, front)
        })
        .buffer_unordered(config.workers.max(1));

    let mut done = 0;
    while let Some((index, url, status, front)) = tasks.next().await {
        if let Some(front) = front {
            records[index].front = Some(front);
        }
        report.record(index, status);
        done += 1;

        observer.on_event(&CrawlEvent::Repaired {
            url,
            status,
            done,
            total,
        });
        observer.on_event(&CrawlEvent::Progress(done as f32 / total as f32));

        if config.save_every > 0 && done % config.save_every == 0 {
            if let Err(err) = store.save(records) {
                warn!("intermediate save failed: {err}");
            }
        }
    }

    report.stopped = done < total;
    store.save(records)?;
    report.sort();
    info!(
        "repair finished: {} fixed, {} unfixable, {} failed",
        report.fixed.len(),
        report.unfixable.len(),
        report.failed.len()
    );
    Ok(report)
}

/// Re-fetches every record in order, one at a time, rewriting fronts whose
/// lookup succeeded. Stops early when `stop` is raised.
pub async fn refresh_all<F: Fetch>(
    fetcher: &F,
    store: &RecordStore,
    records: &mut [CardRecord],
    config: &RefreshConfig,
    stop: &StopFlag,
    observer: &dyn Observer,
) -> Result<RefreshReport, StoreError> {
    let total = records.len();
    let mut report = RefreshReport::default();

    for index in 0..total {
        if stop.is_requested() {
            report.stopped = true;
            break;
        }

        let url = records[index].source.clone();
        let status = refresh_one(fetcher, config, &mut records[index]).await;
        match status {
            RepairStatus::Fixed => report.updated.push(index),
            RepairStatus::Unfixable => report.unfixable.push(index),
            RepairStatus::Removed => report.removed.push(index),
            RepairStatus::Failed => report.failed.push(index),
        }

        let done = index + 1;
        observer.on_event(&CrawlEvent::Repaired {
            url,
            status,
            done,
            total,
        });
        observer.on_event(&CrawlEvent::Progress(done as f32 / total as f32));

        if config.save_every > 0 && done % config.save_every == 0 {
            if let Err(err) = store.save(records) {
                warn!("intermediate save failed: {err}");
            }
        }
        pause(config.delay).await;
    }

    store.save(records)?;
    Ok(report)
}

async fn refresh_one<F: Fetch>(
    fetcher: &F,
    config: &RefreshConfig,
    card: &mut CardRecord,
) -> RepairStatus {
    if card.source.is_empty() {
        return RepairStatus::Failed;
    }

    for attempt in 1..=config.max_attempts {
        match lookup(fetcher, &config.base_url, &card.source).await {
            Lookup::Answered(explanation) => {
                let (status, front) = answered_front(explanation);
                card.front = Some(front);
                return status;
            }
            Lookup::Removed => return RepairStatus::Removed,
            Lookup::Retry { reason, backoff } => {
                debug!(
                    "{} attempt {attempt}/{}: {reason}",
                    card.source, config.max_attempts
                );
                if backoff {
                    tokio::time::sleep(config.retry_backoff).await;
                }
            }
        }
    }
    RepairStatus::Failed
}

async fn pause(delay: DelayRange) {
    tokio::time::sleep(delay.sample()).await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::card::{EXPLANATION_HEADER, TRANSPORT_ERROR_TAG};
    use crate::crawl::testing::{BASE, detail_html, serve_question};
    use crate::http::fake::FakeFetcher;
    use tempfile::tempdir;

    const ENDPOINT: &str = "https://example.com/q/check_q_a.php";

    fn card(id: u32, front: &str) -> CardRecord {
        CardRecord::new(&format!("{BASE}/q/{id}/1/1/a"), front.to_string(), "Law", "A")
    }

    fn quick_repair() -> RepairConfig {
        RepairConfig {
            base_url: BASE.to_string(),
            workers: 3,
            max_attempts: 2,
            jitter: DelayRange::ZERO,
            retry_backoff: Duration::ZERO,
            save_every: 2,
        }
    }

    fn quick_refresh() -> RefreshConfig {
        RefreshConfig {
            base_url: BASE.to_string(),
            max_attempts: 2,
            delay: DelayRange::ZERO,
            retry_backoff: Duration::ZERO,
            save_every: 2,
        }
    }

    #[test]
    fn targets_only_broken_records() {
        let mut records: Vec<CardRecord> = (0..10)
            .map(|i| card(i, &format!("{EXPLANATION_HEADER}\nexplanation {i}")))
            .collect();
        records[3].front = Some(String::new());
        records[7].front = Some(format!("{EXPLANATION_HEADER}\n{TRANSPORT_ERROR_TAG}: timed out"));

        assert_eq!(repair_targets(&records), vec![3, 7]);
    }

    #[tokio::test]
    async fn classifies_each_outcome_and_keeps_order() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("cards.json"));
        let fetcher = FakeFetcher::new();

        // 0 is healthy, 1 repairs, 2 has no explanation, 3 is gone, 4 keeps failing.
        let mut records = vec![
            card(10, "【解説】\nfine"),
            card(11, ""),
            card(12, "【解説】\n解説取得失敗"),
            card(13, "【解説】\nAPIエラー: 500"),
            card(14, "【解説】\n通信エラー: reset"),
        ];
        serve_question(&fetcher, 11);
        fetcher.page(&records[2].source, 200, &detail_html(12));
        fetcher.answer(ENDPOINT, "12", 200, &format!("<p>{}</p>", "x".repeat(80)));
        fetcher.page(&records[4].source, 500, "");

        let report = repair(&fetcher, &store, &mut records, &quick_repair(), &StopFlag::new(), &())
            .await
            .unwrap();

        assert_eq!(report.fixed, vec![1]);
        assert_eq!(report.unfixable, vec![2, 3]);
        assert_eq!(report.failed, vec![4]);

        assert_eq!(records[0].front_text(), "【解説】\nfine");
        assert!(records[1].front_text().contains("explanation 11"));
        assert!(!records[1].is_broken());
        assert_eq!(
            records[2].front_text(),
            format!("{EXPLANATION_HEADER}\n{NO_OFFICIAL_EXPLANATION}")
        );
        assert!(records[3].front_text().ends_with(PAGE_REMOVED));
        assert_eq!(records[4].front_text(), "【解説】\n通信エラー: reset");

        let saved = store.try_load().unwrap();
        assert_eq!(saved, records);
        let gets = fetcher.gets();
        assert_eq!(gets.iter().filter(|u| **u == records[4].source).count(), 2);
        assert!(!gets.contains(&records[0].source));
    }

    #[tokio::test]
    async fn transport_failure_is_retried() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("cards.json"));
        let fetcher = FakeFetcher::new();
        let url = format!("{BASE}/q/20/1/1/a");
        fetcher.failure(&url, FetchError::Transport("connection reset".into()));
        serve_question(&fetcher, 20);

        let mut records = vec![card(20, "")];
        let report = repair(&fetcher, &store, &mut records, &quick_repair(), &StopFlag::new(), &())
            .await
            .unwrap();

        assert_eq!(report.fixed, vec![0]);
        assert_eq!(fetcher.gets(), vec![url.clone(), url]);
    }

    #[tokio::test]
    async fn removed_marker_is_not_repeated() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("cards.json"));
        let fetcher = FakeFetcher::new();
        let mut records = vec![card(30, "")];

        for _ in 0..2 {
            repair(&fetcher, &store, &mut records, &quick_repair(), &StopFlag::new(), &())
                .await
                .unwrap();
        }
        assert_eq!(records[0].front_text(), PAGE_REMOVED);
    }

    #[tokio::test]
    async fn blank_explanation_block_is_unfixable() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("cards.json"));
        let fetcher = FakeFetcher::new();
        let mut records = vec![card(35, ""), card(36, "")];
        for (record, id) in records.iter().zip([35, 36]) {
            fetcher.page(&record.source, 200, &detail_html(id));
        }
        fetcher.answer(ENDPOINT, "35", 200, r#"<div class="kaisetu">   </div>"#);
        fetcher.answer(
            ENDPOINT,
            "36",
            200,
            r#"<div class="point">覚える</div><div class="joubun">第9条</div>"#,
        );

        let report = repair(&fetcher, &store, &mut records, &quick_repair(), &StopFlag::new(), &())
            .await
            .unwrap();

        assert!(report.fixed.is_empty());
        assert_eq!(report.unfixable, vec![0, 1]);
        assert_eq!(
            records[0].front_text(),
            format!("{EXPLANATION_HEADER}\n{NO_OFFICIAL_EXPLANATION}")
        );
        assert_eq!(
            records[1].front_text(),
            format!("【ポイント】\n覚える\n\n---\n{EXPLANATION_HEADER}\n{NO_OFFICIAL_EXPLANATION}\n\n---\n【条文】\n第9条")
        );
    }

    #[tokio::test]
    async fn raised_stop_starts_no_repairs() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("cards.json"));
        let fetcher = FakeFetcher::new();
        serve_question(&fetcher, 45);
        let stop = StopFlag::new();
        stop.request();
        let mut records = vec![card(45, ""), card(46, "")];

        let report = repair(&fetcher, &store, &mut records, &quick_repair(), &stop, &())
            .await
            .unwrap();

        assert!(report.stopped);
        assert!(report.fixed.is_empty());
        assert!(fetcher.requests().is_empty());
        assert_eq!(store.try_load().unwrap(), records);
    }

    #[tokio::test]
    async fn refresh_marks_blank_explanation_unfixable() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("cards.json"));
        let fetcher = FakeFetcher::new();
        let mut records = vec![card(55, "【解説】\nstale")];
        fetcher.page(&records[0].source, 200, &detail_html(55));
        fetcher.answer(ENDPOINT, "55", 200, r#"<div class="kaisetu"><br></div>"#);

        let report = refresh_all(
            &fetcher,
            &store,
            &mut records,
            &quick_refresh(),
            &StopFlag::new(),
            &(),
        )
        .await
        .unwrap();

        assert!(report.updated.is_empty());
        assert_eq!(report.unfixable, vec![0]);
        assert_eq!(
            records[0].front_text(),
            format!("{EXPLANATION_HEADER}\n{NO_OFFICIAL_EXPLANATION}")
        );
    }

    #[tokio::test]
    async fn nothing_to_repair_writes_nothing() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("cards.json"));
        let mut records = vec![card(40, "【解説】\nfine")];
        let report = repair(
            &FakeFetcher::new(),
            &store,
            &mut records,
            &quick_repair(),
            &StopFlag::new(),
            &(),
        )
        .await
        .unwrap();
        assert_eq!(report, RepairReport::default());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn refresh_rewrites_reachable_records() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("cards.json"));
        let fetcher = FakeFetcher::new();
        serve_question(&fetcher, 50);
        let mut records = vec![card(50, "【解説】\nstale"), card(51, "【解説】\nkept")];

        let report = refresh_all(
            &fetcher,
            &store,
            &mut records,
            &quick_refresh(),
            &StopFlag::new(),
            &(),
        )
        .await
        .unwrap();

        assert_eq!(report.updated, vec![0]);
        assert_eq!(report.removed, vec![1]);
        assert!(records[0].front_text().contains("explanation 50"));
        assert_eq!(records[1].front_text(), "【解説】\nkept");
        assert_eq!(store.try_load().unwrap(), records);
    }

    #[tokio::test]
    async fn refresh_honours_stop() {
        let dir = tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("cards.json"));
        let fetcher = FakeFetcher::new();
        let stop = StopFlag::new();
        stop.request();
        let mut records = vec![card(60, "【解説】\nold")];

        let report = refresh_all(&fetcher, &store, &mut records, &quick_refresh(), &stop, &())
            .await
            .unwrap();

        assert!(report.stopped);
        assert!(fetcher.requests().is_empty());
        assert_eq!(store.try_load().unwrap(), records);
    }
}
