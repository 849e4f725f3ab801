use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::http::{Fetch, FetchError};

const UNKNOWN_SUBJECT: &str = "不明";
const NEXT_LABEL: &str = "次へ";

static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static CELL_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("td").unwrap());
static LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());
static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static DETAIL_PATH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/q/\d+").unwrap());
static PAGE_PARAM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[?&]page=(\d+)").unwrap());

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListItem {
    pub url: String,
    pub level: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListPage {
    /// Qualifying rows in page order, without duplicates. Empty means the
    /// subject is exhausted, whatever `has_next` says.
    pub items: Vec<ListItem>,
    pub subject_name: String,
    pub has_next: bool,
}

pub fn listing_url(base_url: &str, subject_id: u32, page: u32) -> String {
    format!(
        "{}/data/{subject_id}?page={page}",
        base_url.trim_end_matches('/')
    )
}

pub async fn list_page<F: Fetch>(
    fetcher: &F,
    base_url: &str,
    subject_id: u32,
    page: u32,
) -> Result<ListPage, FetchError> {
    let url = listing_url(base_url, subject_id, page);
    fetch_list(fetcher, &url, page).await
}

/// Fetches an arbitrary listing URL; `page` is the page number it shows.
pub async fn fetch_list<F: Fetch>(
    fetcher: &F,
    url: &str,
    page: u32,
) -> Result<ListPage, FetchError> {
    let page_url = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;

    let response = fetcher.get(url).await?;
    if !response.is_ok() {
        return Err(FetchError::Status(response.status));
    }

    let listing = parse_list_page(&response.body, &page_url, page);
    debug!(
        "{url}: {} items, next page: {}",
        listing.items.len(),
        listing.has_next
    );
    Ok(listing)
}

pub fn parse_list_page(html: &str, page_url: &Url, page: u32) -> ListPage {
    let document = Html::parse_document(html);

    let subject_name = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|title| title.text().collect::<String>())
        .and_then(|title| title.split('-').next().map(|s| s.trim().to_string()))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| UNKNOWN_SUBJECT.to_string());

    let mut seen = HashSet::new();
    let mut items = Vec::new();
    for row in document.select(&ROW_SELECTOR) {
        let cells: Vec<_> = row.select(&CELL_SELECTOR).collect();
        if cells.len() < 3 {
            continue;
        }
        let Some(href) = row
            .select(&LINK_SELECTOR)
            .filter_map(|a| a.value().attr("href"))
            .find(|href| DETAIL_PATH_RE.is_match(href))
        else {
            continue;
        };
        let Ok(url) = page_url.join(href) else {
            continue;
        };
        let url = url.to_string();
        if !seen.insert(url.clone()) {
            continue;
        }

        let level = cells[2].text().map(str::trim).collect::<String>();
        items.push(ListItem { url, level });
    }

    let has_next = document.select(&LINK_SELECTOR).any(|a| {
        a.text().any(|t| t.contains(NEXT_LABEL))
            || a.value()
                .attr("href")
                .and_then(|href| PAGE_PARAM_RE.captures(href))
                .is_some_and(|caps| {
                    page.checked_add(1)
                        .is_some_and(|next| caps[1].parse::<u32>() == Ok(next))
                })
    });

    ListPage {
        items,
        subject_name,
        has_next,
    }
}
