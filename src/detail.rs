use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use crate::http::{Fetch, FetchError};

static QUESTION_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("div.q_body").unwrap());
static HANDLER_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("input[onclick]").unwrap());
static ANSWER_CALL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"answer\((\d+),").unwrap());

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Detail {
    /// Empty when the question container is missing.
    pub question_text: String,
    /// Id consumed by the explanation endpoint.
    pub q_id: Option<String>,
}

pub async fn fetch_detail<F: Fetch>(fetcher: &F, url: &str) -> Result<Detail, FetchError> {
    let response = fetcher.get(url).await?;
    if !response.is_ok() {
        return Err(FetchError::Status(response.status));
    }

    let detail = parse_detail(&response.body);
    if detail.question_text.is_empty() {
        debug!("no question body found at {url}");
    }
    Ok(detail)
}

pub fn parse_detail(html: &str) -> Detail {
    let document = Html::parse_document(html);

    let question_text = document
        .select(&QUESTION_SELECTOR)
        .next()
        .map(|body| body.text().map(str::trim).collect::<String>())
        .unwrap_or_default();

    let q_id = document
        .select(&HANDLER_SELECTOR)
        .filter_map(|input| input.value().attr("onclick"))
        .find_map(|handler| ANSWER_CALL_RE.captures(handler))
        .map(|caps| caps[1].to_string());

    Detail {
        question_text,
        q_id,
    }
}
