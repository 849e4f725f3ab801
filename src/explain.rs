use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::card::{API_ERROR_TAG, EXPLANATION_NOT_FOUND, LOOKUP_FAILED, Sections, TRANSPORT_ERROR_TAG};
use crate::http::Fetch;
use crate::normalize::normalize;

pub const CHECK_ENDPOINT: &str = "/q/check_q_a.php";

/// Either answer returns the explanation; 1 is "correct".
const DEFAULT_CHOICE: &str = "1";
/// Bodies shorter than this with none of the containers are treated as broken.
const MIN_BODY_LEN: usize = 50;

static EXPLANATION_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.kaisetu").unwrap());
static ARTICLE_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("div.joubun").unwrap());
static POINT_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("div.point").unwrap());

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The explanation container was present.
    Found,
    /// The endpoint answered but carries no explanation container.
    Missing,
    /// Transport failure, non-200 or an unusable body.
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Explanation {
    pub outcome: Outcome,
    /// On failure holds the error-tagged text that ends up on the card.
    pub sections: Sections,
}

impl Explanation {
    fn failed(message: String) -> Self {
        Explanation {
            outcome: Outcome::Failed,
            sections: Sections {
                explanation: message,
                ..Sections::default()
            },
        }
    }

    /// Stand-in used when the detail page exposed no question id.
    pub fn lookup_failed() -> Self {
        Self::failed(LOOKUP_FAILED.to_string())
    }

    pub fn has_supplement(&self) -> bool {
        !self.sections.article.is_empty() || !self.sections.point.is_empty()
    }
}

/// Asks the answer-check endpoint for the explanation of `q_id`.
/// Never fails: problems come back as error-tagged text with `Outcome::Failed`.
pub async fn fetch_explanation<F: Fetch>(
    fetcher: &F,
    base_url: &str,
    q_id: &str,
    referer_url: &str,
) -> Explanation {
    let endpoint = format!("{}{}", base_url.trim_end_matches('/'), CHECK_ENDPOINT);
    let headers = [
        (
            "Content-Type",
            "application/x-www-form-urlencoded;charset=UTF-8".to_string(),
        ),
        ("X-Requested-With", "XMLHttpRequest".to_string()),
        ("Origin", base_url.trim_end_matches('/').to_string()),
        ("Referer", referer_url.to_string()),
    ];
    let form = [("q", q_id), ("a", DEFAULT_CHOICE)];

    match fetcher.post_form(&endpoint, &form, &headers).await {
        Ok(response) if response.is_ok() => parse_explanation(&response.body),
        Ok(response) => {
            warn!("explanation for {q_id} answered {}", response.status);
            Explanation::failed(format!("{API_ERROR_TAG}: {}", response.status))
        }
        Err(err) => {
            warn!("explanation for {q_id} failed: {err}");
            Explanation::failed(format!("{TRANSPORT_ERROR_TAG}: {err}"))
        }
    }
}

pub fn parse_explanation(body: &str) -> Explanation {
    let fragment = Html::parse_fragment(body);
    let explanation = fragment.select(&EXPLANATION_SELECTOR).next();
    let article = fragment.select(&ARTICLE_SELECTOR).next();
    let point = fragment.select(&POINT_SELECTOR).next();

    if explanation.is_none() && article.is_none() && point.is_none() && body.len() < MIN_BODY_LEN
    {
        debug!("short explanation body: {body:?}");
        return Explanation::failed(format!("{API_ERROR_TAG}: レスポンス不正(Empty)"));
    }

    let outcome = if explanation.is_some() {
        Outcome::Found
    } else {
        Outcome::Missing
    };
    let explanation_text = match explanation {
        Some(block) => block_text(block),
        None => EXPLANATION_NOT_FOUND.to_string(),
    };

    Explanation {
        outcome,
        sections: Sections {
            explanation: explanation_text,
            article: article.map(block_text).unwrap_or_default(),
            point: point.map(block_text).unwrap_or_default(),
        },
    }
}

fn block_text(block: ElementRef<'_>) -> String {
    normalize(block).trim().to_string()
}
