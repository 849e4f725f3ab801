use serde::{Deserialize, Serialize};

pub const POINT_HEADER: &str = "【ポイント】";
pub const EXPLANATION_HEADER: &str = "【解説】";
pub const ARTICLE_HEADER: &str = "【条文】";
pub const SECTION_SEPARATOR: &str = "\n\n---\n";

const SECTION_RULE: &str = "---";
const SECTION_HEADERS: [&str; 3] = [POINT_HEADER, EXPLANATION_HEADER, ARTICLE_HEADER];

/// Explanation text when the detail page had no question id to look up.
pub const LOOKUP_FAILED: &str = "解説取得失敗";
/// Explanation text when the endpoint answered without an explanation block.
pub const EXPLANATION_NOT_FOUND: &str = "解説が見つかりませんでした";
/// Front placeholder for questions the site publishes without any explanation.
pub const NO_OFFICIAL_EXPLANATION: &str = "（公式に解説情報がありませんでした）";
/// Appended to the front of a card whose detail page returned 404.
pub const PAGE_REMOVED: &str = "\n(ページが削除されています)";

pub const API_ERROR_TAG: &str = "APIエラー";
pub const TRANSPORT_ERROR_TAG: &str = "通信エラー";

const BROKEN_MARKERS: [&str; 5] = [
    EXPLANATION_NOT_FOUND,
    "解説情報がありませんでした",
    LOOKUP_FAILED,
    API_ERROR_TAG,
    TRANSPORT_ERROR_TAG,
];

/// One flashcard. `source` doubles as the business key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub front: Option<String>,
    #[serde(default)]
    pub back: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub level: String,
}

impl CardRecord {
    pub fn new(url: &str, front: String, subject: &str, level: &str) -> Self {
        CardRecord {
            front: Some(front),
            back: url.to_string(),
            source: url.to_string(),
            subject: subject.to_string(),
            level: level.to_string(),
        }
    }

    pub fn front_text(&self) -> &str {
        self.front.as_deref().unwrap_or_default()
    }

    pub fn is_broken(&self) -> bool {
        is_broken_front(self.front.as_deref())
    }
}

/// The three text blocks returned for a question.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sections {
    pub explanation: String,
    pub article: String,
    pub point: String,
}

/// Builds the card front: point, explanation, article, each under its header.
/// Empty point or article sections are left out.
pub fn compose_front(sections: &Sections) -> String {
    let mut components = Vec::with_capacity(3);
    if !sections.point.is_empty() {
        components.push(format!("{POINT_HEADER}\n{}", sections.point));
    }
    components.push(format!("{EXPLANATION_HEADER}\n{}", sections.explanation));
    if !sections.article.is_empty() {
        components.push(format!("{ARTICLE_HEADER}\n{}", sections.article));
    }
    components.join(SECTION_SEPARATOR)
}

/// True when a front needs repair: missing, carrying a known error text,
/// lacking the explanation header, or with a blank explanation section.
pub fn is_broken_front(front: Option<&str>) -> bool {
    let Some(front) = front.filter(|f| !f.is_empty()) else {
        return true;
    };

    if BROKEN_MARKERS.iter().any(|marker| front.contains(marker)) {
        return true;
    }

    let Some((_, after)) = front.split_once(EXPLANATION_HEADER) else {
        return true;
    };

    let end = SECTION_HEADERS
        .iter()
        .filter_map(|header| after.find(header))
        .min()
        .unwrap_or(after.len());
    let content = after[..end].trim().trim_end_matches(SECTION_RULE).trim();
    content.is_empty()
}
