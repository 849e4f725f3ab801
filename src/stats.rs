use std::collections::BTreeMap;

use crate::card::CardRecord;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub num_cards: usize,
    pub by_subject: BTreeMap<String, usize>,
    pub by_level: BTreeMap<String, usize>,
    pub broken: usize,
    /// Source URLs stored more than once.
    pub duplicates: usize,
}

impl CollectionStats {
    pub fn from_records(records: &[CardRecord]) -> Self {
        let mut stats = CollectionStats::default();
        let mut sources = std::collections::HashSet::new();
        for card in records {
            stats.update(card);
            if !sources.insert(card.source.as_str()) {
                stats.duplicates += 1;
            }
        }
        stats
    }

    pub fn update(&mut self, card: &CardRecord) {
        self.num_cards += 1;
        *self.by_subject.entry(label(&card.subject)).or_insert(0) += 1;
        *self.by_level.entry(label(&card.level)).or_insert(0) += 1;
        if card.is_broken() {
            self.broken += 1;
        }
    }

    pub fn broken_ratio(&self) -> f32 {
        if self.num_cards == 0 {
            0.0
        } else {
            self.broken as f32 / self.num_cards as f32
        }
    }
}

fn label(value: &str) -> String {
    let value = value.trim();
    if value.is_empty() {
        "-".to_string()
    } else {
        value.to_string()
    }
}
