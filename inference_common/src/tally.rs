//! Running per-label detection counts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Counts detections per label across all processed frames.
///
/// Counts only ever grow. `snapshot` orders labels by descending count,
/// keeping first-seen order among equal counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<(String, u64)>", into = "Vec<(String, u64)>")]
pub struct DetectionTally {
    // insertion ordered
    entries: Vec<(String, u64)>,
    index: HashMap<String, usize>,
}

impl DetectionTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the count for `label`, starting it at 1 if unseen.
    pub fn record(&mut self, label: &str) {
        match self.index.get(label) {
            Some(&i) => self.entries[i].1 += 1,
            None => {
                self.index.insert(label.to_owned(), self.entries.len());
                self.entries.push((label.to_owned(), 1));
            }
        }
    }

    pub fn get(&self, label: &str) -> u64 {
        self.index.get(label).map_or(0, |&i| self.entries[i].1)
    }

    /// Number of distinct labels.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of recorded detections over all labels.
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, n)| n).sum()
    }

    /// Current counts, sorted by descending count (stable w.r.t. first-seen order).
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        let mut sorted = self.entries.clone();
        sorted.sort_by(|a, b| b.1.cmp(&a.1));
        sorted
    }
}

impl From<Vec<(String, u64)>> for DetectionTally {
    fn from(entries: Vec<(String, u64)>) -> Self {
        let mut tally = Self::new();
        for (label, count) in entries {
            match tally.index.get(&label) {
                Some(&i) => tally.entries[i].1 += count,
                None => {
                    tally.index.insert(label.clone(), tally.entries.len());
                    tally.entries.push((label, count));
                }
            }
        }
        tally
    }
}

impl From<DetectionTally> for Vec<(String, u64)> {
    fn from(tally: DetectionTally) -> Self {
        tally.snapshot()
    }
}
