use chrono::{Local, NaiveDate};

use crate::config::DetectorConfig;
use crate::extract::ExtractedExpense;
use crate::store::ExpenseRecord;

/// A stored record the candidate was judged to duplicate.
#[derive(Debug)]
pub struct DuplicateMatch<'a> {
    pub record: &'a ExpenseRecord,
    pub similarity: f64,
}

/// Fuzzy duplicate detection over recently stored records.
///
/// Three gates, cheapest first: amount tolerance, description similarity,
/// date proximity. This is best-effort matching, not a uniqueness
/// constraint — two concurrent webhook invocations can both pass the check
/// before either insert lands.
pub struct DuplicateDetector {
    amount_tolerance: f64,
    similarity_threshold: f64,
    date_window_days: i64,
}

impl DuplicateDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            amount_tolerance: config.amount_tolerance,
            similarity_threshold: config.similarity_threshold,
            date_window_days: config.date_window_days,
        }
    }

    /// Scan `existing` in the store's returned order (most recent first)
    /// and return the first record that passes all three gates.
    pub fn find_match<'a>(
        &self,
        candidate: &ExtractedExpense,
        existing: &'a [ExpenseRecord],
    ) -> Option<DuplicateMatch<'a>> {
        let candidate_date = candidate
            .expense_date
            .unwrap_or_else(|| Local::now().date_naive());
        let candidate_desc = candidate.description.to_lowercase();

        for record in existing {
            if (candidate.amount - record.amount).abs() > self.amount_tolerance {
                continue;
            }

            let score = similarity(&candidate_desc, &record.description.to_lowercase());
            if score < self.similarity_threshold {
                continue;
            }

            if !self.within_date_window(candidate_date, record.expense_date) {
                continue;
            }

            return Some(DuplicateMatch {
                record,
                similarity: score,
            });
        }

        None
    }

    fn within_date_window(&self, candidate: NaiveDate, existing: NaiveDate) -> bool {
        (candidate - existing).num_days().abs() <= self.date_window_days
    }
}

/// Description similarity in [0, 1].
///
/// Identical strings score 1.0 and comparison against an empty string
/// scores 0.0. One description containing the other scores 0.8 — "ค่าน้ำ"
/// and "ค่าน้ำประปา" are the same bill even though their edit distance is
/// large relative to the shorter string. Otherwise the score is the
/// normalized edit distance `1 - levenshtein(a, b) / max(len(a), len(b))`,
/// computed over chars so Thai text is not penalized per byte.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a.contains(b) || b.contains(a) {
        return 0.8;
    }

    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let distance = levenshtein(&a, &b);
    1.0 - distance as f64 / a.len().max(b.len()) as f64
}

/// Single-row dynamic-programming Levenshtein distance.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut row: Vec<usize> = (0..=b.len()).collect();

    for (i, &ca) in a.iter().enumerate() {
        let mut prev_diag = row[0];
        row[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let cost = if ca == cb { 0 } else { 1 };
            let next = (prev_diag + cost).min(row[j] + 1).min(row[j + 1] + 1);
            prev_diag = row[j + 1];
            row[j + 1] = next;
        }
    }

    row[b.len()]
}
