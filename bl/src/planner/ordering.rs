//! Deterministic gap ordering

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;

use super::Ranking;
use crate::domain::Gap;

static MILESTONE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^M(\d+)").expect("valid milestone regex"));

/// Leading `M<integer>` milestone marker on a feature ID
///
/// Markers too large for a u64 saturate, so they still sort after smaller
/// milestones and before unmarked IDs.
pub fn milestone(feature_id: &str) -> Option<u64> {
    let digits = MILESTONE_RE.captures(feature_id)?.get(1)?.as_str();
    Some(digits.parse().unwrap_or(u64::MAX))
}

/// Sort gaps in place: milestone, then oracle rank, then feature ID
///
/// Marked or ranked items always precede unmarked or unranked ones. The sort
/// is stable, so exact duplicates keep their input order.
pub fn order_gaps(gaps: &mut [Gap], ranking: &Ranking) {
    gaps.sort_by(|a, b| {
        present_first(milestone(&a.feature_id), milestone(&b.feature_id))
            .then_with(|| present_first(ranking.get(&a.feature_id), ranking.get(&b.feature_id)))
            .then_with(|| a.feature_id.cmp(&b.feature_id))
    });
}

fn present_first<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
