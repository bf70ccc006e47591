//! Cross-Turn Correlator: pairwise relation scoring used only to reorder
//! prioritized items into contiguous correlated clusters. It never
//! introduces new context items or influences the token budget; it is
//! pinned to "reorder only".

use std::path::Path;

use rustc_hash::FxHashSet;

const TEMPORAL_WINDOW: u64 = 5;
const ERROR_CONTINUATION_TURN_GAP: u64 = 2;

/// Anything the correlator can relate: a path, a turn number, some text,
/// and whether it reads as an error.
#[derive(Debug, Clone)]
pub struct CorrelationItem {
    pub id: usize,
    pub path: Option<String>,
    pub turn: u64,
    pub text: String,
    pub is_error: bool,
    pub tool_name: Option<String>,
}

fn extension_of(path: &str) -> Option<&str> {
    Path::new(path).extension().and_then(|e| e.to_str())
}

fn file_identity_score(a: &CorrelationItem, b: &CorrelationItem) -> f64 {
    match (&a.path, &b.path) {
        (Some(pa), Some(pb)) if pa == pb => 1.0,
        (Some(pa), Some(pb)) => match (extension_of(pa), extension_of(pb)) {
            (Some(ea), Some(eb)) if ea == eb => 0.5,
            _ => 0.0,
        },
        _ => 0.0,
    }
}

fn temporal_proximity_score(a: &CorrelationItem, b: &CorrelationItem) -> f64 {
    let delta = (a.turn as i64 - b.turn as i64).unsigned_abs();
    (1.0 - (delta as f64 / TEMPORAL_WINDOW as f64)).max(0.0)
}

const AFFINITY_PAIRS: &[(&str, &str)] = &[("read", "edit"), ("search", "read"), ("error", "fix")];

fn tool_sequence_affinity_score(a: &CorrelationItem, b: &CorrelationItem) -> f64 {
    let (Some(ta), Some(tb)) = (&a.tool_name, &b.tool_name) else {
        return 0.0;
    };
    let ta = ta.to_ascii_lowercase();
    let tb = tb.to_ascii_lowercase();
    let ordered = if a.turn <= b.turn { (ta.as_str(), tb.as_str()) } else { (tb.as_str(), ta.as_str()) };
    for (first, second) in AFFINITY_PAIRS {
        if ordered.0.contains(first) && ordered.1.contains(second) {
            return 0.8;
        }
    }
    0.0
}

fn tokenize(text: &str) -> FxHashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2)
        .map(|w| w.to_ascii_lowercase())
        .collect()
}

fn jaccard(a: &FxHashSet<String>, b: &FxHashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

fn error_continuation_score(a: &CorrelationItem, b: &CorrelationItem) -> f64 {
    let (error_item, other) = if a.is_error && !b.is_error {
        (a, b)
    } else if b.is_error && !a.is_error {
        (b, a)
    } else {
        return 0.0;
    };
    let gap = other.turn.saturating_sub(error_item.turn);
    let same_path = matches!((&error_item.path, &other.path), (Some(p1), Some(p2)) if p1 == p2);
    if other.turn >= error_item.turn && gap <= ERROR_CONTINUATION_TURN_GAP && same_path {
        0.8
    } else {
        0.0
    }
}

/// Combined correlation score in `[0, 1]` for a pair of items.
pub fn correlate(a: &CorrelationItem, b: &CorrelationItem) -> f64 {
    let file_identity = file_identity_score(a, b);
    let temporal = temporal_proximity_score(a, b);
    let tool_affinity = tool_sequence_affinity_score(a, b);
    let overlap = jaccard(&tokenize(&a.text), &tokenize(&b.text));
    let error_continuation = error_continuation_score(a, b);

    // These sub-scores are combined by taking the strongest signal rather
    // than averaging: any one of "same file", "tool affinity", or "error
    // continuation" being strongly true is enough to treat two items as
    // related, even if the others are weak.
    [file_identity, temporal, tool_affinity, overlap, error_continuation]
        .into_iter()
        .fold(0.0_f64, f64::max)
}

/// Reorder `items` (by index into the original slice) so that items whose
/// pairwise correlation with the currently-placed item is highest come
/// next, without adding or removing anything. A simple greedy nearest-
/// neighbor chain keeps this cheap for the small candidate lists the
/// context manager deals with per assembly.
pub fn reorder_by_correlation(items: &[CorrelationItem]) -> Vec<usize> {
    if items.len() <= 1 {
        return (0..items.len()).collect();
    }

    let mut remaining: Vec<usize> = (0..items.len()).collect();
    let mut ordered = vec![remaining.remove(0)];

    while !remaining.is_empty() {
        let last = *ordered.last().unwrap();
        let (best_pos, _) = remaining
            .iter()
            .enumerate()
            .map(|(pos, &idx)| (pos, correlate(&items[last], &items[idx])))
            .fold((0, f64::MIN), |acc, cur| if cur.1 > acc.1 { cur } else { acc });
        ordered.push(remaining.remove(best_pos));
    }
    ordered
}
