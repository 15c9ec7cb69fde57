//! Coordination-point records (sync/split/join/merge) over the task DAG,
//! and the pure merge strategies applied at convergence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// The four coordination-point kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoordinationKind {
    Sync {
        waiting: Vec<Uuid>,
        required_count: usize,
    },
    Split {
        source_task: Uuid,
        targets: Vec<Uuid>,
    },
    Join {
        sources: Vec<Uuid>,
        continuation_task: Uuid,
    },
    Merge {
        sources: Vec<Uuid>,
        continuation_task: Uuid,
        strategy: MergeStrategy,
    },
}

/// Merge policies over source result maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Dict union, last-writer-wins by source order.
    Combine,
    /// Keys present in every source.
    Intersection,
    /// Value chosen by majority count per key.
    Majority,
}

impl MergeStrategy {
    /// Pure function over a list of source result maps, unit-testable
    /// without touching the store.
    #[must_use]
    pub fn apply(self, sources: &[serde_json::Map<String, serde_json::Value>]) -> serde_json::Map<String, serde_json::Value> {
        match self {
            Self::Combine => {
                let mut out = serde_json::Map::new();
                for source in sources {
                    for (k, v) in source {
                        out.insert(k.clone(), v.clone());
                    }
                }
                out
            }
            Self::Intersection => {
                let mut out = serde_json::Map::new();
                if let Some(first) = sources.first() {
                    for key in first.keys() {
                        if sources.iter().all(|s| s.contains_key(key)) {
                            out.insert(key.clone(), first[key].clone());
                        }
                    }
                }
                out
            }
            Self::Majority => {
                let mut tallies: HashMap<String, HashMap<String, usize>> = HashMap::new();
                let mut representative: HashMap<String, HashMap<String, serde_json::Value>> =
                    HashMap::new();
                for source in sources {
                    for (k, v) in source {
                        let serialized = v.to_string();
                        *tallies
                            .entry(k.clone())
                            .or_default()
                            .entry(serialized.clone())
                            .or_insert(0) += 1;
                        representative
                            .entry(k.clone())
                            .or_default()
                            .insert(serialized, v.clone());
                    }
                }
                let mut out = serde_json::Map::new();
                for (key, counts) in tallies {
                    if let Some((winning_repr, _)) = counts.into_iter().max_by_key(|(_, c)| *c) {
                        if let Some(value) = representative.get(&key).and_then(|m| m.get(&winning_repr)) {
                            out.insert(key, value.clone());
                        }
                    }
                }
                out
            }
        }
    }
}

/// Persisted coordination-point record, kept for observability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinationPoint {
    pub id: Uuid,
    pub kind: CoordinationKind,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub timeout_seconds: Option<i64>,
}

impl CoordinationPoint {
    #[must_use]
    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        self.resolved_at.is_none()
            && self
                .timeout_seconds
                .is_some_and(|timeout| (now - self.created_at).num_seconds() > timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn combine_is_last_writer_wins() {
        let a = map(&[("x", json!(1))]);
        let b = map(&[("x", json!(2)), ("y", json!(3))]);
        let merged = MergeStrategy::Combine.apply(&[a, b]);
        assert_eq!(merged["x"], json!(2));
        assert_eq!(merged["y"], json!(3));
    }

    #[test]
    fn intersection_keeps_only_shared_keys() {
        let a = map(&[("x", json!(1)), ("y", json!(1))]);
        let b = map(&[("x", json!(2))]);
        let merged = MergeStrategy::Intersection.apply(&[a, b]);
        assert!(merged.contains_key("x"));
        assert!(!merged.contains_key("y"));
    }

    #[test]
    fn majority_picks_the_most_common_value() {
        let a = map(&[("x", json!(1))]);
        let b = map(&[("x", json!(1))]);
        let c = map(&[("x", json!(2))]);
        let merged = MergeStrategy::Majority.apply(&[a, b, c]);
        assert_eq!(merged["x"], json!(1));
    }
}
