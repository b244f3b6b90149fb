//! Cohort detection: devices that made the same last six moves at the
//! same minutes are travelling together, which phones carried by
//! different people do not do.
//!
//! Phase 1 counts last-6 signatures per partition and merges the partial
//! counts. Phase 2 turns every signature at or above the threshold into
//! a noted cohort.

use crate::{error::SimResult, service::SimboxService, types::Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohortReport {
    /// Size of the biggest qualifying signature group, 0 if none.
    pub largest: i64,
    pub signatures: Vec<String>,
    pub members_noted: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct CohortDetector {
    threshold: i64,
    partitions: u32,
}

impl CohortDetector {
    pub fn new(threshold: i64, partitions: u32) -> Self {
        Self {
            threshold,
            partitions: partitions.max(1),
        }
    }

    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    /// Sum per-partition counts.
    pub fn merge(partials: Vec<HashMap<String, i64>>) -> HashMap<String, i64> {
        let mut merged: HashMap<String, i64> = HashMap::new();
        for partial in partials {
            for (signature, count) in partial {
                *merged.entry(signature).or_insert(0) += count;
            }
        }
        merged
    }

    /// Signatures at or above the threshold, in lexicographic order.
    pub fn qualifying(&self, merged: &HashMap<String, i64>) -> Vec<(String, i64)> {
        let mut hits: Vec<(String, i64)> = merged
            .iter()
            .filter(|(_, &count)| count >= self.threshold)
            .map(|(signature, &count)| (signature.clone(), count))
            .collect();
        hits.sort();
        hits
    }

    pub fn detect(&self, service: &SimboxService, now: Timestamp) -> SimResult<CohortReport> {
        let partials = (0..self.partitions)
            .map(|p| service.partition_signature_counts(p, self.partitions))
            .collect::<SimResult<Vec<_>>>()?;
        let merged = Self::merge(partials);
        let hits = self.qualifying(&merged);

        let largest = hits.iter().map(|(_, count)| *count).max().unwrap_or(0);
        let signatures: Vec<String> = hits.into_iter().map(|(signature, _)| signature).collect();
        let members_noted = if signatures.is_empty() {
            0
        } else {
            service.note_suspicious_cohort(&signatures, now)?
        };

        log::debug!(
            "t={now} cohort: {} signatures seen, {} qualify, largest={largest}, new members={members_noted}",
            merged.len(),
            signatures.len()
        );
        Ok(CohortReport {
            largest,
            signatures,
            members_noted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(pairs: &[(&str, i64)]) -> HashMap<String, i64> {
        pairs.iter().map(|(s, c)| (s.to_string(), *c)).collect()
    }

    #[test]
    fn merge_sums_across_partitions() {
        let merged = CohortDetector::merge(vec![
            partial(&[("a", 30), ("b", 1)]),
            partial(&[("a", 30)]),
            partial(&[("c", 59)]),
        ]);
        assert_eq!(merged["a"], 60);
        assert_eq!(merged["b"], 1);
        assert_eq!(merged["c"], 59);
    }

    #[test]
    fn threshold_is_inclusive() {
        let detector = CohortDetector::new(60, 8);
        let merged = partial(&[("z", 60), ("a", 61), ("m", 59)]);
        let hits = detector.qualifying(&merged);
        assert_eq!(hits, vec![("a".to_string(), 61), ("z".to_string(), 60)]);
    }
}
