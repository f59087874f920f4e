//! Self-consistency voting over executed SQL candidates.
//!
//! Candidates are grouped by the canonical key of their execution result,
//! never by their text. Failed executions consume a bounded retry budget;
//! once it is spent, failing candidates are accepted ungrouped so sampling
//! always makes progress.

use std::collections::BTreeMap;

use rand::Rng;
use rand::seq::SliceRandom;

use crate::core::types::{ExecutionResult, ResultKey};

/// How a candidate was handled by [`ConsistencyTally::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Executed successfully and joined a result group.
    Grouped,
    /// Failed while retry budget remained; discarded.
    Rejected,
    /// Failed after the retry budget ran out; kept without a group.
    Forced,
    /// The sample target was already reached; ignored.
    Full,
}

/// Winning candidate of a sampling pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub sql: String,
    pub consistency_score: f64,
    pub is_valid: bool,
}

/// Running state of one self-consistency pass.
#[derive(Debug, Clone)]
pub struct ConsistencyTally {
    sample_target: usize,
    max_invalid_tries: u32,
    collected: Vec<String>,
    groups: BTreeMap<ResultKey, Vec<String>>,
    invalid_tries: u32,
}

impl ConsistencyTally {
    pub fn new(sample_target: usize, max_invalid_tries: u32) -> Self {
        Self {
            sample_target,
            max_invalid_tries,
            collected: Vec::new(),
            groups: BTreeMap::new(),
            invalid_tries: 0,
        }
    }

    /// Number of candidates still needed to reach the sample target.
    pub fn remaining(&self) -> usize {
        self.sample_target.saturating_sub(self.collected.len())
    }

    pub fn record(&mut self, sql: String, result: &ExecutionResult) -> Admission {
        if self.remaining() == 0 {
            return Admission::Full;
        }
        match result.result_key() {
            Some(key) => {
                self.collected.push(sql.clone());
                self.groups.entry(key).or_default().push(sql);
                Admission::Grouped
            }
            None if self.invalid_tries < self.max_invalid_tries => {
                self.invalid_tries += 1;
                Admission::Rejected
            }
            None => {
                self.collected.push(sql);
                Admission::Forced
            }
        }
    }

    /// True once the target is reached, or the retry budget is spent and
    /// at least one candidate was kept.
    pub fn is_done(&self) -> bool {
        self.remaining() == 0
            || (self.invalid_tries >= self.max_invalid_tries && !self.collected.is_empty())
    }

    pub fn invalid_tries(&self) -> u32 {
        self.invalid_tries
    }

    pub fn collected(&self) -> &[String] {
        &self.collected
    }

    pub fn group_sizes(&self) -> Vec<usize> {
        self.groups.values().map(Vec::len).collect()
    }

    /// Pick the winner: the largest result group (ties broken uniformly at
    /// random), else a random ungrouped candidate with score 0.
    ///
    /// Returns `None` when nothing was collected.
    pub fn decide<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Verdict> {
        if let Some(largest) = self.groups.values().map(Vec::len).max() {
            let total: usize = self.groups.values().map(Vec::len).sum();
            let tied: Vec<&Vec<String>> = self
                .groups
                .values()
                .filter(|members| members.len() == largest)
                .collect();
            let winner = tied.choose(rng)?;
            return Some(Verdict {
                sql: winner.first()?.clone(),
                consistency_score: largest as f64 / total as f64,
                is_valid: true,
            });
        }
        let sql = self.collected.choose(rng)?;
        Some(Verdict {
            sql: sql.clone(),
            consistency_score: 0.0,
            is_valid: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SqlValue;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn rows(values: &[i64]) -> ExecutionResult {
        ExecutionResult::Rows {
            rows: values.iter().map(|v| vec![SqlValue::Integer(*v)]).collect(),
        }
    }

    fn failed() -> ExecutionResult {
        ExecutionResult::Failed {
            reason: "no such column".to_string(),
        }
    }

    #[test]
    fn equal_row_sets_share_a_group_regardless_of_order() {
        let mut tally = ConsistencyTally::new(5, 15);
        tally.record("a".to_string(), &rows(&[1, 2]));
        tally.record("b".to_string(), &rows(&[2, 1]));
        tally.record("c".to_string(), &rows(&[3]));
        assert_eq!(tally.group_sizes(), vec![2, 1]);

        let verdict = tally.decide(&mut StdRng::seed_from_u64(1)).expect("verdict");
        assert_eq!(verdict.sql, "a");
        assert!((verdict.consistency_score - 2.0 / 3.0).abs() < 1e-9);
        assert!(verdict.is_valid);
    }

    #[test]
    fn disjoint_singletons_score_one_fifth() {
        let mut tally = ConsistencyTally::new(5, 15);
        for i in 0..5 {
            tally.record(format!("q{i}"), &rows(&[i]));
        }
        assert!(tally.is_done());

        let mut winners = std::collections::HashSet::new();
        for seed in 0..64 {
            let verdict = tally
                .decide(&mut StdRng::seed_from_u64(seed))
                .expect("verdict");
            assert!((verdict.consistency_score - 0.2).abs() < 1e-9);
            winners.insert(verdict.sql);
        }
        // Ties are broken at random, so more than one winner shows up.
        assert!(winners.len() > 1);
    }

    #[test]
    fn failures_spend_budget_then_are_forced() {
        let mut tally = ConsistencyTally::new(5, 2);
        assert_eq!(tally.record("bad1".to_string(), &failed()), Admission::Rejected);
        assert_eq!(tally.record("bad2".to_string(), &failed()), Admission::Rejected);
        assert!(!tally.is_done());
        assert_eq!(
            tally.record("bad3".to_string(), &ExecutionResult::TimedOut),
            Admission::Forced
        );
        assert!(tally.is_done());
        assert_eq!(tally.invalid_tries(), 2);

        let verdict = tally.decide(&mut StdRng::seed_from_u64(3)).expect("verdict");
        assert_eq!(verdict.sql, "bad3");
        assert_eq!(verdict.consistency_score, 0.0);
        assert!(!verdict.is_valid);
    }

    #[test]
    fn forced_candidates_do_not_dilute_the_score() {
        let mut tally = ConsistencyTally::new(5, 1);
        tally.record("good".to_string(), &rows(&[1]));
        tally.record("bad".to_string(), &failed());
        tally.record("forced".to_string(), &failed());
        let verdict = tally.decide(&mut StdRng::seed_from_u64(0)).expect("verdict");
        assert_eq!(verdict.sql, "good");
        assert_eq!(verdict.consistency_score, 1.0);
    }

    #[test]
    fn full_tally_ignores_extra_candidates() {
        let mut tally = ConsistencyTally::new(1, 15);
        assert_eq!(tally.record("a".to_string(), &rows(&[1])), Admission::Grouped);
        assert_eq!(tally.record("b".to_string(), &rows(&[2])), Admission::Full);
        assert_eq!(tally.collected(), &["a".to_string()]);
    }

    #[test]
    fn empty_tally_has_no_verdict() {
        let tally = ConsistencyTally::new(5, 15);
        assert!(tally.decide(&mut StdRng::seed_from_u64(0)).is_none());
        assert!(!tally.is_done());
    }
}
