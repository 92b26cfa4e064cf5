//! Run statistics
//!
//! Counts are kept twice: once for the run as a whole and once per test name.
//! Both views are updated together so their totals always agree.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Outcome kinds recorded during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Failure,
    BadNews,
    AuditFailure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure => "failure",
            Outcome::BadNews => "bad-news",
            Outcome::AuditFailure => "audit-failure",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub success: u64,
    pub failure: u64,
    pub bad_news: u64,
    pub audit_failure: u64,
}

impl OutcomeCounts {
    pub fn get(&self, outcome: Outcome) -> u64 {
        match outcome {
            Outcome::Success => self.success,
            Outcome::Failure => self.failure,
            Outcome::BadNews => self.bad_news,
            Outcome::AuditFailure => self.audit_failure,
        }
    }

    fn bump(&mut self, outcome: Outcome) {
        let slot = match outcome {
            Outcome::Success => &mut self.success,
            Outcome::Failure => &mut self.failure,
            Outcome::BadNews => &mut self.bad_news,
            Outcome::AuditFailure => &mut self.audit_failure,
        };
        *slot += 1;
    }

    /// Number of test invocations recorded
    pub fn invocations(&self) -> u64 {
        self.success + self.failure
    }
}

/// Statistics for one run, returned when the run ends
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub seed: u64,
    pub iterations_completed: u64,
    pub aggregate: OutcomeCounts,
    pub per_test: BTreeMap<String, OutcomeCounts>,
}

impl RunStatistics {
    /// Fresh statistics with a zeroed row for every named test
    pub fn new<I, S>(seed: u64, tests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            seed,
            iterations_completed: 0,
            aggregate: OutcomeCounts::default(),
            per_test: tests
                .into_iter()
                .map(|name| (name.into(), OutcomeCounts::default()))
                .collect(),
        }
    }

    /// Record an outcome not attributable to any test
    pub fn record_aggregate(&mut self, outcome: Outcome) {
        self.aggregate.bump(outcome);
    }

    /// Record an outcome against both the aggregate and the named test
    pub fn record(&mut self, test: &str, outcome: Outcome) {
        self.aggregate.bump(outcome);
        self.per_test.entry(test.to_string()).or_default().bump(outcome);
    }

    pub fn test(&self, name: &str) -> Option<&OutcomeCounts> {
        self.per_test.get(name)
    }

    /// Sum of per-test success and failure counts
    pub fn per_test_invocations(&self) -> u64 {
        self.per_test.values().map(OutcomeCounts::invocations).sum()
    }
}

impl fmt::Display for RunStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Seed: {}", self.seed)?;
        writeln!(f, "Iterations completed: {}", self.iterations_completed)?;
        writeln!(
            f,
            "{:<20} {:>8} {:>8} {:>8} {:>8}",
            "Test", "success", "failure", "bad-news", "audit"
        )?;
        for (name, counts) in &self.per_test {
            writeln!(
                f,
                "{:<20} {:>8} {:>8} {:>8} {:>8}",
                name, counts.success, counts.failure, counts.bad_news, counts.audit_failure
            )?;
        }
        write!(
            f,
            "{:<20} {:>8} {:>8} {:>8} {:>8}",
            "TOTAL",
            self.aggregate.success,
            self.aggregate.failure,
            self.aggregate.bad_news,
            self.aggregate.audit_failure
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_updates_both_views() {
        let mut stats = RunStatistics::new(9, ["Start", "Stop"]);
        stats.record("Start", Outcome::Success);
        stats.record("Stop", Outcome::Failure);
        stats.record("Stop", Outcome::AuditFailure);
        stats.record_aggregate(Outcome::AuditFailure);

        assert_eq!(stats.aggregate.invocations(), 2);
        assert_eq!(stats.per_test_invocations(), 2);
        assert_eq!(stats.aggregate.audit_failure, 2);
        assert_eq!(stats.test("Stop").unwrap().audit_failure, 1);
        assert_eq!(stats.test("Start").unwrap().get(Outcome::Success), 1);
    }

    #[test]
    fn test_prepopulated_rows_and_display() {
        let stats = RunStatistics::new(1, ["Flip"]);
        assert_eq!(stats.test("Flip"), Some(&OutcomeCounts::default()));
        let text = stats.to_string();
        assert!(text.contains("Seed: 1"));
        assert!(text.contains("Flip"));
        assert!(text.contains("TOTAL"));
    }

    #[test]
    fn test_json_shape() {
        let mut stats = RunStatistics::new(3, ["Reread"]);
        stats.record("Reread", Outcome::BadNews);
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["seed"], 3);
        assert_eq!(json["aggregate"]["bad_news"], 1);
        assert_eq!(json["per_test"]["Reread"]["bad_news"], 1);
    }
}
