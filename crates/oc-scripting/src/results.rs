//! Test and assertion result accumulation

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of one test or assertion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    /// Passed
    Pass,
    /// Failed
    Fail,
    /// Skipped
    Skip,
}

/// Anything carrying a [`ResultStatus`]
pub trait HasStatus {
    /// Result status
    fn status(&self) -> ResultStatus;
}

/// Result of one `test(description, callback)` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Unique id, assigned by the collector
    #[serde(default)]
    pub id: String,
    /// Outcome
    pub status: ResultStatus,
    /// Test description
    pub description: String,
    /// Expected value reported by a failed assertion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<serde_json::Value>,
    /// Actual value reported by a failed assertion
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<serde_json::Value>,
    /// Failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestResult {
    /// A passing result
    pub fn pass<S: Into<String>>(description: S) -> Self {
        Self {
            id: String::new(),
            status: ResultStatus::Pass,
            description: description.into(),
            expected: None,
            actual: None,
            error: None,
        }
    }

    /// A failing result
    pub fn fail<S: Into<String>, E: Into<String>>(description: S, error: E) -> Self {
        Self {
            status: ResultStatus::Fail,
            error: Some(error.into()),
            ..Self::pass(description)
        }
    }
}

impl HasStatus for TestResult {
    fn status(&self) -> ResultStatus {
        self.status
    }
}

/// Result of one declarative assertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResult {
    /// Unique id, assigned by the collector
    #[serde(default)]
    pub id: String,
    /// Outcome
    pub status: ResultStatus,
    /// Left-hand expression (e.g. `res.status`)
    pub lhs_expr: String,
    /// Right-hand expression as written (e.g. `eq 200`)
    pub rhs_expr: String,
    /// Operator name
    pub operator: String,
    /// Typed right-hand operand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rhs_operand: Option<serde_json::Value>,
    /// Failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HasStatus for AssertionResult {
    fn status(&self) -> ResultStatus {
        self.status
    }
}

/// Counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    /// Number of results
    pub total: usize,
    /// Passed results
    pub passed: usize,
    /// Failed results
    pub failed: usize,
    /// Everything else
    pub skipped: usize,
}

impl ResultSummary {
    /// Whether nothing failed
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

/// Summarize a result sequence
pub fn summarize<T: HasStatus>(results: &[T]) -> ResultSummary {
    results.iter().fold(
        ResultSummary {
            total: results.len(),
            ..Default::default()
        },
        |mut summary, result| {
            match result.status() {
                ResultStatus::Pass => summary.passed += 1,
                ResultStatus::Fail => summary.failed += 1,
                ResultStatus::Skip => summary.skipped += 1,
            }
            summary
        },
    )
}

/// Ordered, append-only test and assertion results for one run.
///
/// Clones share the same sequences.
#[derive(Debug, Clone, Default)]
pub struct TestResultCollector {
    tests: Arc<Mutex<Vec<TestResult>>>,
    assertions: Arc<Mutex<Vec<AssertionResult>>>,
}

fn fresh_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl TestResultCollector {
    /// Create an empty collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a test result under a fresh id
    pub fn add_result(&self, mut result: TestResult) -> String {
        result.id = fresh_id();
        let id = result.id.clone();
        self.tests.lock().push(result);
        id
    }

    /// Append an assertion result under a fresh id
    pub fn add_assertion_result(&self, mut result: AssertionResult) -> String {
        result.id = fresh_id();
        let id = result.id.clone();
        self.assertions.lock().push(result);
        id
    }

    /// Test results in execution order
    pub fn results(&self) -> Vec<TestResult> {
        self.tests.lock().clone()
    }

    /// Assertion results in evaluation order
    pub fn assertion_results(&self) -> Vec<AssertionResult> {
        self.assertions.lock().clone()
    }

    /// Summary of test results
    pub fn test_summary(&self) -> ResultSummary {
        summarize(self.tests.lock().as_slice())
    }

    /// Summary of assertion results
    pub fn assertion_summary(&self) -> ResultSummary {
        summarize(self.assertions.lock().as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_order_is_kept() {
        let collector = TestResultCollector::new();
        let a = collector.add_result(TestResult::pass("first"));
        let b = collector.add_result(TestResult::fail("second", "boom"));
        assert_ne!(a, b);

        let results = collector.results();
        assert_eq!(results[0].description, "first");
        assert_eq!(results[1].error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_summary_counts() {
        let collector = TestResultCollector::new();
        collector.add_result(TestResult::pass("a"));
        collector.add_result(TestResult::fail("b", "x"));
        collector.add_result(TestResult {
            status: ResultStatus::Skip,
            ..TestResult::pass("c")
        });

        assert_eq!(
            collector.test_summary(),
            ResultSummary {
                total: 3,
                passed: 1,
                failed: 1,
                skipped: 1
            }
        );
        assert_eq!(collector.assertion_summary(), ResultSummary::default());
    }

    #[test]
    fn test_assertions_are_tracked_separately() {
        let collector = TestResultCollector::new();
        collector.add_assertion_result(AssertionResult {
            id: String::new(),
            status: ResultStatus::Pass,
            lhs_expr: "res.status".into(),
            rhs_expr: "eq 200".into(),
            operator: "eq".into(),
            rhs_operand: Some(200.into()),
            error: None,
        });

        assert!(collector.results().is_empty());
        assert_eq!(collector.assertion_results().len(), 1);
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(TestResult::fail("t", "e")).unwrap();
        assert_eq!(json["status"], "fail");
        assert!(json.get("expected").is_none());
    }
}
