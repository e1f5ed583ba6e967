use serde::Deserialize;
use serde::Serialize;

use crate::testcase::Section;

/// The first check that failed for a test, with enough context to tell the
/// student (or a grader debugging the harness) what went wrong.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReason {
    /// Index of the offending command within the test case, or -1 when the
    /// failure is not attributable to a single command.
    pub step_index: i64,
    /// Label of the offending command.
    pub command: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl FailureReason {
    pub fn new(step_index: i64, command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            step_index,
            command: command.into(),
            reason: reason.into(),
            expected: None,
            actual: None,
        }
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self
    }

    pub fn with_actual(mut self, actual: impl Into<String>) -> Self {
        self.actual = Some(actual.into());
        self
    }
}

/// Pass/fail verdict for a single test. Tests carry no partial credit, so
/// `score` is always 0.0 or 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeReport {
    pub test_id: String,
    pub section: Section,
    pub description: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
    pub score: f64,
}

impl GradeReport {
    pub fn passed(test_id: impl Into<String>, section: Section, description: impl Into<String>) -> Self {
        Self {
            test_id: test_id.into(),
            section,
            description: description.into(),
            passed: true,
            failure: None,
            score: 1.0,
        }
    }

    pub fn failed(
        test_id: impl Into<String>,
        section: Section,
        description: impl Into<String>,
        failure: FailureReason,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            section,
            description: description.into(),
            passed: false,
            failure: Some(failure),
            score: 0.0,
        }
    }
}

/// Aggregate of all grade reports for one student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeSummary {
    pub results: Vec<GradeReport>,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
}

impl GradeSummary {
    pub fn from_results(results: Vec<GradeReport>) -> Self {
        let total_tests = results.len();
        let passed_tests = results.iter().filter(|r| r.passed).count();
        Self {
            total_tests,
            passed_tests,
            failed_tests: total_tests - passed_tests,
            results,
        }
    }
}
