//! Test-body failure type and assertion helpers.
//!
//! Error assertions compare by substring containment: the resolved expected
//! message must appear somewhere in the actual error text.

use std::fmt::{Debug, Display};

use thiserror::Error;

use crate::expectation::ExpectationError;

/// Why a registered test did not pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TestFailure {
    #[error("assertion failed: {detail}\n  expected: {expected}\n    actual: {actual}")]
    AssertionMismatch {
        expected: String,
        actual: String,
        detail: String,
    },

    /// Expectation table lacks the provider under test.
    #[error("coverage gap: {0}")]
    CoverageGap(ExpectationError),

    /// Expectation table is malformed for this suite; aborts the run.
    #[error("authoring error: {0}")]
    Authoring(ExpectationError),

    #[error("test panicked: {0}")]
    Panicked(String),

    /// A `before_all`/`before_each` hook failed.
    #[error("setup failed: {0}")]
    Setup(String),

    #[error("{0}")]
    Message(String),
}

impl TestFailure {
    #[must_use]
    pub const fn is_authoring(&self) -> bool {
        matches!(self, Self::Authoring(_))
    }

    /// Short tag used in summaries and event logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AssertionMismatch { .. } => "assertion_mismatch",
            Self::CoverageGap(_) => "coverage_gap",
            Self::Authoring(_) => "authoring",
            Self::Panicked(_) => "panicked",
            Self::Setup(_) => "setup",
            Self::Message(_) => "message",
        }
    }
}

impl From<ExpectationError> for TestFailure {
    fn from(err: ExpectationError) -> Self {
        if err.is_authoring() {
            Self::Authoring(err)
        } else {
            Self::CoverageGap(err)
        }
    }
}

pub type TestResult = Result<(), TestFailure>;

/// Assert `result` failed with an error whose text contains `expected`.
pub fn expect_error_containing<T: Debug, E: Display>(
    result: Result<T, E>,
    expected: &str,
) -> TestResult {
    match result {
        Ok(value) => Err(TestFailure::AssertionMismatch {
            expected: format!("error containing {expected:?}"),
            actual: format!("Ok({value:?})"),
            detail: "operation succeeded but an error was expected".to_owned(),
        }),
        Err(err) => {
            let actual = err.to_string();
            if actual.contains(expected) {
                Ok(())
            } else {
                Err(TestFailure::AssertionMismatch {
                    expected: expected.to_owned(),
                    actual,
                    detail: "error message does not contain the expected text".to_owned(),
                })
            }
        }
    }
}

pub fn expect_eq<T: PartialEq + Debug>(actual: &T, expected: &T, detail: &str) -> TestResult {
    if actual == expected {
        Ok(())
    } else {
        Err(TestFailure::AssertionMismatch {
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
            detail: detail.to_owned(),
        })
    }
}

pub fn expect_true(condition: bool, detail: &str) -> TestResult {
    if condition {
        Ok(())
    } else {
        Err(TestFailure::Message(detail.to_owned()))
    }
}

#[must_use]
pub fn fail(message: impl Into<String>) -> TestFailure {
    TestFailure::Message(message.into())
}
