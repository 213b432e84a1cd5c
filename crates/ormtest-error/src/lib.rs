use std::path::PathBuf;

use thiserror::Error;

/// Primary error type for the test matrix harness.
///
/// Authoring errors mean the suite definition is wrong and must not run.
/// Coverage gaps mean an expectation table lacks the provider under test.
/// The remaining variants cover suite construction failures and plumbing.
#[derive(Error, Debug)]
pub enum HarnessError {
    // === Authoring Errors ===
    /// Structural defect in a matrix definition (missing or duplicate axes,
    /// empty axes, mistyped values).
    #[error("invalid matrix for suite '{suite}': {detail}")]
    InvalidMatrix { suite: String, detail: String },

    /// An opt-out rule was declared without a justification.
    #[error("opt-out rule for suite '{suite}' has an empty reason (from: {from})")]
    OptOutWithoutReason { suite: String, from: String },

    /// Axis values neither exercised by the matrix nor opted out.
    #[error(
        "suite '{suite}' does not cover {axis} values [{missing}]; add them to the axis or opt out with a reason"
    )]
    IncompleteCoverage {
        suite: String,
        axis: String,
        missing: String,
    },

    /// An expectation table has no entry for the current integrity mode.
    #[error("expectation table '{table}' has no entry for mode '{mode}' (provider: {provider})")]
    MissingExpectationMode {
        table: String,
        mode: String,
        provider: String,
    },

    /// A resolver was asked for a table level it has no discriminator for.
    #[error("expectation table '{table}' needs a {discriminator} but the resolver has none bound")]
    UnboundContext {
        table: String,
        discriminator: String,
    },

    // === Coverage Gaps ===
    /// An expectation table has the mode but not the current provider.
    #[error(
        "expectation table '{table}' is missing a case for provider '{provider}' (mode: {mode})"
    )]
    MissingExpectationCase {
        table: String,
        mode: String,
        provider: String,
    },

    // === Suite Construction Errors ===
    /// The suite builder callback failed for a reason other than authoring,
    /// such as an unavailable fixture.
    #[error("suite '{suite}' failed to build for {config}: {detail}")]
    SuiteBuild {
        suite: String,
        config: String,
        detail: String,
    },

    // === Config Errors ===
    /// Matrix definition file could not be parsed.
    #[error("failed to parse matrix definition: {detail}")]
    ConfigParse { detail: String },

    /// Unknown axis value in a configuration source.
    #[error("unknown {kind} value: '{value}'")]
    UnknownValue { kind: String, value: String },

    /// Matrix definition file not found.
    #[error("matrix definition not found: '{path}'")]
    ConfigNotFound { path: PathBuf },

    // === I/O Errors ===
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or parse failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    // === Internal Errors ===
    /// Internal logic error (should never happen).
    #[error("internal error: {0}")]
    Internal(String),
}

impl HarnessError {
    /// Whether this error is a defect in the suite definition itself.
    ///
    /// Authoring errors halt suite construction instead of surfacing as a
    /// failed assertion.
    pub const fn is_authoring_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidMatrix { .. }
                | Self::OptOutWithoutReason { .. }
                | Self::IncompleteCoverage { .. }
                | Self::MissingExpectationMode { .. }
                | Self::UnboundContext { .. }
        )
    }

    /// Whether this error marks a provider missing from an expectation table.
    pub const fn is_coverage_gap(&self) -> bool {
        matches!(self, Self::MissingExpectationCase { .. })
    }

    /// Human-friendly suggestion for fixing this error.
    pub const fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::OptOutWithoutReason { .. } => {
                Some("Explain in the opt-out reason why these values are not tested")
            }
            Self::IncompleteCoverage { .. } => {
                Some("Declare the missing values on the axis or add an opt-out rule")
            }
            Self::MissingExpectationMode { .. } => {
                Some("Add an entry for this referential integrity mode to the table")
            }
            Self::MissingExpectationCase { .. } => {
                Some("Add the provider's expected message to the table or set a default")
            }
            Self::ConfigNotFound { .. } => Some("Check the --matrix path"),
            _ => None,
        }
    }

    /// Get the process exit code for this error (for CLI use).
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidMatrix { .. }
            | Self::OptOutWithoutReason { .. }
            | Self::IncompleteCoverage { .. }
            | Self::MissingExpectationMode { .. }
            | Self::UnboundContext { .. } => 2,
            Self::MissingExpectationCase { .. } => 3,
            Self::ConfigParse { .. } | Self::UnknownValue { .. } | Self::ConfigNotFound { .. } => 4,
            Self::SuiteBuild { .. } => 5,
            Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => 1,
        }
    }

    /// Create an invalid-matrix error.
    pub fn invalid_matrix(suite: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidMatrix {
            suite: suite.into(),
            detail: detail.into(),
        }
    }

    /// Create a config parse error.
    pub fn config_parse(detail: impl Into<String>) -> Self {
        Self::ConfigParse {
            detail: detail.into(),
        }
    }

    /// Create an unknown-value error.
    pub fn unknown_value(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self::UnknownValue {
            kind: kind.into(),
            value: value.into(),
        }
    }

    /// Create a serialization error.
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type alias using `HarnessError`.
pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_incomplete_coverage() {
        let err = HarnessError::IncompleteCoverage {
            suite: "referential-integrity".to_owned(),
            axis: "provider".to_owned(),
            missing: "sqlserver, mongodb".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "suite 'referential-integrity' does not cover provider values [sqlserver, mongodb]; add them to the axis or opt out with a reason"
        );
    }

    #[test]
    fn error_display_missing_case() {
        let err = HarnessError::MissingExpectationCase {
            table: "create child without parent".to_owned(),
            mode: "foreignKeys".to_owned(),
            provider: "cockroachdb".to_owned(),
        };
        assert_eq!(
            err.to_string(),
            "expectation table 'create child without parent' is missing a case for provider 'cockroachdb' (mode: foreignKeys)"
        );
    }

    #[test]
    fn authoring_classification() {
        assert!(HarnessError::invalid_matrix("s", "no provider axis").is_authoring_error());
        assert!(
            HarnessError::MissingExpectationMode {
                table: "t".to_owned(),
                mode: "prisma".to_owned(),
                provider: "mysql".to_owned(),
            }
            .is_authoring_error()
        );
        let gap = HarnessError::MissingExpectationCase {
            table: "t".to_owned(),
            mode: "prisma".to_owned(),
            provider: "mysql".to_owned(),
        };
        assert!(!gap.is_authoring_error());
        assert!(gap.is_coverage_gap());
        assert!(!HarnessError::internal("bug").is_authoring_error());
    }

    #[test]
    fn exit_codes_distinguish_error_groups() {
        assert_eq!(HarnessError::invalid_matrix("s", "x").exit_code(), 2);
        assert_eq!(HarnessError::config_parse("bad toml").exit_code(), 4);
        assert_eq!(HarnessError::internal("bug").exit_code(), 1);
        let build = HarnessError::SuiteBuild {
            suite: "1:1".to_owned(),
            config: "sqlite/foreignKeys".to_owned(),
            detail: "fixture unavailable".to_owned(),
        };
        assert!(!build.is_authoring_error());
        assert!(!build.is_coverage_gap());
        assert_eq!(build.exit_code(), 5);
    }

    #[test]
    fn suggestions() {
        let err = HarnessError::OptOutWithoutReason {
            suite: "s".to_owned(),
            from: "mongodb".to_owned(),
        };
        assert!(err.suggestion().is_some());
        assert!(HarnessError::internal("bug").suggestion().is_none());
    }

    #[test]
    fn io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: HarnessError = io.into();
        assert!(matches!(err, HarnessError::Io(_)));
        assert_eq!(err.exit_code(), 1);
    }
}
