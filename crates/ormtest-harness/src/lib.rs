//! Cross-provider test matrix harness for ORM client suites.
//!
//! - [`matrix`] expands a typed axis matrix (provider, referential integrity
//!   mode, referential actions) into one suite configuration per combination,
//!   minus justified opt-outs.
//! - [`expectation`] resolves the expected outcome of an assertion for the
//!   current provider and integrity mode, failing fast on missing cases.
//! - [`suite`] and [`runner`] register and execute the expanded suites.

pub mod assertion;
pub mod expectation;
pub mod log;
pub mod matrix;
pub mod provider;
pub mod runner;
pub mod schema;
pub mod suite;

pub use assertion::{TestFailure, TestResult, expect_eq, expect_error_containing};
pub use expectation::{
    ConditionalError, ExpectationContext, ExpectationError, ExpectationTable, ModeEntry,
    ProviderTable,
};
pub use matrix::{
    AxisKind, AxisValue, MatrixAxis, MatrixDefinition, MatrixOptions, OptOutRule, SuiteConfig,
    SuiteMeta,
};
pub use ormtest_error::{HarnessError, Result};
pub use provider::{
    PreviewFeature, Provider, ReferentialAction, ReferentialActions, ReferentialIntegrity,
};
pub use runner::{MatrixRunSummary, RunOptions, run_matrix};
pub use schema::{RelationSchema, SchemaParams, SchemaTemplate};
pub use suite::{SuiteBuilder, SuiteContext, SuiteMatrix, setup_test_suite};
