//! Sequential executor for registered suite matrices.
//!
//! Each suite runs its `before_all` hooks, then every test with the
//! `before_each` hooks that apply to it, then its `after_all` hooks.
//! `after_all` runs once whenever `before_all` was attempted, including after
//! a failed hook or a panicking test. A [`TestFailure::Authoring`] aborts the
//! whole run after the current suite's teardown.

use std::any::Any;
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;

use ormtest_error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::assertion::{TestFailure, TestResult};
use crate::log::{LifecycleEventKind, RunBundle, RunStatus, init_run_bundle, payload};
use crate::matrix::SuiteConfig;
use crate::provider::{AxisDomain, Provider};
use crate::suite::{RegisteredSuite, SuiteContext, SuiteMatrix, TestCase};

pub const SUMMARY_SCHEMA_VERSION: u32 = 1;

/// Comma-separated provider names; suites on other providers are skipped.
pub const ENV_PROVIDERS: &str = "ORMTEST_PROVIDERS";
/// Directory receiving the run bundle.
pub const ENV_BUNDLE_DIR: &str = "ORMTEST_BUNDLE_DIR";
/// Stop running further suites after the first failing one.
pub const ENV_FAIL_FAST: &str = "ORMTEST_FAIL_FAST";

const SKIP_PROVIDER_FILTERED: &str = "provider_filtered";
const SKIP_FAIL_FAST: &str = "fail_fast";
const SKIP_ABORTED: &str = "run_aborted_by_authoring_error";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// `None` runs every provider.
    pub provider_filter: Option<BTreeSet<Provider>>,
    pub bundle_dir: Option<PathBuf>,
    pub fail_fast: bool,
}

impl RunOptions {
    /// Options from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Options from an arbitrary variable lookup.
    pub fn from_env_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider_filter = match lookup(ENV_PROVIDERS) {
            Some(raw) => {
                let providers = raw
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(Provider::parse_name)
                    .collect::<Result<BTreeSet<_>>>()?;
                (!providers.is_empty()).then_some(providers)
            }
            None => None,
        };

        let bundle_dir = lookup(ENV_BUNDLE_DIR)
            .map(|raw| raw.trim().to_owned())
            .filter(|raw| !raw.is_empty())
            .map(PathBuf::from);

        let fail_fast = match lookup(ENV_FAIL_FAST) {
            None => false,
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "" | "0" | "false" | "no" | "off" => false,
                "1" | "true" | "yes" | "on" => true,
                _ => return Err(HarnessError::unknown_value(ENV_FAIL_FAST, raw)),
            },
        };

        Ok(Self {
            provider_filter,
            bundle_dir,
            fail_fast,
        })
    }

    #[must_use]
    pub fn includes(&self, provider: Provider) -> bool {
        self.provider_filter
            .as_ref()
            .is_none_or(|filter| filter.contains(&provider))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestOutcome {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestExecution {
    pub name: String,
    pub outcome: TestOutcome,
    /// [`TestFailure::kind`] for failed tests.
    pub failure_kind: Option<String>,
    pub reason: Option<String>,
    pub elapsed_ms: u64,
}

impl TestExecution {
    fn skipped(name: String, reason: &str) -> Self {
        Self {
            name,
            outcome: TestOutcome::Skipped,
            failure_kind: None,
            reason: Some(reason.to_owned()),
            elapsed_ms: 0,
        }
    }

    fn failed(name: String, failure: &TestFailure, elapsed_ms: u64) -> Self {
        Self {
            name,
            outcome: TestOutcome::Fail,
            failure_kind: Some(failure.kind().to_owned()),
            reason: Some(failure.to_string()),
            elapsed_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteExecution {
    pub suite_id: String,
    pub config: SuiteConfig,
    pub setup_failure: Option<String>,
    pub teardown_failure: Option<String>,
    pub tests: Vec<TestExecution>,
}

impl SuiteExecution {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.setup_failure.is_some()
            || self.teardown_failure.is_some()
            || self
                .tests
                .iter()
                .any(|test| test.outcome == TestOutcome::Fail)
    }
}

/// Aggregated result of one matrix run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixRunSummary {
    pub schema_version: u32,
    pub matrix: String,
    pub total_suites: usize,
    pub excluded_suites: usize,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
    pub skipped_tests: usize,
    pub suites: Vec<SuiteExecution>,
}

impl MatrixRunSummary {
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.suites.iter().any(SuiteExecution::has_failures)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| HarnessError::serialization(err.to_string()))
    }
}

/// Run every registered suite in `matrix`.
///
/// Returns `Err` only for authoring errors surfaced by a test and for bundle
/// I/O; ordinary failures are reported in the summary. A bundle write error
/// inside a suite is returned after that suite's `after_all` hooks ran.
pub fn run_matrix(matrix: &SuiteMatrix, options: &RunOptions) -> Result<MatrixRunSummary> {
    let mut bundle = match &options.bundle_dir {
        Some(dir) => Some(init_run_bundle(dir, &matrix.name, matrix.suites.len())?),
        None => None,
    };

    let mut suites = Vec::with_capacity(matrix.suites.len());
    let mut stop_reason: Option<&str> = None;

    for suite in &matrix.suites {
        let provider = suite.config().provider();
        let skip_reason = stop_reason.or_else(|| {
            (!options.includes(provider)).then_some(SKIP_PROVIDER_FILTERED)
        });
        if let Some(reason) = skip_reason {
            debug!(suite_id = %suite.meta().suite_id, reason, "suite skipped");
            suites.push(skipped_suite(suite, reason));
            continue;
        }

        let (execution, fatal) = run_suite(suite, &mut bundle)?;
        let failed = execution.has_failures();
        suites.push(execution);

        if let Some(failure) = fatal {
            if let Some(bundle) = bundle.take() {
                bundle.finish(RunStatus::Failed)?;
            }
            error!(
                matrix = %matrix.name,
                suite_id = %suite.meta().suite_id,
                error = %failure,
                "authoring error aborted the run"
            );
            return Err(authoring_error(failure));
        }
        if failed && options.fail_fast {
            warn!(suite_id = %suite.meta().suite_id, "fail-fast: skipping remaining suites");
            stop_reason = Some(SKIP_FAIL_FAST);
        }
    }

    let summary = summarize(matrix, suites);
    info!(
        matrix = %summary.matrix,
        suites = summary.total_suites,
        passed = summary.passed_tests,
        failed = summary.failed_tests,
        skipped = summary.skipped_tests,
        "matrix run finished"
    );

    if let Some(bundle) = bundle {
        bundle.write_artifact_json("summary.json", &summary)?;
        let status = if summary.is_success() {
            RunStatus::Passed
        } else {
            RunStatus::Failed
        };
        bundle.finish(status)?;
    }
    Ok(summary)
}

fn authoring_error(failure: TestFailure) -> HarnessError {
    match failure {
        TestFailure::Authoring(err) | TestFailure::CoverageGap(err) => err.into(),
        other => HarnessError::internal(format!("unexpected fatal failure: {other}")),
    }
}

fn skipped_suite(suite: &RegisteredSuite, reason: &str) -> SuiteExecution {
    SuiteExecution {
        suite_id: suite.meta().suite_id.clone(),
        config: suite.config().clone(),
        setup_failure: None,
        teardown_failure: None,
        tests: suite
            .tests()
            .iter()
            .map(|test| TestExecution::skipped(test.full_name(), reason))
            .collect(),
    }
}

fn run_suite(
    suite: &RegisteredSuite,
    bundle: &mut Option<RunBundle>,
) -> Result<(SuiteExecution, Option<TestFailure>)> {
    let mut events = EventSink::new(bundle);
    let context = suite.context();
    let suite_id = suite.meta().suite_id.clone();
    let mut execution = SuiteExecution {
        suite_id: suite_id.clone(),
        config: suite.config().clone(),
        setup_failure: None,
        teardown_failure: None,
        tests: Vec::with_capacity(suite.tests().len()),
    };

    let runnable = suite.tests().iter().any(|test| test.skip_reason.is_none());
    if !runnable {
        execution.tests = suite
            .tests()
            .iter()
            .map(|test| {
                TestExecution::skipped(
                    test.full_name(),
                    test.skip_reason.as_deref().unwrap_or_default(),
                )
            })
            .collect();
        return Ok((execution, None));
    }

    events.emit(
        LifecycleEventKind::Setup,
        "before_all",
        [("suite_id", suite_id.clone()), ("config", suite.config().label())],
    );
    let setup = suite
        .before_all()
        .iter()
        .try_for_each(|hook| guarded(|| hook.run(context)));

    let mut fatal = None;
    match setup {
        Err(failure) => {
            error!(suite_id = %suite_id, error = %failure, "before_all failed");
            let reason = failure.to_string();
            execution.setup_failure = Some(reason.clone());
            let setup_failure = TestFailure::Setup(format!("before_all: {reason}"));
            for test in suite.tests() {
                execution.tests.push(match &test.skip_reason {
                    Some(skip) => TestExecution::skipped(test.full_name(), skip),
                    None => TestExecution::failed(test.full_name(), &setup_failure, 0),
                });
            }
            if failure.is_authoring() {
                fatal = Some(failure);
            }
        }
        Ok(()) => {
            for test in suite.tests() {
                let name = test.full_name();
                if fatal.is_some() {
                    execution.tests.push(TestExecution::skipped(name, SKIP_ABORTED));
                    continue;
                }
                if let Some(skip) = &test.skip_reason {
                    execution.tests.push(TestExecution::skipped(name, skip));
                    continue;
                }

                events.emit(
                    LifecycleEventKind::Step,
                    "test_start",
                    [("suite_id", suite_id.clone()), ("test", name.clone())],
                );
                let started = Instant::now();
                let result = run_test(suite, test, context);
                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

                let (record, outcome) = match result {
                    Ok(()) => (
                        TestExecution {
                            name: name.clone(),
                            outcome: TestOutcome::Pass,
                            failure_kind: None,
                            reason: None,
                            elapsed_ms,
                        },
                        "pass".to_owned(),
                    ),
                    Err(failure) => {
                        warn!(suite_id = %suite_id, test = %name, kind = failure.kind(), error = %failure, "test failed");
                        let record = TestExecution::failed(name.clone(), &failure, elapsed_ms);
                        if failure.is_authoring() {
                            fatal = Some(failure);
                        }
                        (record, "fail".to_owned())
                    }
                };
                events.emit(
                    LifecycleEventKind::Assertion,
                    "test_result",
                    [
                        ("suite_id", suite_id.clone()),
                        ("test", name),
                        ("outcome", outcome),
                    ],
                );
                execution.tests.push(record);
            }
        }
    }

    let teardown_failures: Vec<String> = suite
        .after_all()
        .iter()
        .filter_map(|hook| guarded(|| hook.run(context)).err())
        .map(|failure| failure.to_string())
        .collect();
    if !teardown_failures.is_empty() {
        error!(suite_id = %suite_id, failures = teardown_failures.len(), "after_all failed");
        execution.teardown_failure = Some(teardown_failures.join("; "));
    }
    events.emit(
        LifecycleEventKind::Teardown,
        "after_all",
        [("suite_id", suite_id)],
    );

    events.finish()?;
    Ok((execution, fatal))
}

fn run_test(
    suite: &RegisteredSuite,
    test: &TestCase,
    context: &SuiteContext,
) -> TestResult {
    for hook in suite.before_each_for(test) {
        guarded(|| hook.run(context)).map_err(|failure| match failure {
            TestFailure::Authoring(_) => failure,
            other => TestFailure::Setup(format!("before_each: {other}")),
        })?;
    }
    guarded(|| test.run(context))
}

fn guarded<F>(body: F) -> TestResult
where
    F: FnOnce() -> TestResult,
{
    panic::catch_unwind(AssertUnwindSafe(body))
        .unwrap_or_else(|payload| Err(TestFailure::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

/// Bundle writer for one suite. The first write error stops further writes
/// and is returned by [`EventSink::finish`], after the suite's hooks ran.
struct EventSink<'b> {
    bundle: &'b mut Option<RunBundle>,
    error: Option<HarnessError>,
}

impl<'b> EventSink<'b> {
    fn new(bundle: &'b mut Option<RunBundle>) -> Self {
        Self {
            bundle,
            error: None,
        }
    }

    fn emit<const N: usize>(
        &mut self,
        kind: LifecycleEventKind,
        message: &str,
        fields: [(&str, String); N],
    ) {
        if self.error.is_some() {
            return;
        }
        if let Err(err) = emit(self.bundle, kind, message, fields) {
            error!(error = %err, "run bundle write failed");
            self.error = Some(err);
        }
    }

    fn finish(self) -> Result<()> {
        self.error.map_or(Ok(()), Err)
    }
}

fn emit<'a, const N: usize>(
    bundle: &mut Option<RunBundle>,
    kind: LifecycleEventKind,
    message: &str,
    fields: [(&'a str, String); N],
) -> Result<()> {
    match bundle {
        Some(bundle) => bundle.emit_event(kind, message, payload(fields)),
        None => Ok(()),
    }
}

fn summarize(matrix: &SuiteMatrix, suites: Vec<SuiteExecution>) -> MatrixRunSummary {
    let mut passed_tests = 0usize;
    let mut failed_tests = 0usize;
    let mut skipped_tests = 0usize;
    for test in suites.iter().flat_map(|suite| &suite.tests) {
        match test.outcome {
            TestOutcome::Pass => passed_tests += 1,
            TestOutcome::Fail => failed_tests += 1,
            TestOutcome::Skipped => skipped_tests += 1,
        }
    }
    MatrixRunSummary {
        schema_version: SUMMARY_SCHEMA_VERSION,
        matrix: matrix.name.clone(),
        total_suites: suites.len(),
        excluded_suites: matrix.excluded.len(),
        total_tests: passed_tests + failed_tests + skipped_tests,
        passed_tests,
        failed_tests,
        skipped_tests,
        suites,
    }
}

/// Render an operator-friendly report of a run.
#[must_use]
pub fn render_summary(summary: &MatrixRunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "matrix_run name={} suites={} excluded={} tests={} passed={} failed={} skipped={}",
        summary.matrix,
        summary.total_suites,
        summary.excluded_suites,
        summary.total_tests,
        summary.passed_tests,
        summary.failed_tests,
        summary.skipped_tests
    );
    for suite in &summary.suites {
        let _ = writeln!(out, "suite id={} {}", suite.suite_id, suite.config.label());
        if let Some(reason) = &suite.setup_failure {
            let _ = writeln!(out, "  setup_failure: {reason}");
        }
        for test in &suite.tests {
            let tag = match test.outcome {
                TestOutcome::Pass => "pass",
                TestOutcome::Fail => "FAIL",
                TestOutcome::Skipped => "skip",
            };
            match &test.reason {
                Some(reason) => {
                    let first_line = reason.lines().next().unwrap_or_default();
                    let _ = writeln!(out, "  [{tag}] {} ({first_line})", test.name);
                }
                None => {
                    let _ = writeln!(out, "  [{tag}] {}", test.name);
                }
            }
        }
        if let Some(reason) = &suite.teardown_failure {
            let _ = writeln!(out, "  teardown_failure: {reason}");
        }
    }
    out
}

/// Write run summary JSON to a file path.
pub fn write_summary_json(path: &Path, summary: &MatrixRunSummary) -> Result<()> {
    let payload = summary.to_json()?;
    std::fs::write(path, payload)?;
    Ok(())
}
