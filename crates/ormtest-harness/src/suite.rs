//! Suite registration: one [`RegisteredSuite`] per expanded matrix
//! combination, each built by a fresh [`SuiteBuilder`].

use std::fmt;

use ormtest_error::{HarnessError, Result};
use tracing::{debug, error, info};

use crate::assertion::TestResult;
use crate::expectation::{ConditionalError, ExpectationTable};
use crate::matrix::{ExcludedSuite, MatrixOptions, SuiteConfig, SuiteMeta, plan_matrix};
use crate::schema::SchemaTemplate;

/// Test body or hook.
pub type TestFn = Box<dyn Fn(&SuiteContext) -> TestResult>;

/// Read-only view of the suite a test runs in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteContext {
    config: SuiteConfig,
    meta: SuiteMeta,
}

impl SuiteContext {
    #[must_use]
    pub const fn new(config: SuiteConfig, meta: SuiteMeta) -> Self {
        Self { config, meta }
    }

    #[must_use]
    pub const fn config(&self) -> &SuiteConfig {
        &self.config
    }

    #[must_use]
    pub const fn meta(&self) -> &SuiteMeta {
        &self.meta
    }

    /// Resolver bound to this suite's provider and integrity mode.
    #[must_use]
    pub fn conditional_error(&self) -> ConditionalError {
        ConditionalError::for_suite(&self.config)
    }
}

/// Registered hook with the group path it was declared in.
pub struct Hook {
    scope: Vec<String>,
    body: TestFn,
}

impl Hook {
    /// Whether this hook applies to a test declared under `group`.
    #[must_use]
    pub fn applies_to(&self, group: &[String]) -> bool {
        group.starts_with(&self.scope)
    }

    pub fn run(&self, context: &SuiteContext) -> TestResult {
        (self.body)(context)
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook").field("scope", &self.scope).finish_non_exhaustive()
    }
}

pub struct TestCase {
    pub group: Vec<String>,
    pub name: String,
    /// Set when an enclosing `describe_if` condition was false.
    pub skip_reason: Option<String>,
    body: TestFn,
}

impl TestCase {
    /// `group > nested > name`.
    #[must_use]
    pub fn full_name(&self) -> String {
        self.group
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.name.as_str()))
            .collect::<Vec<_>>()
            .join(" > ")
    }

    pub fn run(&self, context: &SuiteContext) -> TestResult {
        (self.body)(context)
    }
}

impl fmt::Debug for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestCase")
            .field("group", &self.group)
            .field("name", &self.name)
            .field("skip_reason", &self.skip_reason)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct GroupFrame {
    name: String,
    skip_reason: Option<String>,
}

/// Collects tests and hooks for one suite.
#[derive(Debug)]
pub struct SuiteBuilder {
    context: SuiteContext,
    groups: Vec<GroupFrame>,
    tests: Vec<TestCase>,
    before_all: Vec<Hook>,
    before_each: Vec<Hook>,
    after_all: Vec<Hook>,
}

impl SuiteBuilder {
    #[must_use]
    pub fn new(config: SuiteConfig, meta: SuiteMeta) -> Self {
        Self {
            context: SuiteContext::new(config, meta),
            groups: Vec::new(),
            tests: Vec::new(),
            before_all: Vec::new(),
            before_each: Vec::new(),
            after_all: Vec::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SuiteConfig {
        self.context.config()
    }

    #[must_use]
    pub const fn meta(&self) -> &SuiteMeta {
        self.context.meta()
    }

    #[must_use]
    pub fn conditional_error(&self) -> ConditionalError {
        self.context.conditional_error()
    }

    /// Check the mode level of `table` now, so a table missing this suite's
    /// integrity mode halts construction before any test runs.
    pub fn require_mode<V>(&self, table: &ExpectationTable<V>) -> Result<()> {
        self.conditional_error()
            .select_mode(table)
            .map(|_| ())
            .map_err(|err| {
                error!(
                    suite_id = %self.meta().suite_id,
                    table = table.label(),
                    error = %err,
                    "expectation table rejected at build time"
                );
                HarnessError::from(err)
            })
    }

    pub fn test<F>(&mut self, name: impl Into<String>, body: F)
    where
        F: Fn(&SuiteContext) -> TestResult + 'static,
    {
        self.tests.push(TestCase {
            group: self.group_path(),
            name: name.into(),
            skip_reason: self.active_skip_reason(),
            body: Box::new(body),
        });
    }

    /// Nested group. Hooks declared inside apply only to tests inside.
    pub fn describe<F>(&mut self, name: impl Into<String>, build: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.with_group(name.into(), None, build)
    }

    /// Group whose tests are registered but reported skipped when
    /// `condition` is false.
    pub fn describe_if<F>(&mut self, condition: bool, name: impl Into<String>, build: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let name = name.into();
        let skip_reason = (!condition).then(|| format!("condition false for group '{name}'"));
        self.with_group(name, skip_reason, build)
    }

    pub fn before_all<F>(&mut self, hook: F)
    where
        F: Fn(&SuiteContext) -> TestResult + 'static,
    {
        if let Some(hook) = self.scoped_hook(hook) {
            self.before_all.push(hook);
        }
    }

    pub fn before_each<F>(&mut self, hook: F)
    where
        F: Fn(&SuiteContext) -> TestResult + 'static,
    {
        if let Some(hook) = self.scoped_hook(hook) {
            self.before_each.push(hook);
        }
    }

    pub fn after_all<F>(&mut self, hook: F)
    where
        F: Fn(&SuiteContext) -> TestResult + 'static,
    {
        if let Some(hook) = self.scoped_hook(hook) {
            self.after_all.push(hook);
        }
    }

    #[must_use]
    pub fn finish(self) -> RegisteredSuite {
        RegisteredSuite {
            context: self.context,
            tests: self.tests,
            before_all: self.before_all,
            before_each: self.before_each,
            after_all: self.after_all,
        }
    }

    fn with_group<F>(&mut self, name: String, skip_reason: Option<String>, build: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.groups.push(GroupFrame { name, skip_reason });
        let result = build(self);
        self.groups.pop();
        result
    }

    fn group_path(&self) -> Vec<String> {
        self.groups.iter().map(|frame| frame.name.clone()).collect()
    }

    fn active_skip_reason(&self) -> Option<String> {
        self.groups
            .iter()
            .find_map(|frame| frame.skip_reason.clone())
    }

    // Hooks inside a skipped group never run, so they are not kept.
    fn scoped_hook<F>(&self, hook: F) -> Option<Hook>
    where
        F: Fn(&SuiteContext) -> TestResult + 'static,
    {
        if self.active_skip_reason().is_some() {
            return None;
        }
        Some(Hook {
            scope: self.group_path(),
            body: Box::new(hook),
        })
    }
}

/// A fully built suite, ready for the executor.
#[derive(Debug)]
pub struct RegisteredSuite {
    context: SuiteContext,
    tests: Vec<TestCase>,
    before_all: Vec<Hook>,
    before_each: Vec<Hook>,
    after_all: Vec<Hook>,
}

impl RegisteredSuite {
    #[must_use]
    pub const fn context(&self) -> &SuiteContext {
        &self.context
    }

    #[must_use]
    pub const fn config(&self) -> &SuiteConfig {
        self.context.config()
    }

    #[must_use]
    pub const fn meta(&self) -> &SuiteMeta {
        self.context.meta()
    }

    #[must_use]
    pub fn tests(&self) -> &[TestCase] {
        &self.tests
    }

    #[must_use]
    pub fn before_all(&self) -> &[Hook] {
        &self.before_all
    }

    /// `before_each` hooks that apply to `test`, outermost first.
    pub fn before_each_for<'a>(&'a self, test: &'a TestCase) -> impl Iterator<Item = &'a Hook> {
        self.before_each
            .iter()
            .filter(|hook| hook.applies_to(&test.group))
    }

    #[must_use]
    pub fn after_all(&self) -> &[Hook] {
        &self.after_all
    }
}

/// Every suite registered for one matrix, plus the opted-out combinations.
#[derive(Debug)]
pub struct SuiteMatrix {
    pub name: String,
    pub suites: Vec<RegisteredSuite>,
    pub excluded: Vec<ExcludedSuite>,
}

impl SuiteMatrix {
    #[must_use]
    pub fn test_count(&self) -> usize {
        self.suites.iter().map(|suite| suite.tests().len()).sum()
    }

    /// Suite registered for exactly `config`, if any.
    #[must_use]
    pub fn find(&self, config: &SuiteConfig) -> Option<&RegisteredSuite> {
        self.suites.iter().find(|suite| suite.config() == config)
    }
}

/// Validate and expand `options`, then build one suite per included
/// combination with `build`.
///
/// Authoring errors from validation or from `build` halt registration; any
/// other builder error is reported as [`HarnessError::SuiteBuild`].
pub fn setup_test_suite<F>(
    name: &str,
    options: &MatrixOptions,
    template: &dyn SchemaTemplate,
    build: F,
) -> Result<SuiteMatrix>
where
    F: Fn(&SuiteConfig, &SuiteMeta, &mut SuiteBuilder) -> Result<()>,
{
    let plan = plan_matrix(name, options, template)?;
    let mut suites = Vec::with_capacity(plan.suites.len());

    for planned in plan.suites {
        let mut builder = SuiteBuilder::new(planned.config.clone(), planned.meta.clone());
        build(&planned.config, &planned.meta, &mut builder).map_err(|err| {
            if err.is_authoring_error() {
                err
            } else {
                HarnessError::SuiteBuild {
                    suite: name.to_owned(),
                    config: planned.config.label(),
                    detail: err.to_string(),
                }
            }
        })?;
        let suite = builder.finish();
        debug!(
            suite_id = %suite.meta().suite_id,
            config = %suite.config().label(),
            tests = suite.tests().len(),
            "suite registered"
        );
        suites.push(suite);
    }

    info!(
        suite = name,
        registered = suites.len(),
        excluded = plan.excluded.len(),
        "suite matrix registered"
    );

    Ok(SuiteMatrix {
        name: name.to_owned(),
        suites,
        excluded: plan.excluded,
    })
}
