//! Conditional expectation resolution across providers and integrity modes.
//!
//! An [`ExpectationTable`] holds the expected outcome of one assertion site for
//! every execution context the suite can run in. Resolution is a two-level
//! lookup with no silent fallback:
//!
//! 1. the mode level, keyed by [`ReferentialIntegrity`]. A missing mode is an
//!    authoring error ([`ExpectationError::MissingMode`]).
//! 2. the provider level, keyed by [`Provider`]. A missing provider is a
//!    coverage gap ([`ExpectationError::MissingProvider`]) unless the author
//!    gave the provider table an explicit default.
//!
//! Flat tables keyed directly by provider skip the mode level.

use std::collections::BTreeMap;

use ormtest_error::HarnessError;
use thiserror::Error;
use tracing::warn;

use crate::matrix::SuiteConfig;
use crate::provider::{AxisDomain, Provider, ReferentialIntegrity};

/// Failure to resolve an expected value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpectationError {
    /// The table has no entry for the current integrity mode.
    #[error("expectation table '{table}' has no entry for mode '{mode}' (provider: {})", provider_label(*.provider))]
    MissingMode {
        table: String,
        mode: ReferentialIntegrity,
        provider: Option<Provider>,
    },

    /// The selected level has no entry (and no default) for the provider.
    #[error("expectation table '{table}' is missing a case for provider '{provider}' (mode: {})", mode_label(*.mode))]
    MissingProvider {
        table: String,
        mode: Option<ReferentialIntegrity>,
        provider: Provider,
    },

    /// The table is keyed by provider but the resolver has none bound.
    #[error("expectation table '{table}' needs a provider but the resolver has none bound")]
    ProviderUnbound { table: String },
}

impl ExpectationError {
    /// Authoring errors must halt the suite rather than fail one test.
    #[must_use]
    pub const fn is_authoring(&self) -> bool {
        matches!(self, Self::MissingMode { .. } | Self::ProviderUnbound { .. })
    }

    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::MissingMode { table, .. }
            | Self::MissingProvider { table, .. }
            | Self::ProviderUnbound { table } => table,
        }
    }
}

fn provider_label(provider: Option<Provider>) -> &'static str {
    provider.map_or("<unbound>", Provider::as_str)
}

fn mode_label(mode: Option<ReferentialIntegrity>) -> &'static str {
    mode.map_or("<any>", ReferentialIntegrity::as_str)
}

impl From<ExpectationError> for HarnessError {
    fn from(err: ExpectationError) -> Self {
        match err {
            ExpectationError::MissingMode {
                table,
                mode,
                provider,
            } => Self::MissingExpectationMode {
                table,
                mode: mode.as_str().to_owned(),
                provider: provider_label(provider).to_owned(),
            },
            ExpectationError::MissingProvider {
                table,
                mode,
                provider,
            } => Self::MissingExpectationCase {
                table,
                mode: mode_label(mode).to_owned(),
                provider: provider.as_str().to_owned(),
            },
            ExpectationError::ProviderUnbound { table } => Self::UnboundContext {
                table,
                discriminator: "provider".to_owned(),
            },
        }
    }
}

/// Provider-keyed entries with an optional explicit default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTable<V = String> {
    entries: BTreeMap<Provider, V>,
    default: Option<V>,
}

impl<V> Default for ProviderTable<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            default: None,
        }
    }
}

impl<V> ProviderTable<V> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, provider: Provider, value: impl Into<V>) -> Self {
        self.entries.insert(provider, value.into());
        self
    }

    /// Same value for several providers.
    #[must_use]
    pub fn with_each(mut self, providers: &[Provider], value: impl Into<V>) -> Self
    where
        V: Clone,
    {
        let value = value.into();
        for provider in providers {
            self.entries.insert(*provider, value.clone());
        }
        self
    }

    /// Fallback used for providers without their own entry.
    #[must_use]
    pub fn with_default(mut self, value: impl Into<V>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Entry for `provider`, falling back to the explicit default.
    #[must_use]
    pub fn get(&self, provider: Provider) -> Option<&V> {
        self.entries.get(&provider).or(self.default.as_ref())
    }

    #[must_use]
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Providers with their own entry.
    pub fn providers(&self) -> impl Iterator<Item = Provider> + '_ {
        self.entries.keys().copied()
    }
}

impl<V> FromIterator<(Provider, V)> for ProviderTable<V> {
    fn from_iter<I: IntoIterator<Item = (Provider, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
            default: None,
        }
    }
}

/// Value of one mode-level entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeEntry<V = String> {
    /// Applies to every provider.
    Uniform(V),
    PerProvider(ProviderTable<V>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum TableShape<V> {
    ByProvider(ProviderTable<V>),
    ByMode(BTreeMap<ReferentialIntegrity, ModeEntry<V>>),
}

/// Expected outcomes for one assertion site, labelled for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectationTable<V = String> {
    label: String,
    shape: TableShape<V>,
}

impl<V> ExpectationTable<V> {
    /// Flat table keyed directly by provider.
    #[must_use]
    pub fn by_provider(label: impl Into<String>, table: ProviderTable<V>) -> Self {
        Self {
            label: label.into(),
            shape: TableShape::ByProvider(table),
        }
    }

    /// Empty mode-keyed table; add entries with [`Self::mode`] and
    /// [`Self::uniform`].
    #[must_use]
    pub fn by_mode(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            shape: TableShape::ByMode(BTreeMap::new()),
        }
    }

    /// Per-provider entries for `mode`. A flat table is returned unchanged.
    #[must_use]
    pub fn mode(self, mode: ReferentialIntegrity, table: ProviderTable<V>) -> Self {
        self.with_entry(mode, ModeEntry::PerProvider(table))
    }

    /// One value for every provider under `mode`.
    #[must_use]
    pub fn uniform(self, mode: ReferentialIntegrity, value: impl Into<V>) -> Self {
        self.with_entry(mode, ModeEntry::Uniform(value.into()))
    }

    fn with_entry(mut self, mode: ReferentialIntegrity, entry: ModeEntry<V>) -> Self {
        match &mut self.shape {
            TableShape::ByMode(modes) => {
                modes.insert(mode, entry);
            }
            TableShape::ByProvider(_) => {
                warn!(
                    table = %self.label,
                    mode = %mode,
                    "mode entry ignored on a table keyed by provider"
                );
            }
        }
        self
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Modes with an entry; empty for flat tables.
    #[must_use]
    pub fn modes(&self) -> Vec<ReferentialIntegrity> {
        match &self.shape {
            TableShape::ByProvider(_) => Vec::new(),
            TableShape::ByMode(modes) => modes.keys().copied().collect(),
        }
    }
}

/// Execution context the resolver selects with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpectationContext {
    pub provider: Option<Provider>,
    pub referential_integrity: Option<ReferentialIntegrity>,
}

impl ExpectationContext {
    /// Integrity mode, defaulting to native foreign keys when unbound.
    #[must_use]
    pub fn mode(&self) -> ReferentialIntegrity {
        self.referential_integrity.unwrap_or_default()
    }
}

/// Builder-style resolver bound to the current provider and mode.
///
/// ```
/// use ormtest_harness::expectation::{ConditionalError, ExpectationTable, ProviderTable};
/// use ormtest_harness::provider::{Provider, ReferentialIntegrity};
///
/// let resolver = ConditionalError::new()
///     .with_provider(Provider::Mysql)
///     .with_referential_integrity(ReferentialIntegrity::Prisma);
/// let table: ExpectationTable = ExpectationTable::by_mode("delete parent")
///     .mode(
///         ReferentialIntegrity::ForeignKeys,
///         ProviderTable::new().with(Provider::Mysql, "Foreign key constraint failed"),
///     )
///     .uniform(ReferentialIntegrity::Prisma, "relation violated");
/// assert_eq!(resolver.snapshot(&table).unwrap(), "relation violated");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConditionalError {
    context: ExpectationContext,
}

impl ConditionalError {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver bound to a suite's provider and integrity mode.
    #[must_use]
    pub fn for_suite(config: &SuiteConfig) -> Self {
        Self::new()
            .with_provider(config.provider())
            .with_referential_integrity(config.referential_integrity())
    }

    #[must_use]
    pub const fn with_provider(mut self, provider: Provider) -> Self {
        self.context.provider = Some(provider);
        self
    }

    #[must_use]
    pub const fn with_referential_integrity(mut self, mode: ReferentialIntegrity) -> Self {
        self.context.referential_integrity = Some(mode);
        self
    }

    #[must_use]
    pub const fn context(&self) -> ExpectationContext {
        self.context
    }

    /// First lookup level only. Suites call this at build time so a missing
    /// mode halts construction; the returned selection resolves the provider
    /// when the test runs.
    pub fn select_mode<'t, V>(
        &self,
        table: &'t ExpectationTable<V>,
    ) -> Result<ModeSelection<'t, V>, ExpectationError> {
        let target = match &table.shape {
            TableShape::ByProvider(providers) => SelectionTarget::Providers(providers),
            TableShape::ByMode(modes) => {
                let mode = self.context.mode();
                match modes.get(&mode) {
                    Some(ModeEntry::Uniform(value)) => SelectionTarget::Uniform(value),
                    Some(ModeEntry::PerProvider(providers)) => {
                        SelectionTarget::Providers(providers)
                    }
                    None => {
                        return Err(ExpectationError::MissingMode {
                            table: table.label.clone(),
                            mode,
                            provider: self.context.provider,
                        });
                    }
                }
            }
        };
        let mode = match &table.shape {
            TableShape::ByProvider(_) => None,
            TableShape::ByMode(_) => Some(self.context.mode()),
        };
        Ok(ModeSelection {
            label: &table.label,
            mode,
            provider: self.context.provider,
            target,
        })
    }

    /// Resolve both levels, returning a reference into the table.
    pub fn resolve<'t, V>(&self, table: &'t ExpectationTable<V>) -> Result<&'t V, ExpectationError> {
        self.select_mode(table)?.resolve()
    }

    /// Resolve both levels and return an owned copy of the expected value.
    pub fn snapshot<V: Clone>(&self, table: &ExpectationTable<V>) -> Result<V, ExpectationError> {
        self.resolve(table).cloned()
    }
}

#[derive(Debug)]
enum SelectionTarget<'t, V> {
    Uniform(&'t V),
    Providers(&'t ProviderTable<V>),
}

/// Outcome of the mode-level lookup, still bound to the resolver's provider.
#[derive(Debug)]
pub struct ModeSelection<'t, V> {
    label: &'t str,
    mode: Option<ReferentialIntegrity>,
    provider: Option<Provider>,
    target: SelectionTarget<'t, V>,
}

impl<'t, V> ModeSelection<'t, V> {
    /// Second lookup level.
    pub fn resolve(&self) -> Result<&'t V, ExpectationError> {
        match self.target {
            SelectionTarget::Uniform(value) => Ok(value),
            SelectionTarget::Providers(providers) => {
                let Some(provider) = self.provider else {
                    return Err(ExpectationError::ProviderUnbound {
                        table: self.label.to_owned(),
                    });
                };
                providers
                    .get(provider)
                    .ok_or_else(|| ExpectationError::MissingProvider {
                        table: self.label.to_owned(),
                        mode: self.mode,
                        provider,
                    })
            }
        }
    }

    #[must_use]
    pub const fn mode(&self) -> Option<ReferentialIntegrity> {
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FK_POSTGRES: &str =
        "Foreign key constraint failed on the field: `ProfileOneToOne_userId_fkey (index)`";
    const FK_MYSQL: &str = "Foreign key constraint failed on the field: `userId`";
    const RELATION_VIOLATED: &str = "The change you are trying to make would violate the required relation 'ProfileOneToOneToUserOneToOne' between the `ProfileOneToOne` and `UserOneToOne` models.";

    fn restrict_update_table() -> ExpectationTable {
        ExpectationTable::by_mode("update parent id with restrict")
            .mode(
                ReferentialIntegrity::ForeignKeys,
                ProviderTable::new()
                    .with(Provider::Postgresql, FK_POSTGRES)
                    .with(Provider::Mysql, FK_MYSQL),
            )
            .uniform(ReferentialIntegrity::Prisma, RELATION_VIOLATED)
    }

    #[test]
    fn resolves_provider_entry_within_mode() {
        let resolver = ConditionalError::new()
            .with_provider(Provider::Mysql)
            .with_referential_integrity(ReferentialIntegrity::ForeignKeys);
        assert_eq!(resolver.snapshot(&restrict_update_table()), Ok(FK_MYSQL.to_owned()));
    }

    #[test]
    fn uniform_mode_entry_ignores_provider() {
        for provider in Provider::ALL {
            let resolver = ConditionalError::new()
                .with_provider(provider)
                .with_referential_integrity(ReferentialIntegrity::Prisma);
            assert_eq!(
                resolver.resolve(&restrict_update_table()).map(String::as_str),
                Ok(RELATION_VIOLATED)
            );
        }
    }

    #[test]
    fn unbound_mode_defaults_to_foreign_keys() {
        let resolver = ConditionalError::new().with_provider(Provider::Postgresql);
        assert_eq!(
            resolver.resolve(&restrict_update_table()).map(String::as_str),
            Ok(FK_POSTGRES)
        );
    }

    #[test]
    fn missing_mode_is_authoring_error() {
        let table: ExpectationTable = ExpectationTable::by_mode("fk only").mode(
            ReferentialIntegrity::ForeignKeys,
            ProviderTable::new().with(Provider::Sqlite, "Foreign key constraint failed"),
        );
        let resolver = ConditionalError::new()
            .with_provider(Provider::Sqlite)
            .with_referential_integrity(ReferentialIntegrity::Prisma);
        let err = resolver.select_mode(&table).expect_err("prisma mode is absent");
        assert!(err.is_authoring());
        assert_eq!(
            err.to_string(),
            "expectation table 'fk only' has no entry for mode 'prisma' (provider: sqlite)"
        );
        let harness: HarnessError = err.into();
        assert!(harness.is_authoring_error());
    }

    #[test]
    fn missing_provider_is_coverage_gap() {
        let resolver = ConditionalError::new()
            .with_provider(Provider::Cockroachdb)
            .with_referential_integrity(ReferentialIntegrity::ForeignKeys);
        let table = restrict_update_table();
        let selection = resolver.select_mode(&table).expect("mode exists");
        let err = selection.resolve().expect_err("cockroachdb is absent");
        assert!(!err.is_authoring());
        assert_eq!(
            err.to_string(),
            "expectation table 'update parent id with restrict' is missing a case for provider 'cockroachdb' (mode: foreignKeys)"
        );
        let harness: HarnessError = err.into();
        assert!(harness.is_coverage_gap());
    }

    #[test]
    fn mode_entries_leave_flat_table_intact() {
        let table: ExpectationTable = ExpectationTable::by_provider(
            "flat",
            ProviderTable::new().with(Provider::Mysql, FK_MYSQL),
        )
        .uniform(ReferentialIntegrity::Prisma, RELATION_VIOLATED);
        let resolved = ConditionalError::new()
            .with_provider(Provider::Mysql)
            .with_referential_integrity(ReferentialIntegrity::Prisma)
            .snapshot(&table);
        assert_eq!(resolved.as_deref(), Ok(FK_MYSQL));
        assert!(table.modes().is_empty());
    }

    #[test]
    fn explicit_default_fills_missing_providers() {
        let table: ExpectationTable = ExpectationTable::by_provider(
            "null constraint",
            ProviderTable::new()
                .with(Provider::Mysql, "Foreign key constraint failed on the field: `postId`")
                .with_default("Null constraint violation on the fields: (`postId`)"),
        );
        let resolver = ConditionalError::new().with_provider(Provider::Sqlite);
        assert_eq!(
            resolver.snapshot(&table).as_deref(),
            Ok("Null constraint violation on the fields: (`postId`)")
        );
    }

    #[test]
    fn flat_table_without_provider_binding_is_authoring_error() {
        let table: ExpectationTable = ExpectationTable::by_provider(
            "flat",
            ProviderTable::new().with(Provider::Sqlite, "x".to_owned()),
        );
        let err = ConditionalError::new().resolve(&table).expect_err("no provider bound");
        assert_eq!(
            err,
            ExpectationError::ProviderUnbound {
                table: "flat".to_owned()
            }
        );
        assert!(err.is_authoring());
    }

    #[test]
    fn non_string_values_resolve() {
        let table = ExpectationTable::by_provider(
            "row count",
            [(Provider::Postgresql, 2_usize), (Provider::Mongodb, 0_usize)]
                .into_iter()
                .collect(),
        );
        let resolver = ConditionalError::new().with_provider(Provider::Mongodb);
        assert_eq!(resolver.snapshot(&table), Ok(0));
    }

    #[test]
    fn for_suite_binds_both_discriminators() {
        let config = SuiteConfig::new(Provider::Sqlserver).with_axis_value(
            crate::matrix::AxisValue::ReferentialIntegrity(ReferentialIntegrity::Prisma),
        );
        let context = ConditionalError::for_suite(&config).context();
        assert_eq!(context.provider, Some(Provider::Sqlserver));
        assert_eq!(context.mode(), ReferentialIntegrity::Prisma);
    }
}
