//! Suite matrix declaration, validation and expansion.
//!
//! A matrix is an ordered list of typed axes (provider, referential integrity
//! mode, `onUpdate` action, `onDelete` action). Expansion produces the cross
//! product of the declared axes, first axis outermost, minus every combination
//! matched by an [`OptOutRule`].
//!
//! Validation happens before any combination is produced:
//! - the provider axis is mandatory, axes are unique, non-empty and
//!   duplicate-free, and every value belongs to its axis;
//! - every opt-out rule names at least one value and carries a reason;
//! - every value of a declared axis's domain is either exercised or opted out.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write as _};
use std::path::Path;
use std::str::FromStr;

use ormtest_error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};
use xxhash_rust::xxh3::xxh3_64;

use crate::provider::{
    AxisDomain, PreviewFeature, Provider, ReferentialAction, ReferentialActions,
    ReferentialIntegrity,
};
use crate::schema::{SchemaParams, SchemaTemplate};

/// Serialization schema version for [`MatrixPlan`].
pub const PLAN_SCHEMA_VERSION: u32 = 1;

/// One configuration dimension of the suite matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AxisKind {
    #[serde(rename = "provider")]
    Provider,
    #[serde(rename = "referentialIntegrity")]
    ReferentialIntegrity,
    #[serde(rename = "onUpdate")]
    OnUpdate,
    #[serde(rename = "onDelete")]
    OnDelete,
}

impl AxisKind {
    pub const ALL: [Self; 4] = [
        Self::Provider,
        Self::ReferentialIntegrity,
        Self::OnUpdate,
        Self::OnDelete,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Provider => "provider",
            Self::ReferentialIntegrity => "referentialIntegrity",
            Self::OnUpdate => "onUpdate",
            Self::OnDelete => "onDelete",
        }
    }

    /// Every legal value on this axis, in canonical order.
    #[must_use]
    pub fn universe(self) -> Vec<AxisValue> {
        match self {
            Self::Provider => Provider::universe()
                .iter()
                .copied()
                .map(AxisValue::Provider)
                .collect(),
            Self::ReferentialIntegrity => ReferentialIntegrity::universe()
                .iter()
                .copied()
                .map(AxisValue::ReferentialIntegrity)
                .collect(),
            Self::OnUpdate => ReferentialAction::universe()
                .iter()
                .copied()
                .map(AxisValue::OnUpdate)
                .collect(),
            Self::OnDelete => ReferentialAction::universe()
                .iter()
                .copied()
                .map(AxisValue::OnDelete)
                .collect(),
        }
    }

    /// Parse a bare value name as a value of this axis.
    pub fn parse_value(self, raw: &str) -> Result<AxisValue> {
        Ok(match self {
            Self::Provider => AxisValue::Provider(Provider::parse_name(raw)?),
            Self::ReferentialIntegrity => {
                AxisValue::ReferentialIntegrity(ReferentialIntegrity::parse_name(raw)?)
            }
            Self::OnUpdate => AxisValue::OnUpdate(ReferentialAction::parse_name(raw)?),
            Self::OnDelete => AxisValue::OnDelete(ReferentialAction::parse_name(raw)?),
        })
    }
}

impl fmt::Display for AxisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for AxisKind {
    type Err = HarnessError;

    fn from_str(raw: &str) -> Result<Self> {
        let needle = raw.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.label().eq_ignore_ascii_case(needle))
            .ok_or_else(|| HarnessError::unknown_value("axis", raw))
    }
}

/// A value on one specific axis.
///
/// Text form is `<axis>:<value>` (`onDelete:Cascade`). Provider and
/// integrity-mode names are unambiguous and may be written bare (`sqlite`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AxisValue {
    Provider(Provider),
    ReferentialIntegrity(ReferentialIntegrity),
    OnUpdate(ReferentialAction),
    OnDelete(ReferentialAction),
}

impl AxisValue {
    #[must_use]
    pub const fn kind(self) -> AxisKind {
        match self {
            Self::Provider(_) => AxisKind::Provider,
            Self::ReferentialIntegrity(_) => AxisKind::ReferentialIntegrity,
            Self::OnUpdate(_) => AxisKind::OnUpdate,
            Self::OnDelete(_) => AxisKind::OnDelete,
        }
    }

    /// Bare value name, without the axis prefix.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Provider(provider) => provider.as_str(),
            Self::ReferentialIntegrity(mode) => mode.as_str(),
            Self::OnUpdate(action) | Self::OnDelete(action) => action.as_str(),
        }
    }
}

impl fmt::Display for AxisValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind().label(), self.name())
    }
}

impl FromStr for AxisValue {
    type Err = HarnessError;

    fn from_str(raw: &str) -> Result<Self> {
        if let Some((kind, value)) = raw.split_once(':') {
            return kind.parse::<AxisKind>()?.parse_value(value);
        }
        if let Ok(provider) = Provider::parse_name(raw) {
            return Ok(Self::Provider(provider));
        }
        if let Ok(mode) = ReferentialIntegrity::parse_name(raw) {
            return Ok(Self::ReferentialIntegrity(mode));
        }
        Err(HarnessError::unknown_value("axis value (use <axis>:<value>)", raw))
    }
}

impl TryFrom<String> for AxisValue {
    type Error = HarnessError;

    fn try_from(raw: String) -> Result<Self> {
        raw.parse()
    }
}

impl From<AxisValue> for String {
    fn from(value: AxisValue) -> Self {
        value.to_string()
    }
}

/// Ordered sequence of legal values for one configuration dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawAxis", into = "RawAxis")]
pub struct MatrixAxis {
    kind: AxisKind,
    values: Vec<AxisValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawAxis {
    kind: AxisKind,
    values: Vec<String>,
}

impl TryFrom<RawAxis> for MatrixAxis {
    type Error = HarnessError;

    fn try_from(raw: RawAxis) -> Result<Self> {
        let values = raw
            .values
            .iter()
            .map(|value| raw.kind.parse_value(value))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            kind: raw.kind,
            values,
        })
    }
}

impl From<MatrixAxis> for RawAxis {
    fn from(axis: MatrixAxis) -> Self {
        Self {
            kind: axis.kind,
            values: axis
                .values
                .iter()
                .map(|value| value.name().to_owned())
                .collect(),
        }
    }
}

impl MatrixAxis {
    /// Build an axis from arbitrary values; mistyped values are reported by
    /// matrix validation.
    #[must_use]
    pub fn new(kind: AxisKind, values: impl IntoIterator<Item = AxisValue>) -> Self {
        Self {
            kind,
            values: values.into_iter().collect(),
        }
    }

    #[must_use]
    pub fn providers(values: impl IntoIterator<Item = Provider>) -> Self {
        Self::new(
            AxisKind::Provider,
            values.into_iter().map(AxisValue::Provider),
        )
    }

    #[must_use]
    pub fn referential_integrity(values: impl IntoIterator<Item = ReferentialIntegrity>) -> Self {
        Self::new(
            AxisKind::ReferentialIntegrity,
            values.into_iter().map(AxisValue::ReferentialIntegrity),
        )
    }

    #[must_use]
    pub fn on_update(values: impl IntoIterator<Item = ReferentialAction>) -> Self {
        Self::new(
            AxisKind::OnUpdate,
            values.into_iter().map(AxisValue::OnUpdate),
        )
    }

    #[must_use]
    pub fn on_delete(values: impl IntoIterator<Item = ReferentialAction>) -> Self {
        Self::new(
            AxisKind::OnDelete,
            values.into_iter().map(AxisValue::OnDelete),
        )
    }

    #[must_use]
    pub const fn kind(&self) -> AxisKind {
        self.kind
    }

    #[must_use]
    pub fn values(&self) -> &[AxisValue] {
        &self.values
    }
}

/// Fully resolved axis values for one expanded suite.
///
/// Fields are private: a config is produced by expansion and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteConfig {
    provider: Provider,
    referential_integrity: ReferentialIntegrity,
    referential_actions: ReferentialActions,
    preview_features: Vec<PreviewFeature>,
}

impl SuiteConfig {
    /// Config for `provider` with default integrity mode and actions.
    #[must_use]
    pub fn new(provider: Provider) -> Self {
        Self {
            provider,
            referential_integrity: ReferentialIntegrity::default(),
            referential_actions: ReferentialActions::default(),
            preview_features: Vec::new(),
        }
    }

    /// Copy of this config with one axis replaced.
    #[must_use]
    pub fn with_axis_value(mut self, value: AxisValue) -> Self {
        match value {
            AxisValue::Provider(provider) => self.provider = provider,
            AxisValue::ReferentialIntegrity(mode) => self.referential_integrity = mode,
            AxisValue::OnUpdate(action) => self.referential_actions.on_update = action,
            AxisValue::OnDelete(action) => self.referential_actions.on_delete = action,
        }
        self
    }

    #[must_use]
    pub fn with_preview_features(mut self, features: Vec<PreviewFeature>) -> Self {
        self.preview_features = features;
        self
    }

    fn from_combination(values: &[AxisValue], preview_features: &[PreviewFeature]) -> Option<Self> {
        let provider = values.iter().find_map(|value| match value {
            AxisValue::Provider(provider) => Some(*provider),
            _ => None,
        })?;
        let config = values
            .iter()
            .copied()
            .fold(Self::new(provider), Self::with_axis_value);
        Some(config.with_preview_features(preview_features.to_vec()))
    }

    #[must_use]
    pub const fn provider(&self) -> Provider {
        self.provider
    }

    #[must_use]
    pub const fn referential_integrity(&self) -> ReferentialIntegrity {
        self.referential_integrity
    }

    #[must_use]
    pub const fn referential_actions(&self) -> ReferentialActions {
        self.referential_actions
    }

    #[must_use]
    pub const fn on_update(&self) -> ReferentialAction {
        self.referential_actions.on_update
    }

    #[must_use]
    pub const fn on_delete(&self) -> ReferentialAction {
        self.referential_actions.on_delete
    }

    #[must_use]
    pub fn preview_features(&self) -> &[PreviewFeature] {
        &self.preview_features
    }

    /// This config's value on `kind`.
    #[must_use]
    pub const fn value_on(&self, kind: AxisKind) -> AxisValue {
        match kind {
            AxisKind::Provider => AxisValue::Provider(self.provider),
            AxisKind::ReferentialIntegrity => {
                AxisValue::ReferentialIntegrity(self.referential_integrity)
            }
            AxisKind::OnUpdate => AxisValue::OnUpdate(self.referential_actions.on_update),
            AxisKind::OnDelete => AxisValue::OnDelete(self.referential_actions.on_delete),
        }
    }

    /// Stable human-readable label, e.g.
    /// `provider=mysql referentialIntegrity=prisma onUpdate=Cascade onDelete=DEFAULT`.
    #[must_use]
    pub fn label(&self) -> String {
        AxisKind::ALL
            .into_iter()
            .map(|kind| format!("{}={}", kind.label(), self.value_on(kind).name()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Exclusion of matrix combinations, with a mandatory justification.
///
/// A combination matches when, for every axis named in `from`, its value on
/// that axis is one of the listed values. `from = [sqlite, mongodb]` excludes
/// every suite on either provider; `from = [mongodb, referentialIntegrity:foreignKeys]`
/// excludes only MongoDB suites in foreign-key mode. Only a rule naming a
/// single axis counts towards coverage of values left off that axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptOutRule {
    pub from: Vec<AxisValue>,
    pub reason: String,
}

impl OptOutRule {
    #[must_use]
    pub fn new(from: impl IntoIterator<Item = AxisValue>, reason: impl Into<String>) -> Self {
        Self {
            from: from.into_iter().collect(),
            reason: reason.into(),
        }
    }

    /// Opt out of a set of providers.
    #[must_use]
    pub fn providers(
        providers: impl IntoIterator<Item = Provider>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(providers.into_iter().map(AxisValue::Provider), reason)
    }

    #[must_use]
    pub fn matches(&self, config: &SuiteConfig) -> bool {
        if self.from.is_empty() {
            return false;
        }
        let mut by_kind: BTreeMap<AxisKind, BTreeSet<AxisValue>> = BTreeMap::new();
        for value in &self.from {
            by_kind.entry(value.kind()).or_default().insert(*value);
        }
        by_kind
            .iter()
            .all(|(kind, values)| values.contains(&config.value_on(*kind)))
    }

    #[must_use]
    pub fn mentions(&self, value: AxisValue) -> bool {
        self.from.contains(&value)
    }

    /// True when this rule excludes every combination carrying `value`:
    /// it lists the value and names no other axis.
    #[must_use]
    pub fn excludes_value(&self, value: AxisValue) -> bool {
        self.mentions(value) && self.from.iter().all(|other| other.kind() == value.kind())
    }

    fn from_label(&self) -> String {
        self.from
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Declarative matrix: axes, opt-outs and schema-wide preview features.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatrixOptions {
    pub axes: Vec<MatrixAxis>,
    pub opt_out: Vec<OptOutRule>,
    pub preview_features: Vec<PreviewFeature>,
}

impl MatrixOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn axis(mut self, axis: MatrixAxis) -> Self {
        self.axes.push(axis);
        self
    }

    #[must_use]
    pub fn opt_out(mut self, rule: OptOutRule) -> Self {
        self.opt_out.push(rule);
        self
    }

    #[must_use]
    pub fn preview_feature(mut self, name: impl Into<String>) -> Self {
        self.preview_features.push(PreviewFeature::new(name));
        self
    }

    /// Collect every authoring defect in this matrix.
    #[must_use]
    pub fn diagnostics(&self, suite: &str) -> Vec<HarnessError> {
        let mut diagnostics = Vec::new();

        if !self.axes.iter().any(|axis| axis.kind == AxisKind::Provider) {
            diagnostics.push(HarnessError::invalid_matrix(
                suite,
                "matrix declares no provider axis",
            ));
        }

        let mut seen_kinds = BTreeSet::new();
        for axis in &self.axes {
            if !seen_kinds.insert(axis.kind) {
                diagnostics.push(HarnessError::invalid_matrix(
                    suite,
                    format!("axis {} is declared more than once", axis.kind),
                ));
            }
            if axis.values.is_empty() {
                diagnostics.push(HarnessError::invalid_matrix(
                    suite,
                    format!("axis {} has no values", axis.kind),
                ));
            }
            let mut seen_values = BTreeSet::new();
            for value in &axis.values {
                if value.kind() != axis.kind {
                    diagnostics.push(HarnessError::invalid_matrix(
                        suite,
                        format!("value {value} does not belong to axis {}", axis.kind),
                    ));
                }
                if !seen_values.insert(*value) {
                    diagnostics.push(HarnessError::invalid_matrix(
                        suite,
                        format!("value {value} is listed twice on axis {}", axis.kind),
                    ));
                }
            }
        }

        for rule in &self.opt_out {
            if rule.from.is_empty() {
                diagnostics.push(HarnessError::invalid_matrix(
                    suite,
                    "opt-out rule names no values",
                ));
            }
            if rule.reason.trim().is_empty() {
                diagnostics.push(HarnessError::OptOutWithoutReason {
                    suite: suite.to_owned(),
                    from: rule.from_label(),
                });
            }
            for value in &rule.from {
                if !seen_kinds.contains(&value.kind()) {
                    diagnostics.push(HarnessError::invalid_matrix(
                        suite,
                        format!(
                            "opt-out value {value} refers to undeclared axis {}",
                            value.kind()
                        ),
                    ));
                }
            }
        }

        let mut covered_kinds = BTreeSet::new();
        for axis in &self.axes {
            if !covered_kinds.insert(axis.kind) {
                continue;
            }
            let missing: Vec<&'static str> = axis
                .kind
                .universe()
                .into_iter()
                .filter(|value| !axis.values.contains(value))
                .filter(|value| !self.opt_out.iter().any(|rule| rule.excludes_value(*value)))
                .map(AxisValue::name)
                .collect();
            if !missing.is_empty() {
                diagnostics.push(HarnessError::IncompleteCoverage {
                    suite: suite.to_owned(),
                    axis: axis.kind.label().to_owned(),
                    missing: missing.join(", "),
                });
            }
        }

        diagnostics
    }

    /// Fail with the first authoring defect, logging all of them.
    pub fn validate(&self, suite: &str) -> Result<()> {
        let mut diagnostics = self.diagnostics(suite);
        if diagnostics.is_empty() {
            return Ok(());
        }
        for diagnostic in &diagnostics {
            error!(suite, error = %diagnostic, "matrix authoring error");
        }
        Err(diagnostics.swap_remove(0))
    }

    /// Expand the validated matrix into included and opted-out configs.
    pub fn expand(&self, suite: &str) -> Result<MatrixExpansion> {
        self.validate(suite)?;

        let mut included = Vec::new();
        let mut excluded = Vec::new();
        for combination in cross_product(&self.axes) {
            let config = SuiteConfig::from_combination(&combination, &self.preview_features)
                .ok_or_else(|| HarnessError::internal("combination without provider value"))?;
            match self.opt_out.iter().find(|rule| rule.matches(&config)) {
                Some(rule) => {
                    debug!(suite, config = %config.label(), reason = %rule.reason, "combination opted out");
                    excluded.push(ExcludedSuite {
                        config,
                        reason: rule.reason.clone(),
                    });
                }
                None => included.push(config),
            }
        }

        if included.is_empty() {
            warn!(
                suite,
                excluded = excluded.len(),
                "every matrix combination is opted out; no suites will run"
            );
        }

        Ok(MatrixExpansion { included, excluded })
    }

    /// Parse a TOML matrix body (axes, opt-outs, preview features).
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| HarnessError::config_parse(err.to_string()))
    }
}

fn cross_product(axes: &[MatrixAxis]) -> Vec<Vec<AxisValue>> {
    let mut combinations: Vec<Vec<AxisValue>> = vec![Vec::new()];
    for axis in axes {
        let mut next = Vec::with_capacity(combinations.len() * axis.values.len());
        for prefix in &combinations {
            for value in &axis.values {
                let mut combination = prefix.clone();
                combination.push(*value);
                next.push(combination);
            }
        }
        combinations = next;
    }
    combinations
}

/// Named matrix as stored in a definition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixDefinition {
    pub name: String,
    #[serde(flatten)]
    pub options: MatrixOptions,
}

impl MatrixDefinition {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let definition: Self =
            toml::from_str(raw).map_err(|err| HarnessError::config_parse(err.to_string()))?;
        if definition.name.trim().is_empty() {
            return Err(HarnessError::config_parse("matrix name must be non-empty"));
        }
        Ok(definition)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(HarnessError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

/// A combination removed by an opt-out rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedSuite {
    pub config: SuiteConfig,
    pub reason: String,
}

/// Result of expanding a matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixExpansion {
    pub included: Vec<SuiteConfig>,
    pub excluded: Vec<ExcludedSuite>,
}

/// Per-suite metadata handed to the suite builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteMeta {
    pub suite_name: String,
    pub index: usize,
    /// Deterministic identifier, also used as the schema/database name.
    pub suite_id: String,
    pub schema: String,
    pub schema_sha256: String,
}

impl SuiteMeta {
    fn new(
        suite_name: &str,
        index: usize,
        config: &SuiteConfig,
        template: &dyn SchemaTemplate,
    ) -> Self {
        let suite_id = derive_suite_id(suite_name, config);
        let schema = template.render(&SchemaParams::from_config(config, &suite_id));
        let schema_sha256 = sha256_hex(schema.as_bytes());
        Self {
            suite_name: suite_name.to_owned(),
            index,
            suite_id,
            schema,
            schema_sha256,
        }
    }
}

/// `<slug>_<xxh3(label)>`; identical configs always map to the same id.
#[must_use]
pub fn derive_suite_id(suite_name: &str, config: &SuiteConfig) -> String {
    let slug: String = suite_name
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{slug}_{:016x}", xxh3_64(config.label().as_bytes()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

/// One included combination with its metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedSuite {
    pub config: SuiteConfig,
    pub meta: SuiteMeta,
}

/// Machine-readable view of an expanded matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixPlan {
    pub schema_version: u32,
    pub suite_name: String,
    pub total_combinations: usize,
    pub suites: Vec<PlannedSuite>,
    pub excluded: Vec<ExcludedSuite>,
}

impl MatrixPlan {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|err| HarnessError::serialization(err.to_string()))
    }
}

/// Validate, expand and template a matrix.
pub fn plan_matrix(
    suite_name: &str,
    options: &MatrixOptions,
    template: &dyn SchemaTemplate,
) -> Result<MatrixPlan> {
    if suite_name.trim().is_empty() {
        return Err(HarnessError::invalid_matrix(
            suite_name,
            "suite name must be non-empty",
        ));
    }
    let expansion = options.expand(suite_name)?;
    let suites: Vec<PlannedSuite> = expansion
        .included
        .into_iter()
        .enumerate()
        .map(|(index, config)| {
            let meta = SuiteMeta::new(suite_name, index, &config, template);
            PlannedSuite { config, meta }
        })
        .collect();

    info!(
        suite = suite_name,
        included = suites.len(),
        excluded = expansion.excluded.len(),
        "suite matrix planned"
    );

    Ok(MatrixPlan {
        schema_version: PLAN_SCHEMA_VERSION,
        suite_name: suite_name.to_owned(),
        total_combinations: suites.len() + expansion.excluded.len(),
        suites,
        excluded: expansion.excluded,
    })
}

/// Render an operator-friendly listing of the plan.
#[must_use]
pub fn render_plan(plan: &MatrixPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "suite_matrix name={} schema_version={} combinations={} included={} excluded={}",
        plan.suite_name,
        plan.schema_version,
        plan.total_combinations,
        plan.suites.len(),
        plan.excluded.len()
    );
    let _ = writeln!(out, "suites:");
    for suite in &plan.suites {
        let _ = writeln!(
            out,
            "- id={} {} schema_sha256={}",
            suite.meta.suite_id,
            suite.config.label(),
            &suite.meta.schema_sha256[..12]
        );
    }
    let _ = writeln!(out, "excluded:");
    for excluded in &plan.excluded {
        let _ = writeln!(
            out,
            "- {} reason={}",
            excluded.config.label(),
            excluded.reason
        );
    }
    out
}

/// Write plan JSON to a file path.
pub fn write_plan_json(path: &Path, plan: &MatrixPlan) -> Result<()> {
    let payload = plan.to_json()?;
    std::fs::write(path, payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RelationSchema;

    fn two_provider_matrix() -> MatrixOptions {
        MatrixOptions::new()
            .axis(MatrixAxis::providers([Provider::Postgresql, Provider::Mysql]))
            .axis(MatrixAxis::referential_integrity(ReferentialIntegrity::ALL))
            .opt_out(OptOutRule::providers(
                [
                    Provider::Cockroachdb,
                    Provider::Sqlserver,
                    Provider::Sqlite,
                    Provider::Mongodb,
                ],
                "only testing postgres-compatible and mysql engines here",
            ))
    }

    #[test]
    fn expansion_is_first_axis_outermost() {
        let expansion = two_provider_matrix().expand("order").expect("expand");
        let labels: Vec<(Provider, ReferentialIntegrity)> = expansion
            .included
            .iter()
            .map(|config| (config.provider(), config.referential_integrity()))
            .collect();
        assert_eq!(
            labels,
            vec![
                (Provider::Postgresql, ReferentialIntegrity::ForeignKeys),
                (Provider::Postgresql, ReferentialIntegrity::Prisma),
                (Provider::Mysql, ReferentialIntegrity::ForeignKeys),
                (Provider::Mysql, ReferentialIntegrity::Prisma),
            ]
        );
        assert!(expansion.excluded.is_empty());
    }

    #[test]
    fn missing_provider_axis_is_rejected() {
        let options =
            MatrixOptions::new().axis(MatrixAxis::referential_integrity(ReferentialIntegrity::ALL));
        let err = options.validate("no-provider").expect_err("must fail");
        assert!(err.is_authoring_error());
        assert!(err.to_string().contains("no provider axis"), "{err}");
    }

    #[test]
    fn uncovered_values_without_opt_out_are_rejected() {
        let options = MatrixOptions::new().axis(MatrixAxis::providers([Provider::Sqlite]));
        let err = options.validate("partial").expect_err("must fail");
        match err {
            HarnessError::IncompleteCoverage { axis, missing, .. } => {
                assert_eq!(axis, "provider");
                assert_eq!(missing, "postgresql, cockroachdb, mysql, sqlserver, mongodb");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn opt_out_requires_reason() {
        let options = MatrixOptions::new()
            .axis(MatrixAxis::providers(Provider::ALL))
            .opt_out(OptOutRule::providers([Provider::Mongodb], "   "));
        let err = options.validate("blank-reason").expect_err("must fail");
        assert!(matches!(err, HarnessError::OptOutWithoutReason { .. }), "{err}");
    }

    #[test]
    fn duplicate_and_mistyped_values_are_reported() {
        let options = MatrixOptions::new()
            .axis(MatrixAxis::new(
                AxisKind::Provider,
                [
                    AxisValue::Provider(Provider::Sqlite),
                    AxisValue::Provider(Provider::Sqlite),
                    AxisValue::OnDelete(ReferentialAction::Cascade),
                ],
            ))
            .axis(MatrixAxis::on_update([]));
        let rendered: Vec<String> = options
            .diagnostics("broken")
            .iter()
            .map(ToString::to_string)
            .collect();
        assert!(rendered.iter().any(|d| d.contains("listed twice")), "{rendered:?}");
        assert!(rendered.iter().any(|d| d.contains("does not belong")), "{rendered:?}");
        assert!(rendered.iter().any(|d| d.contains("has no values")), "{rendered:?}");
    }

    #[test]
    fn compound_opt_out_only_excludes_intersection() {
        let options = MatrixOptions::new()
            .axis(MatrixAxis::providers(Provider::ALL))
            .axis(MatrixAxis::referential_integrity(ReferentialIntegrity::ALL))
            .opt_out(OptOutRule::new(
                [
                    AxisValue::Provider(Provider::Mongodb),
                    AxisValue::ReferentialIntegrity(ReferentialIntegrity::ForeignKeys),
                ],
                "mongodb has no native foreign keys",
            ));
        let expansion = options.expand("compound").expect("expand");
        assert_eq!(expansion.included.len(), 11);
        assert_eq!(expansion.excluded.len(), 1);
        let excluded = &expansion.excluded[0].config;
        assert_eq!(excluded.provider(), Provider::Mongodb);
        assert_eq!(excluded.referential_integrity(), ReferentialIntegrity::ForeignKeys);
    }

    #[test]
    fn compound_opt_out_does_not_cover_value_missing_from_axis() {
        let options = MatrixOptions::new()
            .axis(MatrixAxis::providers(
                Provider::ALL.into_iter().filter(|p| *p != Provider::Mongodb),
            ))
            .axis(MatrixAxis::referential_integrity(ReferentialIntegrity::ALL))
            .opt_out(OptOutRule::new(
                [
                    AxisValue::Provider(Provider::Mongodb),
                    AxisValue::ReferentialIntegrity(ReferentialIntegrity::ForeignKeys),
                ],
                "mongodb has no native foreign keys",
            ));
        // mongodb/prisma is neither on an axis nor excluded by the rule.
        let err = options.validate("partial").expect_err("mongodb only partly opted out");
        assert!(
            matches!(err, HarnessError::IncompleteCoverage { ref axis, ref missing, .. }
                if axis == "provider" && missing == "mongodb"),
            "{err}"
        );

        let fixed = options.opt_out(OptOutRule::providers([Provider::Mongodb], "not provisioned"));
        let expansion = fixed.expand("partial").expect("fully covered");
        assert_eq!(expansion.included.len(), 10);
    }

    #[test]
    fn axis_value_text_form() {
        assert_eq!(
            "onDelete:SetNull".parse::<AxisValue>().expect("parse"),
            AxisValue::OnDelete(ReferentialAction::SetNull)
        );
        assert_eq!(
            "sqlite".parse::<AxisValue>().expect("parse"),
            AxisValue::Provider(Provider::Sqlite)
        );
        assert_eq!(
            "prisma".parse::<AxisValue>().expect("parse"),
            AxisValue::ReferentialIntegrity(ReferentialIntegrity::Prisma)
        );
        assert!("Cascade".parse::<AxisValue>().is_err());
        assert_eq!(
            AxisValue::OnUpdate(ReferentialAction::Default).to_string(),
            "onUpdate:DEFAULT"
        );
    }

    #[test]
    fn suite_ids_are_deterministic_and_distinct() {
        let plan = plan_matrix("Referential Integrity", &two_provider_matrix(), &RelationSchema::header_only())
            .expect("plan");
        let again = plan_matrix("Referential Integrity", &two_provider_matrix(), &RelationSchema::header_only())
            .expect("plan");
        assert_eq!(plan, again);
        let ids: BTreeSet<&str> = plan.suites.iter().map(|s| s.meta.suite_id.as_str()).collect();
        assert_eq!(ids.len(), plan.suites.len());
        assert!(plan.suites[0].meta.suite_id.starts_with("referential_integrity_"));
        assert_eq!(plan.suites[0].meta.schema_sha256.len(), 64);
    }

    #[test]
    fn toml_definition_parses() {
        let raw = r#"
name = "one-to-one"
preview_features = ["referentialIntegrity"]

[[axes]]
kind = "provider"
values = ["postgresql", "mysql", "sqlite"]

[[axes]]
kind = "onDelete"
values = ["DEFAULT", "Cascade", "Restrict", "NoAction", "SetNull", "SetDefault"]

[[opt_out]]
from = ["cockroachdb", "sqlserver", "mongodb"]
reason = "engines not provisioned in this lane"
"#;
        let definition = MatrixDefinition::from_toml_str(raw).expect("parse toml");
        assert_eq!(definition.name, "one-to-one");
        assert_eq!(definition.options.axes.len(), 2);
        assert_eq!(definition.options.axes[1].kind(), AxisKind::OnDelete);
        let expansion = definition.options.expand(&definition.name).expect("expand");
        assert_eq!(expansion.included.len(), 18);
        assert_eq!(
            expansion.included[0].preview_features(),
            &[PreviewFeature::new("referentialIntegrity")]
        );
    }

    #[test]
    fn toml_rejects_unknown_values() {
        let raw = r#"
[[axes]]
kind = "provider"
values = ["oracle"]
"#;
        let err = MatrixOptions::from_toml_str(raw).expect_err("oracle is unknown");
        assert!(matches!(err, HarnessError::ConfigParse { .. }));
        assert!(err.to_string().contains("oracle"), "{err}");
    }

    #[test]
    fn rendered_plan_lists_suites_and_exclusions() {
        let options = MatrixOptions::new()
            .axis(MatrixAxis::providers(Provider::ALL))
            .opt_out(OptOutRule::providers([Provider::Mongodb], "relations need SQL"));
        let plan = plan_matrix("render", &options, &RelationSchema::header_only()).expect("plan");
        let text = render_plan(&plan);
        assert!(text.starts_with("suite_matrix name=render schema_version=1 combinations=6"));
        assert!(text.contains("provider=sqlite referentialIntegrity=foreignKeys"));
        assert!(text.contains("excluded:\n- provider=mongodb"));
        assert!(text.contains("reason=relations need SQL"));
    }
}
