//! Per-suite schema templating.
//!
//! Each expanded suite gets its own schema text: a generator block, a
//! datasource block pointing at the provider's connection variable, and the
//! suite's models with their relation attributes carrying the suite's
//! referential actions.

use std::fmt::Write as _;

use crate::matrix::SuiteConfig;
use crate::provider::{
    AxisDomain, PreviewFeature, Provider, ReferentialActions, ReferentialIntegrity,
};

/// Placeholder in model text replaced by the referential action clause.
pub const ACTIONS_PLACEHOLDER: &str = "{actions}";

/// Resolved axis values a template renders from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaParams<'a> {
    pub provider: Provider,
    pub preview_features: &'a [PreviewFeature],
    pub referential_integrity: ReferentialIntegrity,
    pub referential_actions: ReferentialActions,
    pub suite_id: &'a str,
}

impl<'a> SchemaParams<'a> {
    #[must_use]
    pub fn from_config(config: &'a SuiteConfig, suite_id: &'a str) -> Self {
        Self {
            provider: config.provider(),
            preview_features: config.preview_features(),
            referential_integrity: config.referential_integrity(),
            referential_actions: config.referential_actions(),
            suite_id,
        }
    }
}

/// Produces the schema text for one suite.
pub trait SchemaTemplate {
    fn render(&self, params: &SchemaParams<'_>) -> String;
}

impl<F> SchemaTemplate for F
where
    F: Fn(&SchemaParams<'_>) -> String,
{
    fn render(&self, params: &SchemaParams<'_>) -> String {
        self(params)
    }
}

/// Header plus model text with `{actions}` substituted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationSchema {
    models: String,
}

impl RelationSchema {
    #[must_use]
    pub fn new(models: impl Into<String>) -> Self {
        Self {
            models: models.into(),
        }
    }

    /// Template that renders only the generator and datasource blocks.
    #[must_use]
    pub fn header_only() -> Self {
        Self::default()
    }
}

impl SchemaTemplate for RelationSchema {
    fn render(&self, params: &SchemaParams<'_>) -> String {
        let mut schema = render_schema_header(params);
        if !self.models.trim().is_empty() {
            let clause = referential_action_clause(params.referential_actions);
            schema.push('\n');
            schema.push_str(&self.models.replace(ACTIONS_PLACEHOLDER, &clause));
            if !schema.ends_with('\n') {
                schema.push('\n');
            }
        }
        schema
    }
}

/// Generator and datasource blocks.
///
/// MongoDB gets no `referentialIntegrity` line: it has no foreign keys to
/// choose between.
#[must_use]
pub fn render_schema_header(params: &SchemaParams<'_>) -> String {
    let preview = params
        .preview_features
        .iter()
        .map(|feature| format!("\"{feature}\""))
        .collect::<Vec<_>>()
        .join(", ");

    let mut out = String::new();
    let _ = writeln!(out, "// suite {}", params.suite_id);
    let _ = writeln!(out, "generator client {{");
    let _ = writeln!(out, "  provider        = \"prisma-client-js\"");
    let _ = writeln!(out, "  previewFeatures = [{preview}]");
    let _ = writeln!(out, "}}");
    let _ = writeln!(out);
    let _ = writeln!(out, "datasource db {{");
    let _ = writeln!(out, "  provider = \"{}\"", params.provider.as_str());
    let _ = writeln!(out, "  url      = env(\"{}\")", params.provider.url_env_var());
    if params.provider.supports_foreign_keys() {
        let _ = writeln!(
            out,
            "  referentialIntegrity = \"{}\"",
            params.referential_integrity.as_str()
        );
    }
    let _ = writeln!(out, "}}");
    out
}

/// `, onUpdate: X, onDelete: Y` with `DEFAULT` entries left out.
#[must_use]
pub fn referential_action_clause(actions: ReferentialActions) -> String {
    let mut clause = String::new();
    if !actions.on_update.is_default() {
        let _ = write!(clause, ", onUpdate: {}", actions.on_update.as_str());
    }
    if !actions.on_delete.is_default() {
        let _ = write!(clause, ", onDelete: {}", actions.on_delete.as_str());
    }
    clause
}
