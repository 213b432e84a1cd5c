//! Typed axis domains: database providers, referential integrity modes and
//! referential actions.
//!
//! Every domain enum exposes its full universe through [`AxisDomain`], which
//! the matrix coverage check compares declared axes against.

use std::fmt;
use std::str::FromStr;

use ormtest_error::HarnessError;
use serde::{Deserialize, Serialize};

/// A closed set of values that can form one matrix axis.
pub trait AxisDomain: Copy + Ord + fmt::Display + 'static {
    /// Axis label used in diagnostics and config files.
    const LABEL: &'static str;

    /// Every legal value, in canonical order.
    fn universe() -> &'static [Self];

    /// Stable wire name of this value.
    fn as_str(self) -> &'static str;

    /// Parse a wire name, case-insensitively.
    fn parse_name(raw: &str) -> Result<Self, HarnessError> {
        let needle = raw.trim();
        Self::universe()
            .iter()
            .copied()
            .find(|value| value.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| HarnessError::unknown_value(Self::LABEL, raw))
    }
}

/// Backing database engine targeted by a suite run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Postgresql,
    Cockroachdb,
    Mysql,
    Sqlserver,
    Sqlite,
    Mongodb,
}

impl Provider {
    pub const ALL: [Self; 6] = [
        Self::Postgresql,
        Self::Cockroachdb,
        Self::Mysql,
        Self::Sqlserver,
        Self::Sqlite,
        Self::Mongodb,
    ];

    /// Whether the engine enforces foreign keys natively.
    #[must_use]
    pub const fn supports_foreign_keys(self) -> bool {
        !matches!(self, Self::Mongodb)
    }

    /// Environment variable carrying the connection string for this provider.
    #[must_use]
    pub fn url_env_var(self) -> String {
        format!("DATABASE_URI_{}", self.as_str())
    }
}

impl AxisDomain for Provider {
    const LABEL: &'static str = "provider";

    fn universe() -> &'static [Self] {
        &Self::ALL
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Postgresql => "postgresql",
            Self::Cockroachdb => "cockroachdb",
            Self::Mysql => "mysql",
            Self::Sqlserver => "sqlserver",
            Self::Sqlite => "sqlite",
            Self::Mongodb => "mongodb",
        }
    }
}

/// Where relational constraints are enforced.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ReferentialIntegrity {
    /// Native foreign keys in the backing store.
    #[default]
    #[serde(rename = "foreignKeys")]
    ForeignKeys,
    /// Emulated by the client library.
    #[serde(rename = "prisma")]
    Prisma,
}

impl ReferentialIntegrity {
    pub const ALL: [Self; 2] = [Self::ForeignKeys, Self::Prisma];
}

impl AxisDomain for ReferentialIntegrity {
    const LABEL: &'static str = "referentialIntegrity";

    fn universe() -> &'static [Self] {
        &Self::ALL
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::ForeignKeys => "foreignKeys",
            Self::Prisma => "prisma",
        }
    }
}

/// Behaviour applied to dependent rows when a referenced row changes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ReferentialAction {
    /// No explicit action; the engine default applies.
    #[default]
    #[serde(rename = "DEFAULT")]
    Default,
    Cascade,
    Restrict,
    NoAction,
    SetNull,
    SetDefault,
}

impl ReferentialAction {
    pub const ALL: [Self; 6] = [
        Self::Default,
        Self::Cascade,
        Self::Restrict,
        Self::NoAction,
        Self::SetNull,
        Self::SetDefault,
    ];

    /// True for the implicit engine default.
    #[must_use]
    pub const fn is_default(self) -> bool {
        matches!(self, Self::Default)
    }

    /// Whether this action is one of `candidates`.
    #[must_use]
    pub fn is_any_of(self, candidates: &[Self]) -> bool {
        candidates.contains(&self)
    }
}

impl AxisDomain for ReferentialAction {
    const LABEL: &'static str = "referentialAction";

    fn universe() -> &'static [Self] {
        &Self::ALL
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Default => "DEFAULT",
            Self::Cascade => "Cascade",
            Self::Restrict => "Restrict",
            Self::NoAction => "NoAction",
            Self::SetNull => "SetNull",
            Self::SetDefault => "SetDefault",
        }
    }
}

/// The `onUpdate`/`onDelete` pair attached to a relation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct ReferentialActions {
    pub on_update: ReferentialAction,
    pub on_delete: ReferentialAction,
}

impl ReferentialActions {
    #[must_use]
    pub const fn new(on_update: ReferentialAction, on_delete: ReferentialAction) -> Self {
        Self {
            on_update,
            on_delete,
        }
    }
}

/// Name of an ORM preview feature enabled in the generated schema.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PreviewFeature(String);

impl PreviewFeature {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PreviewFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! domain_display_and_parse {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }

            impl FromStr for $ty {
                type Err = HarnessError;

                fn from_str(raw: &str) -> Result<Self, Self::Err> {
                    Self::parse_name(raw)
                }
            }
        )+
    };
}

domain_display_and_parse!(Provider, ReferentialIntegrity, ReferentialAction);
