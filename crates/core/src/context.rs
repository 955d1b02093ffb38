//! Context bundle — the per-query, read-only snapshot handed to the model.
//!
//! A bundle is recomputed for every question and never persisted. Its
//! compact JSON form is what gets measured against the size ceiling and
//! what gets embedded in the remote prompt.

use crate::domain::{Breakdown, DomainTable, NumericSummary, UserRole};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Operating mode for context assembly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Descriptive text fields included (capped per field).
    #[default]
    Full,
    /// Identifiers, counts and categorical breakdowns only.
    Minimal,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Minimal => "minimal",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "full" => Ok(Self::Full),
            "minimal" | "min" => Ok(Self::Minimal),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

/// A trimmed view of one domain record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordDigest {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    /// Free text, present only in full mode.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub text: BTreeMap<String, String>,
}

/// Everything the bundle says about one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSection {
    pub table: DomainTable,
    pub total_count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breakdowns: Vec<Breakdown>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub numeric: Vec<NumericSummary>,
    /// Newest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recent: Vec<RecordDigest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub earliest: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest: Option<DateTime<Utc>>,
}

impl TableSection {
    pub fn has_aggregates(&self) -> bool {
        !self.breakdowns.is_empty() || !self.numeric.is_empty()
    }
}

/// Bounded, role-scoped snapshot of domain data for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextBundle {
    pub role: UserRole,
    pub mode: Mode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<DomainTable>,
    pub sections: Vec<TableSection>,
    /// Set when anything was dropped to meet the size ceiling.
    #[serde(default)]
    pub truncated: bool,
    /// Tables the store could not answer for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<DomainTable>,
}

impl ContextBundle {
    pub fn empty(role: UserRole, mode: Mode) -> Self {
        Self {
            role,
            mode,
            focus: None,
            sections: Vec::new(),
            truncated: false,
            unavailable: Vec::new(),
        }
    }

    /// Compact JSON, as measured and as sent.
    pub fn serialized(&self) -> String {
        // Plain data with string keys; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Size in characters of [`ContextBundle::serialized`].
    pub fn serialized_len(&self) -> usize {
        self.serialized().chars().count()
    }

    pub fn total_records(&self) -> u64 {
        self.sections.iter().map(|s| s.total_count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// A responder that can always answer from a bundle with no network access.
pub trait LocalResponder: Send + Sync {
    /// Never fails and never returns an empty string.
    fn respond(&self, question: &str, bundle: &ContextBundle) -> String;
}
