//! Domain data as seen by the assistant: roles, tables, and the read-only
//! store interface.
//!
//! The relational store that owns incidents, tickets, and datasets is an
//! external collaborator. The assistant only ever asks it for per-table
//! aggregates plus the most recent records, and only for tables the
//! caller's role is entitled to.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The caller's role, supplied by the authentication layer and trusted as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    SecurityAnalyst,
    ItSupport,
    DataAnalyst,
    Viewer,
}

impl UserRole {
    /// Tables this role may see. Single source of entitlement.
    pub fn entitled_tables(self) -> &'static [DomainTable] {
        match self {
            Self::Admin => &DomainTable::ALL,
            Self::SecurityAnalyst => &[DomainTable::CyberIncidents],
            Self::ItSupport => &[DomainTable::ItTickets],
            Self::DataAnalyst => &[DomainTable::Datasets],
            Self::Viewer => &[],
        }
    }

    pub fn can_see(self, table: DomainTable) -> bool {
        self.entitled_tables().contains(&table)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::SecurityAnalyst => "security_analyst",
            Self::ItSupport => "it_support",
            Self::DataAnalyst => "data_analyst",
            Self::Viewer => "viewer",
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "admin" => Ok(Self::Admin),
            "security_analyst" | "security" | "analyst" => Ok(Self::SecurityAnalyst),
            "it_support" | "it" | "support" => Ok(Self::ItSupport),
            "data_analyst" | "data" => Ok(Self::DataAnalyst),
            "viewer" => Ok(Self::Viewer),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

/// A domain table the assistant can summarize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainTable {
    CyberIncidents,
    ItTickets,
    Datasets,
}

impl DomainTable {
    pub const ALL: [DomainTable; 3] = [Self::CyberIncidents, Self::ItTickets, Self::Datasets];

    pub fn key(self) -> &'static str {
        match self {
            Self::CyberIncidents => "cyber_incidents",
            Self::ItTickets => "it_tickets",
            Self::Datasets => "datasets",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::CyberIncidents => "Cyber incidents",
            Self::ItTickets => "IT tickets",
            Self::Datasets => "Datasets",
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::CyberIncidents => &[
                "incident", "cyber", "attack", "breach", "malware", "phishing", "threat",
                "vulnerability", "ransomware",
            ],
            Self::ItTickets => &["ticket", "helpdesk", "help desk", "outage", "it support", "request"],
            Self::Datasets => &["dataset", "data set", "csv", "upload", "rows"],
        }
    }

    /// Guess which table a question is about from its wording.
    ///
    /// The table with the most keyword hits wins; ties go to the earlier
    /// table in [`DomainTable::ALL`]. `None` when nothing matches.
    pub fn detect(question: &str) -> Option<DomainTable> {
        let lower = question.to_lowercase();
        let mut best: Option<(DomainTable, usize)> = None;
        for table in Self::ALL {
            let hits = table.keywords().iter().filter(|k| lower.contains(*k)).count();
            if hits > 0 && best.is_none_or(|(_, n)| hits > n) {
                best = Some((table, hits));
            }
        }
        best.map(|(t, _)| t)
    }
}

impl std::fmt::Display for DomainTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// One row from a domain table, split by field kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,

    /// Low-cardinality fields: status, severity, priority, category...
    #[serde(default)]
    pub categorical: BTreeMap<String, String>,

    #[serde(default)]
    pub numeric: BTreeMap<String, f64>,

    /// Free text: title, description, notes...
    #[serde(default)]
    pub text: BTreeMap<String, String>,
}

/// A value and how many rows carry it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: u64,
}

/// Value counts for one categorical field, most frequent first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakdown {
    pub field: String,
    pub counts: Vec<ValueCount>,
}

impl Breakdown {
    /// Count for `value`, compared case-insensitively.
    pub fn count_of(&self, value: &str) -> Option<u64> {
        self.counts
            .iter()
            .find(|c| c.value.eq_ignore_ascii_case(value))
            .map(|c| c.count)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericSummary {
    pub field: String,
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

/// What the store returns for one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub table: DomainTable,
    pub total_count: u64,
    pub breakdowns: Vec<Breakdown>,
    pub numeric: Vec<NumericSummary>,
    /// Most recent records, newest first.
    pub recent: Vec<DomainRecord>,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

impl TableSnapshot {
    pub fn empty(table: DomainTable) -> Self {
        Self {
            table,
            total_count: 0,
            breakdowns: Vec::new(),
            numeric: Vec::new(),
            recent: Vec::new(),
            earliest: None,
            latest: None,
        }
    }
}

/// Read-only query interface to the external domain store.
#[async_trait]
pub trait DomainStore: Send + Sync {
    /// Aggregates plus the `recent_limit` newest records of `table`.
    async fn snapshot(
        &self,
        table: DomainTable,
        recent_limit: usize,
    ) -> std::result::Result<TableSnapshot, StoreError>;
}
