//! Snapshot-backed domain store.
//!
//! Holds rows for each table in memory and computes aggregates on demand.
//! The CLI loads it from a JSON export shaped like
//! `{"cyber_incidents": [...], "it_tickets": [...], "datasets": [...]}`;
//! tests build it in code.

use async_trait::async_trait;
use opsdesk_core::domain::{
    Breakdown, DomainRecord, DomainStore, DomainTable, NumericSummary, TableSnapshot, ValueCount,
};
use opsdesk_core::error::StoreError;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone)]
pub struct SnapshotStore {
    tables: HashMap<DomainTable, Vec<DomainRecord>>,
    /// Set when the snapshot could not be loaded; every query fails with it.
    failure: Option<String>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add rows to a table.
    pub fn with_records(mut self, table: DomainTable, records: Vec<DomainRecord>) -> Self {
        self.tables.entry(table).or_default().extend(records);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, StoreError> {
        let parsed: BTreeMap<DomainTable, Vec<DomainRecord>> = serde_json::from_str(json)
            .map_err(|e| StoreError::Unavailable(format!("Invalid data snapshot: {e}")))?;
        Ok(Self {
            tables: parsed.into_iter().collect(),
            failure: None,
        })
    }

    /// A store that answers every query with `QueryFailed`.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            tables: HashMap::new(),
            failure: Some(reason.into()),
        }
    }

    /// Like [`load`](Self::load), but a broken snapshot becomes a failed
    /// store so questions still get answered.
    pub fn load_or_failed(path: &Path) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Data snapshot unusable; answering without it");
            Self::failed(e.to_string())
        })
    }

    /// Load from a JSON file. A missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            info!(path = %path.display(), "No data snapshot found; starting empty");
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Unavailable(format!("Failed to read {}: {e}", path.display())))?;
        let store = Self::from_json_str(&content)?;
        debug!(path = %path.display(), records = store.len(), "Data snapshot loaded");
        Ok(store)
    }

    /// Total rows across all tables.
    pub fn len(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn build_snapshot(table: DomainTable, rows: &[DomainRecord], recent_limit: usize) -> TableSnapshot {
        let mut by_field: BTreeMap<&str, BTreeMap<&str, u64>> = BTreeMap::new();
        let mut numbers: BTreeMap<&str, Vec<f64>> = BTreeMap::new();

        for row in rows {
            for (field, value) in &row.categorical {
                *by_field
                    .entry(field.as_str())
                    .or_default()
                    .entry(value.as_str())
                    .or_default() += 1;
            }
            for (field, value) in &row.numeric {
                if value.is_finite() {
                    numbers.entry(field.as_str()).or_default().push(*value);
                }
            }
        }

        let breakdowns = by_field
            .into_iter()
            .map(|(field, counts)| {
                let mut counts: Vec<ValueCount> = counts
                    .into_iter()
                    .map(|(value, count)| ValueCount {
                        value: value.to_string(),
                        count,
                    })
                    .collect();
                counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
                Breakdown {
                    field: field.to_string(),
                    counts,
                }
            })
            .collect();

        let numeric = numbers
            .into_iter()
            .map(|(field, values)| {
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                NumericSummary {
                    field: field.to_string(),
                    count: values.len() as u64,
                    min,
                    max,
                    mean,
                }
            })
            .collect();

        let mut ordered: Vec<&DomainRecord> = rows.iter().collect();
        ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        TableSnapshot {
            table,
            total_count: rows.len() as u64,
            breakdowns,
            numeric,
            latest: ordered.first().map(|r| r.created_at),
            earliest: ordered.last().map(|r| r.created_at),
            recent: ordered.into_iter().take(recent_limit).cloned().collect(),
        }
    }
}

#[async_trait]
impl DomainStore for SnapshotStore {
    async fn snapshot(&self, table: DomainTable, recent_limit: usize) -> Result<TableSnapshot, StoreError> {
        if let Some(reason) = &self.failure {
            return Err(StoreError::QueryFailed {
                table: table.key().to_string(),
                reason: reason.clone(),
            });
        }
        Ok(match self.tables.get(&table) {
            Some(rows) => Self::build_snapshot(table, rows, recent_limit),
            None => TableSnapshot::empty(table),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn ticket(id: &str, day: i64, status: &str, hours: f64) -> DomainRecord {
        DomainRecord {
            id: id.into(),
            created_at: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap() + Duration::days(day),
            categorical: BTreeMap::from([("status".to_string(), status.to_string())]),
            numeric: BTreeMap::from([("hours".to_string(), hours)]),
            text: BTreeMap::new(),
        }
    }

    fn store() -> SnapshotStore {
        SnapshotStore::new().with_records(
            DomainTable::ItTickets,
            vec![
                ticket("T-1", 1, "Open", 2.0),
                ticket("T-2", 5, "Closed", 4.0),
                ticket("T-3", 3, "Open", 6.0),
                ticket("T-4", 2, "Pending", 8.0),
            ],
        )
    }

    #[tokio::test]
    async fn aggregates_are_computed() {
        let snap = store().snapshot(DomainTable::ItTickets, 2).await.unwrap();
        assert_eq!(snap.total_count, 4);

        let status = &snap.breakdowns[0];
        assert_eq!(status.field, "status");
        assert_eq!(status.counts[0].value, "Open");
        assert_eq!(status.counts[0].count, 2);
        // Ties are broken alphabetically.
        assert_eq!(status.counts[1].value, "Closed");

        let hours = &snap.numeric[0];
        assert_eq!((hours.min, hours.max, hours.mean), (2.0, 8.0, 5.0));
    }

    #[tokio::test]
    async fn recent_is_newest_first_and_limited() {
        let snap = store().snapshot(DomainTable::ItTickets, 2).await.unwrap();
        let ids: Vec<&str> = snap.recent.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["T-2", "T-3"]);
        assert_eq!(snap.latest, Some(snap.recent[0].created_at));
        assert!(snap.earliest < snap.latest);
    }

    #[tokio::test]
    async fn unknown_table_is_empty() {
        let snap = store().snapshot(DomainTable::Datasets, 5).await.unwrap();
        assert_eq!(snap.total_count, 0);
        assert!(snap.recent.is_empty());
    }

    #[test]
    fn parses_json_export() {
        let json = r#"{
            "cyber_incidents": [
                {"id": "INC-1", "created_at": "2026-01-05T10:00:00Z",
                 "categorical": {"severity": "High"}, "text": {"title": "Phishing"}}
            ]
        }"#;
        let store = SnapshotStore::from_json_str(json).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn invalid_json_is_unavailable() {
        assert!(matches!(
            SnapshotStore::from_json_str("[1, 2"),
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn corrupt_file_becomes_failed_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = SnapshotStore::load_or_failed(&path);
        for table in DomainTable::ALL {
            assert!(matches!(
                store.snapshot(table, 5).await,
                Err(StoreError::QueryFailed { .. })
            ));
        }
    }

    #[test]
    fn missing_file_is_empty_store() {
        let store = SnapshotStore::load(Path::new("/definitely/not/here.json")).unwrap();
        assert!(store.is_empty());
    }
}
