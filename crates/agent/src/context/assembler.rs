//! Context assembly: the bounded, role-scoped data snapshot for one query.
//!
//! Sections are built in a fixed order:
//!
//! | Position | Section                    | Condition                 |
//! |----------|----------------------------|---------------------------|
//! | 1        | Focus table                | entitled and detected     |
//! | 2..      | Remaining entitled tables  | fixed [`DomainTable::ALL`] order |
//!
//! Then the serialized bundle is trimmed until it fits `max_chars`,
//! dropping the least valuable content first:
//!
//! 1. **Record digests**: oldest first, non-focus sections before focus
//! 2. **Aggregates**: least-recent section first, focus last
//! 3. **Whole sections**: least-recent first, focus last
//!
//! # Determinism
//!
//! Identical store contents, role, mode and focus always produce an
//! identical bundle. Nothing here reads the clock.

use opsdesk_config::{ContextConfig, MIN_CONTEXT_CHARS};
use opsdesk_core::context::{ContextBundle, Mode, RecordDigest, TableSection};
use opsdesk_core::domain::{DomainRecord, DomainStore, DomainTable, TableSnapshot, UserRole};
use opsdesk_core::message::truncate_chars;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

// ── Types ─────────────────────────────────────────────────────────────────

/// Size and shape limits for one bundle.
#[derive(Debug, Clone)]
pub struct ContextBudget {
    /// Ceiling on the serialized bundle, in characters.
    pub max_chars: usize,
    /// Newest records requested per table.
    pub recent_records: usize,
    /// Cap on each free-text field in full mode.
    pub field_char_cap: usize,
}

impl Default for ContextBudget {
    fn default() -> Self {
        Self {
            max_chars: 6000,
            recent_records: 5,
            field_char_cap: 160,
        }
    }
}

impl From<&ContextConfig> for ContextBudget {
    fn from(config: &ContextConfig) -> Self {
        Self {
            max_chars: config.max_chars.max(MIN_CONTEXT_CHARS),
            recent_records: config.recent_records,
            field_char_cap: config.field_char_cap,
        }
    }
}

/// What was dropped from which section to meet the ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropInfo {
    pub table: DomainTable,
    pub kind: DropKind,
    pub items_dropped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropKind {
    Records,
    Aggregates,
    Section,
}

/// A bundle plus the record of how it was trimmed.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub bundle: ContextBundle,
    pub drops: Vec<DropInfo>,
}

// ── Assembler ─────────────────────────────────────────────────────────────

/// The context assembler. Stateless; create one and reuse it.
pub struct ContextAssembler {
    budget: ContextBudget,
}

impl ContextAssembler {
    pub fn new(budget: ContextBudget) -> Self {
        Self { budget }
    }

    /// Create an assembler with the default budget (6000 characters).
    pub fn with_default_budget() -> Self {
        Self::new(ContextBudget::default())
    }

    pub fn budget(&self) -> &ContextBudget {
        &self.budget
    }

    /// Build the bundle for `role` in `mode`, focusing on `focus` if entitled.
    pub async fn assemble(
        &self,
        store: &dyn DomainStore,
        role: UserRole,
        mode: Mode,
        focus: Option<DomainTable>,
    ) -> ContextBundle {
        self.assemble_detailed(store, role, mode, focus).await.bundle
    }

    /// Like [`ContextAssembler::assemble`], also reporting what was trimmed.
    pub async fn assemble_detailed(
        &self,
        store: &dyn DomainStore,
        role: UserRole,
        mode: Mode,
        focus: Option<DomainTable>,
    ) -> AssembledContext {
        let focus = focus.filter(|t| role.can_see(*t));
        let mut bundle = ContextBundle::empty(role, mode);
        bundle.focus = focus;

        for table in Self::table_order(role, focus) {
            match store.snapshot(table, self.budget.recent_records).await {
                Ok(snapshot) => bundle.sections.push(self.section_from(snapshot, mode)),
                Err(e) => {
                    warn!(table = %table, error = %e, "Domain store failed; omitting table");
                    bundle.unavailable.push(table);
                }
            }
        }

        let drops = self.enforce_ceiling(&mut bundle);
        let size = bundle.serialized_len();
        debug!(
            role = %role,
            mode = %mode,
            sections = bundle.sections.len(),
            chars = size,
            truncated = bundle.truncated,
            "Context assembled"
        );

        AssembledContext { bundle, drops }
    }

    /// Entitled tables, focus first, the rest in fixed order.
    fn table_order(role: UserRole, focus: Option<DomainTable>) -> Vec<DomainTable> {
        let mut order: Vec<DomainTable> = focus.into_iter().collect();
        order.extend(
            role.entitled_tables()
                .iter()
                .copied()
                .filter(|t| Some(*t) != focus),
        );
        order
    }

    fn section_from(&self, snapshot: TableSnapshot, mode: Mode) -> TableSection {
        TableSection {
            table: snapshot.table,
            total_count: snapshot.total_count,
            breakdowns: snapshot.breakdowns,
            numeric: snapshot.numeric,
            recent: snapshot
                .recent
                .iter()
                .map(|r| self.digest(r, mode))
                .collect(),
            earliest: snapshot.earliest,
            latest: snapshot.latest,
        }
    }

    fn digest(&self, record: &DomainRecord, mode: Mode) -> RecordDigest {
        let mut fields = record.categorical.clone();
        let mut text = BTreeMap::new();

        if mode == Mode::Full {
            for (name, value) in &record.numeric {
                fields.insert(name.clone(), format_number(*value));
            }
            for (name, value) in &record.text {
                text.insert(name.clone(), truncate_chars(value, self.budget.field_char_cap));
            }
        }

        RecordDigest {
            id: record.id.clone(),
            created_at: record.created_at,
            fields,
            text,
        }
    }

    // ── Budget enforcement ────────────────────────────────────────────────

    fn enforce_ceiling(&self, bundle: &mut ContextBundle) -> Vec<DropInfo> {
        let mut drops: Vec<DropInfo> = Vec::new();

        while bundle.serialized_len() > self.budget.max_chars {
            let Some(step) = next_trim(bundle) else {
                // Only the skeleton is left; validation keeps max_chars above it.
                break;
            };
            bundle.truncated = true;

            let (table, kind) = match step {
                Trim::Record(i) => {
                    bundle.sections[i].recent.pop();
                    (bundle.sections[i].table, DropKind::Records)
                }
                Trim::Aggregates(i) => {
                    let section = &mut bundle.sections[i];
                    section.breakdowns.clear();
                    section.numeric.clear();
                    (section.table, DropKind::Aggregates)
                }
                Trim::Section(i) => (bundle.sections.remove(i).table, DropKind::Section),
            };

            match drops.iter_mut().find(|d| d.table == table && d.kind == kind) {
                Some(d) => d.items_dropped += 1,
                None => drops.push(DropInfo {
                    table,
                    kind,
                    items_dropped: 1,
                }),
            }
        }

        if !drops.is_empty() {
            debug!(?drops, "Context trimmed to fit ceiling");
        }
        drops
    }
}

enum Trim {
    Record(usize),
    Aggregates(usize),
    Section(usize),
}

/// Pick the next thing to drop, or `None` if nothing is left.
fn next_trim(bundle: &ContextBundle) -> Option<Trim> {
    let focus = bundle.focus;
    let is_focus = |s: &TableSection| Some(s.table) == focus;

    // Indices with non-focus sections first, focus last.
    let mut order: Vec<usize> = (0..bundle.sections.len())
        .filter(|&i| !is_focus(&bundle.sections[i]))
        .collect();
    order.extend((0..bundle.sections.len()).filter(|&i| is_focus(&bundle.sections[i])));

    // 1. Oldest record digest, non-focus sections before the focus section.
    for group in [false, true] {
        let oldest = order
            .iter()
            .copied()
            .filter(|&i| is_focus(&bundle.sections[i]) == group)
            .filter_map(|i| bundle.sections[i].recent.last().map(|r| (r.created_at, i)))
            .min();
        if let Some((_, i)) = oldest {
            return Some(Trim::Record(i));
        }
    }

    // 2. Aggregates of the least-recent section.
    if let Some(i) = least_recent(bundle, &order, |s| s.has_aggregates()) {
        return Some(Trim::Aggregates(i));
    }

    // 3. Whole sections.
    least_recent(bundle, &order, |_| true).map(Trim::Section)
}

/// Among candidates in `order`, the non-focus section with the oldest
/// `latest` timestamp (missing counts as oldest), falling back to focus.
fn least_recent(
    bundle: &ContextBundle,
    order: &[usize],
    candidate: impl Fn(&TableSection) -> bool,
) -> Option<usize> {
    let focus = bundle.focus;
    for group in [false, true] {
        let pick = order
            .iter()
            .copied()
            .filter(|&i| (Some(bundle.sections[i].table) == focus) == group)
            .filter(|&i| candidate(&bundle.sections[i]))
            .min_by_key(|&i| bundle.sections[i].latest);
        if pick.is_some() {
            return pick;
        }
    }
    None
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value:.2}")
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
