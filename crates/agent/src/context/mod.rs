//! Context assembly: role-scoped, size-bounded data bundles.
//!
//! | Stage | Source | Trim Strategy |
//! |-------|--------|---------------|
//! | Records | Newest rows per table | Oldest dropped first, focus table last |
//! | Aggregates | Breakdowns, numeric summaries | Least-recent table first |
//! | Sections | Whole tables | Least-recent first, focus table last |

pub mod assembler;

pub use assembler::{AssembledContext, ContextAssembler, ContextBudget, DropInfo, DropKind};
