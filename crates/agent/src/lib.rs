//! The opsdesk question pipeline.
//!
//! Every question follows the same path:
//!
//! 1. **Scope** the data to what the user's role may see
//! 2. **Assemble** a bounded context bundle (full or minimal mode)
//! 3. **Answer** with the highest-ranked model tier that is not cooling down
//! 4. **Fall back** to deterministic local rules when no tier answers
//! 5. **Persist** the exchange in the user's history
//!
//! [`Assistant`] ties the stages together; each stage is usable on its own.

pub mod assistant;
pub mod context;
pub mod responder;
pub mod store;

pub use assistant::{AskOutcome, Assistant};
pub use context::{AssembledContext, ContextAssembler, ContextBudget, DropInfo, DropKind};
pub use responder::{LocalRuleResponder, QuestionKind};
pub use store::SnapshotStore;
