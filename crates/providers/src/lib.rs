//! Remote model access for opsdesk.
//!
//! The OpenAI-compatible client classifies every failure. The quota table
//! tracks cooldowns per quota group, and the fallback orchestrator walks
//! the ranked tiers, ending at the local responder when none can answer.

pub mod fallback;
pub mod openai_compat;
pub mod quota;
pub mod router;

pub use fallback::{
    Answer, AnswerSource, Attempt, AttemptOutcome, ModelFallbackOrchestrator, RetryPolicy,
    TierHandle,
};
pub use openai_compat::OpenAiCompatProvider;
pub use quota::{Availability, ModelTier, QuotaState, QuotaTable};
pub use router::{build_orchestrator, build_tiers, build_tiers_with};
