//! The assistant pipeline: one question in, one answer out.
//!
//! 1. **Mode**: the requested mode (which becomes the session mode) or the
//!    user's session mode, `Full` by default
//! 2. **History**: load the user's conversation (failure → empty + warning)
//! 3. **Context**: assemble a role-scoped bundle, focused on the table the
//!    question seems to be about
//! 4. **Answer**: remote tiers via the orchestrator, local rules as the floor
//! 5. **Persist**: question and answer appended as one group
//!
//! `ask` never fails. Persistence problems surface as a warning on the
//! outcome; the answer is still returned.

use crate::context::{ContextAssembler, ContextBudget};
use crate::responder::LocalRuleResponder;
use opsdesk_config::AppConfig;
use opsdesk_core::context::{LocalResponder, Mode};
use opsdesk_core::domain::{DomainStore, DomainTable, UserRole};
use opsdesk_core::history::ChatHistoryStore;
use opsdesk_core::message::{Message, MessageMetadata};
use opsdesk_providers::{
    AnswerSource, ModelFallbackOrchestrator, QuotaTable, TierHandle, build_orchestrator,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Result of one `ask`.
#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub answer: String,
    /// Which tier answered, or the local responder.
    pub source: AnswerSource,
    /// Mode in effect for the user's next question.
    pub mode: Mode,
    /// Non-fatal problems, e.g. the exchange could not be saved.
    pub warning: Option<String>,
}

/// The question-answering pipeline shared by every user of a process.
pub struct Assistant {
    store: Arc<dyn DomainStore>,
    history: Arc<dyn ChatHistoryStore>,
    assembler: ContextAssembler,
    orchestrator: ModelFallbackOrchestrator,
    responder: Arc<dyn LocalResponder>,
    modes: Mutex<HashMap<String, Mode>>,
    max_message_chars: usize,
}

impl Assistant {
    /// Create an assistant. The orchestrator decides which tiers exist.
    pub fn new(
        store: Arc<dyn DomainStore>,
        history: Arc<dyn ChatHistoryStore>,
        orchestrator: ModelFallbackOrchestrator,
    ) -> Self {
        Self {
            store,
            history,
            assembler: ContextAssembler::with_default_budget(),
            orchestrator,
            responder: Arc::new(LocalRuleResponder::new()),
            modes: Mutex::new(HashMap::new()),
            max_message_chars: 4000,
        }
    }

    /// Wire everything from configuration. Pass the tiers from
    /// `opsdesk_providers::build_tiers` (empty when there is no API key).
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn DomainStore>,
        history: Arc<dyn ChatHistoryStore>,
        tiers: Vec<TierHandle>,
        quota: Arc<QuotaTable>,
    ) -> Self {
        let responder: Arc<dyn LocalResponder> = Arc::new(LocalRuleResponder::new());
        let orchestrator = build_orchestrator(config, tiers, quota, responder.clone());
        Self {
            responder,
            assembler: ContextAssembler::new(ContextBudget::from(&config.context)),
            max_message_chars: config.history.max_message_chars,
            ..Self::new(store, history, orchestrator)
        }
    }

    pub fn with_max_message_chars(mut self, max: usize) -> Self {
        self.max_message_chars = max;
        self
    }

    pub fn orchestrator(&self) -> &ModelFallbackOrchestrator {
        &self.orchestrator
    }

    fn modes(&self) -> MutexGuard<'_, HashMap<String, Mode>> {
        self.modes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The mode the user's next question will use.
    pub fn session_mode(&self, user_id: &str) -> Mode {
        self.modes().get(user_id).copied().unwrap_or_default()
    }

    /// Return the user's session to `Full`.
    pub fn reset_mode(&self, user_id: &str) {
        if self.modes().remove(user_id).is_some() {
            info!(user_id = %user_id, "Session mode reset to full");
        }
    }

    /// Pin the user's session to `mode` without asking anything.
    pub fn set_session_mode(&self, user_id: &str, mode: Mode) {
        self.modes().insert(user_id.to_string(), mode);
    }

    /// Everything `user_id` has asked and been told, in order.
    pub async fn history(&self, user_id: &str) -> opsdesk_core::Result<Vec<Message>> {
        Ok(self.history.load(user_id).await?)
    }

    /// Answer a question for an authenticated user.
    pub async fn ask(
        &self,
        user_id: &str,
        role: UserRole,
        question: &str,
        requested_mode: Option<Mode>,
    ) -> AskOutcome {
        let mut warnings: Vec<String> = Vec::new();

        let mode = match requested_mode {
            Some(mode) => {
                self.set_session_mode(user_id, mode);
                mode
            }
            None => self.session_mode(user_id),
        };

        let history = match self.history.load(user_id).await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Could not load chat history");
                warnings.push(format!("Conversation history unavailable: {e}"));
                Vec::new()
            }
        };
        debug!(
            user_id = %user_id,
            messages = history.len(),
            chars = history.iter().map(|m| m.content.chars().count()).sum::<usize>(),
            "History loaded"
        );

        let focus = DomainTable::detect(question);
        let bundle = self.assembler.assemble(self.store.as_ref(), role, mode, focus).await;

        let answer = self.orchestrator.answer(question, &bundle, &history, mode).await;
        if answer.mode != mode {
            info!(user_id = %user_id, from = %mode, to = %answer.mode, "Session mode changed");
            self.set_session_mode(user_id, answer.mode);
        }

        let metadata = MessageMetadata {
            tier: answer.source.to_string(),
            mode: answer.mode,
        };
        let exchange = vec![
            Message::user(question).bounded(self.max_message_chars),
            Message::assistant(answer.text.clone())
                .bounded(self.max_message_chars)
                .with_metadata(metadata),
        ];
        if let Err(e) = self.history.append_all(user_id, exchange).await {
            warn!(user_id = %user_id, error = %e, "Could not save exchange");
            warnings.push(format!("This exchange was not saved: {e}"));
        }

        info!(
            user_id = %user_id,
            source = %answer.source,
            mode = %answer.mode,
            remote_calls = answer.remote_calls(),
            "Question answered"
        );

        AskOutcome {
            answer: answer.text,
            source: answer.source,
            mode: answer.mode,
            warning: (!warnings.is_empty()).then(|| warnings.join("; ")),
        }
    }

    /// Answer with the local rules only: no remote call, nothing saved.
    pub async fn ask_local(&self, role: UserRole, question: &str, mode: Mode) -> String {
        let focus = DomainTable::detect(question);
        let bundle = self.assembler.assemble(self.store.as_ref(), role, mode, focus).await;
        self.responder.respond(question, &bundle)
    }
}
