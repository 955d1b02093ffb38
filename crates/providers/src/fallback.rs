//! Model fallback orchestrator — ranked tiers, quota cooldowns, bounded
//! retries, and a local responder that always has the last word.
//!
//! For each question the orchestrator walks the configured tiers in rank
//! order, skipping any whose quota group is cooling down:
//!
//! | Outcome        | Action                                                |
//! |----------------|-------------------------------------------------------|
//! | success        | return the text, mode unchanged                       |
//! | quota exceeded | cool the tier's group down, move to the next tier now |
//! | transient      | retry the same tier with backoff, then move on        |
//! | non-retryable  | move on without touching quota state                  |
//!
//! When no tier answers, the local responder answers from the same bundle
//! and the returned mode is `Minimal`. Tier order never changes at runtime.

use crate::quota::{ModelTier, QuotaTable};
use opsdesk_config::AppConfig;
use opsdesk_core::context::{ContextBundle, LocalResponder, Mode};
use opsdesk_core::error::{ErrorClass, ProviderError};
use opsdesk_core::message::{Message, Role};
use opsdesk_core::provider::{Provider, ProviderRequest};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A tier paired with the client that serves it.
#[derive(Clone)]
pub struct TierHandle {
    pub tier: ModelTier,
    pub provider: Arc<dyn Provider>,
}

impl TierHandle {
    pub fn new(tier: ModelTier, provider: Arc<dyn Provider>) -> Self {
        Self { tier, provider }
    }
}

/// Retry schedule for transient failures on one tier.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per tier, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_attempts: config.retry.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.retry.max_backoff_ms),
        }
    }

    /// Delay after the `attempt`-th failure (1-based): doubling, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(2),
        }
    }
}

/// Who produced an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerSource {
    Tier(String),
    Local,
}

impl AnswerSource {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

impl std::fmt::Display for AnswerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tier(name) => f.write_str(name),
            Self::Local => f.write_str("local"),
        }
    }
}

/// What happened on one remote attempt (or skip).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Success,
    Quota,
    Transient,
    NonRetryable,
    Cooldown,
}

#[derive(Debug, Clone)]
pub struct Attempt {
    pub tier: String,
    /// 1-based; 0 for tiers skipped without a call.
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub detail: Option<String>,
}

/// The orchestrator's result.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub source: AnswerSource,
    /// Mode the caller's session should use from now on.
    pub mode: Mode,
    pub attempts: Vec<Attempt>,
}

impl Answer {
    /// Number of remote calls actually issued.
    pub fn remote_calls(&self) -> usize {
        self.attempts.iter().filter(|a| a.attempt > 0).count()
    }
}

const SYSTEM_PROMPT: &str = "You are the reporting assistant for a security and IT operations \
platform. Answer the user's question using only the data snapshot below. Quote counts exactly \
as given. If the snapshot does not contain the answer, say so plainly and suggest what data \
would help. Keep answers short and use bullet points for breakdowns.";

/// Drives remote completion across ranked tiers.
pub struct ModelFallbackOrchestrator {
    tiers: Vec<TierHandle>,
    quota: Arc<QuotaTable>,
    responder: Arc<dyn LocalResponder>,
    retry: RetryPolicy,
    request_timeout: Duration,
    history_window: usize,
    max_message_chars: usize,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl ModelFallbackOrchestrator {
    /// Create an orchestrator with no tiers (local answers only).
    pub fn new(quota: Arc<QuotaTable>, responder: Arc<dyn LocalResponder>) -> Self {
        Self {
            tiers: Vec::new(),
            quota,
            responder,
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
            history_window: 6,
            max_message_chars: 4000,
            temperature: 0.3,
            max_tokens: None,
        }
    }

    /// Add a tier; the list stays sorted by rank (stable for equal ranks).
    pub fn with_tier(mut self, handle: TierHandle) -> Self {
        self.tiers.push(handle);
        self.tiers.sort_by_key(|h| h.tier.rank);
        self
    }

    pub fn with_tiers(self, handles: impl IntoIterator<Item = TierHandle>) -> Self {
        handles.into_iter().fold(self, |o, h| o.with_tier(h))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Number of prior messages sent with each request.
    pub fn with_history_window(mut self, k: usize) -> Self {
        self.history_window = k;
        self
    }

    /// Cap on the characters of the question sent to a tier.
    pub fn with_max_message_chars(mut self, max: usize) -> Self {
        self.max_message_chars = max;
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// Tiers in the order they are tried.
    pub fn tiers(&self) -> impl Iterator<Item = &ModelTier> {
        self.tiers.iter().map(|h| &h.tier)
    }

    pub fn quota(&self) -> &Arc<QuotaTable> {
        &self.quota
    }

    pub fn has_remote(&self) -> bool {
        !self.tiers.is_empty()
    }

    /// Each tier in try order with the cooldown left on its quota group.
    pub fn tier_status(&self) -> Vec<(&ModelTier, Option<Duration>)> {
        self.tiers
            .iter()
            .map(|h| (&h.tier, self.quota.remaining_cooldown(&h.tier.quota_group)))
            .collect()
    }

    /// True when every configured tier is currently cooling down.
    pub fn all_in_cooldown(&self) -> bool {
        self.has_remote() && self.tiers.iter().all(|h| !self.quota.is_available(&h.tier.quota_group))
    }

    /// Answer `question` from `bundle`, remotely if any tier can, locally otherwise.
    ///
    /// Never fails and never returns empty text.
    pub async fn answer(
        &self,
        question: &str,
        bundle: &ContextBundle,
        history: &[Message],
        mode: Mode,
    ) -> Answer {
        let mut attempts = Vec::new();

        if self.tiers.is_empty() {
            debug!("No remote tiers configured; answering locally");
            return self.local(question, bundle, mode, attempts);
        }

        let messages = self.build_messages(question, bundle, history);

        for handle in &self.tiers {
            if !self.quota.is_available(&handle.tier.quota_group) {
                debug!(tier = %handle.tier.name, "Tier cooling down; skipping");
                attempts.push(Attempt {
                    tier: handle.tier.name.clone(),
                    attempt: 0,
                    outcome: AttemptOutcome::Cooldown,
                    detail: None,
                });
                continue;
            }

            if let Some(text) = self.try_tier(handle, &messages, &mut attempts).await {
                info!(tier = %handle.tier.name, "Answered by remote tier");
                return Answer {
                    text,
                    source: AnswerSource::Tier(handle.tier.name.clone()),
                    mode,
                    attempts,
                };
            }
        }

        if mode != Mode::Minimal {
            warn!(
                tiers = self.tiers.len(),
                "Every tier exhausted or failed; switching to minimal mode"
            );
        }
        self.local(question, bundle, Mode::Minimal, attempts)
    }

    /// Run one tier to completion: success, or a reason to move on.
    async fn try_tier(
        &self,
        handle: &TierHandle,
        messages: &[Message],
        attempts: &mut Vec<Attempt>,
    ) -> Option<String> {
        let tier = &handle.tier;

        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 && !self.quota.is_available(&tier.quota_group) {
                // Another request exhausted this group while we were backing off.
                return None;
            }

            info!(
                tier = %tier.name,
                model = %tier.model,
                attempt,
                max_attempts = self.retry.max_attempts,
                "Fallback: trying tier"
            );

            let request = ProviderRequest {
                model: tier.model.clone(),
                messages: messages.to_vec(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
            };

            let error = match tokio::time::timeout(self.request_timeout, handle.provider.complete(request)).await {
                Ok(Ok(response)) if !response.message.content.trim().is_empty() => {
                    attempts.push(Attempt {
                        tier: tier.name.clone(),
                        attempt,
                        outcome: AttemptOutcome::Success,
                        detail: None,
                    });
                    return Some(response.message.content);
                }
                Ok(Ok(_)) => ProviderError::Transient("Empty completion".into()),
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Transient(format!(
                    "Tier '{}' timed out after {}ms",
                    tier.name,
                    self.request_timeout.as_millis()
                )),
            };

            match error.class() {
                ErrorClass::Quota => {
                    warn!(tier = %tier.name, error = %error, "Quota exceeded; cooling tier down");
                    self.quota.mark_exhausted(&tier.quota_group, tier.cooldown);
                    attempts.push(failed(tier, attempt, AttemptOutcome::Quota, &error));
                    return None;
                }
                ErrorClass::NonRetryable => {
                    warn!(tier = %tier.name, error = %error, "Non-retryable error; skipping tier");
                    attempts.push(failed(tier, attempt, AttemptOutcome::NonRetryable, &error));
                    return None;
                }
                ErrorClass::Transient => {
                    warn!(tier = %tier.name, attempt, error = %error, "Transient error");
                    attempts.push(failed(tier, attempt, AttemptOutcome::Transient, &error));
                    if attempt < self.retry.max_attempts {
                        tokio::time::sleep(self.retry.backoff_for(attempt)).await;
                    }
                }
            }
        }

        None
    }

    fn local(&self, question: &str, bundle: &ContextBundle, mode: Mode, attempts: Vec<Attempt>) -> Answer {
        let mut text = self.responder.respond(question, bundle);
        if text.trim().is_empty() {
            text = "I can only summarize the data available to your role, and there is nothing to summarize right now.".into();
        }
        Answer {
            text,
            source: AnswerSource::Local,
            mode,
            attempts,
        }
    }

    /// System prompt with the bundle, the last K non-system messages, then the question.
    fn build_messages(&self, question: &str, bundle: &ContextBundle, history: &[Message]) -> Vec<Message> {
        let system = format!(
            "{SYSTEM_PROMPT}\n\nUser role: {}\nContext mode: {}\n\nDATA SNAPSHOT (JSON):\n{}",
            bundle.role,
            bundle.mode,
            bundle.serialized()
        );

        let recent: Vec<&Message> = history
            .iter()
            .filter(|m| m.role != Role::System)
            .collect();
        let start = recent.len().saturating_sub(self.history_window);

        let mut messages = Vec::with_capacity(recent.len() - start + 2);
        messages.push(Message::system(system));
        messages.extend(recent[start..].iter().map(|m| (*m).clone()));
        messages.push(Message::user(question).bounded(self.max_message_chars));
        messages
    }
}

fn failed(tier: &ModelTier, attempt: u32, outcome: AttemptOutcome, error: &ProviderError) -> Attempt {
    Attempt {
        tier: tier.name.clone(),
        attempt,
        outcome,
        detail: Some(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use opsdesk_core::clock::ManualClock;
    use opsdesk_core::domain::UserRole;
    use opsdesk_core::provider::ProviderResponse;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// A mock provider that replays scripted outcomes, repeating the last one.
    struct ScriptedProvider {
        name: String,
        script: Mutex<VecDeque<Result<String, ProviderError>>>,
        last: Mutex<Option<Result<String, ProviderError>>>,
        requests: Mutex<Vec<ProviderRequest>>,
    }

    impl ScriptedProvider {
        fn new(name: &str, script: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                name: name.into(),
                script: Mutex::new(script.into()),
                last: Mutex::new(None),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn ok(name: &str, text: &str) -> Self {
            Self::new(name, vec![Ok(text.into())])
        }

        fn failing(name: &str, error: ProviderError) -> Self {
            Self::new(name, vec![Err(error)])
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn last_request(&self) -> ProviderRequest {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.requests.lock().unwrap().push(request.clone());
            let next = {
                let mut script = self.script.lock().unwrap();
                let mut last = self.last.lock().unwrap();
                if let Some(item) = script.pop_front() {
                    *last = Some(item.clone());
                    item
                } else {
                    last.clone().unwrap()
                }
            };
            next.map(|text| ProviderResponse {
                message: Message::assistant(text),
                usage: None,
                model: request.model,
            })
        }
    }

    /// A mock provider that hangs forever (for timeout testing).
    struct HangingProvider;

    #[async_trait]
    impl Provider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ProviderError::Transient("unreachable".into()))
        }
    }

    struct CannedResponder;

    impl LocalResponder for CannedResponder {
        fn respond(&self, _question: &str, bundle: &ContextBundle) -> String {
            format!("local answer ({} sections)", bundle.sections.len())
        }
    }

    struct SilentResponder;

    impl LocalResponder for SilentResponder {
        fn respond(&self, _question: &str, _bundle: &ContextBundle) -> String {
            String::new()
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    fn orchestrator(clock: Arc<ManualClock>) -> ModelFallbackOrchestrator {
        let quota = Arc::new(QuotaTable::new(clock));
        ModelFallbackOrchestrator::new(quota, Arc::new(CannedResponder)).with_retry(fast_retry())
    }

    fn tier(name: &str, rank: u32) -> ModelTier {
        ModelTier::new(name, format!("{name}-model"), rank).with_cooldown(Duration::from_secs(60))
    }

    fn bundle() -> ContextBundle {
        ContextBundle::empty(UserRole::Admin, Mode::Full)
    }

    fn quota_err() -> ProviderError {
        ProviderError::quota("RESOURCE_EXHAUSTED")
    }

    #[tokio::test]
    async fn first_tier_succeeds() {
        let a = Arc::new(ScriptedProvider::ok("a", "remote answer"));
        let b = Arc::new(ScriptedProvider::ok("b", "other"));
        let orch = orchestrator(Arc::new(ManualClock::default()))
            .with_tier(TierHandle::new(tier("a", 0), a.clone()))
            .with_tier(TierHandle::new(tier("b", 1), b.clone()));

        let answer = orch.answer("how many?", &bundle(), &[], Mode::Full).await;
        assert_eq!(answer.text, "remote answer");
        assert_eq!(answer.source, AnswerSource::Tier("a".into()));
        assert_eq!(answer.mode, Mode::Full);
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn quota_errors_fall_through_to_third_tier() {
        let clock = Arc::new(ManualClock::default());
        let a = Arc::new(ScriptedProvider::failing("a", quota_err()));
        let b = Arc::new(ScriptedProvider::failing("b", quota_err()));
        let c = Arc::new(ScriptedProvider::ok("c", "from c"));
        let orch = orchestrator(clock)
            .with_tier(TierHandle::new(tier("a", 0), a.clone()))
            .with_tier(TierHandle::new(tier("b", 1), b.clone()))
            .with_tier(TierHandle::new(tier("c", 2), c.clone()));

        let answer = orch.answer("q", &bundle(), &[], Mode::Full).await;
        assert_eq!(answer.source, AnswerSource::Tier("c".into()));
        assert_eq!(answer.mode, Mode::Full);
        // Quota errors are never retried on the same tier.
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
        assert!(!orch.quota().is_available("a"));
        assert!(!orch.quota().is_available("b"));
        assert!(orch.quota().is_available("c"));
    }

    #[tokio::test]
    async fn cooled_down_tier_not_attempted_until_expiry() {
        let clock = Arc::new(ManualClock::default());
        let a = Arc::new(ScriptedProvider::new(
            "a",
            vec![Err(quota_err()), Ok("a is back".into())],
        ));
        let b = Arc::new(ScriptedProvider::ok("b", "from b"));
        let orch = orchestrator(clock.clone())
            .with_tier(TierHandle::new(tier("a", 0), a.clone()))
            .with_tier(TierHandle::new(tier("b", 1), b.clone()));

        orch.answer("q1", &bundle(), &[], Mode::Full).await;
        assert_eq!(a.calls(), 1);

        clock.advance(chrono::Duration::seconds(30));
        let second = orch.answer("q2", &bundle(), &[], Mode::Full).await;
        assert_eq!(second.source, AnswerSource::Tier("b".into()));
        assert_eq!(a.calls(), 1);
        assert_eq!(second.attempts[0].outcome, AttemptOutcome::Cooldown);

        clock.advance(chrono::Duration::seconds(30));
        let third = orch.answer("q3", &bundle(), &[], Mode::Full).await;
        assert_eq!(third.source, AnswerSource::Tier("a".into()));
        assert_eq!(third.text, "a is back");
        assert_eq!(a.calls(), 2);
    }

    #[tokio::test]
    async fn all_quota_exhausted_answers_locally_and_goes_minimal() {
        let clock = Arc::new(ManualClock::default());
        let providers: Vec<Arc<ScriptedProvider>> = ["a", "b", "c"]
            .iter()
            .map(|n| Arc::new(ScriptedProvider::failing(n, quota_err())))
            .collect();
        let orch = orchestrator(clock).with_tiers(
            providers
                .iter()
                .enumerate()
                .map(|(i, p)| TierHandle::new(tier(&p.name, i as u32), p.clone())),
        );

        let answer = orch.answer("q", &bundle(), &[], Mode::Full).await;
        assert_eq!(answer.source, AnswerSource::Local);
        assert_eq!(answer.mode, Mode::Minimal);
        assert_eq!(answer.text, "local answer (0 sections)");
        assert!(orch.all_in_cooldown());

        // Next call: no remote attempts at all while everything cools down.
        let next = orch.answer("q", &bundle(), &[], Mode::Minimal).await;
        assert_eq!(next.remote_calls(), 0);
        assert!(providers.iter().all(|p| p.calls() == 1));
    }

    #[tokio::test]
    async fn transient_errors_retry_same_tier() {
        let a = Arc::new(ScriptedProvider::new(
            "a",
            vec![
                Err(ProviderError::Transient("reset".into())),
                Err(ProviderError::Transient("reset".into())),
                Ok("third time lucky".into()),
            ],
        ));
        let b = Arc::new(ScriptedProvider::ok("b", "from b"));
        let orch = orchestrator(Arc::new(ManualClock::default()))
            .with_tier(TierHandle::new(tier("a", 0), a.clone()))
            .with_tier(TierHandle::new(tier("b", 1), b.clone()));

        let answer = orch.answer("q", &bundle(), &[], Mode::Full).await;
        assert_eq!(answer.text, "third time lucky");
        assert_eq!(a.calls(), 3);
        assert_eq!(b.calls(), 0);
        assert!(orch.quota().is_available("a"));
    }

    #[tokio::test]
    async fn persistent_transient_errors_move_to_next_tier() {
        let a = Arc::new(ScriptedProvider::failing(
            "a",
            ProviderError::Transient("503".into()),
        ));
        let b = Arc::new(ScriptedProvider::ok("b", "from b"));
        let orch = orchestrator(Arc::new(ManualClock::default()))
            .with_tier(TierHandle::new(tier("a", 0), a.clone()))
            .with_tier(TierHandle::new(tier("b", 1), b.clone()));

        let answer = orch.answer("q", &bundle(), &[], Mode::Full).await;
        assert_eq!(answer.source, AnswerSource::Tier("b".into()));
        assert_eq!(a.calls(), 3);
        // Transient failures never mark quota.
        assert!(orch.quota().is_available("a"));
    }

    #[tokio::test]
    async fn non_retryable_skips_without_cooldown() {
        let a = Arc::new(ScriptedProvider::failing(
            "a",
            ProviderError::NonRetryable {
                status_code: Some(401),
                message: "bad key".into(),
            },
        ));
        let b = Arc::new(ScriptedProvider::ok("b", "from b"));
        let orch = orchestrator(Arc::new(ManualClock::default()))
            .with_tier(TierHandle::new(tier("a", 0), a.clone()))
            .with_tier(TierHandle::new(tier("b", 1), b.clone()));

        let answer = orch.answer("q", &bundle(), &[], Mode::Full).await;
        assert_eq!(answer.source, AnswerSource::Tier("b".into()));
        assert_eq!(a.calls(), 1);
        assert!(orch.quota().is_available("a"));
        assert_eq!(answer.attempts[0].outcome, AttemptOutcome::NonRetryable);
    }

    #[tokio::test]
    async fn all_tiers_failing_transiently_still_answers() {
        let a = Arc::new(ScriptedProvider::failing(
            "a",
            ProviderError::Transient("down".into()),
        ));
        let orch = orchestrator(Arc::new(ManualClock::default()))
            .with_tier(TierHandle::new(tier("a", 0), a.clone()));

        let answer = orch.answer("q", &bundle(), &[], Mode::Full).await;
        assert_eq!(answer.source, AnswerSource::Local);
        assert_eq!(answer.mode, Mode::Minimal);
        assert!(!answer.text.is_empty());
        assert!(!orch.all_in_cooldown());
    }

    #[tokio::test]
    async fn timeout_counts_as_transient() {
        let b = Arc::new(ScriptedProvider::ok("b", "from b"));
        let orch = orchestrator(Arc::new(ManualClock::default()))
            .with_timeout(Duration::from_millis(20))
            .with_tier(TierHandle::new(tier("slow", 0), Arc::new(HangingProvider)))
            .with_tier(TierHandle::new(tier("b", 1), b.clone()));

        let answer = orch.answer("q", &bundle(), &[], Mode::Full).await;
        assert_eq!(answer.source, AnswerSource::Tier("b".into()));
        let timeouts = answer
            .attempts
            .iter()
            .filter(|a| a.tier == "slow" && a.outcome == AttemptOutcome::Transient)
            .count();
        assert_eq!(timeouts, 3);
    }

    #[tokio::test]
    async fn empty_completion_is_not_an_answer() {
        let a = Arc::new(ScriptedProvider::ok("a", "   "));
        let b = Arc::new(ScriptedProvider::ok("b", "from b"));
        let orch = orchestrator(Arc::new(ManualClock::default()))
            .with_tier(TierHandle::new(tier("a", 0), a))
            .with_tier(TierHandle::new(tier("b", 1), b));

        let answer = orch.answer("q", &bundle(), &[], Mode::Full).await;
        assert_eq!(answer.text, "from b");
    }

    #[tokio::test]
    async fn no_tiers_means_local_and_mode_kept() {
        let orch = orchestrator(Arc::new(ManualClock::default()));
        let answer = orch.answer("q", &bundle(), &[], Mode::Full).await;
        assert_eq!(answer.source, AnswerSource::Local);
        assert_eq!(answer.mode, Mode::Full);
        assert!(answer.attempts.is_empty());
    }

    #[tokio::test]
    async fn empty_local_text_is_replaced() {
        let quota = Arc::new(QuotaTable::new(Arc::new(ManualClock::default())));
        let orch = ModelFallbackOrchestrator::new(quota, Arc::new(SilentResponder));
        let answer = orch.answer("q", &bundle(), &[], Mode::Full).await;
        assert!(!answer.text.trim().is_empty());
    }

    #[tokio::test]
    async fn shared_quota_group_cools_down_together() {
        let a = Arc::new(ScriptedProvider::failing("a", quota_err()));
        let a2 = Arc::new(ScriptedProvider::ok("a2", "same quota"));
        let c = Arc::new(ScriptedProvider::ok("c", "from c"));
        let orch = orchestrator(Arc::new(ManualClock::default()))
            .with_tier(TierHandle::new(tier("a", 0).with_quota_group("shared"), a))
            .with_tier(TierHandle::new(tier("a2", 1).with_quota_group("shared"), a2.clone()))
            .with_tier(TierHandle::new(tier("c", 2), c));

        let answer = orch.answer("q", &bundle(), &[], Mode::Full).await;
        assert_eq!(answer.source, AnswerSource::Tier("c".into()));
        assert_eq!(a2.calls(), 0);
    }

    #[tokio::test]
    async fn tiers_are_ordered_by_rank_not_insertion() {
        let low = Arc::new(ScriptedProvider::ok("low", "low priority"));
        let high = Arc::new(ScriptedProvider::ok("high", "high priority"));
        let orch = orchestrator(Arc::new(ManualClock::default()))
            .with_tier(TierHandle::new(tier("low", 5), low))
            .with_tier(TierHandle::new(tier("high", 1), high));

        let names: Vec<&str> = orch.tiers().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["high", "low"]);
        let answer = orch.answer("q", &bundle(), &[], Mode::Full).await;
        assert_eq!(answer.text, "high priority");
    }

    #[tokio::test]
    async fn request_carries_bounded_history_and_bundle() {
        let a = Arc::new(ScriptedProvider::ok("a", "ok"));
        let orch = orchestrator(Arc::new(ManualClock::default()))
            .with_history_window(2)
            .with_tier(TierHandle::new(tier("a", 0), a.clone()));

        let history = vec![
            Message::user("first"),
            Message::assistant("first reply"),
            Message::system("ignored"),
            Message::user("second"),
            Message::assistant("second reply"),
        ];
        orch.answer("third", &bundle(), &history, Mode::Full).await;

        let request = a.last_request();
        assert_eq!(request.model, "a-model");
        let contents: Vec<&str> = request.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents.len(), 4);
        assert!(contents[0].contains("DATA SNAPSHOT"));
        assert!(contents[0].contains("\"role\":\"admin\""));
        assert_eq!(&contents[1..], &["second", "second reply", "third"]);
    }

    #[tokio::test]
    async fn tier_status_reports_cooldown_until_reset() {
        let clock = Arc::new(ManualClock::default());
        let a = Arc::new(ScriptedProvider::failing("a", quota_err()));
        let b = Arc::new(ScriptedProvider::ok("b", "fine"));
        let orch = orchestrator(clock.clone())
            .with_tier(TierHandle::new(tier("b", 1), b))
            .with_tier(TierHandle::new(tier("a", 0), a));

        orch.answer("q", &bundle(), &[], Mode::Full).await;
        clock.advance(chrono::Duration::seconds(15));

        let status = orch.tier_status();
        assert_eq!(status[0].0.name, "a");
        assert_eq!(status[0].1, Some(Duration::from_secs(45)));
        assert_eq!(status[1].0.name, "b");
        assert_eq!(status[1].1, None);
        assert!(!orch.all_in_cooldown());

        orch.quota().reset();
        assert!(orch.tier_status().iter().all(|(_, left)| left.is_none()));
    }

    #[tokio::test]
    async fn long_question_is_cut_before_sending() {
        let a = Arc::new(ScriptedProvider::ok("a", "ok"));
        let orch = orchestrator(Arc::new(ManualClock::default()))
            .with_max_message_chars(20)
            .with_tier(TierHandle::new(tier("a", 0), a.clone()));

        let question = "q".repeat(500);
        orch.answer(&question, &bundle(), &[], Mode::Full).await;

        let request = a.last_request();
        let sent = request.messages.last().unwrap();
        assert_eq!(sent.role, Role::User);
        assert!(sent.content.chars().count() <= 20);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(350));
    }

    #[test]
    fn answer_source_display() {
        assert_eq!(AnswerSource::Local.to_string(), "local");
        assert_eq!(AnswerSource::Tier("flash".into()).to_string(), "flash");
    }
}
