//! Per-tier quota state: process-wide, lock-guarded, lazily recovering.
//!
//! Each quota group is either `available` or in `cooldown`. A quota error
//! moves it into cooldown and records when that happened. There is no
//! background timer: every access compares the clock against the recorded
//! expiry and flips the group back to available once it has passed.
//!
//! Nothing here is persisted. A restart starts every tier available, which
//! may cost one extra quota error per tier.

use chrono::{DateTime, Utc};
use opsdesk_config::{Capability, TierConfig};
use opsdesk_core::clock::{Clock, SystemClock};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// A configured remote model option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTier {
    pub name: String,
    pub model: String,
    /// Lower rank = tried first.
    pub rank: u32,
    pub capability: Capability,
    /// Quota identity; tiers sharing it cool down together.
    pub quota_group: String,
    pub cooldown: Duration,
}

impl ModelTier {
    pub fn new(name: impl Into<String>, model: impl Into<String>, rank: u32) -> Self {
        let name = name.into();
        Self {
            quota_group: name.clone(),
            name,
            model: model.into(),
            rank,
            capability: Capability::Standard,
            cooldown: Duration::from_secs(60),
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_quota_group(mut self, group: impl Into<String>) -> Self {
        self.quota_group = group.into();
        self
    }

    pub fn from_config(config: &TierConfig) -> Self {
        Self {
            name: config.name.clone(),
            model: config.model.clone(),
            rank: config.rank,
            capability: config.capability,
            quota_group: config.quota_group().to_string(),
            cooldown: Duration::from_secs(config.cooldown_secs),
        }
    }
}

/// Quota bookkeeping for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaState {
    pub exhausted: bool,
    pub exhausted_at: Option<DateTime<Utc>>,
    pub cooldown: Duration,
}

impl QuotaState {
    fn available() -> Self {
        Self {
            exhausted: false,
            exhausted_at: None,
            cooldown: Duration::ZERO,
        }
    }

    /// When the cooldown ends, if the group is exhausted.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        if !self.exhausted {
            return None;
        }
        let cooldown = chrono::Duration::from_std(self.cooldown)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        self.exhausted_at.map(|at| at + cooldown)
    }
}

/// Result of checking a quota group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Cooldown { remaining: Duration },
}

impl Availability {
    pub fn is_available(self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Owned table of quota states keyed by quota group.
///
/// One mutex guards every read-modify-write, so two requests racing on the
/// same group always see a consistent state.
pub struct QuotaTable {
    states: Mutex<HashMap<String, QuotaState>>,
    clock: Arc<dyn Clock>,
}

impl QuotaTable {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn with_system_clock() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, QuotaState>> {
        // A panic while holding the lock cannot leave a half-written state.
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check a group, flipping it back to available if its cooldown has passed.
    pub fn check(&self, group: &str) -> Availability {
        let now = self.clock.now();
        let mut states = self.lock();
        let Some(state) = states.get_mut(group) else {
            return Availability::Available;
        };

        match state.expires_at() {
            None => Availability::Available,
            Some(expiry) if now >= expiry => {
                info!(quota_group = %group, "Quota cooldown elapsed; tier available again");
                *state = QuotaState::available();
                Availability::Available
            }
            Some(expiry) => Availability::Cooldown {
                remaining: (expiry - now).to_std().unwrap_or(Duration::ZERO),
            },
        }
    }

    pub fn is_available(&self, group: &str) -> bool {
        self.check(group).is_available()
    }

    /// Record a quota error: the group cools down for `cooldown` from now.
    pub fn mark_exhausted(&self, group: &str, cooldown: Duration) {
        let now = self.clock.now();
        let mut states = self.lock();
        debug!(quota_group = %group, cooldown_secs = cooldown.as_secs(), "Marking quota exhausted");
        states.insert(
            group.to_string(),
            QuotaState {
                exhausted: true,
                exhausted_at: Some(now),
                cooldown,
            },
        );
    }

    /// Time left on a group's cooldown, if any.
    pub fn remaining_cooldown(&self, group: &str) -> Option<Duration> {
        match self.check(group) {
            Availability::Available => None,
            Availability::Cooldown { remaining } => Some(remaining),
        }
    }

    /// Forget every recorded exhaustion.
    pub fn reset(&self) {
        self.lock().clear();
    }
}

impl Default for QuotaTable {
    fn default() -> Self {
        Self::with_system_clock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsdesk_core::clock::ManualClock;

    fn table() -> (Arc<ManualClock>, QuotaTable) {
        let clock = Arc::new(ManualClock::default());
        let table = QuotaTable::new(clock.clone());
        (clock, table)
    }

    #[test]
    fn unknown_group_is_available() {
        let (_, table) = table();
        assert!(table.is_available("pro"));
        assert!(table.remaining_cooldown("pro").is_none());
    }

    #[test]
    fn exhausted_group_cools_down_then_recovers() {
        let (clock, table) = table();
        table.mark_exhausted("pro", Duration::from_secs(60));

        assert!(!table.is_available("pro"));
        clock.advance(chrono::Duration::seconds(59));
        assert_eq!(table.remaining_cooldown("pro"), Some(Duration::from_secs(1)));

        clock.advance(chrono::Duration::seconds(1));
        assert!(table.is_available("pro"));
        assert!(table.remaining_cooldown("pro").is_none());
    }

    #[test]
    fn groups_are_independent() {
        let (_, table) = table();
        table.mark_exhausted("pro", Duration::from_secs(60));
        assert!(!table.is_available("pro"));
        assert!(table.is_available("flash"));
    }

    #[test]
    fn re_exhaustion_restarts_cooldown() {
        let (clock, table) = table();
        table.mark_exhausted("pro", Duration::from_secs(60));
        clock.advance(chrono::Duration::seconds(50));
        table.mark_exhausted("pro", Duration::from_secs(60));
        clock.advance(chrono::Duration::seconds(50));
        assert!(!table.is_available("pro"));
    }

    #[test]
    fn reset_clears_everything() {
        let (_, table) = table();
        table.mark_exhausted("pro", Duration::from_secs(600));
        table.mark_exhausted("flash", Duration::from_secs(600));
        table.reset();
        assert!(table.is_available("pro"));
        assert!(table.remaining_cooldown("flash").is_none());
    }

    #[test]
    fn groups_expire_independently() {
        let (clock, table) = table();
        table.mark_exhausted("flash", Duration::from_secs(10));
        table.mark_exhausted("pro", Duration::from_secs(100));
        clock.advance(chrono::Duration::seconds(20));

        assert!(table.is_available("flash"));
        assert_eq!(table.remaining_cooldown("pro"), Some(Duration::from_secs(80)));
    }

    #[test]
    fn tier_from_config_defaults_quota_group_to_name() {
        let config = TierConfig {
            name: "flash".into(),
            model: "gemini-2.5-flash".into(),
            rank: 1,
            capability: Capability::Standard,
            quota_group: None,
            cooldown_secs: 120,
        };
        let tier = ModelTier::from_config(&config);
        assert_eq!(tier.quota_group, "flash");
        assert_eq!(tier.cooldown, Duration::from_secs(120));
    }

    #[test]
    fn concurrent_marks_are_consistent() {
        let (_, table) = table();
        let table = Arc::new(table);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = table.clone();
                std::thread::spawn(move || {
                    let group = if i % 2 == 0 { "pro" } else { "flash" };
                    table.mark_exhausted(group, Duration::from_secs(30));
                    table.is_available(group)
                })
            })
            .collect();
        for h in handles {
            assert!(!h.join().unwrap());
        }
        assert!(!table.is_available("pro"));
        assert!(!table.is_available("flash"));
    }
}
