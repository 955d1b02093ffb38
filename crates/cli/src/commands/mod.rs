pub mod ask;
pub mod chat;
pub mod history;
pub mod onboard;
pub mod status;

use opsdesk_agent::{Assistant, SnapshotStore};
use opsdesk_config::AppConfig;
use opsdesk_core::domain::UserRole;
use opsdesk_memory::FileHistoryStore;
use opsdesk_providers::{QuotaTable, build_tiers};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Load and validate the config file plus environment overrides.
pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    config.validate()?;
    Ok(config)
}

pub fn default_data_path() -> PathBuf {
    AppConfig::config_dir().join("data.json")
}

pub fn parse_role(role: &str) -> Result<UserRole, Box<dyn std::error::Error>> {
    Ok(role.parse::<UserRole>()?)
}

/// Wire the assistant the CLI commands share.
///
/// An unreadable data snapshot does not stop the command: its tables are
/// named as unavailable in every answer.
pub fn build_assistant(config: &AppConfig, data: Option<&Path>) -> Assistant {
    let data_path = data.map(Path::to_path_buf).unwrap_or_else(default_data_path);
    let store = SnapshotStore::load_or_failed(&data_path);
    let history = FileHistoryStore::new(config.history.resolved_dir());
    let tiers = build_tiers(config);
    debug!(
        data = %data_path.display(),
        records = store.len(),
        history = %history.dir().display(),
        tiers = tiers.len(),
        "Assistant ready"
    );

    Assistant::from_config(
        config,
        Arc::new(store),
        Arc::new(history),
        tiers,
        Arc::new(QuotaTable::with_system_clock()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsdesk_core::context::Mode;

    #[tokio::test]
    async fn corrupt_snapshot_still_answers_and_names_failed_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, "{ not json").unwrap();

        let assistant = build_assistant(&AppConfig::default(), Some(&path));
        let answer = assistant
            .ask_local(UserRole::Admin, "how many incidents", Mode::Full)
            .await;
        assert!(answer.contains("did not respond for: Cyber incidents"));
    }

    #[test]
    fn role_names_parse() {
        assert_eq!(parse_role("it-support").unwrap(), UserRole::ItSupport);
        assert!(parse_role("root").is_err());
    }
}
