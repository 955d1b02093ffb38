//! `opsdesk status` — Show configuration and model tiers.

use super::{default_data_path, load_config};
use opsdesk_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;

    println!("opsdesk Status");
    println!("==============");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  History dir:  {}", config.history.resolved_dir().display());
    println!("  Data file:    {}", default_data_path().display());
    println!("  API base:     {}", config.api_base_url);
    println!("  API key:      {}", if config.has_api_key() { "configured" } else { "missing" });
    println!("  Temperature:  {}", config.temperature);
    println!("  Timeout:      {}s", config.request_timeout_secs);
    println!(
        "  Retry:        {} attempts, {}–{} ms backoff",
        config.retry.max_attempts, config.retry.initial_backoff_ms, config.retry.max_backoff_ms
    );
    println!(
        "  Context:      {} chars, {} recent records, {} history messages",
        config.context.max_chars, config.context.recent_records, config.context.history_window
    );

    println!();
    println!("  Model tiers (highest priority first):");
    if config.tiers.is_empty() {
        println!("    (none configured; every answer comes from local rules)");
    }
    for tier in config.tiers_by_rank() {
        println!(
            "    {:>2}. {:<12} {:<28} {:<9} group={} cooldown={}s",
            tier.rank,
            tier.name,
            tier.model,
            tier.capability.to_string(),
            tier.quota_group(),
            tier.cooldown_secs
        );
    }
    if !config.has_api_key() && !config.tiers.is_empty() {
        println!("    ⚠️  Tiers are inactive until an API key is set.");
    }

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file — run `opsdesk onboard` first");
    }

    Ok(())
}
