//! `opsdesk history` — Print a user's stored conversation.

use super::load_config;
use opsdesk_core::history::ChatHistoryStore;
use opsdesk_core::message::Role;
use opsdesk_memory::FileHistoryStore;

pub async fn run(user: String, limit: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let store = FileHistoryStore::new(config.history.resolved_dir());
    let messages = store.load(&user).await?;

    if messages.is_empty() {
        println!("  No conversation stored for '{user}'.");
        return Ok(());
    }

    let skip = limit.map_or(0, |n| messages.len().saturating_sub(n));
    println!("🗂  History for '{user}' ({} messages)", messages.len());
    println!();
    for message in messages.iter().skip(skip) {
        let who = match message.role {
            Role::User => "You".to_string(),
            Role::Assistant => match &message.metadata {
                Some(meta) => format!("Assistant [{}, {}]", meta.tier, meta.mode),
                None => "Assistant".to_string(),
            },
            Role::System => "System".to_string(),
        };
        println!("  {} {who}", message.timestamp.format("%Y-%m-%d %H:%M:%S"));
        for line in message.content.lines() {
            println!("    {line}");
        }
        println!();
    }

    Ok(())
}
