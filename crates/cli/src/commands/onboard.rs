//! `opsdesk onboard` — First-time setup.

use opsdesk_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");
    let history_dir = AppConfig::default().history.resolved_dir();

    println!("opsdesk — First-Time Setup");
    println!("==========================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if !history_dir.exists() {
        std::fs::create_dir_all(&history_dir)?;
        println!("✅ Created history directory: {}", history_dir.display());
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Created config.toml at: {}", config_path.display());
        println!("\n📝 Next steps:");
        println!("   1. Set OPSDESK_API_KEY or add api_key to {}", config_path.display());
        println!("   2. Export your data to {}", super::default_data_path().display());
        println!("   3. Run: opsdesk ask --user <id> --role <role> \"how many incidents?\"\n");
    }

    println!("🎉 Setup complete.\n");

    Ok(())
}
