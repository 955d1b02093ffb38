//! `opsdesk ask` — Answer one question.

use super::{build_assistant, load_config, parse_role};
use opsdesk_core::context::Mode;
use std::path::PathBuf;

pub struct AskArgs {
    pub user: String,
    pub role: String,
    pub mode: Option<String>,
    pub data: Option<PathBuf>,
    pub offline: bool,
    pub question: String,
}

pub async fn run(args: AskArgs) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let role = parse_role(&args.role)?;
    let mode = args.mode.as_deref().map(str::parse::<Mode>).transpose()?;
    let assistant = build_assistant(&config, args.data.as_deref());

    if args.offline {
        let answer = assistant
            .ask_local(role, &args.question, mode.unwrap_or_default())
            .await;
        println!("{answer}");
        eprintln!("[source: local, mode: {}]", mode.unwrap_or_default());
        return Ok(());
    }

    if !config.has_api_key() {
        eprintln!("  No API key configured; answering from local rules.");
        eprintln!("  Set OPSDESK_API_KEY (or GEMINI_API_KEY / OPENAI_API_KEY) to enable model tiers.");
    }

    let outcome = assistant.ask(&args.user, role, &args.question, mode).await;
    println!("{}", outcome.answer);
    eprintln!("[source: {}, mode: {}]", outcome.source, outcome.mode);
    if let Some(warning) = outcome.warning {
        eprintln!("  ⚠️  {warning}");
    }

    Ok(())
}
