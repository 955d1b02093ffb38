//! `opsdesk chat` — Interactive session for one user.
//!
//! Session mode and quota cooldowns live as long as the process, so
//! `/reset`, `/minimal`, `/tiers` and `/retry-tiers` are only meaningful here.

use super::{build_assistant, load_config, parse_role};
use opsdesk_core::context::Mode;
use opsdesk_providers::ModelFallbackOrchestrator;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{self, AsyncBufReadExt, BufReader};

pub async fn run(
    user: String,
    role: String,
    data: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let role = parse_role(&role)?;
    let assistant = build_assistant(&config, data.as_deref());

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║          opsdesk — Interactive Mode          ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  User:      {user}");
    println!("  Role:      {role}");
    println!("  Tiers:     {}", assistant.orchestrator().tiers().count());
    println!();
    println!("  Commands:  /reset (full mode), /minimal, /local <question>");
    println!("             /tiers, /retry-tiers (clear cooldowns)");
    println!("  Type 'exit' or Ctrl+C to quit.");
    println!();

    let mut lines = BufReader::new(io::stdin()).lines();
    prompt()?;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            prompt()?;
            continue;
        }
        if matches!(line, "exit" | "quit" | "/exit" | "/quit" | ":q") {
            break;
        }

        match line {
            "/reset" => {
                assistant.reset_mode(&user);
                println!("  Mode reset to {}.", assistant.session_mode(&user));
            }
            "/minimal" => {
                assistant.set_session_mode(&user, Mode::Minimal);
                println!("  Mode set to {}.", Mode::Minimal);
            }
            "/tiers" => {
                for line in tier_report(assistant.orchestrator()) {
                    println!("  {line}");
                }
            }
            "/retry-tiers" => {
                assistant.orchestrator().quota().reset();
                println!("  Cooldowns cleared; remote tiers will be tried again.");
            }
            _ => {
                if let Some(question) = line.strip_prefix("/local ") {
                    let answer = assistant
                        .ask_local(role, question, assistant.session_mode(&user))
                        .await;
                    print_answer(&answer);
                } else {
                    eprint!("  ...");
                    let outcome = assistant.ask(&user, role, line, None).await;
                    eprint!("\r     \r");
                    print_answer(&outcome.answer);
                    println!("  [source: {}, mode: {}]", outcome.source, outcome.mode);
                    if let Some(warning) = outcome.warning {
                        eprintln!("  [Warning] {warning}");
                    }
                }
            }
        }

        println!();
        prompt()?;
    }

    println!();
    println!("  Goodbye!");
    println!();
    Ok(())
}

fn prompt() -> std::io::Result<()> {
    print!("  You > ");
    std::io::stdout().flush()
}

fn print_answer(answer: &str) {
    println!();
    for line in answer.lines() {
        println!("  Assistant > {line}");
    }
}

/// One line per tier in try order, with any cooldown left on its quota group.
fn tier_report(orchestrator: &ModelFallbackOrchestrator) -> Vec<String> {
    let status = orchestrator.tier_status();
    if status.is_empty() {
        return vec!["No remote tiers configured; answers are local.".to_string()];
    }

    let mut lines: Vec<String> = status
        .into_iter()
        .map(|(tier, left)| {
            let state = match left {
                Some(left) => format!("cooling down, {}s left", left.as_secs()),
                None => "ready".to_string(),
            };
            format!("{}. {} ({}) [{}]: {state}", tier.rank, tier.name, tier.model, tier.quota_group)
        })
        .collect();
    if orchestrator.all_in_cooldown() {
        lines.push("All tiers are cooling down; answers are local until one recovers.".to_string());
    }
    lines
}
