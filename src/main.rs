//! medaudit CLI: interactive audit shell and one-shot runs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use medaudit::audit::{AnthropicTransport, LlmReviewer, Orchestrator};
use medaudit::catalog::ClauseCatalog;
use medaudit::config::AuditConfig;
use medaudit::evidence::EvidenceStore;
use medaudit::ingest;

#[derive(Parser)]
#[command(name = "medaudit", version, about = "IEC 62304 compliance auditor")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Audit the given documentation files and print the report.
    Run {
        /// Files or glob patterns (.md, .txt, .docx).
        patterns: Vec<String>,
    },
    /// Start the interactive audit shell (default).
    Shell,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medaudit=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = AuditConfig::from_env();

    match cli.command {
        Some(Command::Run { patterns }) => {
            let mut store = EvidenceStore::new();
            let added = add_documents(&mut store, &patterns)?;
            anyhow::ensure!(added > 0, "no supported documentation files matched");
            let report = execute_audit(&config, &store).await?;
            println!("{}", report.to_markdown());
            Ok(())
        }
        Some(Command::Shell) | None => shell(config).await,
    }
}

/// Discover, load, and ingest documents; returns how many were added.
fn add_documents(store: &mut EvidenceStore, patterns: &[String]) -> anyhow::Result<usize> {
    let paths: Vec<PathBuf> = ingest::discover(patterns);
    for path in &paths {
        let doc = ingest::load_document(path)?;
        let units = store.ingest(&doc);
        println!("  {} -> {} evidence unit(s)", doc.name, units.len());
    }
    Ok(paths.len())
}

/// Assemble the audit team and run one audit over the store.
async fn execute_audit(
    config: &AuditConfig,
    store: &EvidenceStore,
) -> anyhow::Result<medaudit::AuditReport> {
    let api_key = config
        .api_key
        .clone()
        .context("ANTHROPIC_API_KEY is not set; reviews cannot run")?;

    let catalog = Arc::new(ClauseCatalog::iec62304());
    let transport = Arc::new(AnthropicTransport::new(api_key, config.model.clone()));
    let (classifier, reviewers) = LlmReviewer::team(catalog.clone(), transport);
    let orchestrator = Orchestrator::new(config.clone(), catalog, classifier, reviewers)?;

    // Ctrl-C aborts the run but leaves the evidence store intact.
    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_on_signal.cancel();
        }
    });

    Ok(orchestrator.run(store, cancel).await?)
}

/// Interactive shell: queue documentation, then run audits against
/// the accumulated evidence.
async fn shell(config: AuditConfig) -> anyhow::Result<()> {
    println!("medaudit — IEC 62304 compliance auditor");
    println!("Commands:");
    println!("  add <globs>  - add documentation (.md, .txt, .docx)");
    println!("  list         - show ingested evidence");
    println!("  clear        - drop all evidence");
    println!("  run          - execute the audit");
    println!("  quit         - exit\n");

    let mut store = EvidenceStore::new();
    let mut editor = rustyline::DefaultEditor::new()?;

    loop {
        let line = match editor.readline("iec62304> ") {
            Ok(line) => line,
            Err(rustyline::error::ReadlineError::Interrupted)
            | Err(rustyline::error::ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        editor.add_history_entry(line)?;

        let mut parts = line.split_whitespace();
        let command = parts.next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<String> = parts.map(str::to_string).collect();

        match command.as_str() {
            "quit" | "exit" => break,
            "add" => {
                if args.is_empty() {
                    println!("Usage: add <files or globs>");
                    continue;
                }
                match add_documents(&mut store, &args) {
                    Ok(0) => println!("No supported files found"),
                    Ok(n) => println!("Added {n} file(s), {} evidence unit(s) total", store.len()),
                    Err(e) => println!("Error: {e:#}"),
                }
            }
            "list" => {
                if store.is_empty() {
                    println!("No evidence ingested");
                } else {
                    for unit in store.units() {
                        println!(
                            "  [{}] {} — {}{}",
                            unit.id,
                            unit.source_document,
                            unit.locator,
                            if unit.truncated { " (truncated)" } else { "" },
                        );
                    }
                }
            }
            "clear" => {
                store.clear();
                println!("Evidence cleared");
            }
            "run" => {
                if store.is_empty() {
                    println!("No evidence. Use `add <files>` first");
                    continue;
                }
                match execute_audit(&config, &store).await {
                    Ok(report) => println!("\n{}", report.to_markdown()),
                    Err(e) => println!("Audit failed: {e:#}"),
                }
            }
            _ => println!("Unknown command '{command}'"),
        }
    }

    println!("Bye.");
    Ok(())
}
