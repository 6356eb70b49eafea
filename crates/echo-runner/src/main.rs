//! echo-runner - command-line harness for echo.
//!
//! Reads `session<TAB>text` lines from stdin and prints the chosen voice.
//! A text of `*name` is treated as an interaction gesture (`*poke`).
//! A line reading `!rescan` reloads the voice directory.
//! Scheduled broadcasts run in the background and are logged.

mod sender;

use anyhow::Context;
use echo_core::{
    AssetCatalog, ConfigStore, ContextStore, DecisionOrchestrator, DedupLedger, EchoConfig,
    FileConfigStore, InteractionKind, PersistenceWorker, PersonaAdapter, PlatformEvent,
    ResourceSelector, RuleRegistry, SentimentAnalyzer, TriggerScheduler,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::sender::LogSender;

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("echo").join("echo.toml"))
        .unwrap_or_else(|| PathBuf::from("echo.toml"))
}

/// Parse one input line into an event.
fn parse_line(line: &str) -> Option<PlatformEvent> {
    let (session, text) = line.split_once('\t')?;
    let session = session.trim();
    let text = text.trim();
    if session.is_empty() || text.is_empty() {
        return None;
    }
    match text.strip_prefix('*') {
        Some(name) if !name.trim().is_empty() => {
            let name = name.trim();
            let kind = name
                .parse::<InteractionKind>()
                .unwrap_or_else(|_| InteractionKind::Other(name.to_string()));
            Some(PlatformEvent::interaction(session, kind))
        }
        _ => Some(PlatformEvent::message(session, text)),
    }
}

fn build_orchestrator(
    store: Arc<dyn ConfigStore>,
    worker: &Arc<PersistenceWorker>,
) -> anyhow::Result<DecisionOrchestrator> {
    let config = store.snapshot();

    let catalog = match AssetCatalog::load(&config.voice.directory) {
        Ok(catalog) => {
            catalog.persist_index(worker);
            catalog
        }
        Err(e) => {
            warn!(
                error = %e,
                code = e.code().as_str(),
                hint = e.suggestion().unwrap_or_default(),
                dir = %config.voice.directory.display(),
                "No voice catalog, replies disabled"
            );
            AssetCatalog::from_entries(&config.voice.directory, Vec::new())
        }
    };
    info!(assets = catalog.len(), tags = catalog.tags().len(), "Voice catalog ready");

    let mut selector = ResourceSelector::new(catalog, config.selector.clone())
        .with_min_quality(config.voice.min_quality)
        .with_persistence(Arc::clone(worker), &config.state_dir);
    if let Ok(path) = std::env::var("ECHO_PERSONA") {
        let persona = PersonaAdapter::from_file(&path)
            .with_context(|| format!("Failed to load persona table {}", path))?;
        info!(persona = %persona.name, "Loaded persona table");
        selector = selector.with_persona(persona);
    }

    let context = Arc::new(ContextStore::new(&config.sentiment, config.sessions.max_sessions));
    let analyzer = Arc::new(SentimentAnalyzer::new(
        Arc::new(RuleRegistry::builtin()),
        config.sentiment.clone(),
        context,
    ));
    Ok(DecisionOrchestrator::new(store, analyzer, Arc::new(selector)))
}

/// Rebuild the catalog from disk, keeping learned usage.
fn rescan(orchestrator: &DecisionOrchestrator, worker: &PersistenceWorker) {
    let dir = orchestrator.config().snapshot().voice.directory;
    match AssetCatalog::scan(&dir) {
        Ok(catalog) => {
            catalog.persist_index(worker);
            orchestrator.selector().replace_catalog(catalog);
        }
        Err(e) => warn!(
            error = %e,
            hint = e.suggestion().unwrap_or_default(),
            dir = %dir.display(),
            "Rescan failed"
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let config_path = std::env::var("ECHO_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path());
    let store = FileConfigStore::open(&config_path)
        .with_context(|| format!("Failed to open configuration {}", config_path.display()))?;
    store.update(&mut |config: &mut EchoConfig| *config = config.clone().with_env_overrides());
    let store: Arc<dyn ConfigStore> = Arc::new(store);
    info!(path = %config_path.display(), "Configuration loaded");

    let worker = Arc::new(PersistenceWorker::spawn());
    let orchestrator = Arc::new(build_orchestrator(Arc::clone(&store), &worker)?);

    let state_dir = store.snapshot().state_dir;
    let ledger = Arc::new(DedupLedger::open(&state_dir, Arc::clone(&worker)));
    let scheduler = TriggerScheduler::new(Arc::clone(&orchestrator), Arc::new(LogSender), ledger);
    scheduler.start().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!("End of input");
                    break;
                };
                if line.trim() == "!rescan" {
                    rescan(&orchestrator, &worker);
                    continue;
                }
                let Some(event) = parse_line(&line) else {
                    warn!(line = %line, "Expected session<TAB>text");
                    continue;
                };
                match orchestrator.respond(&event) {
                    Some(response) => println!(
                        "{}\t{}\t{}\t{}",
                        response.session_id,
                        response.tag.as_deref().unwrap_or("-"),
                        response.asset_id,
                        response.path.display()
                    ),
                    None => println!("{}\t-", event.session_id),
                }
            }
        }
    }

    scheduler.stop().await?;
    worker.shutdown().await;
    info!("Stopped cleanly");
    Ok(())
}
