mod config;
mod error;
mod gateway;
mod live;
mod logging;
mod store;
mod suggest;
mod sync;
mod task;
mod tui;
mod ui;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use clap::{CommandFactory, Parser};
use config::{ConfigFile, Overrides, ResolvedConfig};
use gateway::RestGateway;
use store::TaskStore;
use suggest::SuggestionClient;
use sync::SyncEngine;
use task::{Suggestion, Task};

#[derive(Parser, Debug)]
#[command(
    name = "taskwire",
    about = "Terminal task list kept in sync with a REST backend, with live updates and AI suggestions",
    long_about = None,
)]
struct Args {
    /// Print the task list once and exit
    #[arg(long, conflicts_with_all = ["watch", "suggest"])]
    list: bool,

    /// Print the task list on every change pushed by the backend (Ctrl+C to stop)
    #[arg(long, conflicts_with = "suggest")]
    watch: bool,

    /// Print AI task suggestions for QUERY and exit
    #[arg(long, value_name = "QUERY")]
    suggest: Option<String>,

    /// Override the REST backend URL
    #[arg(long, env = "TASKWIRE_BACKEND_URL")]
    backend_url: Option<String>,

    /// Override the live-update WebSocket URL
    #[arg(long, env = "TASKWIRE_WS_URL")]
    ws_url: Option<String>,

    /// API key for AI suggestions
    #[arg(long, env = "TASKWIRE_AI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Override the AI model name
    #[arg(short, long, env = "TASKWIRE_AI_MODEL")]
    model: Option<String>,

    /// Config file to use instead of ~/.config/taskwire/config.toml
    #[arg(long, env = "TASKWIRE_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write a default config file and exit
    #[arg(long)]
    init: bool,

    /// Generate shell completions and print to stdout (bash, zsh, fish, elvish)
    #[arg(long, value_name = "SHELL")]
    completions: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(config::config_path);

    // ── --init ────────────────────────────────────────────────────────────────
    if args.init {
        let path = ConfigFile::write_default_if_missing(&config_path)?;
        println!("Config written to: {}", path.display());
        println!("Edit it, then run: taskwire");
        return Ok(());
    }

    // ── --completions ─────────────────────────────────────────────────────────
    if let Some(shell_name) = &args.completions {
        return generate_completions(shell_name);
    }

    let file = ConfigFile::load(&config_path)?;
    let overrides = Overrides {
        backend_url: args.backend_url.clone(),
        ws_url: args.ws_url.clone(),
        api_key: args.api_key.clone(),
        model: args.model.clone(),
    };
    let resolved = ResolvedConfig::resolve(&file, &overrides);

    // ── Plain modes (stdout, logs on stderr) ──────────────────────────────────
    if let Some(query) = &args.suggest {
        logging::init_stderr()?;
        return run_suggest(query, &resolved).await;
    }
    if args.list {
        logging::init_stderr()?;
        return run_list(&resolved).await;
    }
    if args.watch {
        logging::init_stderr()?;
        return run_watch(&resolved).await;
    }

    // ── Interactive TUI mode ──────────────────────────────────────────────────
    let (_log_guard, log_path) = logging::init_file()?;
    tracing::info!(log = %log_path.display(), backend = %resolved.backend_url, "starting TUI");
    tui::run(resolved).await
}

fn engine(resolved: &ResolvedConfig) -> Result<Arc<SyncEngine<RestGateway>>> {
    let gateway = RestGateway::new(&resolved.backend_url, resolved.request_timeout)?;
    Ok(Arc::new(SyncEngine::new(gateway, TaskStore::new(), resolved.ordering)))
}

fn print_tasks(tasks: &[Task]) {
    println!("{}", ui::count_label(tasks.len()));
    for task in tasks {
        println!("  {}", ui::task_line(task));
    }
}

// ── --list ────────────────────────────────────────────────────────────────────

async fn run_list(resolved: &ResolvedConfig) -> Result<()> {
    let engine = engine(resolved)?;
    engine.refresh().await?;
    print_tasks(&engine.store().get_all());
    Ok(())
}

// ── --watch ───────────────────────────────────────────────────────────────────

async fn run_watch(resolved: &ResolvedConfig) -> Result<()> {
    let engine = engine(resolved)?;
    let mut store_rx = engine.store().subscribe();

    let Some(ws_url) = resolved.ws_url.clone() else {
        anyhow::bail!("Live updates are disabled; set [live] enabled = true or pass --ws-url");
    };

    // Initial load; a failure here is reported but the watch keeps going
    if let Err(e) = engine.refresh().await {
        eprintln!("✗ {e}");
    }

    let listener = live::spawn_listener(
        live::WsConnector::new(ws_url.clone()),
        Arc::clone(&engine),
        resolved.reconnect.clone(),
    );
    let mut conn_rx = listener.subscribe();
    eprintln!("watching {ws_url}  (Ctrl+C to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = store_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = store_rx.borrow_and_update().clone();
                println!();
                println!("── {} · update {} ──", Local::now().format("%H:%M:%S"), snapshot.version);
                print_tasks(&snapshot.tasks);
            }
            changed = conn_rx.changed() => {
                // Listener stopped for good (reconnect off or attempts exhausted)
                if changed.is_err() {
                    break;
                }
                let state = *conn_rx.borrow_and_update();
                eprintln!("{} {}", ui::connection_glyph(state), ui::connection_label(state));
            }
        }
    }

    eprintln!("{} live updates received", listener.signals_handled());
    listener.close().await;
    Ok(())
}

// ── --suggest ─────────────────────────────────────────────────────────────────

async fn run_suggest(query: &str, resolved: &ResolvedConfig) -> Result<()> {
    let mut client = SuggestionClient::new(
        resolved.ai_endpoint.clone(),
        resolved.ai_model.clone(),
        resolved.request_timeout,
    )?;
    if let Some(key) = &resolved.ai_api_key {
        client.set_api_key(key.clone());
    }
    let suggestions = client.recommend(query).await?;
    if suggestions.is_empty() {
        println!("(no suggestions)");
    }
    for raw in &suggestions {
        println!("  {}", ui::suggestion_line(&Suggestion::parse(raw)));
    }
    Ok(())
}

// ── Shell completions ─────────────────────────────────────────────────────────

fn generate_completions(shell_name: &str) -> Result<()> {
    use clap_complete::{Shell, generate};

    let shell: Shell = match shell_name.to_lowercase().as_str() {
        "bash"    => Shell::Bash,
        "zsh"     => Shell::Zsh,
        "fish"    => Shell::Fish,
        "elvish"  => Shell::Elvish,
        _ => anyhow::bail!("Unknown shell: {shell_name} (supported: bash, zsh, fish, elvish)"),
    };

    let mut cmd = Args::command();
    generate(shell, &mut cmd, "taskwire", &mut std::io::stdout());
    Ok(())
}
