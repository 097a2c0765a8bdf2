// src/main.rs
//
// =============================================================================
// WORKCELL CORE: COMMAND-LINE ENTRY POINT
// =============================================================================
//
// A thin wiring layer over the library: initialize a database, queue a
// protocol run, drive it to completion against the in-memory reference
// runtime, and check store connectivity. A production deployment is
// expected to embed `workcell_core` directly and supply its own
// `WorkcellRuntime`; this binary exists for local smoke-testing and for
// scriptable one-shot runs, the same role the teacher's `Deploy` subcommand
// plays for blueprint submission.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;
use workcell_core::{
    execute_protocol_run_blocking, logging, runtime::FunctionCall, store, ExecutionContext,
    InMemoryLockManager, InMemoryRuntime, InProcessOrchestrator,
};

#[derive(Parser)]
#[command(name = "workcell-core", version, about = "Laboratory workcell orchestration core")]
struct Cli {
    /// Path to the SQLite database file.
    #[arg(long, global = true, default_value = "workcell.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database file and apply the schema if it doesn't exist.
    InitDb,

    /// Queue a new protocol run against an existing protocol definition.
    Submit {
        /// Accession id of the `function_protocol_definitions` row to run.
        #[arg(long)]
        protocol_definition: Uuid,

        /// JSON object of input parameters for the run.
        #[arg(long, default_value = "{}")]
        params: String,
    },

    /// Execute a queued run's call sequence against the in-memory reference
    /// runtime and drive it to a terminal status.
    Run {
        /// Accession id of the `protocol_runs` row to execute.
        #[arg(long)]
        run: Uuid,

        /// Path to a JSON file of `[{"function_name": ..., "args": ...}, ...]`.
        #[arg(long)]
        calls: PathBuf,
    },

    /// Verify the store is reachable.
    Health,
}

fn main() -> Result<()> {
    logging::init_env_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb => init_db(&cli.db),
        Commands::Submit { protocol_definition, params } => submit(&cli.db, protocol_definition, &params),
        Commands::Run { run, calls } => run_protocol(&cli.db, run, &calls),
        Commands::Health => health(&cli.db),
    }
}

fn init_db(db_path: &PathBuf) -> Result<()> {
    store::Store::open(db_path).context("failed to initialize database")?;
    log::info!("database ready at {:?}", db_path);
    Ok(())
}

fn submit(db_path: &PathBuf, protocol_definition: Uuid, params: &str) -> Result<()> {
    let params: serde_json::Value = serde_json::from_str(params).context("params must be valid JSON")?;
    let store = store::Store::open(db_path).context("failed to open database")?;
    let conn = store.conn()?;
    let run = store::runs::create_run(&conn, &protocol_definition, params)
        .context("failed to create protocol run")?;
    log::info!("queued run {}", run.accession_id);
    println!("{}", run.accession_id);
    Ok(())
}

fn run_protocol(db_path: &PathBuf, run: Uuid, calls_path: &PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(calls_path)
        .with_context(|| format!("failed to read {:?}", calls_path))?;
    let calls: Vec<FunctionCall> = serde_json::from_str(&raw).context("calls file must be a JSON array")?;

    let runtime = Arc::new(InMemoryRuntime::new());
    let lock_manager: Arc<InMemoryLockManager> = Arc::new(InMemoryLockManager::default());
    let ctx = ExecutionContext::new(
        db_path.clone(),
        lock_manager.clone(),
        Arc::new(InProcessOrchestrator::new(runtime, lock_manager)),
    );

    // The CLI drives a run's call sequence directly without declaring asset
    // requirements of its own; a caller that needs C7 acquisition should
    // embed the library and supply `requirements` itself.
    execute_protocol_run_blocking(&ctx, run, vec![], calls).context("run execution failed")?;
    log::info!("run {} finished", run);
    Ok(())
}

fn health(db_path: &PathBuf) -> Result<()> {
    let runtime = Arc::new(InMemoryRuntime::new());
    let lock_manager: Arc<InMemoryLockManager> = Arc::new(InMemoryLockManager::default());
    let ctx = ExecutionContext::new(
        db_path.clone(),
        lock_manager.clone(),
        Arc::new(InProcessOrchestrator::new(runtime, lock_manager)),
    );
    ctx.health_check().context("store health check failed")?;
    println!("ok");
    Ok(())
}
