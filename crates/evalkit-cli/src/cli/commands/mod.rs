use super::args::*;
use super::env::{build_adapter, EnvConfig};
use evalkit_core::config::{list_packs, load_pack};
use evalkit_core::engine::runner::Runner;
use evalkit_core::errors::RunHalted;
use evalkit_core::model::GenerationParams;
use evalkit_core::providers::llm::ModelAdapter;
use evalkit_core::sandbox::{SandboxConfig, SandboxExecutor};
use evalkit_core::storage::Store;
use std::path::Path;
use std::sync::Arc;

pub mod export;
pub mod regrade;

pub mod exit_codes {
    pub const OK: i32 = 0;
    pub const TEST_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
    pub const RUN_HALTED: i32 = 3;
}

pub async fn dispatch(cli: Cli, env: &EnvConfig) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Run(args) => cmd_run(args, env).await,
        Command::ListPacks(args) => cmd_list_packs(args),
        Command::Export(args) => export::cmd_export(args),
        Command::Regrade(args) => regrade::cmd_regrade(args),
        Command::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

async fn cmd_run(args: RunArgs, env: &EnvConfig) -> anyhow::Result<i32> {
    let pack = match load_pack(&args.pack, &args.dir) {
        Ok(pack) => pack,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    let grader = match pack.grader.as_ref().map(evalkit_graders::from_spec).transpose() {
        Ok(g) => g,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    // The sandbox gets the process environment explicitly and scrubs it.
    let sandbox = Arc::new(SandboxExecutor::new(
        SandboxConfig::python(std::env::vars().collect()).with_interpreter(env.python.as_str()),
    ));
    let mut adapters: Vec<Arc<dyn ModelAdapter>> = Vec::with_capacity(args.models.len());
    for spec in &args.models {
        match build_adapter(spec, env, sandbox.clone()) {
            Ok(a) => adapters.push(a),
            Err(e) => {
                eprintln!("{}", e);
                return Ok(exit_codes::CONFIG_ERROR);
            }
        }
    }

    tracing::debug!(
        event = "cli.run",
        pack = %pack.id,
        models = ?args.models,
        out = %args.out.display()
    );
    ensure_parent_dir(&args.out)?;
    let store = Store::open(&args.out)?;
    store.init_schema()?;

    let params = GenerationParams {
        temperature: args.temperature,
        max_tokens: args.max_tokens,
        tools_enabled: args.tools,
        max_tool_turns: args.max_tool_turns,
        case_timeout_secs: args.case_timeout,
        tool_timeout_secs: args.tool_timeout,
    };
    let mut runner = Runner::new(store, params).with_repetitions(args.n);
    if let Some(g) = grader {
        runner = runner.with_grader(g);
    }

    println!(
        "Running pack '{}' with {} cases, n={}",
        pack.name,
        pack.cases.len(),
        args.n
    );
    match runner.run_pack(&pack, &adapters).await {
        Ok(run_ids) => {
            println!("Completed. Run IDs:");
            for id in &run_ids {
                println!("  {}", id);
            }
            println!("Results saved to {}", args.out.display());
            Ok(exit_codes::OK)
        }
        Err(e) => match e.downcast_ref::<RunHalted>() {
            Some(halted) => {
                eprintln!("halted: {}", halted);
                eprintln!("rows written so far are kept in {}", args.out.display());
                Ok(exit_codes::RUN_HALTED)
            }
            None => Err(e),
        },
    }
}

fn cmd_list_packs(args: ListPacksArgs) -> anyhow::Result<i32> {
    let names = match list_packs(&args.dir) {
        Ok(names) => names,
        Err(e) => {
            eprintln!("{}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    if names.is_empty() {
        println!("No packs found.");
        return Ok(exit_codes::OK);
    }
    for name in names {
        match load_pack(&name, &args.dir) {
            Ok(pack) => println!("  {:20}  {} ({} cases)", pack.id, pack.name, pack.cases.len()),
            Err(e) => eprintln!("  {:20}  error: {}", name, e),
        }
    }
    Ok(exit_codes::OK)
}

fn ensure_parent_dir(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Open an existing ledger; `None` (after telling the user) when the file is
/// missing.
pub(crate) fn open_existing(db: &Path) -> anyhow::Result<Option<Store>> {
    if !db.exists() {
        eprintln!("Database not found: {}", db.display());
        return Ok(None);
    }
    let store = Store::open(db)?;
    store.init_schema()?;
    Ok(Some(store))
}
