use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "evalkit",
    version,
    about = "Run evaluation packs against LLM providers and record every output"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a pack against one or more models
    Run(RunArgs),
    /// List the packs found in a directory
    ListPacks(ListPacksArgs),
    /// Export one run's outputs and scores as JSON or CSV
    Export(ExportArgs),
    /// Re-score an existing run with the pack's grader
    Regrade(RegradeArgs),
    Version,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Pack name (a directory under --dir)
    #[arg(long)]
    pub pack: String,

    /// Model spec as provider:model_name (repeatable)
    #[arg(long = "model", required = true)]
    pub models: Vec<String>,

    /// Repetitions per case
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub n: u32,

    /// Ledger database path
    #[arg(long, default_value = "results.sqlite")]
    pub out: PathBuf,

    /// Packs directory
    #[arg(long, default_value = "packs")]
    pub dir: PathBuf,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Let the model call run_python
    #[arg(long, default_value_t = false)]
    pub tools: bool,

    #[arg(long, default_value_t = 10)]
    pub max_tool_turns: u32,

    /// Wall-clock budget per case in tool mode (seconds)
    #[arg(long, default_value_t = 120)]
    pub case_timeout: u64,

    /// Limit per sandboxed execution (seconds)
    #[arg(long, default_value_t = 30)]
    pub tool_timeout: u64,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ListPacksArgs {
    #[arg(long, default_value = "packs")]
    pub dir: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ExportArgs {
    #[arg(long, default_value = "results.sqlite")]
    pub db: PathBuf,

    /// Run id (default: latest)
    #[arg(long)]
    pub run: Option<String>,

    #[arg(long, value_enum, default_value_t = ExportFormat::Json)]
    pub format: ExportFormat,

    /// Output file (default: stdout)
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RegradeArgs {
    #[arg(long, default_value = "results.sqlite")]
    pub db: PathBuf,

    /// Pack whose grader is applied
    #[arg(long)]
    pub pack: String,

    /// Run id (default: latest run of the pack)
    #[arg(long)]
    pub run: Option<String>,

    #[arg(long, default_value = "packs")]
    pub dir: PathBuf,
}
