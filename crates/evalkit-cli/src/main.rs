use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

mod cli;

use cli::args::Cli;
use cli::commands::{dispatch, exit_codes};
use cli::env::EnvConfig;

fn init_logging(cfg: &EnvConfig) {
    let filter = EnvFilter::try_new(&cfg.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if cfg.log_json {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_target(true)
            .with_current_span(false)
            .with_span_list(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = Cli::parse();
    let env = EnvConfig::from_env();
    init_logging(&env);

    let code = match dispatch(cli, &env).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {e:?}");
            exit_codes::CONFIG_ERROR
        }
    };
    std::process::exit(code);
}
