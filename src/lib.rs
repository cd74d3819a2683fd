pub mod cli;
pub mod config;
pub mod downloader;
pub mod errors;
pub mod history;
pub mod orchestrator;
pub mod state;
pub mod storage;
pub mod ytdlp;

use clap::Parser;
use std::process::ExitCode;

use cli::Cli;
use config::AppConfig;

pub use errors::{AppError, Result};
pub use orchestrator::Orchestrator;

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    // RUST_LOG is parsed last so it overrides -v
    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            log::error!("Failed to load configuration: {}", e);
            eprintln!("error: {}", e.user_message());
            return ExitCode::FAILURE;
        }
    };
    log::debug!("Working directory: {}", config.working_dir.display());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(cli::execute(cli.command, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e.user_message());
            ExitCode::FAILURE
        }
    }
}
