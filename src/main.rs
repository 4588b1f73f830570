mod backend;
mod catalog;
mod cli;
mod commands;
mod config;
mod executor;
mod level;
mod logging;
mod model;
mod specialize;
mod store;
mod structure;
mod topics;
mod util;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use crate::cli::{Cli, Commands};
use crate::logging::{RunLog, init_tracing};

fn main() {
    let cli = Cli::parse();

    let (run_log, log_error) = open_run_log(&cli.command);
    init_tracing(run_log.as_ref());
    if let Some(err) = log_error {
        warn!(error = %format!("{err:#}"), "run log unavailable; logging to the console only");
    }
    if let Some(log) = run_log.as_ref() {
        info!(path = %log.path().display(), "writing run log");
    }

    if let Err(err) = run(cli, run_log.as_ref()) {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli, run_log: Option<&RunLog>) -> Result<()> {
    match cli.command {
        Commands::Topics(args) => commands::topics::run(args),
        Commands::Generate(args) => commands::generate::run(args),
        Commands::Execute(args) => commands::execute::run(args, run_log),
        Commands::Pipeline(args) => commands::pipeline::run(args, run_log),
        Commands::Status(args) => commands::status::run(args),
    }
}

fn open_run_log(command: &Commands) -> (Option<RunLog>, Option<anyhow::Error>) {
    let common = command.common();
    if common.no_log_file {
        return (None, None);
    }

    let opened = match common.log_file.as_deref() {
        Some(path) => RunLog::open(path),
        None => RunLog::create(&common.log_dir(), command.name()),
    };
    match opened {
        Ok(log) => (Some(log), None),
        Err(err) => (None, Some(err)),
    }
}
