mod classifier;
mod cli;
mod config;
mod error;
mod log_watcher;
mod logging;
mod registry;
mod scheduler;
mod slice;
mod submit_file;
mod ui;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use config::JobConfig;
use error::GridJobError;
use scheduler::Condor;

fn run() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => return Err(GridJobError::Usage(e.render().to_string()).into()),
        Err(e) => {
            // --help and --version
            e.print()?;
            return Ok(());
        }
    };

    logging::init(logging::default_level(cli.verbose, cli.quiet))?;

    let job = JobConfig::load(&cli.job)?;
    job.ensure_customized()?;
    let base = std::env::current_dir().context("Failed to determine the working directory")?;

    match cli.command {
        Commands::Info => {
            cli::handle_info(&job)?;
        }
        Commands::Status { long, watch } => {
            if watch {
                cli::handle_watch(&job, &base, &Condor)?;
            } else {
                cli::handle_status(&job, &base, &Condor, long, &mut std::io::stdout().lock())?;
            }
        }
        Commands::Submit { start, count } => {
            cli::handle_submit(&job, &base, &Condor, start, count)?;
        }
        Commands::Cancel { start, count } => {
            cli::handle_cancel(&job, &base, &Condor, start, count)?;
        }
        Commands::Doslice { start, offset } => {
            cli::handle_doslice(&job, start, offset)?;
        }
    }

    Ok(())
}

fn main() {
    if let Err(e) = run() {
        let code = match e.downcast_ref::<GridJobError>() {
            Some(err @ GridJobError::Usage(_)) => {
                eprint!("{}", err);
                err.exit_code()
            }
            Some(err) => {
                eprintln!("{}", err);
                err.exit_code()
            }
            None => {
                eprintln!("error: {:#}", e);
                1
            }
        };
        std::process::exit(code);
    }
}
