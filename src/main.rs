use chrono::Utc;
use std::process::ExitCode;
use tracing::{error, info, warn};

mod config;
mod context;
mod engine;
mod error;
mod integrations;
mod logging;
mod mapper;
mod marker;
mod models;

use crate::config::{Config, Credentials, config_path};
use crate::context::SyncContext;
use crate::engine::RunFailure;
use crate::error::SyncError;
use crate::models::RunResult;

const EXIT_OK: u8 = 0;
const EXIT_FAILED: u8 = 1;
const EXIT_CONFIG: u8 = 2;

fn main() -> ExitCode {
    logging::init();
    info!(config = %config_path().display(), "reflog-sync starting");

    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => return setup_failure(&err),
    };
    let credentials = match Credentials::from_env() {
        Ok(credentials) => credentials,
        Err(err) => return setup_failure(&err),
    };
    let context = match SyncContext::build(&config, &credentials, Utc::now()) {
        Ok(context) => context,
        Err(err) => return setup_failure(&err),
    };

    let (mut engine, window) = context.into_engine();
    let outcome = engine.run(&window);
    report(&outcome);
    info!(state = %engine.state(), "reflog-sync finished");
    ExitCode::from(exit_status(&outcome))
}

fn setup_failure(err: &SyncError) -> ExitCode {
    error!(error = %err, "cannot start sync run");
    eprintln!("reflog-sync: {err}");
    match err {
        SyncError::Configuration(_) => ExitCode::from(EXIT_CONFIG),
        _ => ExitCode::from(EXIT_FAILED),
    }
}

fn report(outcome: &Result<RunResult, RunFailure>) {
    match outcome {
        Ok(result) => {
            println!("{}", result.summary());
            for failed in &result.failed {
                warn!(
                    task_id = %failed.task_id,
                    date = %failed.date,
                    error = %failed.error,
                    "entry will be retried on the next run"
                );
                println!(
                    "  failed: task {} ({}): {}",
                    failed.task_id, failed.date, failed.error
                );
            }
        }
        Err(failure) => {
            eprintln!("reflog-sync: {failure}");
        }
    }
}

/// Per-entry write failures still count as a completed run.
fn exit_status(outcome: &Result<RunResult, RunFailure>) -> u8 {
    match outcome {
        Ok(_) => EXIT_OK,
        Err(failure) if matches!(failure.error, SyncError::Configuration(_)) => EXIT_CONFIG,
        Err(_) => EXIT_FAILED,
    }
}
