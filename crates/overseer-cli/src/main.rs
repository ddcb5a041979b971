//! Grid task overseer - supervises remote grid tasks until they are done.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use overseer_core::{Action, TaskSelection};
use overseer_engine::OverseerOptions;

/// Grid task overseer
#[derive(Parser, Debug)]
#[command(name = "overseer", about = "Supervise grid tasks until they are done")]
struct Args {
    /// Working area to store the overseer and task states
    #[arg(long, default_value = ".overseer")]
    work_area: PathBuf,

    /// Overseer configuration file, copied into the work area
    #[arg(long)]
    cfg: Option<PathBuf>,

    /// Do not query the remote service for task status updates
    #[arg(long)]
    no_status_update: bool,

    /// Update the configuration of tasks that already exist
    #[arg(long)]
    update_cfg: bool,

    /// Run a single round and exit
    #[arg(long)]
    no_loop: bool,

    /// Task selection, e.g. "status==Failed || name~'^ttbar'"
    #[arg(long)]
    select: Option<TaskSelection>,

    /// Action to apply to the selected tasks instead of running the loop
    #[arg(long)]
    action: Option<Action>,

    /// Verbosity level: 0 warnings, 1 info, 2 debug
    #[arg(long, default_value_t = 0)]
    verbose: u8,

    /// Task list files with new task definitions
    task_file: Vec<PathBuf>,
}

fn log_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(log_directive(args.verbose))),
        )
        .with_target(false)
        .init();

    info!(work_area = %args.work_area.display(), "Grid task overseer starting");

    let options = OverseerOptions {
        work_area: args.work_area,
        cfg: args.cfg,
        task_files: args.task_file,
        no_status_update: args.no_status_update,
        update_cfg: args.update_cfg,
        no_loop: args.no_loop,
        selection: args.select,
        action: args.action,
    };

    if let Err(e) = overseer_engine::run(options).await {
        error!(error = %e, "Overseer stopped");
        return Err(e.into());
    }
    Ok(())
}
