use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use workload_launcher::launcher::config::load_config;
use workload_launcher::launcher::defaults::{EXIT_MISCONFIGURED, LAUNCHER_VERSION};
use workload_launcher::launcher::error::exit_code;
use workload_launcher::launcher::run::{init_logging, Application};
use workload_launcher::syncer::inert::InertSyncer;

/// Supervisor and network launcher for managed data-plane workloads.
#[derive(Debug, Parser)]
#[command(version = LAUNCHER_VERSION, about)]
struct Args {
    /// Path to the launcher configuration file (YAML). `WL_*` environment
    /// variables override individual keys.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            std::process::exit(EXIT_MISCONFIGURED);
        }
    };
    init_logging(&config.log);
    info!(version = LAUNCHER_VERSION, "workload launcher starting");

    // The built-in syncer realizes processes as logical role bindings;
    // deployments supervising real children embed the library and plug in
    // their own syncer.
    let result =
        Application::new(config, Arc::new(InertSyncer::new())).and_then(Application::run);

    match &result {
        Ok(()) => info!("clean shutdown"),
        Err(err) => error!(error = %err, "launcher exited with an error"),
    }
    std::process::exit(exit_code(&result));
}
