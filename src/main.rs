use std::io::stdin;

use anyhow::{Context, Result};
use clap::Parser;
use jobsh::config::Config;
use jobsh::job::Jobs;
use jobsh::shell::Shell;
use jobsh::signals::SignalThread;
use tracing::info;

fn main() -> Result<()> {
    let config = Config::parse();
    tracing_subscriber::fmt()
        .with_env_filter(config.log_filter())
        .with_writer(std::io::stderr)
        .init();

    let jobs = Jobs::new(config.max_jobs);
    let signals = SignalThread::spawn(jobs.clone()).context("installing signal handlers")?;
    info!(max_jobs = config.max_jobs, "shell started");

    let mut shell = Shell::new(jobs, config.prompt());
    if let Err(e) = shell.run(stdin().lock()) {
        println!("{e}");
        std::process::exit(1);
    }

    signals.shutdown();
    Ok(())
}
