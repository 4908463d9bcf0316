//! forkpool - run commands across a bounded pool of forked workers

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::{OwoColorize, Stream::Stderr};
use std::io::IsTerminal;

use cli::{Cli, Commands, MapArgs, PoolArgs, RunArgs};
use forkpool::command::{ShellCallback, TaskCommand};
use forkpool::logging::{self, LogConfig};
use forkpool::{
    FixedTaskPool, ParamQueue, ParamRecord, ParameterizedTaskPool, PoolConfig, RunSummary,
    parse_process_count,
};

/// Parses arguments, sets up logging, runs the selected pool and prints the
/// error chain on failure before exiting with status 1.
fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        owo_colors::set_override(false);
    }
    logging::init(log_config(&cli));

    let result = match &cli.command {
        Commands::Run(args) => cmd_run(&cli, args),
        Commands::Map(args) => cmd_map(&cli, args),
    };

    if let Err(e) = result {
        eprintln!(
            "{}: {}",
            "error"
                .if_supports_color(Stderr, |text| text.red())
                .if_supports_color(Stderr, |text| text.bold()),
            e
        );
        for cause in e.chain().skip(1) {
            eprintln!(
                "  {}: {}",
                "caused by".if_supports_color(Stderr, |text| text.yellow()),
                cause
            );
        }
        std::process::exit(1);
    }
}

/// CLI flags win over `FORKPOOL_LOG*` environment variables.
fn log_config(cli: &Cli) -> LogConfig {
    let ansi = !cli.no_color && std::io::stderr().is_terminal();
    let mut config = LogConfig::for_cli(cli.verbose, cli.quiet).with_ansi(ansi);
    if cli.verbose > 0 || cli.quiet {
        let level = config.level.to_string().to_lowercase();
        config = config.with_filter(level);
    }
    config = config.with_env_overrides();
    if let Some(format) = cli.log_format {
        config = config.with_format(format);
    }
    if let Some(path) = &cli.log_file {
        config = config.with_file(path.clone());
    }
    if let Some(rotation) = cli.log_rotation {
        config = config.with_rotation(rotation);
    }
    config
}

fn pool_config(cli: &Cli, args: &PoolArgs, preset: PoolConfig) -> Result<PoolConfig> {
    let mut config = preset.with_env_overrides();
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }
    if let Some(jitter) = &args.jitter {
        config = config.with_jitter(jitter.parse().map_err(anyhow::Error::msg)?);
    }
    Ok(config)
}

fn callback(args: &PoolArgs) -> Result<Option<ShellCallback>> {
    Ok(args
        .on_complete
        .as_deref()
        .map(ShellCallback::new)
        .transpose()?)
}

fn cmd_run(cli: &Cli, args: &RunArgs) -> Result<()> {
    let cap = parse_process_count(&args.pool.procs)?;
    let command = TaskCommand::new(args.command.clone())?;
    let on_complete = callback(&args.pool)?;

    let mut config = pool_config(cli, &args.pool, PoolConfig::for_fixed())?;
    if args.no_heartbeat {
        config = config.with_heartbeat(false);
    }

    let pool = FixedTaskPool::new(cap, move || command.run())?.with_config(config);
    let summary = match on_complete {
        Some(cb) => pool.run_then(|| cb.invoke()),
        None => pool.run(),
    }?;
    report(&summary);
    Ok(())
}

fn cmd_map(cli: &Cli, args: &MapArgs) -> Result<()> {
    let cap = parse_process_count(&args.pool.procs)?;
    let command = TaskCommand::new(args.command.clone())?;
    let on_complete = callback(&args.pool)?;
    let queue = ParamQueue::from_path(&args.params)
        .with_context(|| format!("failed to load parameters from {}", args.params.display()))?;

    let config = pool_config(cli, &args.pool, PoolConfig::for_parameterized())?;
    let pool = ParameterizedTaskPool::from_queue(
        cap,
        move |record: &ParamRecord| command.run_with(record),
        queue,
    )?
    .with_config(config);

    let summary = match on_complete {
        Some(cb) => pool.run_then(|| cb.invoke()),
        None => pool.run(),
    }?;
    report(&summary);
    Ok(())
}

fn report(summary: &RunSummary) {
    tracing::info!(
        total = summary.total,
        succeeded = summary.succeeded,
        failed = summary.failed,
        failed_records = ?summary.failed_records,
        effective_cap = summary.effective_cap,
        elapsed_ms = summary.elapsed.as_millis() as u64,
        "Pool run complete"
    );
}
