//! Command-line interface definitions using clap.

use clap::{Args, Parser, Subcommand};
use forkpool::logging::{LogFormat, LogRotation};
use std::path::PathBuf;

/// Run commands across a bounded pool of forked worker processes.
#[derive(Parser, Debug)]
#[command(name = "forkpool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors (no heartbeats or worker events).
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    pub quiet: bool,

    /// Log output format.
    #[arg(long, env = "FORKPOOL_LOG_FORMAT", value_parser = parse_log_format, global = true)]
    pub log_format: Option<LogFormat>,

    /// Also write logs to this file.
    #[arg(long, env = "FORKPOOL_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Split the log file by time: never, hourly or daily.
    #[arg(long, env = "FORKPOOL_LOG_ROTATION", value_parser = parse_log_rotation, global = true)]
    pub log_rotation: Option<LogRotation>,

    /// Disable colored output.
    #[arg(
        long,
        env = "NO_COLOR",
        action = clap::ArgAction::SetTrue,
        value_parser = clap::builder::FalseyValueParser::new(),
        global = true
    )]
    pub no_color: bool,

    /// Seed for the worker start jitter.
    #[arg(long, env = "FORKPOOL_SEED", global = true)]
    pub seed: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the same command in N workers at once.
    Run(RunArgs),

    /// Run a command once per parameter record, at most N at a time.
    Map(MapArgs),
}

/// Options shared by both pool commands.
#[derive(Args, Debug)]
pub struct PoolArgs {
    /// Number of worker processes.
    #[arg(short = 'n', long = "procs", allow_negative_numbers = true)]
    pub procs: String,

    /// Shell command to run once after every worker has exited.
    #[arg(long)]
    pub on_complete: Option<String>,

    /// Worker start jitter in milliseconds, `MIN-MAX` or a single value.
    #[arg(long, value_name = "MS")]
    pub jitter: Option<String>,
}

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub pool: PoolArgs,

    /// Block silently on workers instead of polling with progress lines.
    #[arg(long)]
    pub no_heartbeat: bool,

    /// Command and arguments each worker runs.
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// Arguments for the map command.
#[derive(Args, Debug)]
pub struct MapArgs {
    #[command(flatten)]
    pub pool: PoolArgs,

    /// JSON file holding an array of parameter objects (`-` for stdin).
    #[arg(short, long)]
    pub params: PathBuf,

    /// Command template; `{name}` is replaced with each record's field.
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    s.parse()
}

fn parse_log_rotation(s: &str) -> Result<LogRotation, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_verifies() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "forkpool",
            "run",
            "-n",
            "3",
            "--no-heartbeat",
            "--",
            "sleep",
            "1",
        ])
        .unwrap();
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.pool.procs, "3");
                assert!(args.no_heartbeat);
                assert_eq!(args.command, vec!["sleep", "1"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_map_with_negative_procs() {
        let cli = Cli::try_parse_from([
            "forkpool", "map", "-n", "-3", "--params", "p.json", "--", "echo", "{begin}",
        ])
        .unwrap();
        match cli.command {
            Commands::Map(args) => {
                assert_eq!(args.pool.procs, "-3");
                assert_eq!(args.params, PathBuf::from("p.json"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_log_rotation() {
        let cli = Cli::try_parse_from([
            "forkpool",
            "--log-file",
            "pool.log",
            "--log-rotation",
            "hourly",
            "run",
            "-n",
            "2",
            "--",
            "true",
        ])
        .unwrap();
        assert_eq!(cli.log_rotation, Some(LogRotation::Hourly));

        assert!(
            Cli::try_parse_from([
                "forkpool",
                "--log-rotation",
                "weekly",
                "run",
                "-n",
                "2",
                "--",
                "true"
            ])
            .is_err()
        );
    }

    #[test]
    fn test_command_is_required() {
        assert!(Cli::try_parse_from(["forkpool", "run", "-n", "2"]).is_err());
    }
}
