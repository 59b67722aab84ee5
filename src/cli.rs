//! CLI command definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Drover - master-side workflow execution engine
#[derive(Parser, Debug)]
#[command(name = "drover")]
#[command(version)]
#[command(about = "Run workflow DAGs against a pool of worker hosts")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate a master configuration file
    CheckConfig {
        /// Path to the TOML configuration
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Execute a workflow definition against simulated workers
    Run {
        /// Path to the TOML configuration (workers come from its [[workers]] table)
        #[arg(short, long)]
        config: PathBuf,

        /// Path to the JSON workflow definition
        #[arg(short, long)]
        definition: PathBuf,

        /// Number of workflow instances to start
        #[arg(short, long, default_value_t = 1)]
        runs: u32,

        /// How long each simulated task runs, in milliseconds
        #[arg(long, default_value_t = 50)]
        task_ms: u64,

        /// Task codes whose attempts the simulated workers fail
        #[arg(long, value_delimiter = ',')]
        fail_tasks: Vec<i64>,

        /// Succeed every task without contacting workers
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;

    #[test]
    fn test_parse_run_with_failures() {
        let cli = Cli::try_parse_from([
            "drover",
            "run",
            "--config",
            "drover.toml",
            "--definition",
            "etl.json",
            "--runs",
            "3",
            "--fail-tasks",
            "2,5",
        ])
        .unwrap();

        match cli.command {
            Commands::Run { runs, fail_tasks, dry_run, .. } => {
                assert_eq!(runs, 3);
                assert_eq!(fail_tasks, vec![2, 5]);
                assert!(!dry_run);
            }
            Commands::CheckConfig { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn test_check_config_requires_path() {
        assert!(Cli::try_parse_from(["drover", "check-config"]).is_err());
    }
}
