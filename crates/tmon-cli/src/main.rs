use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(name = "tmon")]
#[command(about = "Temporal rule monitor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSONL trace through the selected policies
    Replay {
        /// JSONL trace: one fact or watermark per line
        #[arg(long)]
        trace: PathBuf,

        /// Layered config paths in merge order
        #[arg(long = "config")]
        config_paths: Vec<PathBuf>,

        /// Policies to run (default: every built-in policy)
        #[arg(long = "policy")]
        policies: Vec<String>,

        /// Append verdicts to this JSONL log
        #[arg(long)]
        out: Option<PathBuf>,

        /// What to do with config keys the monitor does not read
        #[arg(long, value_enum, default_value_t = UnusedKeys::Warn)]
        unused_keys: UnusedKeys,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> overrides)
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Verify the hash chain of a verdict log
    VerifyLog {
        #[arg(long)]
        path: PathBuf,
    },

    /// List built-in policies
    Policies,
}

#[derive(Clone, Copy, ValueEnum)]
enum UnusedKeys {
    Warn,
    Fail,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Replay {
            trace,
            config_paths,
            policies,
            out,
            unused_keys,
        } => commands::replay::run(commands::replay::ReplayArgs {
            trace,
            config_paths,
            policies,
            out,
            fail_on_unused_keys: matches!(unused_keys, UnusedKeys::Fail),
        }),
        Commands::ConfigHash { paths } => commands::inspect::config_hash(&paths),
        Commands::VerifyLog { path } => commands::inspect::verify_log(&path),
        Commands::Policies => {
            commands::inspect::list_policies();
            Ok(())
        }
    }
}

/// Logs go to stderr; stdout carries `key=value` results only.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}
