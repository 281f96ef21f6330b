//! Pylon - Entry point

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};

use pylon::core::Runtime;
use pylon::server::run_with_restart;
use pylon::telemetry::{init_logging, init_metrics};
use pylon::{load_config, resolve_path, AppResult, Application};

/// Multi-server HTTP runtime.
#[derive(Parser, Debug)]
#[command(name = "pylon", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every configured server until a stop signal arrives.
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Configuration profile, e.g. `dev` or `prod`.
    #[arg(default_value = "dev")]
    profile: String,

    /// Home directory holding `pylon.toml` and friends.
    #[arg(long, default_value = ".")]
    home: PathBuf,

    /// Bind every server to this address instead of the configured one.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run(args) => run(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: RunArgs) -> AppResult<()> {
    let runtime = Runtime::new(&args.profile, &args.home)?;
    let config = load_config(runtime.home_dir(), runtime.profile(), args.bind.as_deref())?;

    let mut log_config = config.logging.to_log_config();
    log_config.file = log_config
        .file
        .map(|file| resolve_path(runtime.home_dir(), &file));
    let logging = init_logging(&log_config)?;
    init_metrics(&config.metrics.to_metrics_config())?;

    let stats: Vec<String> = runtime
        .stats()
        .into_iter()
        .map(|(name, value)| format!("{name}={value}"))
        .collect();
    tracing::info!(stats = %stats.join(" "), "starting");

    let rotators = logging.rotators();
    let mut prepared = Some((runtime, config));

    run_with_restart(|| {
        let prepared = prepared.take();
        let args = args.clone();
        let rotators = rotators.clone();
        async move {
            // Restarts re-read the configuration from disk.
            let (runtime, config) = match prepared {
                Some(prepared) => prepared,
                None => {
                    let runtime = Runtime::new(&args.profile, &args.home)?;
                    let config =
                        load_config(runtime.home_dir(), runtime.profile(), args.bind.as_deref())?;
                    (runtime, config)
                }
            };
            Application::new(runtime, config).rotators(rotators).build()
        }
    })
    .await?;

    tracing::info!("stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["pylon", "run"]).unwrap();
        let Command::Run(args) = cli.command;
        assert_eq!(args.profile, "dev");
        assert_eq!(args.home, PathBuf::from("."));
        assert!(args.bind.is_none());
    }

    #[test]
    fn test_run_with_overrides() {
        let cli = Cli::try_parse_from([
            "pylon", "run", "prod", "--home", "/srv/pylon", "--bind", "127.0.0.1:9000",
        ])
        .unwrap();
        let Command::Run(args) = cli.command;
        assert_eq!(args.profile, "prod");
        assert_eq!(args.home, PathBuf::from("/srv/pylon"));
        assert_eq!(args.bind.as_deref(), Some("127.0.0.1:9000"));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["pylon"]).is_err());
    }
}
