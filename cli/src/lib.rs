mod cli;
mod grade;
mod reporter;
mod runner;

use std::io::IsTerminal;

pub use cli::Cli;
use cli::Subcommand;
use tracing_subscriber::EnvFilter;

pub async fn run_main(cli: Cli) -> anyhow::Result<()> {
    let (stdout_with_ansi, stderr_with_ansi) = match cli.color {
        cli::Color::Always => (true, true),
        cli::Color::Never => (false, false),
        cli::Color::Auto => (
            std::io::stdout().is_terminal(),
            std::io::stderr().is_terminal(),
        ),
    };

    let default_level = "info";
    let _ = tracing_subscriber::fmt()
        // Fall back to the `default_level` log filter if the environment
        // variable is not set _or_ contains an invalid value
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_ansi(stderr_with_ansi)
        .with_writer(std::io::stderr)
        .try_init();

    match cli.command {
        Subcommand::Run(args) => runner::run_tests(args, stdout_with_ansi).await,
        Subcommand::Grade(args) => grade::grade_logs(&args, stdout_with_ansi),
    }
}
