//! Entry-point for the `shellgrade` binary.

use clap::Parser;
use shellgrade_cli::Cli;
use shellgrade_cli::run_main;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    run_main(cli).await
}
