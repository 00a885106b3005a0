use anyhow::Context;
use clap::Parser;
use finadvise_lib::cli::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if let Err(error) = finadvise_lib::run(cli).await {
        tracing::error!(error = %error, "finadvise exited with an error");
        return Err(error).context("finadvise failed");
    }
    Ok(())
}
