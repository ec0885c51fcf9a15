use anyhow::Result;
use clap::Parser;
use mirante::cli;

fn main() -> Result<()> {
    let parsed = cli::Cli::parse();
    cli::run(parsed)?;
    Ok(())
}
