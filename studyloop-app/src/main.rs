mod api;
mod cli;
mod logging;

use anyhow::Result;
use clap::Parser;
use tokio::runtime::Runtime;

use cli::commands::run_cli;
use cli::opts::{Cli, Command};

fn main() -> Result<()> {
    // A missing .env file is fine.
    dotenvy::dotenv().ok();
    let args = Cli::parse();

    let filter = match args.cmd {
        Command::Api(_) => logging::SERVER_FILTER,
        _ => logging::CLI_FILTER,
    };
    logging::init_tracing(args.log_format, filter);

    let rt = Runtime::new()?;
    rt.block_on(run_cli(args))
}
