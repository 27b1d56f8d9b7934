//! depforge entry point: parse the CLI, run the command, print a friendly
//! error chain on failure and exit 1.

use anyhow::Result;
use clap::Parser;
use depforge::cli::Cli;
use depforge::core::user_friendly_error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(error) => {
            user_friendly_error(error).display();
            std::process::exit(1);
        }
    }
}
