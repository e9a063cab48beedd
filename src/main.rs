mod cli;
mod console;
mod engine;
mod error;
mod logging;
mod model;
mod orchestrator;
mod text_summary;

use anyhow::Result;
use clap::Parser;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_silent = args.silent;

    logging::init(logging::level_from_verbosity(args.verbose))?;

    match cli::run(args).await {
        Ok(()) => {
            // A pending stdin read would otherwise keep the runtime from shutting down
            std::process::exit(0);
        }
        Err(e) => {
            if is_silent {
                println!("{}", e);
                std::process::exit(1);
            } else {
                Err(e)
            }
        }
    }
}
