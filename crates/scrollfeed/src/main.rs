use clap::Parser;
use eyre::Result;

use scrollfeed::cli::{Cli, Commands};
use scrollfeed::commands::{Command, config::ConfigCommand, replay::ReplayCommand};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // Level configured via RUST_LOG
    scrollfeed::logging::init_tracing(cli.log_dir.as_deref())?;

    let command: Box<dyn Command + Send + Sync> = match cli.command {
        Commands::Replay(args) => Box::new(ReplayCommand {
            args,
            config_path: cli.config,
        }),
        Commands::Config { action } => Box::new(ConfigCommand {
            action,
            path: cli.config,
        }),
    };
    command.execute().await
}
