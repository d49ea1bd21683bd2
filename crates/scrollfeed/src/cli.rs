use std::path::PathBuf;

use clap::{Parser, Subcommand};
use scrollfeed_core::FeedKind;

/// Drives a windowed message feed against a synthetic conversation.
#[derive(Parser)]
#[command(version, about, long_about = None, author)]
pub struct Cli {
    /// Feed configuration file (TOML). Defaults to the per-user config path.
    #[arg(long, env = "SCROLLFEED_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Write logs to a timestamped file in this directory instead of stderr
    #[arg(long, value_name = "DIR", global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Open a generated conversation, scroll through it and print the window
    Replay(ReplayArgs),
    /// Inspect or create the feed configuration file
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(clap::Args, Clone, Debug)]
pub struct ReplayArgs {
    /// Feed kind (chat, discussion, pinned, scheduled). Overrides the config file.
    #[arg(long)]
    pub kind: Option<FeedKind>,

    /// Number of messages in the generated conversation
    #[arg(long, default_value_t = 300)]
    pub messages: u32,

    /// How many of the newest inbound messages start unread
    #[arg(long, default_value_t = 0)]
    pub unread: u32,

    /// Number of calendar days the conversation spans
    #[arg(long, default_value_t = 4)]
    pub days: u32,

    /// Seed for the generator
    #[arg(long, default_value_t = 7)]
    pub seed: u64,

    /// Viewport height in pixels
    #[arg(long, default_value_t = 600.0)]
    pub viewport: f64,

    /// Scroll to the top edge this many times after opening
    #[arg(long, default_value_t = 0)]
    pub scroll_up: u32,

    /// Jump to this message id after opening
    #[arg(long)]
    pub jump: Option<i64>,

    /// Deliver this many live inbound messages after opening
    #[arg(long, default_value_t = 0)]
    pub live: u32,

    /// Replace the text of this message after opening
    #[arg(long, value_name = "ID")]
    pub edit: Option<i64>,

    /// Delete these messages after opening (comma separated)
    #[arg(long, value_name = "IDS", value_delimiter = ',')]
    pub delete: Vec<i64>,

    /// Simulated store latency in milliseconds
    #[arg(long, default_value_t = 20)]
    pub latency_ms: u64,

    /// Simulated media load time in milliseconds
    #[arg(long)]
    pub media_delay_ms: Option<u64>,

    /// Print every mounted entry instead of only the visible ones
    #[arg(long)]
    pub all: bool,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Write the default configuration to the config path
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
