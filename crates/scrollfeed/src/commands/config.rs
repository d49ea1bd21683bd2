use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use eyre::Result;
use scrollfeed_core::FeedConfig;

use super::{Command, load_config};
use crate::cli::ConfigCommands;

pub struct ConfigCommand {
    pub action: ConfigCommands,
    pub path: Option<PathBuf>,
}

impl ConfigCommand {
    fn resolved_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => Ok(FeedConfig::config_path()?),
        }
    }
}

#[async_trait]
impl Command for ConfigCommand {
    async fn execute(&self) -> Result<()> {
        let mut stdout = std::io::stdout();
        match &self.action {
            ConfigCommands::Show => {
                let path = self.resolved_path()?;
                let config = load_config(self.path.as_deref())?;
                writeln!(stdout, "# {}", path.display())?;
                write!(stdout, "{}", config.to_toml()?)?;
            }
            ConfigCommands::Path => {
                writeln!(stdout, "{}", self.resolved_path()?.display())?;
            }
            ConfigCommands::Init { force } => {
                let path = self.resolved_path()?;
                if path.exists() && !force {
                    eyre::bail!(
                        "{} already exists; pass --force to overwrite",
                        path.display()
                    );
                }
                FeedConfig::default().save_to(&path)?;
                writeln!(stdout, "Wrote default configuration to {}", path.display())?;
            }
        }
        Ok(())
    }
}
