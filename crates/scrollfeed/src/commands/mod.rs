use std::path::Path;

use async_trait::async_trait;
use eyre::Result;
use scrollfeed_core::FeedConfig;

pub mod config;
pub mod replay;

#[async_trait]
pub trait Command {
    async fn execute(&self) -> Result<()>;
}

/// Reads the explicit config file when one was given, the per-user one otherwise.
pub(crate) fn load_config(path: Option<&Path>) -> Result<FeedConfig> {
    match path {
        Some(path) => Ok(FeedConfig::load_from(path)),
        None => Ok(FeedConfig::load()?),
    }
}
