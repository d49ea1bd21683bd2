pub mod cli;
pub mod commands;
pub mod demo;
pub mod output;
pub mod logging;
