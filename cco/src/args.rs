//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Anthropic-Messages-format reverse proxy.
#[derive(Debug, Parser)]
#[command(name = "cco", version)]
pub struct Args {
    /// Path to the TOML configuration file describing upstream providers.
    #[arg(long, short = 'c', env = "CCO_CONFIG")]
    pub config: PathBuf,

    /// Address to bind the HTTP listener to.
    #[arg(long, env = "CCO_LISTEN", default_value = "127.0.0.1:8089")]
    pub listen: String,

    /// Log filter, e.g. `info` or `llm=debug,cco=debug`.
    #[arg(long, env = "CCO_LOG", default_value = "info")]
    pub log: String,
}
