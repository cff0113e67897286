use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind the HTTP server to (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Data directory holding the database and scratch space (overrides config)
    #[arg(short, long)]
    pub data_dir: Option<PathBuf>,
}
