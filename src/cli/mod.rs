//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "oxflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(name = "check", about = "Validate a configuration file")]
    Check(CheckArgs),

    #[command(name = "demo", about = "Run a read-through fan-out batch under a multiplexer")]
    Demo(DemoArgs),
}

#[derive(Parser, Debug)]
pub struct CheckArgs {
    #[arg(short, long, help = "Path to the TOML configuration file")]
    pub config: PathBuf,
}

#[derive(Parser, Debug)]
pub struct DemoArgs {
    #[arg(short, long, help = "Path to the TOML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(short, long, default_value_t = 20, help = "Number of records in the batch")]
    pub units: u64,

    #[arg(short, long, default_value_t = 5, help = "Every K-th record fails to load (0 disables)")]
    pub fail_every: u64,

    #[arg(short, long, help = "Print metrics as JSON")]
    pub json: bool,
}

mod check;
mod demo;

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Check(args) => check::execute(args).await,
        Commands::Demo(args) => demo::execute(args).await,
    }
}
