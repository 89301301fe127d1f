//! CLI entry point: load configuration, connect, and run the engine.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ami_callcenter_engine::{CallCenterEngineBuilder, EngineConfig};

#[derive(Parser, Debug)]
#[command(name = "ami-callcenter-engine", about = "AMI event-driven call-state engine")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = EngineConfig::from_file(&args.config)?;
    let engine = CallCenterEngineBuilder::new(config).build().await?;
    engine.run().await?;
    Ok(())
}
