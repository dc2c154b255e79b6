use clap::Parser;
use std::path::PathBuf;

/// Ventra - rate-limited gateway in front of an AI agent service
#[derive(Parser, Debug, Clone)]
#[command(name = "ventra", version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "VENTRA_CONFIG", default_value = "ventra.toml")]
    pub config: PathBuf,

    /// Server host address
    #[arg(long, env = "VENTRA_HOST")]
    pub host: Option<String>,

    /// Server port
    #[arg(long, env = "VENTRA_PORT")]
    pub port: Option<u16>,
}
