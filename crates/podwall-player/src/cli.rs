use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "podwall-player", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// TOML config file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Media server base URL, e.g. http://127.0.0.1:8080
    #[arg(long)]
    pub server: Option<String>,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Skip the resolve call and stream straight from {server}/audio/{id}
    #[arg(long)]
    pub direct: bool,

    /// Do not report live plays to the server
    #[arg(long)]
    pub no_telemetry: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Queue posts in order and play them through
    Play {
        /// Post ids
        #[arg(required = true)]
        ids: Vec<u64>,
    },
}
