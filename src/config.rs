use std::path::PathBuf;

use clap::Parser;

/// Command-line configuration for the server.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "snapkv",
    about = "Minimal key-value store with an HTTP/JSON interface"
)]
pub struct Config {
    /// Address to listen on.
    #[arg(short = 'a', long = "addr", default_value = "localhost:8000")]
    pub addr: String,

    /// Path to the store snapshot file.
    #[arg(short = 'f', long = "file", default_value = "store.json")]
    pub store_file: PathBuf,

    /// Log level for tracing (e.g. "info", "debug").
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,
}
