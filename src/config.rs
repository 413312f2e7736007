use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_PORT: u16 = 6379;

#[derive(Parser, Clone, Debug)]
pub struct Config {
    /// The port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Path of the append-only log used to persist write commands
    #[arg(short, long, default_value = "database.aof")]
    pub aof: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            aof: PathBuf::from("database.aof"),
        }
    }
}
