use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "ent-finder")]
#[command(about = "Search IPSW filesystem DMGs for Mach-Os with a given entitlement")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to entitlement database to use
    #[arg(long, value_name = "FILE", global = true)]
    pub db: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Search the entitlement database (built on first use)
    Search {
        #[arg(value_name = "IPSW")]
        ipsw: PathBuf,

        /// Entitlement to search for
        #[arg(short = 'e', long, value_name = "KEY")]
        ent: Option<String>,

        /// Output entitlements for file
        #[arg(short = 'f', long, value_name = "PATH")]
        file: Option<String>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Build the entitlement database without searching it
    Build {
        #[arg(value_name = "IPSW")]
        ipsw: PathBuf,
    },
    /// Summarize an existing entitlement database
    Stats {
        #[arg(value_name = "IPSW")]
        ipsw: PathBuf,
    },
    /// Delete the entitlement database for an archive
    Clear {
        #[arg(value_name = "IPSW")]
        ipsw: PathBuf,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
