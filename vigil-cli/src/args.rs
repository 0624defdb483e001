use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// vigil: network scan orchestration with threat intelligence and live events
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about = "Scan orchestration server")]
pub struct Args {
    /// Increase verbosity level (use -v, -vv or -vvv)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// TOML configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE", env = "VIGIL_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the REST and WebSocket server
    Serve(ServeArgs),
    /// Run one scan in-process and print the result as JSON
    Scan(ScanArgs),
    /// Parse saved scanner output and print the records as JSON
    Parse(ParseArgs),
}

#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long = "listen", default_value = "127.0.0.1:8080", env = "VIGIL_LISTEN")]
    pub listen: String,

    /// Database file (defaults to the per-user data directory)
    #[arg(long = "db", value_name = "PATH", env = "VIGIL_DB")]
    pub db: Option<PathBuf>,

    /// Require `Authorization: Bearer <key>` on every API route
    #[arg(long = "api-key", env = "VIGIL_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct ScanArgs {
    /// Target host(s): IP, CIDR or hostname
    #[arg(value_name = "TARGET", required = true, num_args = 1..)]
    pub targets: Vec<String>,

    /// Port specification (e.g., 80, 22,443, 1-1024). Defaults to 1-1000.
    #[arg(short = 'p', long = "ports", value_name = "PORTS")]
    pub ports: Option<String>,

    /// Scan type: quick, standard or comprehensive
    #[arg(long = "type", value_name = "TYPE", default_value = "standard")]
    pub scan_type: String,

    /// SYN scan instead of a connect scan (needs privileges)
    #[arg(long = "stealth")]
    pub stealth: bool,

    /// Use the aggressive timing profile
    #[arg(long = "aggressive")]
    pub aggressive: bool,

    /// Skip threat-intelligence lookups
    #[arg(long = "no-intel")]
    pub no_intel: bool,

    /// Persist the scan to this database instead of keeping it in memory
    #[arg(long = "db", value_name = "PATH")]
    pub db: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct ParseArgs {
    /// File holding the scanner's normal output
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Target the output belongs to
    #[arg(long = "target", default_value = "unknown")]
    pub target: String,
}
