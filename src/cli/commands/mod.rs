//! CLI parser and dispatch to command-specific modules.

mod check;
mod config_cmd;
mod fetch;
mod torrc;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use snowstrap::config::{Config, ConfigOverrides};

#[derive(Parser)]
#[command(name = "snowstrap")]
#[command(about = "Fetch VPN provider configuration over Tor with the Snowflake transport")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    overrides: OverrideArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Settings that can be overridden on the command line.
#[derive(Args, Debug, Default)]
struct OverrideArgs {
    /// Path to the tor binary
    #[arg(long, global = true)]
    tor_binary: Option<PathBuf>,

    /// Fixed SOCKS port for tor (default: let tor choose)
    #[arg(long, global = true)]
    socks_port: Option<u16>,

    /// Path to the snowflake-client executable
    #[arg(long, global = true)]
    snowflake_client: Option<String>,

    /// Tor data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// PEM bundle with the provider CA for pinned targets
    #[arg(long, global = true)]
    ca_cert: Option<PathBuf>,

    /// Seconds to wait for tor to bootstrap
    #[arg(long, global = true)]
    startup_timeout: Option<u64>,

    /// Total timeout per request in seconds
    #[arg(long, global = true)]
    request_timeout: Option<u64>,
}

impl OverrideArgs {
    fn to_overrides(&self, concurrency: Option<usize>) -> ConfigOverrides {
        ConfigOverrides {
            tor_binary: self.tor_binary.clone(),
            socks_port: self.socks_port,
            snowflake_client: self.snowflake_client.clone(),
            data_dir: self.data_dir.clone(),
            ca_cert: self.ca_cert.clone(),
            startup_timeout_secs: self.startup_timeout,
            request_timeout_secs: self.request_timeout,
            concurrency,
        }
    }
}

/// Options for the fetch command.
#[derive(Args, Debug, Default)]
pub struct FetchArgs {
    /// Number of fetches in flight at once
    #[arg(long)]
    concurrency: Option<usize>,

    /// Save each fetched body into this directory
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Don't print fetched bodies
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Bootstrap tor over Snowflake and fetch the configured targets (default)
    Fetch(FetchArgs),

    /// Print the generated torrc
    Torrc {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that tor, the Snowflake client and the provider CA are usable
    Check,

    /// Show the effective configuration
    Config,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Fetch(FetchArgs::default()));

    let concurrency = match &command {
        Commands::Fetch(args) => args.concurrency,
        _ => None,
    };

    let config = Config::load(cli.config.as_deref())
        .await?
        .with_cli_overrides(&cli.overrides.to_overrides(concurrency));

    match command {
        Commands::Fetch(args) => fetch::cmd_fetch(config, &args).await,
        Commands::Torrc { output } => torrc::cmd_torrc(&config, output.as_deref()),
        Commands::Check => check::cmd_check(&config),
        Commands::Config => config_cmd::cmd_config_show(&config),
    }
}
