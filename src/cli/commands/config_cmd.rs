//! Configuration display.

use snowstrap::Config;

use crate::cli::icons::dim_arrow;

/// Print the effective configuration (file, environment and flags merged).
pub fn cmd_config_show(config: &Config) -> anyhow::Result<()> {
    match config.source_path {
        Some(ref path) => eprintln!("{} Loaded from {}", dim_arrow(), path.display()),
        None => eprintln!("{} No config file found; using defaults", dim_arrow()),
    }
    print!("{}", config.to_toml()?);
    Ok(())
}
