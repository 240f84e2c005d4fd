//! Preflight checks for a fetch run.

use std::path::Path;

use console::style;
use snowstrap::http_client::PinnedRoots;
use snowstrap::privacy::CTorBackend;
use snowstrap::Config;

use crate::cli::icons::{error, success, warn};

/// Locate the snowflake client the way tor will exec it.
fn find_snowflake_client(client_path: &str) -> Option<std::path::PathBuf> {
    let path = Path::new(client_path);
    if path.components().count() > 1 || path.is_absolute() {
        path.exists().then(|| path.to_path_buf())
    } else {
        which::which(client_path).ok()
    }
}

pub fn cmd_check(config: &Config) -> anyhow::Result<()> {
    let mut failures = 0;

    match CTorBackend::find_tor_binary(&config.tor) {
        Some(path) => println!("{} tor: {}", success(), path.display()),
        None => {
            println!("{} tor: not found", error());
            failures += 1;
        }
    }

    let client = &config.transport.snowflake.client_path;
    match find_snowflake_client(client) {
        Some(path) => println!("{} snowflake-client: {}", success(), path.display()),
        None => {
            println!("{} snowflake-client: {} not found", error(), client);
            failures += 1;
        }
    }

    match config.load_ca_bytes() {
        Ok(Some(bytes)) => match PinnedRoots::from_pem(&bytes) {
            Ok(roots) => println!("{} provider CA: {} certificate(s)", success(), roots.len()),
            Err(e) => {
                println!("{} provider CA: {}", error(), e);
                failures += 1;
            }
        },
        Ok(None) if config.needs_provider_ca() => {
            println!("{} provider CA: not configured", error());
            failures += 1;
        }
        Ok(None) => println!("{} provider CA: not configured (no pinned targets)", warn()),
        Err(e) => {
            println!("{} provider CA: {}", error(), e);
            failures += 1;
        }
    }

    if let Err(e) = config.transport.validate() {
        println!("{} transport: {}", error(), e);
        failures += 1;
    }

    if failures > 0 {
        anyhow::bail!("{} check(s) failed", failures);
    }
    println!("{}", style("Ready to fetch").green());
    Ok(())
}
