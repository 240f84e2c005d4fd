//! Print or save the generated torrc.

use std::path::Path;

use anyhow::Context;
use snowstrap::privacy::TransportConfigBuilder;
use snowstrap::Config;

use crate::cli::icons::success;

pub fn cmd_torrc(config: &Config, output: Option<&Path>) -> anyhow::Result<()> {
    config.transport.validate().map_err(|e| anyhow::anyhow!(e))?;
    let rendered = TransportConfigBuilder::new(config.transport.clone()).render();

    match output {
        Some(path) => {
            std::fs::write(path, &rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!("{} Wrote {}", success(), path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}
