//! The bootstrap-and-fetch command.

use console::style;
use snowstrap::fetch::FetchResult;
use snowstrap::{Bootstrapper, Config};

use super::FetchArgs;
use crate::cli::helpers::save_body;
use crate::cli::icons::{dim_arrow, error, success, warn};
use crate::cli::progress::{phase_message, spinner};

/// Bootstrap tor over Snowflake and fetch every configured target.
///
/// Individual fetch failures are reported but do not fail the command.
pub async fn cmd_fetch(config: Config, args: &FetchArgs) -> anyhow::Result<()> {
    let bar = spinner("Preparing");
    let bootstrapper = Bootstrapper::new(config).on_phase({
        let bar = bar.clone();
        move |phase| bar.set_message(phase_message(&phase))
    });

    let outcome = bootstrapper.run().await;
    bar.finish_and_clear();
    let results = outcome.map_err(|e| anyhow::anyhow!("{} failed: {}", e.phase(), e))?;

    let targets = &bootstrapper.config().targets;
    for (target, result) in targets.iter().zip(&results) {
        report(result);

        let Some(body) = result.body() else {
            continue;
        };
        if let Some(ref dir) = args.output_dir {
            let path = save_body(dir, &target.file_name(), body)?;
            eprintln!("  {} saved to {}", dim_arrow(), path.display());
        }
        if !args.quiet {
            println!("{}", String::from_utf8_lossy(body));
        }
    }

    let failed = results.iter().filter(|r| !r.is_success()).count();
    if failed == 0 {
        eprintln!("{} Fetched all {} targets", success(), results.len());
    } else {
        eprintln!(
            "{} {} of {} targets failed",
            warn(),
            failed,
            results.len()
        );
    }
    Ok(())
}

fn report(result: &FetchResult) {
    match &result.outcome {
        Ok(body) => eprintln!(
            "{} {} {}",
            success(),
            style(&result.url).bold(),
            style(format!(
                "({}, {} bytes, {:.1?})",
                result.status.unwrap_or_default(),
                body.len(),
                result.elapsed
            ))
            .dim()
        ),
        Err(e) => eprintln!("{} {}: {}", error(), style(&result.url).bold(), e),
    }
}
