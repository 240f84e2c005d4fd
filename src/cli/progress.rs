//! Spinner shown while tor bootstraps and targets are fetched.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use snowstrap::Phase;

/// Start a steadily ticking spinner with `message`.
pub fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Spinner text for a run phase.
pub fn phase_message(phase: &Phase) -> String {
    match phase {
        Phase::WritingConfig => "Writing transport configuration".to_string(),
        Phase::Starting => "Starting tor".to_string(),
        Phase::Bootstrapping { percent, summary } => {
            format!("Bootstrapping {}%: {}", percent, summary)
        }
        Phase::Fetching { total } => format!("Fetching {} targets", total),
        Phase::Closing => "Shutting down tor".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_message() {
        let message = phase_message(&Phase::Bootstrapping {
            percent: 50,
            summary: "Loading relay descriptors".into(),
        });
        assert_eq!(message, "Bootstrapping 50%: Loading relay descriptors");
        assert_eq!(phase_message(&Phase::Fetching { total: 4 }), "Fetching 4 targets");
    }
}
