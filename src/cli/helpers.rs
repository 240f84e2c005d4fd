//! Shared helper functions for CLI commands.

use std::path::{Path, PathBuf};

use anyhow::Context;

/// Replace characters that would escape the output directory.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "index".to_string(),
        _ => cleaned,
    }
}

/// Write a fetched body to `dir/name`, creating `dir` if needed.
pub fn save_body(dir: &Path, name: &str, body: &[u8]) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    let path = dir.join(sanitize_filename(name));
    std::fs::write(&path, body).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}
