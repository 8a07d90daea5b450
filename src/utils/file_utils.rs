use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::shared::constants;

/// Record files for one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub body: PathBuf,
    pub color: PathBuf,
}

/// `<prefix><name>.body.csv` and `<prefix><name>.color.yuy2`. The prefix may
/// contain a directory part, which is created if missing.
pub fn output_paths(prefix: &str, name: &str) -> Result<OutputPaths> {
    let name = name.trim();
    if name.is_empty() {
        bail!("output name is empty");
    }
    let stem = format!("{}{}", prefix, name);
    let body = PathBuf::from(format!("{}.{}", stem, constants::BODY_RECORD_EXTENSION));
    let color = PathBuf::from(format!("{}.{}", stem, constants::COLOR_RECORD_EXTENSION));
    if let Some(parent) = body.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent)?;
    }
    Ok(OutputPaths { body, color })
}

pub fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {:?}", dir))
}
