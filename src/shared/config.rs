use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::sensor::SyncMode;
use crate::shared::constants;

/// Capture settings. Every field has a default so a partial JSON file is valid.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptureConfig {
    pub output_prefix: String,
    pub record_skeleton: bool,
    pub record_video: bool,
    pub sync_mode: SyncMode,
    pub body_fps: f64,
    pub color_fps: f64,
    pub color_width: u32,
    pub color_height: u32,
    /// Bodies the simulated sensor reports as tracked.
    pub simulated_bodies: usize,
    /// Every Nth simulated tick carries no frame (0 disables gaps).
    pub simulated_gap_every: u64,
    pub buffer_pool: usize,
    pub status_period_ms: u64,
    pub log_level: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_prefix: String::new(),
            record_skeleton: true,
            record_video: true,
            sync_mode: SyncMode::Independent,
            body_fps: constants::DEFAULT_BODY_FPS,
            color_fps: constants::DEFAULT_COLOR_FPS,
            color_width: constants::DEFAULT_COLOR_WIDTH,
            color_height: constants::DEFAULT_COLOR_HEIGHT,
            simulated_bodies: 1,
            simulated_gap_every: 0,
            buffer_pool: constants::DEFAULT_BUFFER_POOL,
            status_period_ms: constants::STATUS_PERIOD_MS,
            log_level: "info".to_string(),
        }
    }
}

impl CaptureConfig {
    /// Loads the explicit file if given, otherwise the first config found in
    /// the working directory or the user config dir, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::search_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(constants::CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join(constants::APP_NAME).join("config.json"));
        }
        paths
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}
