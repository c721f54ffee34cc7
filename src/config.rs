use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub effects: Vec<EffectConfig>,
}

#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_frames")]
    pub frames: u32,
    #[serde(default = "default_crf")]
    pub crf: u32,
    #[serde(default = "default_codec")]
    pub codec: String,
}

/// One `[[effects]]` entry. Keys other than `kind` are parameter values.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EffectConfig {
    pub kind: String,
    #[serde(flatten)]
    pub options: toml::Table,
}

impl EffectConfig {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            options: toml::Table::new(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            frames: default_frames(),
            crf: default_crf(),
            codec: default_codec(),
        }
    }
}

pub fn default_width() -> u32 { 1280 }
pub fn default_height() -> u32 { 720 }
pub fn default_fps() -> u32 { 30 }
pub fn default_frames() -> u32 { 300 }
pub fn default_crf() -> u32 { 18 }
pub fn default_codec() -> String { "libx264".into() }

/// Chain used when neither the command line nor the config names effects.
pub fn default_effects() -> Vec<EffectConfig> {
    let mut posterize = EffectConfig::new("posterize");
    posterize.options.insert("steps".into(), toml::Value::Integer(10));
    vec![posterize]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Invalid config {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

/// Explicit path first, then `postfx.toml`, then the per-user config.
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from("postfx.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("postfx").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("postfx").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}
