use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// What to do with a sentence the engine could not voice after every attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Write a silent placeholder unit in its place.
    Silence,
    /// Leave the sentence out of the paragraph.
    Skip,
    /// Stop the run.
    Abort,
}

impl FailurePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "silence" => Some(FailurePolicy::Silence),
            "skip" => Some(FailurePolicy::Skip),
            "abort" => Some(FailurePolicy::Abort),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub exaggeration: f32,
    pub cfg_weight: f32,
    pub read_titles: bool,
    pub paragraph_pause_ms: u32,
    pub chapter_pause_ms: u32,
    pub max_attempts: u32,
    pub on_failure: FailurePolicy,
    pub placeholder_ms: u32,
    /// External synthesis command; espeak is used when unset.
    pub engine: Option<String>,
    /// Sample rate the external command writes. Placeholders made before
    /// the first successful call use it, so it must match the engine.
    pub engine_sample_rate: u32,
    pub work_dir: PathBuf,
    pub assume_yes: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exaggeration: 0.7,
            cfg_weight: 0.4,
            read_titles: true,
            paragraph_pause_ms: 600,
            chapter_pause_ms: 2000,
            max_attempts: 3,
            on_failure: FailurePolicy::Silence,
            placeholder_ms: 1000,
            engine: None,
            engine_sample_rate: 24000,
            work_dir: PathBuf::from("."),
            assume_yes: false,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file. Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }
}
