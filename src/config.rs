//! Configuration parsing and validation.
//!
//! Basarometer is configured via a TOML file (default: `config/basar.toml`).
//! Only `[db]` and `[server]` are required; every threshold section falls
//! back to its documented default.
//!
//! # Example Configuration
//!
//! ```toml
//! [db]
//! path = "./data/basar.sqlite"
//!
//! [rules]
//! path = "./config/rules.json"   # optional; embedded seed table when absent
//!
//! [pipeline]
//! review_threshold = 0.7
//! min_price_per_kg = 10.0
//! max_price_per_kg = 1000.0
//!
//! [conflicts]
//! price_difference_threshold = 0.20
//! auto_resolve_min_confidence = 70
//! sweep_min_confidence = 80
//!
//! [learning]
//! max_confidence_nudge = 0.05
//! nudge_factor = 0.2
//!
//! [server]
//! bind = "127.0.0.1:7340"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use basarometer_core::conflict::ConflictPolicy;
use basarometer_core::learning::LearningPolicy;
use basarometer_core::pipeline::PipelineSettings;

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub rules: RulesConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub conflicts: ConflictsConfig,
    #[serde(default)]
    pub learning: LearningConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Where the rule table comes from.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RulesConfig {
    /// JSON rule table. When unset, the table embedded in the binary is used.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Minimum classification and mapping confidence to commit a listing
    /// without review.
    #[serde(default = "default_review_threshold")]
    pub review_threshold: f64,
    #[serde(default = "default_min_price")]
    pub min_price_per_kg: f64,
    #[serde(default = "default_max_price")]
    pub max_price_per_kg: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            review_threshold: default_review_threshold(),
            min_price_per_kg: default_min_price(),
            max_price_per_kg: default_max_price(),
        }
    }
}

fn default_review_threshold() -> f64 {
    0.7
}
fn default_min_price() -> f64 {
    10.0
}
fn default_max_price() -> f64 {
    1000.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConflictsConfig {
    #[serde(default = "default_price_difference")]
    pub price_difference_threshold: f64,
    #[serde(default = "default_auto_resolve")]
    pub auto_resolve_min_confidence: f64,
    #[serde(default = "default_sweep")]
    pub sweep_min_confidence: f64,
}

impl Default for ConflictsConfig {
    fn default() -> Self {
        Self {
            price_difference_threshold: default_price_difference(),
            auto_resolve_min_confidence: default_auto_resolve(),
            sweep_min_confidence: default_sweep(),
        }
    }
}

fn default_price_difference() -> f64 {
    0.20
}
fn default_auto_resolve() -> f64 {
    70.0
}
fn default_sweep() -> f64 {
    80.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct LearningConfig {
    #[serde(default = "default_max_nudge")]
    pub max_confidence_nudge: f64,
    #[serde(default = "default_nudge_factor")]
    pub nudge_factor: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            max_confidence_nudge: default_max_nudge(),
            nudge_factor: default_nudge_factor(),
        }
    }
}

fn default_max_nudge() -> f64 {
    0.05
}
fn default_nudge_factor() -> f64 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl Config {
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            review_threshold: self.pipeline.review_threshold,
            min_price_per_kg: self.pipeline.min_price_per_kg,
            max_price_per_kg: self.pipeline.max_price_per_kg,
        }
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        ConflictPolicy {
            price_difference_threshold: self.conflicts.price_difference_threshold,
            auto_resolve_min_confidence: self.conflicts.auto_resolve_min_confidence,
            sweep_min_confidence: self.conflicts.sweep_min_confidence,
        }
    }

    pub fn learning_policy(&self) -> LearningPolicy {
        LearningPolicy {
            max_confidence_nudge: self.learning.max_confidence_nudge,
            nudge_factor: self.learning.nudge_factor,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let p = &config.pipeline;
    if !(0.0..=1.0).contains(&p.review_threshold) {
        bail!("pipeline.review_threshold must be in [0.0, 1.0]");
    }
    if p.min_price_per_kg.is_nan() || p.min_price_per_kg <= 0.0 {
        bail!("pipeline.min_price_per_kg must be > 0");
    }
    if p.max_price_per_kg <= p.min_price_per_kg {
        bail!("pipeline.max_price_per_kg must be greater than pipeline.min_price_per_kg");
    }

    let c = &config.conflicts;
    if c.price_difference_threshold.is_nan() || c.price_difference_threshold <= 0.0 {
        bail!("conflicts.price_difference_threshold must be > 0");
    }
    for (name, value) in [
        ("auto_resolve_min_confidence", c.auto_resolve_min_confidence),
        ("sweep_min_confidence", c.sweep_min_confidence),
    ] {
        if !(0.0..=100.0).contains(&value) {
            bail!("conflicts.{} must be in [0, 100]", name);
        }
    }

    let l = &config.learning;
    if !(0.0..=1.0).contains(&l.max_confidence_nudge) {
        bail!("learning.max_confidence_nudge must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&l.nudge_factor) {
        bail!("learning.nudge_factor must be in [0.0, 1.0]");
    }

    if config.server.bind.trim().is_empty() {
        bail!("server.bind must not be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let f = write_config(
            "[db]\npath = \"./data/basar.sqlite\"\n\n[server]\nbind = \"127.0.0.1:7340\"\n",
        );
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.pipeline.review_threshold, 0.7);
        assert_eq!(cfg.conflicts.price_difference_threshold, 0.20);
        assert_eq!(cfg.conflict_policy().sweep_min_confidence, 80.0);
        assert_eq!(cfg.learning_policy().max_confidence_nudge, 0.05);
        assert!(cfg.rules.path.is_none());
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let f = write_config(
            "[db]\npath = \"x.sqlite\"\n[conflicts]\nsweep_min_confidence = 180\n[server]\nbind = \"127.0.0.1:1\"\n",
        );
        let err = load_config(f.path()).unwrap_err();
        assert!(err.to_string().contains("sweep_min_confidence"));
    }

    #[test]
    fn test_price_bounds_validated() {
        let f = write_config(
            "[db]\npath = \"x.sqlite\"\n[pipeline]\nmin_price_per_kg = 50\nmax_price_per_kg = 20\n[server]\nbind = \"127.0.0.1:1\"\n",
        );
        assert!(load_config(f.path()).is_err());
    }
}
