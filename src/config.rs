//! Pruning options layered from defaults, a TOML file and CLI flags.
//!
//! ```toml
//! [prune]
//! percent = 0.3
//! min_channels = 2
//! half = true
//! preset = "yolov5s"
//! ```

use crate::error::{PruneError, Result};
use crate::pruning::MIN_CHANNELS;
use crate::topology::{Preset, TopologyDescriptor};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Options of one pruning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PruneConfig {
    /// Prune ratio in `[0, 1)`.
    pub percent: Option<f64>,
    /// Channels every scored layer keeps.
    pub min_channels: usize,
    /// Write F16 instead of F32.
    pub half: bool,
    /// Built-in architecture name.
    pub preset: Option<String>,
    /// JSON model document (takes precedence over `preset`).
    pub cfg: Option<PathBuf>,
    /// Class count for presets; inferred from the checkpoint when unset.
    pub nc: Option<usize>,
    /// Optional JSON report path.
    pub report: Option<PathBuf>,
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            percent: None,
            min_channels: MIN_CHANNELS,
            half: false,
            preset: None,
            cfg: None,
            nc: None,
            report: None,
        }
    }
}

#[derive(Deserialize, Serialize)]
struct TomlWrapper {
    prune: PruneConfig,
}

/// Where the network topology comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum TopologySource {
    /// JSON model document on disk.
    Document(PathBuf),
    /// Built-in preset; class count resolved later if `None`.
    Preset(Preset, Option<usize>),
}

impl TopologySource {
    /// Resolve into a descriptor, using `nc` when the preset has none.
    ///
    /// # Errors
    ///
    /// Returns an error if the document cannot be loaded.
    pub fn descriptor(&self, inferred_nc: impl FnOnce(Preset) -> Result<usize>) -> Result<TopologyDescriptor> {
        match self {
            TopologySource::Document(path) => TopologyDescriptor::load(path),
            TopologySource::Preset(preset, Some(nc)) => preset.descriptor(*nc),
            TopologySource::Preset(preset, None) => preset.descriptor(inferred_nc(*preset)?),
        }
    }
}

impl PruneConfig {
    /// Parse a TOML document with a `[prune]` table.
    ///
    /// # Errors
    ///
    /// Returns [`PruneError::Config`] for malformed TOML or unknown keys.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let wrapper: TomlWrapper = toml::from_str(text)?;
        Ok(wrapper.prune)
    }

    /// Load a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unreadable or invalid.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(PruneError::FileNotFound(path.to_path_buf()));
        }
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Serialize to TOML (wrapped in `[prune]`).
    ///
    /// # Errors
    ///
    /// Returns [`PruneError::Config`] if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        let wrapper = TomlWrapper {
            prune: self.clone(),
        };
        toml::to_string_pretty(&wrapper).map_err(|e| PruneError::Config(e.to_string()))
    }

    /// Overlay values explicitly set in `other`.
    #[must_use]
    pub fn merge(mut self, other: PruneConfig) -> Self {
        let defaults = PruneConfig::default();
        if other.percent.is_some() {
            self.percent = other.percent;
        }
        if other.min_channels != defaults.min_channels {
            self.min_channels = other.min_channels;
        }
        self.half |= other.half;
        if other.preset.is_some() {
            self.preset = other.preset;
        }
        if other.cfg.is_some() {
            self.cfg = other.cfg;
        }
        if other.nc.is_some() {
            self.nc = other.nc;
        }
        if other.report.is_some() {
            self.report = other.report;
        }
        self
    }

    /// The prune ratio, validated.
    ///
    /// # Errors
    ///
    /// Returns [`PruneError::Config`] if no ratio was given and
    /// [`PruneError::InvalidRatio`] if it is outside `[0, 1)`.
    pub fn ratio(&self) -> Result<f64> {
        let ratio = self
            .percent
            .ok_or_else(|| PruneError::Config("no prune ratio given (--percent)".to_string()))?;
        if !(0.0..1.0).contains(&ratio) {
            return Err(PruneError::InvalidRatio { value: ratio });
        }
        Ok(ratio)
    }

    /// Topology source: a JSON document wins over a preset.
    ///
    /// # Errors
    ///
    /// Returns [`PruneError::Config`] if neither is given or the preset
    /// name is unknown.
    pub fn topology(&self) -> Result<TopologySource> {
        if let Some(path) = &self.cfg {
            return Ok(TopologySource::Document(path.clone()));
        }
        let name = self.preset.as_deref().ok_or_else(|| {
            PruneError::Config("no topology given: pass --cfg or --preset".to_string())
        })?;
        Ok(TopologySource::Preset(name.parse()?, self.nc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let cfg = PruneConfig::default();
        assert_eq!(cfg.min_channels, 2);
        assert!(!cfg.half);
        assert!(matches!(cfg.ratio(), Err(PruneError::Config(_))));
        assert!(cfg.topology().is_err());
    }

    #[test]
    fn test_parse_partial_table() {
        let cfg = PruneConfig::from_toml_str("[prune]\npercent = 0.25\npreset = \"yolov5s-seg\"\n")
            .unwrap();
        assert_eq!(cfg.ratio().unwrap(), 0.25);
        assert_eq!(cfg.min_channels, 2);
        assert_eq!(
            cfg.topology().unwrap(),
            TopologySource::Preset(Preset::Yolov5sSeg, None)
        );
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = PruneConfig::from_toml_str("[prune]\npercnt = 0.25\n").unwrap_err();
        assert!(matches!(err, PruneError::Config(_)));
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = PruneConfig {
            percent: Some(0.2),
            preset: Some("yolov5s".to_string()),
            min_channels: 4,
            ..PruneConfig::default()
        };
        let cli = PruneConfig {
            percent: Some(0.6),
            half: true,
            ..PruneConfig::default()
        };
        let merged = file.merge(cli);
        assert_eq!(merged.percent, Some(0.6));
        assert_eq!(merged.min_channels, 4);
        assert!(merged.half);
        assert_eq!(merged.preset.as_deref(), Some("yolov5s"));
    }

    #[test]
    fn test_cfg_wins_over_preset() {
        let cfg = PruneConfig {
            preset: Some("yolov5s".to_string()),
            cfg: Some(PathBuf::from("model.json")),
            ..PruneConfig::default()
        };
        assert_eq!(
            cfg.topology().unwrap(),
            TopologySource::Document(PathBuf::from("model.json"))
        );
    }

    #[test]
    fn test_ratio_out_of_range() {
        let cfg = PruneConfig {
            percent: Some(1.0),
            ..PruneConfig::default()
        };
        assert!(matches!(cfg.ratio(), Err(PruneError::InvalidRatio { .. })));
    }

    #[test]
    fn test_toml_file_round_trip() {
        let cfg = PruneConfig {
            percent: Some(0.5),
            half: true,
            preset: Some("yolov5s".to_string()),
            ..PruneConfig::default()
        };
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(cfg.to_toml().unwrap().as_bytes()).unwrap();
        assert_eq!(PruneConfig::from_toml_file(file.path()).unwrap(), cfg);
    }

    #[test]
    fn test_missing_file() {
        let err = PruneConfig::from_toml_file("/nonexistent/prune.toml").unwrap_err();
        assert!(matches!(err, PruneError::FileNotFound(_)));
    }
}
