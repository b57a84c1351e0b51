//! Run configuration.
//!
//! Every component receives an `AcxConfig` at construction; nothing is read
//! from process-wide state, so runs with different settings can coexist.

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::Deserialize;
use crate::{AcxError, Result};

/// 120 minutes minus a two second margin.
pub const DEFAULT_MAX_SEGMENT_MS: u64 = 120 * 60 * 1000 - 2 * 1000;
pub const DEFAULT_TARGET_DBFS: f64 = -20.0;
pub const DEFAULT_BITRATE_KBPS: u32 = 192;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AcxConfig {
    pub target_dbfs: f64,
    pub max_segment_ms: u64,
    pub bitrate_kbps: u32,
    /// Accepted input extensions, compared case-insensitively, without the dot.
    pub extensions: Vec<String>,
    pub output_extension: String,
    pub file_timeout_secs: Option<u64>,
    /// Export workers; 0 means one per CPU.
    pub jobs: usize,
    pub ffmpeg: PathBuf,
}

impl Default for AcxConfig {
    fn default() -> Self {
        Self {
            target_dbfs: DEFAULT_TARGET_DBFS,
            max_segment_ms: DEFAULT_MAX_SEGMENT_MS,
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
            extensions: vec!["mp3".to_string(), "wav".to_string()],
            output_extension: "mp3".to_string(),
            file_timeout_secs: None,
            jobs: 0,
            ffmpeg: PathBuf::from("ffmpeg"),
        }
    }
}

impl AcxConfig {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            AcxError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: AcxConfig = toml::from_str(&text).map_err(|e| {
            AcxError::Config(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.target_dbfs.is_finite() || self.target_dbfs > 0.0 {
            return Err(AcxError::Config(format!(
                "target_dbfs must be a finite value <= 0, got {}",
                self.target_dbfs
            )));
        }
        if self.max_segment_ms == 0 {
            return Err(AcxError::Config("max_segment_ms must be positive".into()));
        }
        if self.bitrate_kbps == 0 {
            return Err(AcxError::Config("bitrate_kbps must be positive".into()));
        }
        if self.extensions.is_empty() {
            return Err(AcxError::Config("at least one input extension is required".into()));
        }
        if self.output_extension.trim_start_matches('.').is_empty() {
            return Err(AcxError::Config("output_extension must not be empty".into()));
        }
        Ok(())
    }

    /// True when `path` carries one of the accepted extensions.
    pub fn accepts(&self, path: &Path) -> bool {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.extensions
            .iter()
            .any(|accepted| accepted.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    pub fn output_extension(&self) -> &str {
        self.output_extension.trim_start_matches('.')
    }

    pub fn file_timeout(&self) -> Option<Duration> {
        self.file_timeout_secs.map(Duration::from_secs)
    }

    pub fn worker_count(&self) -> usize {
        if self.jobs == 0 {
            num_cpus::get()
        } else {
            self.jobs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_delivery_profile() {
        let config = AcxConfig::default();
        assert_eq!(config.target_dbfs, -20.0);
        assert_eq!(config.max_segment_ms, 7_198_000);
        assert_eq!(config.bitrate_kbps, 192);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let config = AcxConfig::default();
        assert!(config.accepts(Path::new("book/ch1.MP3")));
        assert!(config.accepts(Path::new("book/ch2.Wav")));
        assert!(!config.accepts(Path::new("book/cover.jpg")));
        assert!(!config.accepts(Path::new("book/README")));
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = AcxConfig::default();
        config.max_segment_ms = 0;
        assert!(matches!(config.validate(), Err(AcxError::Config(_))));

        let mut config = AcxConfig::default();
        config.target_dbfs = f64::NAN;
        assert!(matches!(config.validate(), Err(AcxError::Config(_))));

        let mut config = AcxConfig::default();
        config.extensions.clear();
        assert!(matches!(config.validate(), Err(AcxError::Config(_))));
    }

    #[test]
    fn toml_overrides_only_named_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acx.toml");
        std::fs::write(&path, "target_dbfs = -18.5\njobs = 2\n").unwrap();

        let config = AcxConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.target_dbfs, -18.5);
        assert_eq!(config.jobs, 2);
        assert_eq!(config.bitrate_kbps, 192);
        assert_eq!(config.worker_count(), 2);
    }

    #[test]
    fn toml_unknown_field_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acx.toml");
        std::fs::write(&path, "loudness = 3\n").unwrap();
        assert!(matches!(AcxConfig::from_toml_file(&path), Err(AcxError::Config(_))));
    }
}
