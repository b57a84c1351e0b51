use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use serde::Serialize;

pub mod analyzers;
pub mod audio;
pub mod cli;
pub mod config;
pub mod pipeline;
pub mod utils;

/// Hex-encoded SHA-256 digest of a track's decoded samples.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One successfully scanned source file. Never mutated after the scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioRecord {
    pub path: PathBuf,
    pub duration_ms: u64,
    /// Decoded length in frames at `sample_rate`.
    pub frames: u64,
    pub sample_rate: u32,
    pub channel_count: u16,
    /// RMS loudness; `f64::NEG_INFINITY` for a silent track.
    pub loudness_dbfs: f64,
    pub content_hash: ContentHash,
}

#[derive(Debug, thiserror::Error)]
pub enum AcxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },
    #[error("could not encode {}: {reason}", path.display())]
    Encode { path: PathBuf, reason: String },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("{stage} of {} timed out after {after:?}", path.display())]
    Timeout {
        path: PathBuf,
        stage: &'static str,
        after: Duration,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl AcxError {
    pub fn decode(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        AcxError::Decode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn encode(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        AcxError::Encode {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AcxError>;

// Re-exports for convenience
pub use analyzers::channels::ChannelPolicy;
pub use analyzers::duplicate::{DuplicateAnalyzer, DuplicateGroup, SkipSet};
pub use audio::decode::{AudioDecoder, StreamInfo, SymphoniaDecoder};
pub use audio::encode::{AudioEncoder, EncodeSession, FfmpegEncoder};
pub use audio::metadata::{MetadataExtractor, ScanFailure, ScanReport};
pub use config::AcxConfig;
pub use pipeline::{BatchPlan, BatchReport, CancelFlag, FileOutcome, FileStatus, Pipeline};
