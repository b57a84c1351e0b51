use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use crate::config::AcxConfig;
use crate::Result;

#[derive(Parser)]
#[command(name = "acx-batch")]
#[command(version = "1.0")]
#[command(about = "Batch-normalize audiobook audio to ACX delivery requirements", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Normalize every supported file under a directory into 192 kbps CBR MP3s
    Normalize {
        /// Directory of raw .mp3/.wav files
        #[arg(short = 'i', long = "input")]
        input: PathBuf,

        /// Directory for processed MP3s
        #[arg(short = 'o', long = "output")]
        output: PathBuf,

        /// Only show what would be written
        #[arg(short = 'd', long)]
        dry_run: bool,

        /// Write a CSV of every file's outcome here
        #[arg(long)]
        report: Option<PathBuf>,

        #[command(flatten)]
        settings: Settings,
    },

    /// Analyze a directory: loudness, channels, duplicates
    Scan {
        /// Directory of raw .mp3/.wav files
        #[arg(short = 'i', long = "input")]
        input: PathBuf,

        /// Write a CSV of duplicate groups here
        #[arg(long)]
        report: Option<PathBuf>,

        #[command(flatten)]
        settings: Settings,
    },
}

/// Overrides for the configuration file (or the built-in defaults).
#[derive(Args, Debug, Default, Clone)]
pub struct Settings {
    /// TOML configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Target RMS loudness in dBFS
    #[arg(long, allow_hyphen_values = true)]
    pub target_dbfs: Option<f64>,

    /// Maximum length of one output file, in seconds
    #[arg(long)]
    pub max_segment_secs: Option<u64>,

    /// Output bitrate in kbit/s
    #[arg(long)]
    pub bitrate: Option<u32>,

    /// Worker threads (0 = one per CPU)
    #[arg(short = 'j', long)]
    pub jobs: Option<usize>,

    /// Give up on a single file after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// ffmpeg binary to encode with
    #[arg(long)]
    pub ffmpeg: Option<PathBuf>,
}

impl Settings {
    pub fn resolve(&self) -> Result<AcxConfig> {
        let mut config = match &self.config {
            Some(path) => AcxConfig::from_toml_file(path)?,
            None => AcxConfig::default(),
        };
        if let Some(target) = self.target_dbfs {
            config.target_dbfs = target;
        }
        if let Some(secs) = self.max_segment_secs {
            config.max_segment_ms = secs.saturating_mul(1000);
        }
        if let Some(bitrate) = self.bitrate {
            config.bitrate_kbps = bitrate;
        }
        if let Some(jobs) = self.jobs {
            config.jobs = jobs;
        }
        if let Some(secs) = self.timeout_secs {
            config.file_timeout_secs = Some(secs);
        }
        if let Some(ffmpeg) = &self.ffmpeg {
            config.ffmpeg = ffmpeg.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_normalize_with_overrides() {
        let cli = Cli::try_parse_from([
            "acx-batch",
            "normalize",
            "-i",
            "raw",
            "-o",
            "processed",
            "--target-dbfs",
            "-19",
            "--max-segment-secs",
            "600",
            "-j",
            "4",
        ])
        .unwrap();

        let Commands::Normalize { input, output, dry_run, settings, .. } = cli.command else {
            panic!("expected normalize");
        };
        assert_eq!(input, PathBuf::from("raw"));
        assert_eq!(output, PathBuf::from("processed"));
        assert!(!dry_run);

        let config = settings.resolve().unwrap();
        assert_eq!(config.target_dbfs, -19.0);
        assert_eq!(config.max_segment_ms, 600_000);
        assert_eq!(config.jobs, 4);
        assert_eq!(config.bitrate_kbps, 192);
    }

    #[test]
    fn invalid_override_is_rejected() {
        let settings = Settings {
            max_segment_secs: Some(0),
            ..Settings::default()
        };
        assert!(settings.resolve().is_err());
    }

    #[test]
    fn output_is_required_for_normalize() {
        assert!(Cli::try_parse_from(["acx-batch", "normalize", "-i", "raw"]).is_err());
    }
}
