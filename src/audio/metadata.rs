use std::path::{Path, PathBuf};
use std::time::Instant;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use crate::audio::decode::AudioDecoder;
use crate::audio::dsp::{self, RmsAccumulator, SampleHasher};
use crate::config::AcxConfig;
use crate::utils::parallel::ParallelProcessor;
use crate::{AudioRecord, Result};

/// A candidate file that could not be decoded and was left out of the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Records in traversal order (sorted by file name per directory).
    pub records: Vec<AudioRecord>,
    pub failures: Vec<ScanFailure>,
}

pub struct MetadataExtractor<'a, D: AudioDecoder + ?Sized> {
    config: &'a AcxConfig,
    decoder: &'a D,
    /// Subtree left out of the walk, typically an output root nested
    /// inside the input root.
    excluded: Option<PathBuf>,
}

impl<D: AudioDecoder + ?Sized> ParallelProcessor for MetadataExtractor<'_, D> {}

impl<'a, D: AudioDecoder + ?Sized> MetadataExtractor<'a, D> {
    pub fn new(config: &'a AcxConfig, decoder: &'a D) -> Self {
        Self {
            config,
            decoder,
            excluded: None,
        }
    }

    pub fn excluding(mut self, dir: impl Into<PathBuf>) -> Self {
        self.excluded = Some(dir.into());
        self
    }

    /// Decode one file fully, measuring loudness and hashing its samples.
    pub fn extract_metadata(&self, path: impl AsRef<Path>) -> Result<AudioRecord> {
        let path = path.as_ref();
        let deadline = self.config.file_timeout().map(|t| Instant::now() + t);

        let mut rms = RmsAccumulator::default();
        let mut hasher = SampleHasher::default();
        let info = self.decoder.stream(path, deadline, &mut |chunk| {
            rms.push(chunk);
            hasher.update(chunk);
        })?;

        Ok(AudioRecord {
            path: path.to_path_buf(),
            duration_ms: dsp::frames_to_ms(info.frames, info.sample_rate),
            frames: info.frames,
            sample_rate: info.sample_rate,
            channel_count: info.channels,
            loudness_dbfs: rms.dbfs(),
            content_hash: hasher.finish(),
        })
    }

    /// Candidate files under `dir_path`, in a stable order.
    pub fn collect_audio_files(&self, dir_path: &Path) -> Vec<PathBuf> {
        walkdir::WalkDir::new(dir_path)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| match &self.excluded {
                Some(excluded) if e.path() == excluded.as_path() => {
                    debug!("Not descending into {}", e.path().display());
                    false
                }
                _ => true,
            })
            .filter_map(|e| match e {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!("Error accessing entry: {}", err);
                    None
                }
            })
            .filter(|e| {
                let is_file = e.file_type().is_file();
                let accepted = self.config.accepts(e.path());
                if is_file && !accepted {
                    debug!("Skipping non-audio file: {}", e.path().display());
                }
                is_file && accepted
            })
            .map(|e| e.into_path())
            .collect()
    }

    /// Scan `dir` recursively. Undecodable files are returned in
    /// `ScanReport::failures` instead of aborting the scan.
    pub fn process_directory(&self, dir: impl AsRef<Path>) -> ScanReport {
        let dir = dir.as_ref();
        info!("Scanning directory structure: {}", dir.display());

        let entries = self.collect_audio_files(dir);
        info!("Found {} candidate audio files", entries.len());
        if entries.is_empty() {
            return ScanReport::default();
        }

        let progress = Self::get_progress_counter();
        let total_files = entries.len();

        let results: Vec<(PathBuf, Result<AudioRecord>)> = entries
            .into_par_iter()
            .map(|path| {
                let result = self.extract_metadata(&path);
                if let Ok(ref record) = result {
                    debug!(
                        "Scanned {} ({} ms, {} ch, {:.1} dBFS)",
                        record.path.display(),
                        record.duration_ms,
                        record.channel_count,
                        record.loudness_dbfs
                    );
                }
                Self::report_progress(&progress, total_files, "scanned");
                (path, result)
            })
            .collect();

        let mut report = ScanReport::default();
        for (path, result) in results {
            match result {
                Ok(record) => report.records.push(record),
                Err(e) => {
                    warn!("Could not open {}: {}", path.display(), e);
                    report.failures.push(ScanFailure {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }
        report
    }
}
