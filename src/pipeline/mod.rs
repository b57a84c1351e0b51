//! Batch driver: scan everything, decide duplicates and channel layout over
//! the whole batch, then export the survivors in parallel.

pub mod exporter;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;
use crate::analyzers::channels::ChannelPolicy;
use crate::analyzers::duplicate::{DuplicateAnalyzer, DuplicateGroup, DuplicateResults, SkipSet};
use crate::audio::decode::AudioDecoder;
use crate::audio::encode::AudioEncoder;
use crate::audio::metadata::{MetadataExtractor, ScanFailure, ScanReport};
use crate::config::AcxConfig;
use crate::utils::file_ops::FileManager;
use crate::utils::parallel::ParallelProcessor;
use crate::{AcxError, AudioRecord, Result};
use self::exporter::Exporter;

/// Cooperative stop signal. Records that have not started when it is raised
/// are reported as cancelled; records already being written finish.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileStatus {
    Exported,
    Skipped,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileOutcome {
    pub source: PathBuf,
    pub status: FileStatus,
    pub outputs: Vec<PathBuf>,
    pub gain_db: Option<f64>,
    pub detail: Option<String>,
}

impl FileOutcome {
    fn new(source: &Path, status: FileStatus) -> Self {
        Self {
            source: source.to_path_buf(),
            status,
            outputs: Vec::new(),
            gain_db: None,
            detail: None,
        }
    }
}

/// Accounting for one run.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    /// `None` when nothing was scanned.
    pub channel_policy: Option<ChannelPolicy>,
    pub duplicate_groups: Vec<DuplicateGroup>,
    pub scan_failures: Vec<ScanFailure>,
    /// One entry per scanned record, in scan order.
    pub outcomes: Vec<FileOutcome>,
}

impl BatchReport {
    fn count(&self, status: FileStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn processed(&self) -> usize {
        self.count(FileStatus::Exported)
    }

    pub fn skipped(&self) -> usize {
        self.count(FileStatus::Skipped)
    }

    /// Export failures plus files that could not be decoded while scanning.
    pub fn failed(&self) -> usize {
        self.count(FileStatus::Failed) + self.scan_failures.len()
    }

    pub fn cancelled(&self) -> usize {
        self.count(FileStatus::Cancelled)
    }

    pub fn output_paths(&self) -> Vec<&Path> {
        self.outcomes
            .iter()
            .flat_map(|o| o.outputs.iter().map(PathBuf::as_path))
            .collect()
    }
}

/// One planned record in a dry run.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedFile {
    pub record: AudioRecord,
    pub skip: bool,
    pub outputs: Vec<PathBuf>,
}

/// Everything `run` would decide, without exporting anything.
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    pub channel_policy: Option<ChannelPolicy>,
    pub duplicate_groups: Vec<DuplicateGroup>,
    pub scan_failures: Vec<ScanFailure>,
    pub files: Vec<PlannedFile>,
}

struct Analysis {
    input_root: PathBuf,
    scan: ScanReport,
    duplicates: DuplicateResults,
    policy: Option<ChannelPolicy>,
    pool: rayon::ThreadPool,
}

pub struct Pipeline<D, E> {
    config: AcxConfig,
    decoder: D,
    encoder: E,
    cancel: CancelFlag,
}

impl<D, E> ParallelProcessor for Pipeline<D, E> {}

impl<D: AudioDecoder, E: AudioEncoder> Pipeline<D, E> {
    pub fn new(config: AcxConfig, decoder: D, encoder: E) -> Self {
        Self {
            config,
            decoder,
            encoder,
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// Scan and analyse `input_root` without writing anything.
    pub fn scan(&self, input_root: impl AsRef<Path>) -> Result<(ScanReport, DuplicateResults, Option<ChannelPolicy>)> {
        let analysis = self.analyze(input_root.as_ref(), None)?;
        Ok((analysis.scan, analysis.duplicates, analysis.policy))
    }

    /// Dry run: the full decision set and every output path `run` would write.
    pub fn plan(&self, input_root: impl AsRef<Path>, output_root: impl AsRef<Path>) -> Result<BatchPlan> {
        let output_root = validate_output_root(output_root.as_ref(), false)?;
        let nested = std::fs::canonicalize(&output_root).ok();
        let analysis = self.analyze(input_root.as_ref(), nested.as_deref())?;
        let files = FileManager::new(&analysis.input_root, &output_root, self.config.output_extension());
        let exporter = Exporter::new(&self.config, &self.decoder, &self.encoder, &files);

        let planned = analysis
            .scan
            .records
            .iter()
            .map(|record| -> Result<PlannedFile> {
                let skip = analysis.duplicates.skip.should_skip(record);
                let outputs = if skip { Vec::new() } else { exporter.planned_outputs(record)? };
                Ok(PlannedFile {
                    record: record.clone(),
                    skip,
                    outputs,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(BatchPlan {
            channel_policy: analysis.policy,
            duplicate_groups: analysis.duplicates.groups,
            scan_failures: analysis.scan.failures,
            files: planned,
        })
    }

    /// Run the whole batch. Only configuration problems are returned as
    /// errors; per-file problems are recorded in the report.
    pub fn run(&self, input_root: impl AsRef<Path>, output_root: impl AsRef<Path>) -> Result<BatchReport> {
        let output_root = validate_output_root(output_root.as_ref(), true)?;
        let nested = std::fs::canonicalize(&output_root).ok();
        let analysis = self.analyze(input_root.as_ref(), nested.as_deref())?;

        let Some(policy) = analysis.policy else {
            info!("No supported audio files found in {}", analysis.input_root.display());
            return Ok(BatchReport {
                scan_failures: analysis.scan.failures,
                ..BatchReport::default()
            });
        };
        info!("Converting all files to {}", policy);

        let files = FileManager::new(&analysis.input_root, &output_root, self.config.output_extension());
        let exporter = Exporter::new(&self.config, &self.decoder, &self.encoder, &files);
        let skip = &analysis.duplicates.skip;
        let progress = Self::get_progress_counter();
        let total = analysis.scan.records.len();

        let outcomes: Vec<FileOutcome> = analysis.pool.install(|| {
            analysis
                .scan
                .records
                .par_iter()
                .map(|record| {
                    let outcome = self.export_one(&exporter, record, policy, skip);
                    Self::report_progress(&progress, total, "handled");
                    outcome
                })
                .collect()
        });

        let report = BatchReport {
            channel_policy: Some(policy),
            duplicate_groups: analysis.duplicates.groups,
            scan_failures: analysis.scan.failures,
            outcomes,
        };
        info!(
            "Batch complete: {} processed, {} skipped, {} failed, {} cancelled",
            report.processed(),
            report.skipped(),
            report.failed(),
            report.cancelled()
        );
        Ok(report)
    }

    fn export_one(
        &self,
        exporter: &Exporter<'_, D, E>,
        record: &AudioRecord,
        policy: ChannelPolicy,
        skip: &SkipSet,
    ) -> FileOutcome {
        if skip.should_skip(record) {
            info!("Skipping duplicate: {}", record.path.display());
            let mut outcome = FileOutcome::new(&record.path, FileStatus::Skipped);
            outcome.detail = skip
                .keeper_for(&record.content_hash)
                .map(|keeper| format!("duplicate of {}", keeper.display()));
            return outcome;
        }
        if self.cancel.is_cancelled() {
            return FileOutcome::new(&record.path, FileStatus::Cancelled);
        }

        match exporter.export(record, policy) {
            Ok(summary) => {
                let status = if summary.is_complete() {
                    FileStatus::Exported
                } else {
                    FileStatus::Failed
                };
                let detail = (!summary.is_complete()).then(|| {
                    summary
                        .failed_segments
                        .iter()
                        .map(|(part, err)| format!("part {}: {}", part, err))
                        .collect::<Vec<_>>()
                        .join("; ")
                });
                FileOutcome {
                    source: record.path.clone(),
                    status,
                    outputs: summary.outputs,
                    gain_db: summary.gain_db,
                    detail,
                }
            }
            Err(e) => {
                warn!("Failed to export {}: {}", record.path.display(), e);
                let mut outcome = FileOutcome::new(&record.path, FileStatus::Failed);
                outcome.detail = Some(e.to_string());
                outcome
            }
        }
    }

    /// Scan, then compute the batch-wide decisions. Nothing downstream starts
    /// until the scan has covered every file.
    ///
    /// `output_root` is left out of the walk when it sits inside the input
    /// root, so earlier outputs are never picked up as new inputs.
    fn analyze(&self, input_root: &Path, output_root: Option<&Path>) -> Result<Analysis> {
        self.config.validate()?;
        let input_root = validate_input_root(input_root)?;
        if output_root == Some(input_root.as_path()) {
            return Err(AcxError::Config(format!(
                "output root {} is the input root",
                input_root.display()
            )));
        }
        let pool = Self::build_pool(self.config.worker_count())?;

        let mut extractor = MetadataExtractor::new(&self.config, &self.decoder);
        if let Some(nested) = output_root.filter(|out| out.starts_with(&input_root)) {
            info!("Output root {} is inside the input root; not scanning it", nested.display());
            extractor = extractor.excluding(nested);
        }
        let scan = pool.install(|| extractor.process_directory(&input_root));
        info!(
            "Scanned {} files ({} could not be decoded)",
            scan.records.len(),
            scan.failures.len()
        );

        let duplicates = DuplicateAnalyzer::new().find_duplicates(&scan.records);
        let policy = ChannelPolicy::decide(&scan.records);

        Ok(Analysis {
            input_root,
            scan,
            duplicates,
            policy,
            pool,
        })
    }
}

fn validate_input_root(path: &Path) -> Result<PathBuf> {
    let canonical = std::fs::canonicalize(path).map_err(|e| {
        AcxError::Config(format!("input root {} is not accessible: {}", path.display(), e))
    })?;
    if !canonical.is_dir() {
        return Err(AcxError::Config(format!(
            "input root {} is not a directory",
            path.display()
        )));
    }
    std::fs::read_dir(&canonical).map_err(|e| {
        AcxError::Config(format!("input root {} is not readable: {}", path.display(), e))
    })?;
    Ok(canonical)
}

fn validate_output_root(path: &Path, create: bool) -> Result<PathBuf> {
    if path.exists() {
        if !path.is_dir() {
            return Err(AcxError::Config(format!(
                "output root {} is not a directory",
                path.display()
            )));
        }
        let readonly = std::fs::metadata(path)
            .map(|m| m.permissions().readonly())
            .unwrap_or(false);
        if readonly {
            return Err(AcxError::Config(format!(
                "output root {} is not writable",
                path.display()
            )));
        }
    } else if create {
        std::fs::create_dir_all(path).map_err(|e| {
            AcxError::Config(format!("cannot create output root {}: {}", path.display(), e))
        })?;
    }
    Ok(path.to_path_buf())
}
