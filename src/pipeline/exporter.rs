//! Re-channel, normalize, split and encode a single record.
//!
//! Samples are streamed from the decoder straight into the encoder, so a
//! worker holds one decoded packet at a time rather than the whole track.

use std::mem;
use std::path::{Path, PathBuf};
use std::time::Instant;
use log::{info, warn};
use crate::analyzers::channels::ChannelPolicy;
use crate::audio::decode::AudioDecoder;
use crate::audio::dsp::{self, RmsAccumulator};
use crate::audio::encode::{AudioEncoder, EncodeSession};
use crate::config::AcxConfig;
use crate::utils::file_ops::{FileManager, StagedFile};
use crate::{AcxError, AudioRecord, Result};

/// What happened to one exported record.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    /// `None` for a silent track.
    pub gain_db: Option<f64>,
    pub outputs: Vec<PathBuf>,
    /// `(1-based segment index, error)` for segments that could not be written.
    pub failed_segments: Vec<(usize, String)>,
}

impl ExportSummary {
    pub fn is_complete(&self) -> bool {
        self.failed_segments.is_empty()
    }
}

pub struct Exporter<'a, D: ?Sized, E: ?Sized> {
    config: &'a AcxConfig,
    decoder: &'a D,
    encoder: &'a E,
    files: &'a FileManager,
}

impl<'a, D, E> Exporter<'a, D, E>
where
    D: AudioDecoder + ?Sized,
    E: AudioEncoder + ?Sized,
{
    pub fn new(config: &'a AcxConfig, decoder: &'a D, encoder: &'a E, files: &'a FileManager) -> Self {
        Self {
            config,
            decoder,
            encoder,
            files,
        }
    }

    /// `[start, end)` frame windows of `record`, none longer than the
    /// configured maximum.
    fn segment_bounds(&self, record: &AudioRecord) -> Vec<(u64, u64)> {
        let max_frames = dsp::ms_to_frames(self.config.max_segment_ms, record.sample_rate).max(1);
        dsp::segment_bounds(record.frames, max_frames)
    }

    /// Output paths `record` will produce, derived from its scanned length.
    pub fn planned_outputs(&self, record: &AudioRecord) -> Result<Vec<PathBuf>> {
        self.files.output_paths(&record.path, self.segment_bounds(record).len())
    }

    /// Transform `record` and encode each segment.
    ///
    /// A decode failure is returned as an error. Segment encode failures are
    /// collected in the summary so the remaining segments still get written,
    /// except after a timeout.
    pub fn export(&self, record: &AudioRecord, policy: ChannelPolicy) -> Result<ExportSummary> {
        let src = &record.path;
        info!("Processing: {}", src.display());
        let deadline = self.config.file_timeout().map(|t| Instant::now() + t);

        let channels_in = record.channel_count;
        let channels_out = policy.channels();
        if channels_in != channels_out {
            info!("  Channels: {} -> {}", channels_in, channels_out);
        }

        let measured_dbfs = self.measure(record, channels_out, deadline)?;
        let gain_db = dsp::gain_for(measured_dbfs, self.config.target_dbfs);
        match gain_db {
            Some(gain) => info!(
                "  Gain: {:+.1} dB ({:.1} -> {:.1} dBFS)",
                gain, measured_dbfs, self.config.target_dbfs
            ),
            None => info!("  Silent track, no gain applied"),
        }

        let bounds = self.segment_bounds(record);
        if bounds.len() > 1 {
            info!(
                "  Split into {} parts (max {:.2} min each)",
                bounds.len(),
                self.config.max_segment_ms as f64 / 60_000.0
            );
        }
        let destinations = self.files.output_paths(src, bounds.len())?;

        let mut writer = SegmentWriter {
            encoder: self.encoder,
            files: self.files,
            sample_rate: record.sample_rate,
            channels: channels_out,
            deadline,
            bounds,
            destinations,
            index: 0,
            position: 0,
            slot: Slot::Idle,
            halted: false,
            outputs: Vec::new(),
            failed: Vec::new(),
        };
        let mut mixed = Vec::new();
        let streamed = self.decoder.stream(src, deadline, &mut |chunk| {
            dsp::rechannel_into(chunk, channels_in, channels_out, &mut mixed);
            if let Some(gain) = gain_db {
                dsp::apply_gain(&mut mixed, gain);
            }
            writer.push(&mixed);
        });

        match streamed {
            Ok(info) if info.channels != channels_in || info.sample_rate != record.sample_rate => {
                return Err(AcxError::decode(src, "stream format changed since the scan"));
            }
            Ok(_) => {}
            Err(e @ AcxError::Timeout { .. }) => writer.abort(e),
            Err(e) => return Err(e),
        }

        let (outputs, failed_segments) = writer.finish(src);
        Ok(ExportSummary {
            gain_db,
            outputs,
            failed_segments,
        })
    }

    /// Loudness of `record` once converted to `channels_out` channels.
    fn measure(&self, record: &AudioRecord, channels_out: u16, deadline: Option<Instant>) -> Result<f64> {
        // duplicating channels leaves the mean square unchanged
        if record.channel_count <= channels_out {
            return Ok(record.loudness_dbfs);
        }
        let mut rms = RmsAccumulator::default();
        let mut mixed = Vec::new();
        self.decoder.stream(&record.path, deadline, &mut |chunk| {
            dsp::rechannel_into(chunk, record.channel_count, channels_out, &mut mixed);
            rms.push(&mixed);
        })?;
        Ok(rms.dbfs())
    }
}

enum Slot<'e> {
    /// The next frame starts a new segment.
    Idle,
    Open {
        staged: StagedFile,
        session: Box<dyn EncodeSession + 'e>,
    },
    /// The current segment failed; its remaining frames are dropped.
    Failed,
}

/// Routes a stream of frames into one encode session per segment.
struct SegmentWriter<'e, E: ?Sized> {
    encoder: &'e E,
    files: &'e FileManager,
    sample_rate: u32,
    channels: u16,
    deadline: Option<Instant>,
    bounds: Vec<(u64, u64)>,
    destinations: Vec<PathBuf>,
    index: usize,
    /// Frames consumed so far.
    position: u64,
    slot: Slot<'e>,
    halted: bool,
    outputs: Vec<PathBuf>,
    failed: Vec<(usize, String)>,
}

impl<'e, E: AudioEncoder + ?Sized> SegmentWriter<'e, E> {
    fn push(&mut self, samples: &[f32]) {
        let width = self.channels as usize;
        let frames = (samples.len() / width) as u64;
        let mut offset = 0u64;

        while offset < frames && !self.halted && self.index < self.bounds.len() {
            let end = self.bounds[self.index].1;
            let take = (frames - offset).min(end.saturating_sub(self.position));
            if take > 0 {
                if matches!(self.slot, Slot::Idle) {
                    self.open();
                }
                let slice = &samples[offset as usize * width..(offset + take) as usize * width];
                let written = match &mut self.slot {
                    Slot::Open { session, .. } => session.write(slice),
                    _ => Ok(()),
                };
                if let Err(e) = written {
                    self.fail(e);
                }
                offset += take;
                self.position += take;
            }
            if self.position >= end {
                self.close();
            }
        }
    }

    fn open(&mut self) {
        let encoder = self.encoder;
        let (sample_rate, channels, deadline) = (self.sample_rate, self.channels, self.deadline);
        let opened = self.files.stage(&self.destinations[self.index]).and_then(|staged| {
            let session = encoder.start(sample_rate, channels, staged.path(), deadline)?;
            Ok(Slot::Open { staged, session })
        });
        match opened {
            Ok(slot) => self.slot = slot,
            Err(e) => self.fail(e),
        }
    }

    /// Finish the current segment and move on to the next one.
    fn close(&mut self) {
        if let Slot::Open { staged, session } = mem::replace(&mut self.slot, Slot::Idle) {
            let (start, end) = self.bounds[self.index];
            match session.finish().and_then(|()| staged.commit()) {
                Ok(dest) => {
                    let secs = (end - start) / self.sample_rate.max(1) as u64;
                    info!("  Saved: {} [{:02}:{:02}]", dest.display(), secs / 60, secs % 60);
                    self.outputs.push(dest);
                }
                Err(e) => self.fail(e),
            }
        }
        self.slot = Slot::Idle;
        self.index += 1;
    }

    /// Drop the current segment. A timeout also stops every later segment.
    fn fail(&mut self, e: AcxError) {
        let part = self.index + 1;
        warn!("  Segment {} failed: {}", part, e);
        self.halted |= matches!(e, AcxError::Timeout { .. });
        self.failed.push((part, e.to_string()));
        self.slot = Slot::Failed;
    }

    /// The decoder gave up part way through.
    fn abort(&mut self, e: AcxError) {
        if !self.halted && self.index < self.bounds.len() {
            self.fail(e);
        }
        self.halted = true;
    }

    fn finish(mut self, source: &Path) -> (Vec<PathBuf>, Vec<(usize, String)>) {
        if !self.halted && self.index < self.bounds.len() {
            self.fail(AcxError::decode(
                source,
                format!(
                    "stream ended at frame {}, expected {}",
                    self.position,
                    self.bounds[self.bounds.len() - 1].1
                ),
            ));
        }
        (mem::take(&mut self.outputs), mem::take(&mut self.failed))
    }
}
