//! Decoding of source files to interleaved f32 PCM using symphonia.

use std::path::Path;
use std::time::Instant;
use log::{debug, warn};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use crate::{AcxError, Result};

/// Shape of a decoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames: u64,
}

/// The "decode file to samples" capability.
pub trait AudioDecoder: Send + Sync {
    /// Push interleaved sample chunks to `sink` until the stream ends. Every
    /// chunk holds whole frames.
    ///
    /// Fails with `AcxError::Timeout` once `deadline` has passed.
    fn stream(
        &self,
        path: &Path,
        deadline: Option<Instant>,
        sink: &mut dyn FnMut(&[f32]),
    ) -> Result<StreamInfo>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn stream(
        &self,
        path: &Path,
        deadline: Option<Instant>,
        sink: &mut dyn FnMut(&[f32]),
    ) -> Result<StreamInfo> {
        let started = Instant::now();
        let file = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| AcxError::decode(path, e))?;
        let mut format = probed.format;

        let (track_id, codec_params) = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .map(|t| (t.id, t.codec_params.clone()))
            .ok_or_else(|| AcxError::decode(path, "no audio track found"))?;

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| AcxError::decode(path, e))?;

        let mut sample_rate = codec_params.sample_rate;
        let mut channels = codec_params.channels.map(|c| c.count() as u16);
        let mut frames = 0u64;
        let mut buffer: Option<SampleBuffer<f32>> = None;

        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(AcxError::Timeout {
                        path: path.to_path_buf(),
                        stage: "decode",
                        after: started.elapsed(),
                    });
                }
            }

            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => return Err(AcxError::decode(path, e)),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping corrupt packet in {}: {}", path.display(), e);
                    continue;
                }
                Err(e) => return Err(AcxError::decode(path, e)),
            };

            if decoded.frames() == 0 {
                continue;
            }

            let spec = *decoded.spec();
            let packet_channels = spec.channels.count() as u16;
            match channels {
                Some(known) if known != packet_channels => {
                    return Err(AcxError::decode(
                        path,
                        format!("channel count changed from {} to {}", known, packet_channels),
                    ));
                }
                _ => channels = Some(packet_channels),
            }
            if sample_rate.is_none() {
                sample_rate = Some(spec.rate);
            }

            let needed = decoded.capacity() * packet_channels as usize;
            if buffer.as_ref().map_or(true, |b| b.capacity() < needed) {
                buffer = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
            }
            if let Some(buf) = buffer.as_mut() {
                buf.copy_interleaved_ref(decoded);
                frames += (buf.samples().len() / packet_channels as usize) as u64;
                sink(buf.samples());
            }
        }

        let (Some(sample_rate), Some(channels)) = (sample_rate, channels) else {
            return Err(AcxError::decode(path, "stream format could not be determined"));
        };
        if frames == 0 {
            return Err(AcxError::decode(path, "no audio frames decoded"));
        }

        debug!(
            "Decoded {} ({} frames, {} Hz, {} ch) in {:?}",
            path.display(),
            frames,
            sample_rate,
            channels,
            started.elapsed()
        );

        Ok(StreamInfo {
            sample_rate,
            channels,
            frames,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write_wav(path: &Path, channels: u16, frames: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..frames {
            for ch in 0..channels {
                writer.write_sample(((i as i16) % 100) * 50 + ch as i16).unwrap();
            }
        }
        writer.finalize().unwrap();
    }

    fn collect(path: &Path, deadline: Option<Instant>) -> Result<(StreamInfo, Vec<f32>)> {
        let mut samples = Vec::new();
        let info = SymphoniaDecoder::new().stream(path, deadline, &mut |chunk| {
            samples.extend_from_slice(chunk)
        })?;
        Ok((info, samples))
    }

    #[test]
    fn decodes_wav_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 2, 8000);

        let (info, samples) = collect(&path, None).unwrap();
        assert_eq!(
            info,
            StreamInfo {
                sample_rate: 8000,
                channels: 2,
                frames: 8000,
            }
        );
        assert_eq!(samples.len(), 16_000);
        // right channel carries the +1 offset
        assert!(samples[1] > samples[0]);
    }

    #[test]
    fn decodes_cbr_mp3() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/silence_48k_mono.mp3");

        let (info, samples) = collect(&path, None).unwrap();
        assert_eq!(info.sample_rate, 48_000);
        assert_eq!(info.channels, 1);
        assert!(info.frames >= 1152, "{} frames", info.frames);
        assert_eq!(samples.len() as u64, info.frames);
        assert!(samples.iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"definitely not a riff header").unwrap();

        let err = collect(&path, None).unwrap_err();
        assert!(matches!(err, AcxError::Decode { .. }), "{err}");
    }

    #[test]
    fn expired_deadline_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 1, 800);

        let err = collect(&path, Some(Instant::now())).unwrap_err();
        assert!(matches!(err, AcxError::Timeout { stage: "decode", .. }), "{err}");
    }
}
