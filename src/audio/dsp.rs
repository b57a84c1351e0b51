//! Pure sample transforms over interleaved f32 PCM in [-1.0, 1.0].

use sha2::{Digest, Sha256};
use crate::ContentHash;

/// Running mean-square energy over any number of chunks.
#[derive(Debug, Default, Clone, Copy)]
pub struct RmsAccumulator {
    sum_squares: f64,
    count: u64,
}

impl RmsAccumulator {
    pub fn push(&mut self, samples: &[f32]) {
        for &s in samples {
            let s = s as f64;
            self.sum_squares += s * s;
        }
        self.count += samples.len() as u64;
    }

    pub fn rms(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        (self.sum_squares / self.count as f64).sqrt()
    }

    /// Loudness relative to full scale. Silence is `NEG_INFINITY`.
    pub fn dbfs(&self) -> f64 {
        let rms = self.rms();
        if rms == 0.0 {
            f64::NEG_INFINITY
        } else {
            20.0 * rms.log10()
        }
    }
}

pub fn rms_dbfs(samples: &[f32]) -> f64 {
    let mut acc = RmsAccumulator::default();
    acc.push(samples);
    acc.dbfs()
}

/// Incremental digest of decoded sample bytes.
#[derive(Default)]
pub struct SampleHasher {
    inner: Sha256,
}

impl SampleHasher {
    pub fn update(&mut self, samples: &[f32]) {
        for s in samples {
            self.inner.update(s.to_le_bytes());
        }
    }

    pub fn finish(self) -> ContentHash {
        ContentHash::from_hex(format!("{:x}", self.inner.finalize()))
    }
}

pub fn content_hash(samples: &[f32]) -> ContentHash {
    let mut hasher = SampleHasher::default();
    hasher.update(samples);
    hasher.finish()
}

/// Convert interleaved `samples` from `from` channels to `to` channels,
/// replacing the contents of `out`.
///
/// Mono is upmixed by duplicating the single channel. Anything wider is
/// downmixed to mono by averaging, or to stereo by averaging into both sides.
/// `samples` must hold whole frames.
pub fn rechannel_into(samples: &[f32], from: u16, to: u16, out: &mut Vec<f32>) {
    out.clear();
    if from == to || from == 0 || to == 0 {
        out.extend_from_slice(samples);
        return;
    }
    let from = from as usize;
    let to = to as usize;

    if from == 1 {
        out.reserve(samples.len() * to);
        for &s in samples {
            out.extend(std::iter::repeat(s).take(to));
        }
        return;
    }

    out.reserve(samples.len() / from * to);
    for frame in samples.chunks_exact(from) {
        let mean = frame.iter().map(|&s| s as f64).sum::<f64>() / from as f64;
        out.extend(std::iter::repeat(mean as f32).take(to));
    }
}

/// Gain in dB needed to move `measured_dbfs` onto `target_dbfs`.
///
/// Returns `None` when the measurement is not finite (a silent track), so no
/// gain is ever derived from an infinite level.
pub fn gain_for(measured_dbfs: f64, target_dbfs: f64) -> Option<f64> {
    if !measured_dbfs.is_finite() {
        return None;
    }
    let gain = target_dbfs - measured_dbfs;
    gain.is_finite().then_some(gain)
}

/// Apply a uniform gain, saturating at full scale.
pub fn apply_gain(samples: &mut [f32], gain_db: f64) {
    let factor = 10f64.powf(gain_db / 20.0);
    for s in samples.iter_mut() {
        *s = ((*s as f64) * factor).clamp(-1.0, 1.0) as f32;
    }
}

/// Consecutive `[start, end)` windows no longer than `max`, in whatever
/// unit both arguments share (the exporter uses frames).
///
/// A track at or under the limit yields exactly one window; an empty track
/// yields one empty window so it still maps to one output.
pub fn segment_bounds(total: u64, max: u64) -> Vec<(u64, u64)> {
    if max == 0 || total <= max {
        return vec![(0, total)];
    }
    let count = total.div_ceil(max);
    (0..count)
        .map(|i| {
            let start = i * max;
            (start, (start + max).min(total))
        })
        .collect()
}

pub fn frames_to_ms(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    frames * 1000 / sample_rate as u64
}

pub fn ms_to_frames(ms: u64, sample_rate: u32) -> u64 {
    ms * sample_rate as u64 / 1000
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn full_scale_square_is_zero_dbfs() {
        let samples = [1.0f32, -1.0, 1.0, -1.0];
        assert!(rms_dbfs(&samples).abs() < 1e-9);
    }

    #[test]
    fn half_scale_is_about_minus_six() {
        let samples = vec![0.5f32; 100];
        assert!((rms_dbfs(&samples) + 6.0206).abs() < 1e-3);
    }

    #[test]
    fn silence_is_negative_infinity() {
        assert_eq!(rms_dbfs(&[0.0; 64]), f64::NEG_INFINITY);
        assert_eq!(rms_dbfs(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn chunked_accumulation_matches_single_pass() {
        let samples: Vec<f32> = (0..1000).map(|i| ((i as f32) * 0.01).sin() * 0.3).collect();
        let mut acc = RmsAccumulator::default();
        for chunk in samples.chunks(77) {
            acc.push(chunk);
        }
        assert!((acc.dbfs() - rms_dbfs(&samples)).abs() < 1e-9);
    }

    #[test]
    fn hash_ignores_chunking_but_not_content() {
        let samples = vec![0.1f32, -0.2, 0.3, -0.4];
        let mut hasher = SampleHasher::default();
        hasher.update(&samples[..1]);
        hasher.update(&samples[1..]);
        assert_eq!(hasher.finish(), content_hash(&samples));
        assert_ne!(content_hash(&samples), content_hash(&[0.1, -0.2, 0.3, -0.5]));
        assert_eq!(content_hash(&samples).as_str().len(), 64);
    }

    fn rechannel(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
        let mut out = vec![9.0; 3];
        rechannel_into(samples, from, to, &mut out);
        out
    }

    #[test]
    fn mono_upmix_duplicates() {
        assert_eq!(rechannel(&[0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn stereo_downmix_averages() {
        assert_eq!(rechannel(&[0.2, 0.4, -1.0, 1.0], 2, 1), vec![0.3, 0.0]);
    }

    #[test]
    fn surround_downmix_to_stereo_fills_both_sides() {
        let frame = [0.6f32, 0.0, 0.0, 0.0, 0.0, 0.0];
        let out = rechannel(&frame, 6, 2);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.1).abs() < 1e-6 && out[0] == out[1]);
    }

    #[test]
    fn same_layout_passes_through() {
        let samples = [0.1f32, 0.2, 0.3, 0.4];
        assert_eq!(rechannel(&samples, 2, 2), samples.to_vec());
    }

    #[test]
    fn silent_track_gets_no_gain() {
        assert_eq!(gain_for(f64::NEG_INFINITY, -20.0), None);
        assert_eq!(gain_for(f64::NAN, -20.0), None);
        assert_eq!(gain_for(-25.0, -20.0), Some(5.0));
        assert_eq!(gain_for(-18.0, -20.0), Some(-2.0));
    }

    #[test]
    fn gain_moves_level_and_saturates() {
        let mut samples = vec![0.05f32, -0.05];
        let before = rms_dbfs(&samples);
        apply_gain(&mut samples, 6.0);
        assert!((rms_dbfs(&samples) - before - 6.0).abs() < 1e-4);

        let mut loud = vec![0.9f32, -0.9];
        apply_gain(&mut loud, 20.0);
        assert_eq!(loud, vec![1.0, -1.0]);
    }

    #[test]
    fn track_at_limit_is_one_segment() {
        assert_eq!(segment_bounds(7_198_000, 7_198_000), vec![(0, 7_198_000)]);
    }

    #[test]
    fn one_ms_over_limit_is_two_segments() {
        assert_eq!(
            segment_bounds(7_198_001, 7_198_000),
            vec![(0, 7_198_000), (7_198_000, 7_198_001)]
        );
    }

    #[test]
    fn long_track_splits_into_ceil_parts() {
        let bounds = segment_bounds(25_000, 10_000);
        assert_eq!(bounds, vec![(0, 10_000), (10_000, 20_000), (20_000, 25_000)]);
    }

    #[test]
    fn frame_windows_never_exceed_limit() {
        // 8007 frames at 8 kHz is 1000 ms after rounding, but still over 8000 frames
        let max = ms_to_frames(1000, 8000);
        assert_eq!(segment_bounds(8007, max), vec![(0, 8000), (8000, 8007)]);
        assert_eq!(segment_bounds(8000, max), vec![(0, 8000)]);
    }

    #[test]
    fn frame_conversions() {
        assert_eq!(frames_to_ms(44_100, 44_100), 1000);
        assert_eq!(frames_to_ms(4_410, 44_100), 100);
        assert_eq!(ms_to_frames(1500, 8000), 12_000);
        assert_eq!(frames_to_ms(10, 0), 0);
    }
}
