use std::fmt;
use serde::Serialize;
use crate::AudioRecord;

/// Batch-wide output channel layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ChannelPolicy {
    Mono,
    Stereo,
}

impl ChannelPolicy {
    /// Stereo if any record has more than one channel, mono otherwise.
    ///
    /// Computed over every scanned record, skipped duplicates included. An
    /// empty batch has no policy.
    pub fn decide(records: &[AudioRecord]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }
        if records.iter().any(|r| r.channel_count > 1) {
            Some(ChannelPolicy::Stereo)
        } else {
            Some(ChannelPolicy::Mono)
        }
    }

    pub fn channels(self) -> u16 {
        match self {
            ChannelPolicy::Mono => 1,
            ChannelPolicy::Stereo => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelPolicy::Mono => "mono (1ch)",
            ChannelPolicy::Stereo => "stereo (2ch)",
        }
    }
}

impl fmt::Display for ChannelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
