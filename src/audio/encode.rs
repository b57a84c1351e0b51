//! MP3 encoding through an external ffmpeg/libmp3lame process.

use std::env;
use std::ffi::OsString;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use log::debug;
use crate::{AcxError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// PCM chunks buffered between the caller and the ffmpeg stdin writer.
const QUEUE_DEPTH: usize = 32;

/// One output file being encoded.
pub trait EncodeSession {
    /// Append interleaved samples.
    fn write(&mut self, samples: &[f32]) -> Result<()>;

    /// Close the stream and wait for the output to be complete.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// The "encode samples to file" capability.
pub trait AudioEncoder: Send + Sync {
    /// Start encoding `channels`-wide frames at `sample_rate` into `dest`,
    /// replacing anything there. The output is only valid once
    /// [`EncodeSession::finish`] returns `Ok`.
    fn start<'a>(
        &'a self,
        sample_rate: u32,
        channels: u16,
        dest: &Path,
        deadline: Option<Instant>,
    ) -> Result<Box<dyn EncodeSession + 'a>>;
}

/// Constant-bitrate MP3 encoder backed by `ffmpeg -acodec libmp3lame`.
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    binary: PathBuf,
    bitrate_kbps: u32,
}

impl FfmpegEncoder {
    pub fn new(binary: impl Into<PathBuf>, bitrate_kbps: u32) -> Self {
        Self {
            binary: binary.into(),
            bitrate_kbps,
        }
    }

    /// Resolve the ffmpeg binary up front so a missing encoder is reported
    /// before any file is touched.
    pub fn locate(binary: impl AsRef<Path>, bitrate_kbps: u32) -> Result<Self> {
        let binary = binary.as_ref();
        let resolved = if binary.components().count() > 1 {
            binary.is_file().then(|| binary.to_path_buf())
        } else {
            find_in_path(binary)
        };
        match resolved {
            Some(path) => {
                debug!("Using encoder at {}", path.display());
                Ok(Self::new(path, bitrate_kbps))
            }
            None => Err(AcxError::Config(format!(
                "encoder '{}' not found; install ffmpeg or pass --ffmpeg",
                binary.display()
            ))),
        }
    }

    /// Arguments for one segment. `-write_xing 0` keeps the VBR info frame
    /// out so every frame is plain CBR.
    pub fn command_args(&self, sample_rate: u32, channels: u16, dest: &Path) -> Vec<OsString> {
        let bitrate = format!("{}k", self.bitrate_kbps);
        let rate = sample_rate.to_string();
        let channels = channels.to_string();
        let mut args: Vec<OsString> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-f",
            "f32le",
            "-ar",
            rate.as_str(),
            "-ac",
            channels.as_str(),
            "-i",
            "pipe:0",
            "-acodec",
            "libmp3lame",
            "-b:a",
            bitrate.as_str(),
            "-write_xing",
            "0",
            "-f",
            "mp3",
            "-y",
        ]
        .iter()
        .map(OsString::from)
        .collect();
        args.push(dest.as_os_str().to_os_string());
        args
    }
}

impl AudioEncoder for FfmpegEncoder {
    fn start<'a>(
        &'a self,
        sample_rate: u32,
        channels: u16,
        dest: &Path,
        deadline: Option<Instant>,
    ) -> Result<Box<dyn EncodeSession + 'a>> {
        let mut child = Command::new(&self.binary)
            .args(self.command_args(sample_rate, channels, dest))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AcxError::encode(dest, format!("failed to spawn ffmpeg: {}", e)))?;

        let Some(mut stdin) = child.stdin.take() else {
            reap(&mut child);
            return Err(AcxError::encode(dest, "failed to open ffmpeg stdin"));
        };

        let (feed, chunks) = mpsc::sync_channel::<Vec<u8>>(QUEUE_DEPTH);
        let writer = thread::Builder::new()
            .name("acx-ffmpeg-feed".into())
            .spawn(move || -> io::Result<()> {
                for chunk in chunks {
                    stdin.write_all(&chunk)?;
                }
                Ok(())
            });
        let writer = match writer {
            Ok(handle) => handle,
            Err(e) => {
                reap(&mut child);
                return Err(AcxError::encode(dest, format!("failed to start PCM writer: {}", e)));
            }
        };

        Ok(Box::new(FfmpegSession {
            child,
            feed: Some(feed),
            writer: Some(writer),
            dest: dest.to_path_buf(),
            deadline,
            started: Instant::now(),
            samples: 0,
            exited: false,
        }))
    }
}

/// A running ffmpeg child fed little-endian f32 PCM by a writer thread, so a
/// stalled encoder can still be timed out and killed.
struct FfmpegSession {
    child: Child,
    feed: Option<SyncSender<Vec<u8>>>,
    writer: Option<JoinHandle<io::Result<()>>>,
    dest: PathBuf,
    deadline: Option<Instant>,
    started: Instant,
    samples: u64,
    exited: bool,
}

impl FfmpegSession {
    fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn timeout(&self) -> AcxError {
        AcxError::Timeout {
            path: self.dest.clone(),
            stage: "encode",
            after: self.started.elapsed(),
        }
    }

    fn join_writer(&mut self) -> io::Result<()> {
        match self.writer.take().map(JoinHandle::join) {
            None | Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(e))) => Err(e),
            Some(Err(_)) => Err(io::Error::new(io::ErrorKind::Other, "PCM writer thread panicked")),
        }
    }

    /// Close stdin, kill the child if it is still running and reap everything.
    fn stop(&mut self) {
        self.feed.take();
        if !self.exited {
            reap(&mut self.child);
            self.exited = true;
        }
        let _ = self.join_writer();
    }

    fn stderr(&mut self) -> String {
        let mut text = String::new();
        if let Some(mut pipe) = self.child.stderr.take() {
            let _ = pipe.read_to_string(&mut text);
        }
        text.trim().to_string()
    }
}

impl EncodeSession for FfmpegSession {
    fn write(&mut self, samples: &[f32]) -> Result<()> {
        let Some(feed) = self.feed.take() else {
            return Err(AcxError::encode(&self.dest, "encoder input already closed"));
        };
        let mut pending = Vec::with_capacity(samples.len() * 4);
        for s in samples {
            pending.extend_from_slice(&s.to_le_bytes());
        }

        loop {
            match feed.try_send(pending) {
                Ok(()) => break,
                Err(TrySendError::Full(back)) => {
                    if self.expired() {
                        drop(feed);
                        self.stop();
                        return Err(self.timeout());
                    }
                    pending = back;
                    thread::sleep(POLL_INTERVAL);
                }
                Err(TrySendError::Disconnected(_)) => {
                    drop(feed);
                    self.stop();
                    let stderr = self.stderr();
                    return Err(AcxError::encode(
                        &self.dest,
                        format!("ffmpeg stopped reading input: {}", stderr),
                    ));
                }
            }
        }
        self.feed = Some(feed);
        self.samples += samples.len() as u64;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<()> {
        // dropping the sender lets the writer drain the queue and close stdin
        self.feed.take();
        let status = match wait_with_deadline(&mut self.child, self.deadline) {
            Ok(status) => status,
            Err(e) => {
                self.stop();
                return Err(AcxError::encode(&self.dest, e));
            }
        };
        self.exited = true;
        let written = self.join_writer();

        let Some(status) = status else {
            return Err(self.timeout());
        };
        if !status.success() {
            let stderr = self.stderr();
            return Err(AcxError::encode(
                &self.dest,
                format!("ffmpeg exited with {}: {}", status, stderr),
            ));
        }
        if let Err(e) = written {
            return Err(AcxError::encode(&self.dest, format!("writing PCM: {}", e)));
        }

        debug!(
            "Encoded {} ({} samples) in {:?}",
            self.dest.display(),
            self.samples,
            self.started.elapsed()
        );
        Ok(())
    }
}

impl Drop for FfmpegSession {
    fn drop(&mut self) {
        self.stop();
    }
}

fn reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Wait for `child`, killing it once `deadline` passes. `Ok(None)` means the
/// deadline expired.
fn wait_with_deadline(
    child: &mut Child,
    deadline: Option<Instant>,
) -> std::io::Result<Option<ExitStatus>> {
    let Some(deadline) = deadline else {
        return child.wait().map(Some);
    };
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            child.kill()?;
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn find_in_path(tool: &Path) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    for dir in env::split_paths(&path_var) {
        let full = dir.join(tool);
        if full.is_file() {
            return Some(full);
        }
        #[cfg(windows)]
        {
            let exe = full.with_extension("exe");
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_request_strict_cbr() {
        let encoder = FfmpegEncoder::new("ffmpeg", 192);
        let args: Vec<String> = encoder
            .command_args(44_100, 2, Path::new("/out/book.mp3"))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        let pair = |flag: &str| {
            let i = args.iter().position(|a| a == flag).unwrap();
            args[i + 1].clone()
        };
        assert_eq!(pair("-acodec"), "libmp3lame");
        assert_eq!(pair("-b:a"), "192k");
        assert_eq!(pair("-write_xing"), "0");
        assert_eq!(pair("-ar"), "44100");
        assert_eq!(pair("-ac"), "2");
        assert_eq!(args.last().unwrap(), "/out/book.mp3");
    }

    #[test]
    fn missing_binary_is_config_error() {
        let err = FfmpegEncoder::locate("/nonexistent/dir/ffmpeg", 192).unwrap_err();
        assert!(matches!(err, AcxError::Config(_)));

        let err = FfmpegEncoder::locate("acx-no-such-encoder-binary", 192).unwrap_err();
        assert!(matches!(err, AcxError::Config(_)));
    }

    // `false` and `yes` ignore the ffmpeg arguments, which is all these need.
    #[cfg(unix)]
    #[test]
    fn failing_encoder_is_an_encode_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp3");
        let encoder = FfmpegEncoder::locate("false", 192).unwrap();

        let mut session = encoder.start(8000, 1, &dest, None).unwrap();
        let err = match session.write(&[0.0; 64]) {
            Err(e) => e,
            Ok(()) => session.finish().unwrap_err(),
        };
        assert!(matches!(err, AcxError::Encode { .. }), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn stalled_encoder_is_killed_at_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp3");
        let encoder = FfmpegEncoder::locate("yes", 192).unwrap();

        let started = Instant::now();
        let deadline = Instant::now() + Duration::from_millis(200);
        let mut session = encoder.start(8000, 1, &dest, Some(deadline)).unwrap();
        session.write(&[0.0; 64]).unwrap();
        let err = session.finish().unwrap_err();

        assert!(matches!(err, AcxError::Timeout { stage: "encode", .. }), "{err}");
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
