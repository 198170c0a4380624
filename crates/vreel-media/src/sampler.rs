//! Frame sampling.
//!
//! [`FrameSource`] is the seam between ingest/decoding and analysis. The
//! FFmpeg implementation decodes a recording to raw RGB frames at a fixed
//! sampling interval and streams them without buffering the whole file.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use vreel_models::Source;

use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;
use crate::probe::probe_source;

/// Width used when analysing at "HD" size.
pub const HD_ANALYSIS_WIDTH: u32 = 1920;

/// How frames are sampled from a source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingOptions {
    /// Seconds between sampled frames
    pub interval_secs: f64,
    /// Width of analysed frames; height follows the source aspect ratio
    pub analysis_width: u32,
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            interval_secs: 1.0,
            analysis_width: 320,
        }
    }
}

impl SamplingOptions {
    /// Analysis frame size for a source, never upscaling and always even.
    pub fn frame_size(&self, source: &Source) -> (u32, u32) {
        let src_w = source.width.max(2);
        let src_h = source.height.max(2);
        let width = even(self.analysis_width.min(src_w));
        let height = even(((width as f64) * (src_h as f64) / (src_w as f64)).round() as u32);
        (width, height)
    }

    /// Offset of the `index`-th sampled frame.
    pub fn time_of(&self, index: usize) -> f64 {
        index as f64 * self.interval_secs
    }
}

fn even(v: u32) -> u32 {
    (v.max(2) / 2) * 2
}

/// Supplies validated sources and their sampled frames.
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Validate a recording and describe it.
    async fn probe(&self, path: &Path) -> MediaResult<Source>;

    /// Start sampling frames from a validated source.
    async fn open(&self, source: &Source, options: &SamplingOptions) -> MediaResult<Box<dyn FrameReader>>;
}

/// Sequential reader over the sampled frames of one source.
#[async_trait]
pub trait FrameReader: Send {
    /// Next frame, or `None` once the source is exhausted.
    async fn next_frame(&mut self) -> MediaResult<Option<Frame>>;
}

/// [`FrameSource`] backed by the `ffprobe` and `ffmpeg` binaries.
#[derive(Debug, Clone, Default)]
pub struct FfmpegFrameSource;

impl FfmpegFrameSource {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FrameSource for FfmpegFrameSource {
    async fn probe(&self, path: &Path) -> MediaResult<Source> {
        probe_source(path).await
    }

    async fn open(&self, source: &Source, options: &SamplingOptions) -> MediaResult<Box<dyn FrameReader>> {
        which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)?;

        let (width, height) = options.frame_size(source);
        let filter = format!("fps=1/{},scale={}:{}", options.interval_secs, width, height);

        debug!(
            source_id = %source.id,
            filter = %filter,
            "Starting frame sampler"
        );

        let mut child = Command::new("ffmpeg")
            .args(["-hide_banner", "-loglevel", "error", "-i"])
            .arg(&source.path)
            .args(["-vf", filter.as_str(), "-pix_fmt", "rgb24", "-f", "rawvideo", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("ffmpeg stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("ffmpeg stderr not captured"))?;

        // Drain stderr so a chatty decoder cannot block on a full pipe
        let stderr_handle = tokio::spawn(async move {
            let mut buf = String::new();
            let mut reader = BufReader::new(stderr);
            let _ = reader.read_to_string(&mut buf).await;
            buf
        });

        Ok(Box::new(FfmpegFrameReader {
            child,
            stdout: BufReader::new(stdout),
            stderr: Some(stderr_handle),
            width,
            height,
            options: *options,
            index: 0,
            finished: false,
        }))
    }
}

/// Reads fixed-size rgb24 frames from a running ffmpeg process.
pub struct FfmpegFrameReader {
    child: Child,
    stdout: BufReader<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    width: u32,
    height: u32,
    options: SamplingOptions,
    index: usize,
    finished: bool,
}

impl FfmpegFrameReader {
    fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }

    async fn finish(&mut self) -> MediaResult<()> {
        self.finished = true;
        let status = self.child.wait().await?;
        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() {
            Ok(())
        } else {
            Err(MediaError::ffmpeg_failed(
                "FFmpeg exited with non-zero status while sampling frames",
                Some(stderr),
                status.code(),
            ))
        }
    }
}

#[async_trait]
impl FrameReader for FfmpegFrameReader {
    async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.frame_bytes()];
        let filled = read_full(&mut self.stdout, &mut buf).await?;

        if filled == 0 {
            self.finish().await?;
            return Ok(None);
        }
        if filled < buf.len() {
            warn!(
                frame = self.index,
                bytes = filled,
                expected = buf.len(),
                "Discarding truncated trailing frame"
            );
            self.finish().await?;
            return Ok(None);
        }

        let frame = Frame::from_rgb24(
            self.index,
            self.options.time_of(self.index),
            self.width,
            self.height,
            buf,
        )?;
        self.index += 1;
        Ok(Some(frame))
    }
}

/// Fill `buf` from `reader`, returning how many bytes were read before EOF.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;
    use vreel_models::SourceId;

    fn source(width: u32, height: u32) -> Source {
        Source {
            id: SourceId::from("a"),
            path: PathBuf::from("a.mp4"),
            duration_secs: 10.0,
            width,
            height,
            frame_rate: 30.0,
            has_audio: false,
            video_codec: String::new(),
            container: String::new(),
            size_bytes: 0,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_frame_size_keeps_aspect() {
        let options = SamplingOptions::default();
        assert_eq!(options.frame_size(&source(1920, 1080)), (320, 180));
        assert_eq!(options.frame_size(&source(1080, 1920)), (320, 568));
        // Never upscale
        assert_eq!(options.frame_size(&source(200, 100)), (200, 100));
    }

    #[test]
    fn test_time_of() {
        let options = SamplingOptions {
            interval_secs: 0.5,
            analysis_width: 320,
        };
        assert_eq!(options.time_of(0), 0.0);
        assert_eq!(options.time_of(7), 3.5);
    }

    #[tokio::test]
    async fn test_read_full_reports_short_reads() {
        let data: &[u8] = &[1, 2, 3, 4, 5];
        let mut reader = data;
        let mut buf = [0u8; 3];
        assert_eq!(read_full(&mut reader, &mut buf).await.unwrap(), 3);
        assert_eq!(read_full(&mut reader, &mut buf).await.unwrap(), 2);
        assert_eq!(read_full(&mut reader, &mut buf).await.unwrap(), 0);
    }
}
