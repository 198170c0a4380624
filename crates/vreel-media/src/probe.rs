//! FFprobe-based ingest and header validation.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use vreel_models::{Source, SourceId};

use crate::error::{MediaError, MediaResult};

/// Largest accepted frame size (4K UHD), checked orientation-independently.
pub const MAX_FRAME_LONG_SIDE: u32 = 3840;
pub const MAX_FRAME_SHORT_SIDE: u32 = 2160;

/// File extension of the accepted container.
pub const ACCEPTED_EXTENSION: &str = "mp4";

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
pub struct FfprobeOutput {
    pub format: FfprobeFormat,
    #[serde(default)]
    pub streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
    pub size: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct FfprobeStream {
    pub codec_type: String,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub r_frame_rate: Option<String>,
    pub avg_frame_rate: Option<String>,
}

/// Probe a recording and turn it into a validated [`Source`].
///
/// Any header problem is reported as an input error so the caller can skip
/// the recording and continue with the rest.
pub async fn probe_source(path: impl AsRef<Path>) -> MediaResult<Source> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }
    check_extension(path)?;

    // Check FFprobe exists
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: format!("FFprobe could not read {}", path.display()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    let probe: FfprobeOutput = serde_json::from_slice(&output.stdout).map_err(|e| {
        MediaError::FfprobeFailed {
            message: format!("Unreadable FFprobe output: {}", e),
            stderr: None,
        }
    })?;

    let modified = tokio::fs::metadata(path)
        .await
        .ok()
        .and_then(|m| m.modified().ok())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(Utc::now);

    let source = source_from_probe(path, &probe, modified)?;
    debug!(
        source_id = %source.id,
        duration = source.duration_secs,
        width = source.width,
        height = source.height,
        "Probed source"
    );
    Ok(source)
}

/// Build a [`Source`] from parsed FFprobe output, validating the header.
///
/// `fallback_recorded_at` is used when the container carries no
/// `creation_time` tag.
pub fn source_from_probe(
    path: &Path,
    probe: &FfprobeOutput,
    fallback_recorded_at: DateTime<Utc>,
) -> MediaResult<Source> {
    check_extension(path)?;

    let container = probe.format.format_name.clone().unwrap_or_default();
    if !container.split(',').any(|name| name == ACCEPTED_EXTENSION) {
        return Err(MediaError::unsupported_format(format!(
            "{}: container '{}' is not MP4",
            path.display(),
            container
        )));
    }

    // Find video stream
    let video_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaError::invalid_video(format!("{}: no video stream found", path.display())))?;

    let has_audio = probe.streams.iter().any(|s| s.codec_type == "audio");

    let width = video_stream.width.unwrap_or(0);
    let height = video_stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(MediaError::invalid_video(format!(
            "{}: missing frame dimensions",
            path.display()
        )));
    }
    if width.max(height) > MAX_FRAME_LONG_SIDE || width.min(height) > MAX_FRAME_SHORT_SIDE {
        return Err(MediaError::unsupported_format(format!(
            "{}: resolution {}x{} exceeds {}x{}",
            path.display(),
            width,
            height,
            MAX_FRAME_LONG_SIDE,
            MAX_FRAME_SHORT_SIDE
        )));
    }

    let duration = probe
        .format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);
    if duration.is_nan() || duration <= 0.0 {
        return Err(MediaError::invalid_video(format!(
            "{}: duration is missing or zero",
            path.display()
        )));
    }

    let size = probe
        .format
        .size
        .as_ref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    // Parse frame rate
    let frame_rate = video_stream
        .avg_frame_rate
        .as_ref()
        .and_then(|r| parse_frame_rate(r))
        .or_else(|| video_stream.r_frame_rate.as_ref().and_then(|r| parse_frame_rate(r)))
        .unwrap_or(30.0);

    let recorded_at = probe
        .format
        .tags
        .get("creation_time")
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(fallback_recorded_at);

    Ok(Source {
        id: SourceId::from_path(path),
        path: path.to_path_buf(),
        duration_secs: duration,
        width,
        height,
        frame_rate,
        has_audio,
        video_codec: video_stream.codec_name.clone().unwrap_or_default(),
        container,
        size_bytes: size,
        recorded_at,
    })
}

fn check_extension(path: &Path) -> MediaResult<()> {
    let ok = path
        .extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(ACCEPTED_EXTENSION))
        .unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(MediaError::unsupported_format(format!(
            "{}: expected a .{} file",
            path.display(),
            ACCEPTED_EXTENSION
        )))
    }
}

/// Parse frame rate string (e.g., "30/1" or "29.97").
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok().filter(|v: &f64| *v > 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn probe_json(format_name: &str, width: u32, height: u32, extra_tags: &str) -> FfprobeOutput {
        let json = format!(
            r#"{{
                "format": {{
                    "format_name": "{format_name}",
                    "duration": "60.000000",
                    "size": "1048576",
                    "tags": {{ {extra_tags} }}
                }},
                "streams": [
                    {{ "codec_type": "video", "codec_name": "h264", "width": {width}, "height": {height},
                       "r_frame_rate": "30/1", "avg_frame_rate": "30000/1001" }},
                    {{ "codec_type": "audio", "codec_name": "aac" }}
                ]
            }}"#
        );
        serde_json::from_str(&json).unwrap()
    }

    fn fallback() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_frame_rate() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.01);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert!((parse_frame_rate("29.97").unwrap() - 29.97).abs() < 0.01);
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn test_source_from_probe() {
        let probe = probe_json(
            "mov,mp4,m4a,3gp,3g2,mj2",
            1920,
            1080,
            r#""creation_time": "2024-06-01T09:30:00.000000Z""#,
        );
        let source = source_from_probe(Path::new("/rides/GX010042.mp4"), &probe, fallback()).unwrap();

        assert_eq!(source.id.as_str(), "GX010042");
        assert_eq!(source.duration_secs, 60.0);
        assert!(source.has_audio);
        assert!((source.frame_rate - 29.97).abs() < 0.01);
        assert_eq!(source.video_codec, "h264");
        assert_eq!(source.recorded_at, Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap());
    }

    #[test]
    fn test_missing_creation_time_uses_fallback() {
        let probe = probe_json("mov,mp4,m4a,3gp,3g2,mj2", 1280, 720, "");
        let source = source_from_probe(Path::new("a.mp4"), &probe, fallback()).unwrap();
        assert_eq!(source.recorded_at, fallback());
    }

    #[test]
    fn test_rejects_other_containers() {
        let probe = probe_json("matroska,webm", 1280, 720, "");
        let err = source_from_probe(Path::new("a.mp4"), &probe, fallback()).unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedFormat(_)));
        assert!(err.is_input_error());

        let probe = probe_json("mov,mp4,m4a,3gp,3g2,mj2", 1280, 720, "");
        let err = source_from_probe(Path::new("a.mkv"), &probe, fallback()).unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_rejects_oversized_frames() {
        let probe = probe_json("mov,mp4,m4a,3gp,3g2,mj2", 7680, 4320, "");
        assert!(source_from_probe(Path::new("a.mp4"), &probe, fallback()).is_err());

        let portrait = probe_json("mov,mp4,m4a,3gp,3g2,mj2", 2160, 3840, "");
        assert!(source_from_probe(Path::new("a.mp4"), &portrait, fallback()).is_ok());
    }

    #[test]
    fn test_rejects_missing_video_stream() {
        let probe: FfprobeOutput = serde_json::from_str(
            r#"{"format": {"format_name": "mov,mp4", "duration": "10.0"},
                "streams": [{"codec_type": "audio"}]}"#,
        )
        .unwrap();
        let err = source_from_probe(Path::new("a.mp4"), &probe, fallback()).unwrap_err();
        assert!(matches!(err, MediaError::InvalidVideo(_)));
    }
}
