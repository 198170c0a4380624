//! Source recording models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Stable identifier for one input recording.
///
/// Derived from the file stem, so re-running against the same inputs
/// always yields the same identifiers.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Derive the identifier from a recording path.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        Self(stem)
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One validated input recording.
///
/// Created once at ingest and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Source {
    /// Stable identifier
    pub id: SourceId,
    /// Location of the recording on disk
    pub path: PathBuf,
    /// Duration in seconds
    pub duration_secs: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Frame rate (fps)
    pub frame_rate: f64,
    /// Whether an audio stream is present
    pub has_audio: bool,
    /// Video codec name as reported by the container
    #[serde(default)]
    pub video_codec: String,
    /// Container format name
    #[serde(default)]
    pub container: String,
    /// File size in bytes
    #[serde(default)]
    pub size_bytes: u64,
    /// Wall-clock start of the recording, used for the global timeline
    pub recorded_at: DateTime<Utc>,
}

impl Source {
    /// Recording start as fractional Unix seconds.
    pub fn recorded_at_secs(&self) -> f64 {
        self.recorded_at.timestamp_millis() as f64 / 1000.0
    }

    /// Global timeline position of an in-source offset, in Unix seconds.
    pub fn global_secs(&self, offset_secs: f64) -> f64 {
        self.recorded_at_secs() + offset_secs
    }

    /// Global timeline position of an in-source offset.
    pub fn global_time(&self, offset_secs: f64) -> DateTime<Utc> {
        self.recorded_at + chrono::Duration::milliseconds((offset_secs * 1000.0).round() as i64)
    }
}

/// A requested input that was rejected at ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SkippedSource {
    pub id: SourceId,
    pub path: PathBuf,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_source_id_from_path() {
        assert_eq!(SourceId::from_path("/videos/GX010042.mp4").as_str(), "GX010042");
        assert_eq!(SourceId::from_path("clip.mp4").as_str(), "clip");
    }

    #[test]
    fn test_global_time() {
        let source = Source {
            id: SourceId::from("a"),
            path: PathBuf::from("a.mp4"),
            duration_secs: 60.0,
            width: 1920,
            height: 1080,
            frame_rate: 30.0,
            has_audio: true,
            video_codec: "h264".to_string(),
            container: "mp4".to_string(),
            size_bytes: 0,
            recorded_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        };

        let t = source.global_time(90.5);
        assert_eq!(t, Utc.with_ymd_and_hms(2024, 5, 1, 10, 1, 30).unwrap() + chrono::Duration::milliseconds(500));
        assert!((source.global_secs(10.0) - source.recorded_at_secs() - 10.0).abs() < 1e-9);
    }
}
