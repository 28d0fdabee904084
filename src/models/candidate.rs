use serde::{Deserialize, Serialize};
use std::fmt;

/// Audio container/codec quality tier, derived from the peer-reported
/// file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioQuality {
    Flac,
    Mp3,
    Aac,
    Ogg,
    Unknown,
}

impl AudioQuality {
    pub fn from_filename(path: &str) -> Self {
        let ext = path
            .rsplit('.')
            .next()
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "flac" => AudioQuality::Flac,
            "mp3" => AudioQuality::Mp3,
            "aac" | "m4a" | "mp4" => AudioQuality::Aac,
            "ogg" | "oga" | "opus" => AudioQuality::Ogg,
            _ => AudioQuality::Unknown,
        }
    }
}

impl fmt::Display for AudioQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AudioQuality::Flac => "flac",
            AudioQuality::Mp3 => "mp3",
            AudioQuality::Aac => "aac",
            AudioQuality::Ogg => "ogg",
            AudioQuality::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Version of a recording, detected by keyword scan of the raw title.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionType {
    Original,
    Extended,
    Remix,
    Live,
    Acoustic,
    Instrumental,
    RadioEdit,
    Unknown,
}

impl fmt::Display for VersionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VersionType::Original => "original",
            VersionType::Extended => "extended",
            VersionType::Remix => "remix",
            VersionType::Live => "live",
            VersionType::Acoustic => "acoustic",
            VersionType::Instrumental => "instrumental",
            VersionType::RadioEdit => "radio_edit",
            VersionType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A single file offered by a peer, as reported by the transfer daemon's
/// search. Paths are forward-slash normalized on ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedFile {
    pub filename: String,
    pub size_bytes: u64,
    pub bitrate_kbps: Option<u32>,
}

impl SharedFile {
    pub fn basename(&self) -> &str {
        self.filename
            .rsplit('/')
            .next()
            .unwrap_or(&self.filename)
    }
}

/// One peer's answer to a search: the peer identity plus its offered files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub username: String,
    pub files: Vec<SharedFile>,
}

/// A scored, verified search hit. Built by the candidate verifier, which is
/// the only place `confidence` is assigned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Full path as reported by the peer, forward-slash normalized.
    pub filename: String,
    pub username: String,
    pub size_bytes: u64,
    pub quality: AudioQuality,
    pub bitrate_kbps: Option<u32>,
    pub confidence: f64,
    pub version_type: VersionType,
    pub version_penalty: f64,
}

impl Candidate {
    /// Ranking key: confidence discounted by the version penalty.
    pub fn rank(&self) -> f64 {
        self.confidence - self.version_penalty
    }

    /// The `(username, filename)` pair identifying this source, used to
    /// make sure a failed source is never re-dispatched.
    pub fn source_key(&self) -> (String, String) {
        (self.username.clone(), self.filename.clone())
    }

    pub fn basename(&self) -> &str {
        self.filename
            .rsplit('/')
            .next()
            .unwrap_or(&self.filename)
    }
}
