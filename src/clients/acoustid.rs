//! AcoustID client: chromaprint fingerprinting via the `fpcalc` binary
//! plus lookups against the AcoustID web service.
//!
//! `fpcalc` is resolved from the `FPCALC` environment variable, the PATH,
//! or a local `bin/` directory; when none of those hit, the platform build
//! is downloaded once from the chromaprint releases.

use crate::error::{AppError, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

const CHROMAPRINT_VERSION: &str = "1.5.1";
const ACOUSTID_BASE_URL: &str = "https://api.acoustid.org";

/// Raw fpcalc output.
#[derive(Debug, Clone, Deserialize)]
pub struct FingerprintData {
    pub duration: f64,
    pub fingerprint: String,
}

/// One recording the service matched the fingerprint to.
#[derive(Debug, Clone)]
pub struct RecordingMatch {
    pub mbid: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub score: f64,
}

/// All recordings for a lookup, with the best fingerprint score seen.
#[derive(Debug, Clone, Default)]
pub struct LookupOutcome {
    pub recordings: Vec<RecordingMatch>,
    pub best_score: f64,
}

#[derive(Debug, Deserialize)]
struct LookupWire {
    status: String,
    #[serde(default)]
    results: Vec<LookupResultWire>,
    error: Option<LookupErrorWire>,
}

#[derive(Debug, Deserialize)]
struct LookupErrorWire {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct LookupResultWire {
    #[serde(default)]
    score: f64,
    #[serde(default)]
    recordings: Vec<RecordingWire>,
}

#[derive(Debug, Deserialize)]
struct RecordingWire {
    id: String,
    title: Option<String>,
    #[serde(default)]
    artists: Vec<RecordingArtistWire>,
}

#[derive(Debug, Deserialize)]
struct RecordingArtistWire {
    name: String,
}

fn fpcalc_binary_name() -> &'static str {
    if cfg!(windows) {
        "fpcalc.exe"
    } else {
        "fpcalc"
    }
}

fn fpcalc_download_url() -> Option<String> {
    let base = format!(
        "https://github.com/acoustid/chromaprint/releases/download/v{}",
        CHROMAPRINT_VERSION
    );
    if cfg!(target_os = "windows") && cfg!(target_arch = "x86_64") {
        Some(format!(
            "{}/chromaprint-fpcalc-{}-windows-x86_64.zip",
            base, CHROMAPRINT_VERSION
        ))
    } else if cfg!(target_os = "macos") {
        // Universal build covers both Intel and Apple Silicon.
        Some(format!(
            "{}/chromaprint-fpcalc-{}-macos-universal.tar.gz",
            base, CHROMAPRINT_VERSION
        ))
    } else if cfg!(target_os = "linux") && cfg!(target_arch = "x86_64") {
        Some(format!(
            "{}/chromaprint-fpcalc-{}-linux-x86_64.tar.gz",
            base, CHROMAPRINT_VERSION
        ))
    } else {
        None
    }
}

fn find_in_path() -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(fpcalc_binary_name());
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

fn extract_fpcalc_archive(archive: &[u8], url: &str, dest: &Path) -> Result<()> {
    let wanted = fpcalc_binary_name();

    if url.ends_with(".zip") {
        let reader = std::io::Cursor::new(archive);
        let mut zip = zip::ZipArchive::new(reader).map_err(|e| AppError::Internal {
            message: Some(format!("fpcalc zip: {}", e)),
        })?;
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i).map_err(|e| AppError::Internal {
                message: Some(format!("fpcalc zip: {}", e)),
            })?;
            if entry.name().ends_with(wanted) {
                let mut out = std::fs::File::create(dest)?;
                std::io::copy(&mut entry, &mut out)?;
                return Ok(());
            }
        }
    } else {
        let decoder = flate2::read::GzDecoder::new(archive);
        let mut tar = tar::Archive::new(decoder);
        for entry in tar.entries()? {
            let mut entry = entry?;
            let is_fpcalc = entry
                .path()
                .ok()
                .map(|p| p.to_string_lossy().ends_with("fpcalc"))
                .unwrap_or(false);
            if is_fpcalc {
                let mut out = std::fs::File::create(dest)?;
                std::io::copy(&mut entry, &mut out)?;
                return Ok(());
            }
        }
    }

    Err(AppError::FingerprintUnavailable {
        reason: "fpcalc not found in downloaded archive".to_string(),
    })
}

pub struct AcoustIdClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    bin_dir: PathBuf,
}

impl AcoustIdClient {
    pub fn new(api_key: impl Into<String>, bin_dir: impl Into<PathBuf>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: ACOUSTID_BASE_URL.to_string(),
            bin_dir: bin_dir.into(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Locate fpcalc, downloading the platform build on first need.
    pub async fn ensure_fpcalc(&self) -> Result<PathBuf> {
        if let Ok(path) = std::env::var("FPCALC") {
            let path = PathBuf::from(path);
            if path.is_file() {
                return Ok(path);
            }
            warn!(path = %path.display(), "FPCALC points at a missing file, falling back");
        }

        if let Some(path) = find_in_path() {
            return Ok(path);
        }

        let local = self.bin_dir.join(fpcalc_binary_name());
        if local.is_file() {
            return Ok(local);
        }

        self.download_fpcalc(&local).await?;
        Ok(local)
    }

    async fn download_fpcalc(&self, dest: &Path) -> Result<()> {
        let url = fpcalc_download_url().ok_or_else(|| AppError::FingerprintUnavailable {
            reason: "no fpcalc build available for this platform".to_string(),
        })?;

        info!(url = %url, "Downloading fpcalc");
        std::fs::create_dir_all(&self.bin_dir)?;

        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::FingerprintUnavailable {
                reason: format!("fpcalc download returned HTTP {}", response.status()),
            });
        }
        let archive = response.bytes().await?;

        let dest = dest.to_path_buf();
        let url_clone = url.clone();
        tokio::task::spawn_blocking(move || {
            extract_fpcalc_archive(&archive, &url_clone, &dest)?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))?;
            }
            Ok::<_, AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal {
            message: Some(e.to_string()),
        })??;

        info!("fpcalc ready");
        Ok(())
    }

    /// Run fpcalc against a local file.
    pub async fn fingerprint(&self, audio_file: &Path) -> Result<FingerprintData> {
        if !audio_file.is_file() {
            return Err(AppError::InvalidInput {
                message: format!("file not found: {}", audio_file.display()),
            });
        }

        let fpcalc = self.ensure_fpcalc().await?;
        let output = Command::new(&fpcalc)
            .arg("-json")
            .arg(audio_file)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::FingerprintUnavailable {
                reason: format!("fpcalc failed: {}", stderr.trim()),
            });
        }

        let data: FingerprintData = serde_json::from_slice(&output.stdout)?;
        if data.duration <= 0.0 {
            return Err(AppError::InvalidInput {
                message: "file has zero duration".to_string(),
            });
        }
        Ok(data)
    }

    /// Look a fingerprint up in the AcoustID database.
    pub async fn lookup(&self, fingerprint: &FingerprintData) -> Result<LookupOutcome> {
        let url = format!("{}/v2/lookup", self.base_url);
        let duration = fingerprint.duration.round() as u64;
        let params = [
            ("client", self.api_key.as_str()),
            ("duration", &duration.to_string()),
            ("fingerprint", &fingerprint.fingerprint),
            ("meta", "recordings"),
        ];

        let response = self.http.post(&url).form(&params).send().await?;
        if response.status().as_u16() == 429 {
            return Err(AppError::RateLimited {
                service: "acoustid".to_string(),
                retry_after: None,
            });
        }
        if response.status().is_server_error() {
            return Err(AppError::ServiceUnavailable {
                service: "acoustid".to_string(),
            });
        }

        let wire: LookupWire = response.json().await?;
        if wire.status != "ok" {
            let error = wire.error.unwrap_or(LookupErrorWire {
                code: 0,
                message: "unknown error".to_string(),
            });
            // Error code 4 is specifically "invalid API key".
            if error.code == 4 {
                return Err(AppError::InvalidApiKey {
                    service: "acoustid".to_string(),
                });
            }
            return Err(AppError::ServiceError {
                service: "acoustid".to_string(),
                message: error.message,
            });
        }

        let mut outcome = LookupOutcome::default();
        let mut seen_mbids = HashSet::new();
        for result in wire.results {
            if result.score > outcome.best_score {
                outcome.best_score = result.score;
            }
            for recording in result.recordings {
                if !seen_mbids.insert(recording.id.clone()) {
                    continue;
                }
                outcome.recordings.push(RecordingMatch {
                    mbid: recording.id,
                    title: recording.title,
                    artist: recording.artists.first().map(|a| a.name.clone()),
                    score: result.score,
                });
            }
        }

        debug!(
            recordings = outcome.recordings.len(),
            best_score = outcome.best_score,
            "AcoustID lookup complete"
        );
        Ok(outcome)
    }

    /// Fingerprint a file and look it up in one call.
    pub async fn fingerprint_and_lookup(&self, audio_file: &Path) -> Result<LookupOutcome> {
        let fingerprint = self.fingerprint(audio_file).await?;
        self.lookup(&fingerprint).await
    }

    /// Validate the configured API key with a minimal known fingerprint.
    pub async fn test_api_key(&self) -> (bool, String) {
        if self.api_key.is_empty() {
            return (false, "No API key configured".to_string());
        }

        let probe = FingerprintData {
            duration: 187.0,
            fingerprint: "AQADtMkWaYkSZRGO".to_string(),
        };
        match self.lookup(&probe).await {
            Ok(_) => (true, "AcoustID API key is valid".to_string()),
            Err(err @ AppError::InvalidApiKey { .. }) => (false, err.user_message()),
            Err(err) => (false, err.user_message()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_wire_flattens_recordings() {
        let json = serde_json::json!({
            "status": "ok",
            "results": [
                {
                    "score": 0.93,
                    "recordings": [
                        {"id": "mbid-1", "title": "Midnight City", "artists": [{"name": "M83"}]},
                        {"id": "mbid-1", "title": "Midnight City", "artists": [{"name": "M83"}]},
                        {"id": "mbid-2", "title": "Midnight City (Live)", "artists": [{"name": "M83"}]}
                    ]
                }
            ]
        });
        let wire: LookupWire = serde_json::from_value(json).unwrap();
        assert_eq!(wire.status, "ok");

        let mut seen = HashSet::new();
        let recordings: Vec<_> = wire
            .results
            .into_iter()
            .flat_map(|r| r.recordings)
            .filter(|r| seen.insert(r.id.clone()))
            .collect();
        assert_eq!(recordings.len(), 2);
    }

    #[test]
    fn error_code_four_is_invalid_key() {
        let json = serde_json::json!({
            "status": "error",
            "error": {"code": 4, "message": "invalid API key"}
        });
        let wire: LookupWire = serde_json::from_value(json).unwrap();
        assert_eq!(wire.error.unwrap().code, 4);
    }

    #[test]
    fn download_url_matches_platform() {
        if cfg!(target_os = "linux") && cfg!(target_arch = "x86_64") {
            assert!(fpcalc_download_url().unwrap().ends_with("linux-x86_64.tar.gz"));
        }
    }
}
