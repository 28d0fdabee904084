//! Post-acquisition audio verification against AcoustID.
//!
//! Policy: fail open. Only a confident identification of a *different*
//! song produces `Fail`; missing tooling, missing key, thin results, and
//! every unexpected error map to `Skip` or `Disabled` so verification
//! infrastructure can never block downloads.

use crate::clients::{AcoustIdClient, LookupOutcome, RecordingMatch};
use crate::error::AppError;
use crate::matching::string_similarity;
use crate::models::VerificationReport;
use std::path::Path;
use tracing::{info, warn};

/// Minimum fingerprint score to trust the identification at all.
const MIN_ACOUSTID_SCORE: f64 = 0.80;
const TITLE_MATCH_THRESHOLD: f64 = 0.70;
const ARTIST_MATCH_THRESHOLD: f64 = 0.60;

fn best_title_artist_match(
    recordings: &[RecordingMatch],
    expected_title: &str,
    expected_artist: &str,
) -> (Option<usize>, f64, f64) {
    let mut best_index = None;
    let mut best_title_sim = 0.0;
    let mut best_artist_sim = 0.0;
    let mut best_combined = 0.0;

    for (index, recording) in recordings.iter().enumerate() {
        let title_sim = string_similarity(expected_title, recording.title.as_deref().unwrap_or(""));
        let artist_sim =
            string_similarity(expected_artist, recording.artist.as_deref().unwrap_or(""));
        // Title weighs more: it is the primary identifier.
        let combined = title_sim * 0.6 + artist_sim * 0.4;
        if combined > best_combined {
            best_combined = combined;
            best_index = Some(index);
            best_title_sim = title_sim;
            best_artist_sim = artist_sim;
        }
    }

    (best_index, best_title_sim, best_artist_sim)
}

/// Seam for post-acquisition verification, mockable in controller tests.
#[async_trait::async_trait]
pub trait AudioVerifier: Send + Sync {
    async fn verify_file(
        &self,
        audio_file: &Path,
        expected_title: &str,
        expected_artist: &str,
    ) -> VerificationReport;
}

pub struct FingerprintVerifier {
    client: Option<AcoustIdClient>,
    enabled: bool,
}

#[async_trait::async_trait]
impl AudioVerifier for FingerprintVerifier {
    async fn verify_file(
        &self,
        audio_file: &Path,
        expected_title: &str,
        expected_artist: &str,
    ) -> VerificationReport {
        FingerprintVerifier::verify_file(self, audio_file, expected_title, expected_artist).await
    }
}

impl FingerprintVerifier {
    pub fn new(client: Option<AcoustIdClient>, enabled: bool) -> Self {
        Self { client, enabled }
    }

    /// A verifier that reports `Disabled` for every file.
    pub fn disabled() -> Self {
        Self {
            client: None,
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.client.as_ref().map(|c| c.has_api_key()).unwrap_or(false)
    }

    /// Verify that a downloaded file is the expected recording.
    pub async fn verify_file(
        &self,
        audio_file: &Path,
        expected_title: &str,
        expected_artist: &str,
    ) -> VerificationReport {
        // Preconditions first; a disabled verifier must answer instantly.
        if !self.enabled {
            return VerificationReport::disabled("verification is disabled");
        }
        let Some(client) = &self.client else {
            return VerificationReport::disabled("no fingerprint client configured");
        };
        if !client.has_api_key() {
            return VerificationReport::disabled("no AcoustID API key configured");
        }

        match self.lookup_and_decide(client, audio_file, expected_title, expected_artist).await {
            Ok(report) => report,
            Err(err) => {
                warn!(error = %err, file = %audio_file.display(), "Verification error");
                VerificationReport::skip(format!("verification error: {}", err.user_message()))
            }
        }
    }

    async fn lookup_and_decide(
        &self,
        client: &AcoustIdClient,
        audio_file: &Path,
        expected_title: &str,
        expected_artist: &str,
    ) -> crate::error::Result<VerificationReport> {
        let outcome = match client.fingerprint_and_lookup(audio_file).await {
            Ok(outcome) => outcome,
            Err(AppError::FingerprintUnavailable { reason }) => {
                return Ok(VerificationReport::skip(reason));
            }
            Err(err) => return Err(err),
        };

        Ok(Self::decide(
            &outcome,
            expected_title,
            expected_artist,
        ))
    }

    /// Pure decision over a lookup outcome, separated for testability.
    pub fn decide(
        outcome: &LookupOutcome,
        expected_title: &str,
        expected_artist: &str,
    ) -> VerificationReport {
        if outcome.recordings.is_empty() {
            return VerificationReport::skip("track not found in AcoustID database");
        }
        if outcome.best_score < MIN_ACOUSTID_SCORE {
            return VerificationReport::skip(format!(
                "fingerprint score too low ({:.2}) to verify",
                outcome.best_score
            ));
        }

        let (best_index, title_sim, artist_sim) =
            best_title_artist_match(&outcome.recordings, expected_title, expected_artist);
        let Some(best_index) = best_index else {
            return VerificationReport::skip("no recordings with title/artist info");
        };

        let best = &outcome.recordings[best_index];
        let matched_title = best.title.as_deref().unwrap_or("?");
        let matched_artist = best.artist.as_deref().unwrap_or("?");

        if title_sim >= TITLE_MATCH_THRESHOLD && artist_sim >= ARTIST_MATCH_THRESHOLD {
            let reason = format!(
                "audio verified: '{}' by '{}' matches expected '{}' by '{}'",
                matched_title, matched_artist, expected_title, expected_artist
            );
            info!("{}", reason);
            return VerificationReport::pass(reason);
        }

        // Title matches but artist does not: could be a cover or a collab
        // credited differently. Scan every recording for the expected
        // artist before giving up.
        if title_sim >= TITLE_MATCH_THRESHOLD {
            for recording in &outcome.recordings {
                let artist = recording.artist.as_deref().unwrap_or("");
                if string_similarity(expected_artist, artist) >= ARTIST_MATCH_THRESHOLD {
                    return VerificationReport::pass(format!(
                        "audio verified: found '{}' by '{}' in AcoustID results",
                        expected_title, expected_artist
                    ));
                }
            }
            return VerificationReport::skip(format!(
                "title matches but artist unclear: AcoustID='{}' by '{}'",
                matched_title, matched_artist
            ));
        }

        // Title mismatch on the combined best: the right recording may
        // still be buried among many results.
        for recording in &outcome.recordings {
            let title = recording.title.as_deref().unwrap_or("");
            let artist = recording.artist.as_deref().unwrap_or("");
            if string_similarity(expected_title, title) >= TITLE_MATCH_THRESHOLD
                && string_similarity(expected_artist, artist) >= ARTIST_MATCH_THRESHOLD
            {
                return VerificationReport::pass(format!(
                    "audio verified: found '{}' by '{}' in AcoustID results",
                    title, artist
                ));
            }
        }

        // Confident mismatch. Report what the file actually is, by the
        // top-scored recording.
        let top = outcome
            .recordings
            .iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or(best);
        VerificationReport::fail(format!(
            "audio mismatch: file identified as '{}' by '{}', expected '{}' by '{}'",
            top.title.as_deref().unwrap_or("?"),
            top.artist.as_deref().unwrap_or("?"),
            expected_title,
            expected_artist
        ))
    }
}
