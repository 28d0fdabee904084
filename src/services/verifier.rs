//! Scoring and filtering of P2P search results for one query.
//!
//! The daemon's own relevance is filename-only and routinely returns the
//! right song by the wrong artist; the strict artist-in-path check is the
//! cheapest high-precision guard against that.

use crate::matching::{normalize_for_path_check, score_tracks, ScoreInput};
use crate::models::{AudioQuality, Candidate, SearchResponse};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Leading track-number clutter on basenames: "01 - ", "12.", "003_".
static TRACK_NUMBER_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{1,4}\s*[-._)\s]\s*").unwrap());

/// Configured download-quality preference, with fallback to anything
/// verified rather than nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityPreference {
    Flac,
    Mp3High,
    Mp3Medium,
    Any,
}

impl QualityPreference {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "flac" => QualityPreference::Flac,
            "mp3_320" | "320" | "mp3-320" => QualityPreference::Mp3High,
            "mp3_256" | "256" | "mp3-256" => QualityPreference::Mp3Medium,
            _ => QualityPreference::Any,
        }
    }

    fn accepts(&self, candidate: &Candidate) -> bool {
        match self {
            QualityPreference::Flac => candidate.quality == AudioQuality::Flac,
            QualityPreference::Mp3High => {
                candidate.quality == AudioQuality::Mp3
                    && candidate.bitrate_kbps.map(|b| b >= 320).unwrap_or(false)
            }
            QualityPreference::Mp3Medium => {
                candidate.quality == AudioQuality::Mp3
                    && candidate.bitrate_kbps.map(|b| b >= 256).unwrap_or(false)
            }
            QualityPreference::Any => true,
        }
    }
}

/// Derive a comparable title from a peer path's basename.
fn title_guess(basename: &str) -> String {
    let stem = basename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(basename);
    let stem = stem.replace('_', " ");
    let stem = TRACK_NUMBER_PREFIX.replace(&stem, "").to_string();
    // "Artist - Title" basenames: the part after the dash is the title.
    match stem.rsplit_once(" - ") {
        Some((_, title)) if !title.trim().is_empty() => title.trim().to_string(),
        _ => stem.trim().to_string(),
    }
}

/// Collect the path pieces that might carry the artist: every directory
/// component plus the basename's dash prefix. Joined with commas so the
/// scorer's artist tokenization scans each one.
fn artist_guess(filename: &str, basename: &str) -> String {
    let mut pieces: Vec<&str> = filename
        .split('/')
        .filter(|c| !c.is_empty() && *c != basename)
        .collect();
    if let Some((prefix, _)) = basename.rsplit_once(" - ") {
        pieces.push(prefix.trim());
    }
    pieces.join(", ")
}

#[derive(Debug, Clone, Copy)]
pub struct CandidateVerifier {
    preference: QualityPreference,
}

impl CandidateVerifier {
    pub fn new(preference: QualityPreference) -> Self {
        Self { preference }
    }

    /// Score, filter, and order search results. The head of the returned
    /// list is the next candidate to dispatch.
    pub fn verify(
        &self,
        responses: &[SearchResponse],
        expected_title: &str,
        expected_artist: &str,
    ) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = Vec::new();

        for response in responses {
            for file in &response.files {
                let basename = file.basename().to_string();
                let title = title_guess(&basename);
                let artists = artist_guess(&file.filename, &basename);

                let expected = ScoreInput::new(expected_title, expected_artist);
                let candidate_input = ScoreInput::new(&title, &artists);
                let score = score_tracks(&expected, &candidate_input, true);

                if score.confidence < 0.50 {
                    continue;
                }

                candidates.push(Candidate {
                    filename: file.filename.clone(),
                    username: response.username.clone(),
                    size_bytes: file.size_bytes,
                    quality: AudioQuality::from_filename(&file.filename),
                    bitrate_kbps: file.bitrate_kbps,
                    confidence: score.confidence,
                    version_type: score.version_type,
                    version_penalty: score.version_penalty,
                });
            }
        }

        candidates.sort_by(|a, b| {
            b.rank()
                .partial_cmp(&a.rank())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // Strict artist-in-path verification. "The X" also matches paths
        // that file the artist as plain "X".
        let mut artist_forms = vec![normalize_for_path_check(expected_artist)];
        if let Some(rest) = expected_artist
            .trim()
            .to_lowercase()
            .strip_prefix("the ")
        {
            artist_forms.push(normalize_for_path_check(rest));
        }
        artist_forms.retain(|f| !f.is_empty());

        let verified: Vec<Candidate> = if artist_forms.is_empty() {
            candidates
        } else {
            candidates
                .into_iter()
                .filter(|c| {
                    let path_form = normalize_for_path_check(&c.filename);
                    artist_forms.iter().any(|form| path_form.contains(form))
                })
                .collect()
        };

        // Quality preference, falling back to the full verified list so a
        // thin result set never collapses to zero.
        let preferred: Vec<Candidate> = verified
            .iter()
            .filter(|c| self.preference.accepts(c))
            .cloned()
            .collect();

        let result = if preferred.is_empty() { verified } else { preferred };
        debug!(
            title = expected_title,
            artist = expected_artist,
            candidates = result.len(),
            "Candidate verification complete"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SharedFile;

    fn response(username: &str, files: &[(&str, u64, Option<u32>)]) -> SearchResponse {
        SearchResponse {
            username: username.to_string(),
            files: files
                .iter()
                .map(|(filename, size, bitrate)| SharedFile {
                    filename: filename.to_string(),
                    size_bytes: *size,
                    bitrate_kbps: *bitrate,
                })
                .collect(),
        }
    }

    #[test]
    fn wrong_artist_path_is_dropped() {
        let responses = vec![
            response(
                "peer1",
                &[("Boyz II Men/Covers/Yesterday.mp3", 5_000_000, Some(320))],
            ),
            response(
                "peer2",
                &[("Beatles/Help/Yesterday.flac", 20_000_000, None)],
            ),
        ];

        let verifier = CandidateVerifier::new(QualityPreference::Any);
        let candidates = verifier.verify(&responses, "Yesterday", "The Beatles");

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].filename, "Beatles/Help/Yesterday.flac");
        assert_eq!(candidates[0].username, "peer2");
    }

    #[test]
    fn every_survivor_contains_the_artist_in_path() {
        let responses = vec![response(
            "peer",
            &[
                ("M83/Hurry Up/01 Midnight City.flac", 1, None),
                ("Random/Other/Midnight City.mp3", 1, Some(320)),
            ],
        )];

        let candidates =
            CandidateVerifier::new(QualityPreference::Any).verify(&responses, "Midnight City", "M83");

        let artist_form = normalize_for_path_check("M83");
        assert!(!candidates.is_empty());
        for candidate in &candidates {
            assert!(normalize_for_path_check(&candidate.filename).contains(&artist_form));
        }
    }

    #[test]
    fn quality_preference_selects_tier() {
        let responses = vec![response(
            "peer",
            &[
                ("M83/album/Midnight City.flac", 1, None),
                ("M83/album/Midnight City.mp3", 1, Some(320)),
            ],
        )];

        let flac_only = CandidateVerifier::new(QualityPreference::Flac).verify(
            &responses,
            "Midnight City",
            "M83",
        );
        assert!(flac_only
            .iter()
            .all(|c| c.quality == AudioQuality::Flac));

        let high_mp3 = CandidateVerifier::new(QualityPreference::Mp3High).verify(
            &responses,
            "Midnight City",
            "M83",
        );
        assert!(high_mp3
            .iter()
            .all(|c| c.quality == AudioQuality::Mp3));
    }

    #[test]
    fn empty_preferred_tier_falls_back_to_verified() {
        let responses = vec![response(
            "peer",
            &[("M83/album/Midnight City.mp3", 1, Some(192))],
        )];

        let candidates = CandidateVerifier::new(QualityPreference::Flac).verify(
            &responses,
            "Midnight City",
            "M83",
        );
        // No flac offered, but the verified mp3 survives.
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].quality, AudioQuality::Mp3);
    }

    #[test]
    fn results_ranked_by_version_adjusted_confidence() {
        let responses = vec![response(
            "peer",
            &[
                ("M83/album/Midnight City (Remix).flac", 1, None),
                ("M83/album/Midnight City.flac", 1, None),
            ],
        )];

        let candidates = CandidateVerifier::new(QualityPreference::Any).verify(
            &responses,
            "Midnight City",
            "M83",
        );
        assert!(candidates.len() >= 2);
        assert_eq!(candidates[0].filename, "M83/album/Midnight City.flac");
        assert!(candidates[0].rank() >= candidates[1].rank());
    }

    #[test]
    fn low_confidence_results_dropped() {
        let responses = vec![response(
            "peer",
            &[("M83/album/Totally Unrelated Song.flac", 1, None)],
        )];
        let candidates = CandidateVerifier::new(QualityPreference::Any).verify(
            &responses,
            "Midnight City",
            "M83",
        );
        assert!(candidates.is_empty());
    }

    #[test]
    fn title_guess_strips_clutter() {
        assert_eq!(title_guess("01 Midnight City.flac"), "Midnight City");
        assert_eq!(title_guess("01 - M83 - Midnight City.flac"), "Midnight City");
        assert_eq!(title_guess("Midnight_City.mp3"), "Midnight City");
    }
}
