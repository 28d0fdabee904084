//! Similarity scoring between an expected track and a candidate.
//!
//! Confidence is `0.6 * title + 0.4 * artist` with small album/duration
//! corroborations. Version awareness is reported separately: the penalty is
//! recorded on the result and applied by ranking and threshold sites, so a
//! consumer sorting by `confidence - version_penalty` never double-counts.

use crate::matching::normalizer::normalize_for_match;
use crate::models::VersionType;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// One side of a comparison.
#[derive(Debug, Clone, Copy)]
pub struct ScoreInput<'a> {
    pub title: &'a str,
    pub artist: &'a str,
    pub album: Option<&'a str>,
    pub duration_ms: Option<u64>,
}

impl<'a> ScoreInput<'a> {
    pub fn new(title: &'a str, artist: &'a str) -> Self {
        Self {
            title,
            artist,
            album: None,
            duration_ms: None,
        }
    }

    pub fn with_album(mut self, album: Option<&'a str>) -> Self {
        self.album = album;
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: Option<u64>) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Classification of a similarity score. `High` is the library-existence
/// threshold used by the analysis gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MatchType {
    None,
    Low,
    Medium,
    High,
    Exact,
}

impl MatchType {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.95 {
            MatchType::Exact
        } else if confidence >= 0.80 {
            MatchType::High
        } else if confidence >= 0.65 {
            MatchType::Medium
        } else if confidence >= 0.50 {
            MatchType::Low
        } else {
            MatchType::None
        }
    }
}

/// Full scoring result.
#[derive(Debug, Clone)]
pub struct MatchScore {
    /// Base confidence, without the version penalty.
    pub confidence: f64,
    pub match_type: MatchType,
    pub title_similarity: f64,
    pub artist_similarity: f64,
    /// Version detected on the candidate title.
    pub version_type: VersionType,
    pub version_penalty: f64,
}

impl MatchScore {
    /// Confidence with the version penalty applied; the value gates and
    /// rankings should compare against thresholds.
    pub fn effective_confidence(&self) -> f64 {
        (self.confidence - self.version_penalty).clamp(0.0, 1.0)
    }
}

static ARTIST_SPLIT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*(?:,|&|;|/|\bfeat\.?\b|\bft\.?\b|\bfeaturing\b|\bx\b|\bvs\.?\b)\s*")
        .unwrap()
});

static REMIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bre-?mix(?:ed)?\b|\brmx\b").unwrap());
static LIVE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\blive\b|\bunplugged\b").unwrap());
static ACOUSTIC_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bacoustic\b").unwrap());
static INSTRUMENTAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\binstrumental\b|\bkaraoke\b").unwrap());
static EXTENDED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bextended(?:\s+(?:mix|version|edit))?\b").unwrap());
static RADIO_EDIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bradio\s+(?:edit|version|mix)\b").unwrap());

/// Detect the recording version by keyword scan of the raw title.
pub fn detect_version(raw_title: &str) -> VersionType {
    if REMIX_RE.is_match(raw_title) {
        VersionType::Remix
    } else if LIVE_RE.is_match(raw_title) {
        VersionType::Live
    } else if ACOUSTIC_RE.is_match(raw_title) {
        VersionType::Acoustic
    } else if INSTRUMENTAL_RE.is_match(raw_title) {
        VersionType::Instrumental
    } else if EXTENDED_RE.is_match(raw_title) {
        VersionType::Extended
    } else if RADIO_EDIT_RE.is_match(raw_title) {
        VersionType::RadioEdit
    } else {
        VersionType::Original
    }
}

/// Penalty for a version mismatch, landing on the candidate. Radio edits
/// and unknowns are penalized as originals since the marker carries no
/// recording identity.
pub fn version_penalty(expected: VersionType, candidate: VersionType) -> f64 {
    use VersionType::*;

    fn canonical(v: VersionType) -> VersionType {
        match v {
            RadioEdit | Unknown => Original,
            v => v,
        }
    }

    let (e, c) = (canonical(expected), canonical(candidate));
    if e == c {
        return 0.0;
    }

    // Unordered pair lookup; the matrix is symmetric.
    let pair = |a: VersionType, b: VersionType| (e == a && c == b) || (e == b && c == a);

    if pair(Original, Extended) {
        0.05
    } else if pair(Original, Remix) || pair(Extended, Remix) || pair(Remix, Live) {
        0.35
    } else if pair(Original, Live)
        || pair(Extended, Acoustic)
        || pair(Live, Acoustic)
        || pair(Acoustic, Instrumental)
    {
        0.25
    } else if pair(Original, Acoustic) {
        0.20
    } else {
        // Original/Instrumental, Extended/Live, Extended/Instrumental,
        // Remix/Acoustic, Remix/Instrumental, Live/Instrumental.
        0.30
    }
}

fn levenshtein_ratio(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 0.0;
    }
    let distance = levenshtein::levenshtein(a, b);
    1.0 - (distance as f64 / max_len as f64)
}

/// Token-set ratio over whitespace tokens: order-insensitive, tolerant of
/// extra tokens on one side.
fn token_set_ratio(a: &str, b: &str) -> f64 {
    let set_a: BTreeSet<&str> = a.split_whitespace().collect();
    let set_b: BTreeSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let inter: Vec<&str> = set_a.intersection(&set_b).copied().collect();
    let only_a: Vec<&str> = set_a.difference(&set_b).copied().collect();
    let only_b: Vec<&str> = set_b.difference(&set_a).copied().collect();

    let joined_inter = inter.join(" ");
    let joined_a = [inter.clone(), only_a].concat().join(" ");
    let joined_b = [inter, only_b].concat().join(" ");

    levenshtein_ratio(&joined_inter, &joined_a)
        .max(levenshtein_ratio(&joined_inter, &joined_b))
        .max(levenshtein_ratio(&joined_a, &joined_b))
}

/// Similarity of two free-text strings after match normalization.
pub fn string_similarity(a: &str, b: &str) -> f64 {
    let na = normalize_for_match(a);
    let nb = normalize_for_match(b);
    if na.is_empty() || nb.is_empty() {
        return 0.0;
    }
    if na == nb {
        return 1.0;
    }
    token_set_ratio(&na, &nb).max(levenshtein_ratio(&na, &nb))
}

/// Compare the expected primary artist against every artist token in the
/// candidate's artist field and take the best.
pub fn artist_similarity(expected_primary: &str, candidate_artists: &str) -> f64 {
    let mut best = string_similarity(expected_primary, candidate_artists);
    for token in ARTIST_SPLIT.split(candidate_artists) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        best = best.max(string_similarity(expected_primary, token));
    }
    best
}

fn duration_adjustment(expected_ms: u64, candidate_ms: u64) -> f64 {
    let delta_s = (expected_ms as f64 - candidate_ms as f64).abs() / 1000.0;
    if delta_s <= 3.0 {
        0.03
    } else if delta_s >= 30.0 {
        -0.03
    } else {
        0.03 - 0.06 * (delta_s - 3.0) / 27.0
    }
}

/// Score a candidate against the expected track.
pub fn score_tracks(
    expected: &ScoreInput<'_>,
    candidate: &ScoreInput<'_>,
    version_aware: bool,
) -> MatchScore {
    let title_similarity = string_similarity(expected.title, candidate.title);
    let artist_similarity = artist_similarity(expected.artist, candidate.artist);

    let mut confidence = 0.6 * title_similarity + 0.4 * artist_similarity;

    if let (Some(expected_album), Some(candidate_album)) = (expected.album, candidate.album) {
        confidence += 0.05 * string_similarity(expected_album, candidate_album);
    }

    // Duration corroboration only when both sides carry one; absence
    // degrades to "do not apply", never to a penalty.
    if let (Some(expected_ms), Some(candidate_ms)) = (expected.duration_ms, candidate.duration_ms)
    {
        confidence += duration_adjustment(expected_ms, candidate_ms);
    }

    let confidence = confidence.clamp(0.0, 1.0);

    let (version_type, penalty) = if version_aware {
        let expected_version = detect_version(expected.title);
        let candidate_version = detect_version(candidate.title);
        (
            candidate_version,
            version_penalty(expected_version, candidate_version),
        )
    } else {
        (VersionType::Unknown, 0.0)
    };

    let score = MatchScore {
        confidence,
        match_type: MatchType::None,
        title_similarity,
        artist_similarity,
        version_type,
        version_penalty: penalty,
    };

    MatchScore {
        match_type: MatchType::from_confidence(score.effective_confidence()),
        ..score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_scores_one() {
        let expected = ScoreInput::new("Midnight City", "M83");
        let candidate = ScoreInput::new("Midnight City", "M83");
        let score = score_tracks(&expected, &candidate, true);
        assert!(score.confidence > 0.99);
        assert_eq!(score.match_type, MatchType::Exact);
        assert_eq!(score.version_type, VersionType::Original);
        assert_eq!(score.version_penalty, 0.0);
    }

    #[test]
    fn featuring_credit_does_not_hurt() {
        let expected = ScoreInput::new("Midnight City", "M83");
        let candidate = ScoreInput::new("Midnight City (feat. Someone)", "M83");
        let score = score_tracks(&expected, &candidate, true);
        assert!(score.title_similarity > 0.99);
    }

    #[test]
    fn artist_comparison_scans_collaborators() {
        assert!(artist_similarity("M83", "Big Artist feat. M83") > 0.99);
        assert!(artist_similarity("M83", "Big Artist, M83 & Another") > 0.99);
        assert!(artist_similarity("M83", "Someone Else") < 0.5);
    }

    #[test]
    fn artist_comparison_is_symmetric_for_plain_names() {
        let a = string_similarity("The Beatles", "Beatles");
        let b = string_similarity("Beatles", "The Beatles");
        assert!((a - b).abs() < 1e-9);
    }

    #[test]
    fn remix_penalized_against_expected_original() {
        let expected = ScoreInput::new("Midnight City", "M83");
        let candidate = ScoreInput::new("Midnight City (Eric Prydz Remix)", "M83");
        let score = score_tracks(&expected, &candidate, true);
        assert_eq!(score.version_type, VersionType::Remix);
        assert_eq!(score.version_penalty, 0.35);
        assert!(score.effective_confidence() < score.confidence);
    }

    #[test]
    fn extended_barely_penalized() {
        assert_eq!(
            version_penalty(VersionType::Original, VersionType::Extended),
            0.05
        );
        assert_eq!(
            version_penalty(VersionType::Extended, VersionType::Original),
            0.05
        );
        assert_eq!(
            version_penalty(VersionType::Remix, VersionType::Live),
            0.35
        );
        assert_eq!(
            version_penalty(VersionType::Original, VersionType::Acoustic),
            0.20
        );
    }

    #[test]
    fn radio_edit_counts_as_original() {
        assert_eq!(detect_version("Song (Radio Edit)"), VersionType::RadioEdit);
        assert_eq!(
            version_penalty(VersionType::Original, VersionType::RadioEdit),
            0.0
        );
    }

    #[test]
    fn version_not_detected_without_awareness() {
        let expected = ScoreInput::new("Midnight City", "M83");
        let candidate = ScoreInput::new("Midnight City (Remix)", "M83");
        let score = score_tracks(&expected, &candidate, false);
        assert_eq!(score.version_penalty, 0.0);
    }

    #[test]
    fn duration_bonus_requires_both_sides() {
        // Imperfect artist keeps the base below the clamp so the
        // adjustment is observable.
        let expected = ScoreInput::new("Song", "Artist A").with_duration_ms(Some(244_000));
        let with_duration = ScoreInput::new("Song", "Artist B").with_duration_ms(Some(244_500));
        let without_duration = ScoreInput::new("Song", "Artist B");

        let bonus = score_tracks(&expected, &with_duration, false).confidence;
        let neutral = score_tracks(&expected, &without_duration, false).confidence;
        assert!(bonus > neutral);

        // Way-off duration penalizes.
        let far = ScoreInput::new("Song", "Artist B").with_duration_ms(Some(300_000));
        assert!(score_tracks(&expected, &far, false).confidence < neutral);
    }

    #[test]
    fn thresholds_classify() {
        assert_eq!(MatchType::from_confidence(0.96), MatchType::Exact);
        assert_eq!(MatchType::from_confidence(0.85), MatchType::High);
        assert_eq!(MatchType::from_confidence(0.70), MatchType::Medium);
        assert_eq!(MatchType::from_confidence(0.55), MatchType::Low);
        assert_eq!(MatchType::from_confidence(0.40), MatchType::None);
    }

    #[test]
    fn token_order_is_irrelevant() {
        assert!(string_similarity("City Midnight", "Midnight City") > 0.99);
    }
}
