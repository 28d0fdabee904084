//! Text normalization with three distinct contracts.
//!
//! - [`normalize_for_match`] keeps meaningful parentheticals (live, remix,
//!   extended) because version-aware scoring needs them, while dropping
//!   featuring credits and content tags that carry no identity.
//! - [`normalize_for_path_check`] is the maximum collapse, used only to test
//!   whether an expected artist appears anywhere in a peer-reported path.
//! - [`clean_youtube_title`] / [`clean_youtube_uploader`] reduce YouTube
//!   video noise before catalog resolution.

use once_cell::sync::Lazy;
use regex::Regex;

/// Featuring credit in parentheses or brackets: "(feat. X)", "[ft. X]".
static FEAT_PAREN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s*[(\[](?:feat\.?|ft\.?|featuring)\s+[^)\]]*[)\]]").unwrap());

/// Trailing featuring credit without brackets: "Song feat. X".
static FEAT_TRAILING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+(?:feat\.?|ft\.?|featuring)\s+.*$").unwrap());

/// Content tags that never distinguish recordings.
static CONTENT_TAG_PAREN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s*[(\[](?:explicit|clean|radio\s*edit|radio\s*version)[)\]]").unwrap()
});

/// Bracketed content of every bracket family YouTube titles use.
static BRACKETED: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"\([^)]*\)").unwrap(),
        Regex::new(r"\[[^\]]*\]").unwrap(),
        Regex::new(r"\{[^}]*\}").unwrap(),
        Regex::new(r"<[^>]*>").unwrap(),
        Regex::new(r"【[^】]*】").unwrap(),
    ]
});

/// Video-noise tokens stripped from YouTube titles, whole-word.
static VIDEO_NOISE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)\b(?:
            official\s+music\s+video
            |official\s+lyric\s+video
            |official\s+video
            |official\s+audio
            |official\s+visuali[sz]er
            |music\s+video
            |lyric\s+video
            |lyrics?\s+video
            |visuali[sz]er
            |directors?'?\s*cut
            |full\s+album\s+stream
            |out\s+now
            |m/v|mv
            |hd|hq|4k
            |vevo
            |topic
            |audio
        )\b",
    )
    .unwrap()
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

fn collapse_whitespace(s: &str) -> String {
    WHITESPACE.replace_all(s.trim(), " ").to_string()
}

/// Normalize a title or artist for similarity comparison.
///
/// Featuring credits and content tags go; version markers (extended, live,
/// acoustic, remix, instrumental), year markers, and deluxe/bonus markers
/// stay. An empty result falls back to the original input.
pub fn normalize_for_match(input: &str) -> String {
    let mut s = input.to_lowercase();
    s = FEAT_PAREN.replace_all(&s, "").to_string();
    s = CONTENT_TAG_PAREN.replace_all(&s, "").to_string();
    s = FEAT_TRAILING.replace_all(&s, "").to_string();

    let s: String = s
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    let s = collapse_whitespace(&s);

    if s.is_empty() {
        input.trim().to_string()
    } else {
        s
    }
}

/// The strictest normal form: every non-alphanumeric character dropped.
/// Used only for substring tests against peer-reported file paths.
pub fn normalize_for_path_check(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Remove every parenthesized or bracketed segment, for the query builder's
/// "stripped" variant.
pub fn strip_parentheticals(input: &str) -> String {
    let mut s = input.to_string();
    for pattern in BRACKETED.iter().take(2) {
        s = pattern.replace_all(&s, "").to_string();
    }
    collapse_whitespace(&s)
}

/// Reduce a YouTube video title toward a catalog-searchable track title.
///
/// Reverts to the original input when the reduction collapses below two
/// characters, since an over-aggressive strip is worse than the noise.
pub fn clean_youtube_title(title: &str, uploader: Option<&str>) -> String {
    let original = title.trim();
    let mut s = original.to_string();

    // Leading "<artist> - <title>" with the uploader as artist.
    if let Some(uploader) = uploader {
        let uploader = clean_youtube_uploader(uploader);
        if !uploader.is_empty() {
            let prefix = uploader.to_lowercase();
            let prefix_chars = prefix.chars().count();
            let head: String = s.chars().take(prefix_chars).collect();
            if head.to_lowercase() == prefix {
                let rest: String = s.chars().skip(prefix_chars).collect();
                let rest = rest.trim_start();
                if let Some(stripped) = rest
                    .strip_prefix('-')
                    .or_else(|| rest.strip_prefix('–'))
                    .or_else(|| rest.strip_prefix('—'))
                    .or_else(|| rest.strip_prefix(':'))
                {
                    s = stripped.trim_start().to_string();
                }
            }
        }
    }

    for pattern in BRACKETED.iter() {
        s = pattern.replace_all(&s, "").to_string();
    }

    // Everything after a pipe or a remaining free-standing dash is channel
    // branding, not title.
    if let Some(idx) = s.find('|') {
        s.truncate(idx);
    }
    for sep in [" - ", " – ", " — "] {
        if let Some(idx) = s.find(sep) {
            s.truncate(idx);
        }
    }

    s = VIDEO_NOISE.replace_all(&s, " ").to_string();
    s = FEAT_TRAILING.replace_all(&s, "").to_string();
    s = collapse_whitespace(&s);
    s = s
        .trim_matches(|c: char| matches!(c, '-' | '–' | '—' | '|' | '"' | '\'' | '.' | ','))
        .trim()
        .to_string();

    if s.chars().count() < 2 {
        original.to_string()
    } else {
        s
    }
}

/// Reduce a YouTube channel name toward an artist name: VEVO and
/// auto-generated "Topic" suffixes are channel plumbing.
pub fn clean_youtube_uploader(uploader: &str) -> String {
    let mut s = collapse_whitespace(uploader);

    if s.to_lowercase().ends_with(" - topic") {
        let keep = s.chars().count().saturating_sub(" - topic".chars().count());
        s = s.chars().take(keep).collect();
    }

    if s.to_lowercase().ends_with("vevo") && s.chars().count() > 4 {
        let keep = s.chars().count() - 4;
        s = s.chars().take(keep).collect();
    }

    collapse_whitespace(s.trim_matches(|c: char| matches!(c, '-' | '–' | '—' | '|')))
}
