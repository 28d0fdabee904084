//! Ordered P2P search query generation, most specific first.

use crate::matching::normalizer::{normalize_for_match, strip_parentheticals};

/// First word of the artist worth searching on. "The" is skipped when
/// another word follows it.
fn first_meaningful_artist_word(artist: &str) -> Option<&str> {
    let mut words = artist.split_whitespace();
    let first = words.next()?;
    if first.eq_ignore_ascii_case("the") {
        if let Some(second) = words.next() {
            return Some(second);
        }
    }
    Some(first)
}

/// Build the ordered, deduplicated query sequence for a track.
///
/// 1. `<artist> <title>`
/// 2. `<artist> <title stripped of parentheticals>` when it differs
/// 3. `<title> <first meaningful word of artist>`
/// 4. `<title>` alone
/// 5. album-aware variants when the album name is embedded in the title
pub fn build_queries(title: &str, artist: &str, album: Option<&str>) -> Vec<String> {
    let title = title.trim();
    let artist = artist.trim();
    let mut queries: Vec<String> = Vec::new();

    let mut push = |q: String| {
        let q = q.trim().to_string();
        if !q.is_empty() && !queries.contains(&q) {
            queries.push(q);
        }
    };

    if !artist.is_empty() {
        push(format!("{} {}", artist, title));

        let stripped = strip_parentheticals(title);
        if !stripped.is_empty() && stripped != title {
            push(format!("{} {}", artist, stripped));
        }

        if let Some(word) = first_meaningful_artist_word(artist) {
            push(format!("{} {}", title, word));
        }
    }

    push(title.to_string());

    if let Some(album) = album {
        let norm_title = normalize_for_match(title);
        let norm_album = normalize_for_match(album);
        if !norm_album.is_empty() && norm_title != norm_album && norm_title.contains(&norm_album)
        {
            let without_album = norm_title
                .replacen(&norm_album, "", 1)
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            if !without_album.is_empty() {
                if !artist.is_empty() {
                    push(format!("{} {}", artist, without_album));
                }
                push(without_album);
            }
        }
    }

    if queries.is_empty() && !artist.is_empty() {
        queries.push(artist.to_string());
    }

    queries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_track_produces_three_queries() {
        let queries = build_queries("Midnight City", "M83", Some("Hurry Up, We're Dreaming"));
        assert_eq!(
            queries,
            vec![
                "M83 Midnight City".to_string(),
                "Midnight City M83".to_string(),
                "Midnight City".to_string(),
            ]
        );
    }

    #[test]
    fn parenthetical_variant_inserted_when_different() {
        let queries = build_queries("Song (Deluxe Mix)", "Artist", None);
        assert_eq!(queries[0], "Artist Song (Deluxe Mix)");
        assert_eq!(queries[1], "Artist Song");
        assert!(queries.contains(&"Song (Deluxe Mix)".to_string()));
    }

    #[test]
    fn the_is_skipped_in_artist_word() {
        let queries = build_queries("Yesterday", "The Beatles", None);
        assert!(queries.contains(&"Yesterday Beatles".to_string()));
    }

    #[test]
    fn lone_the_is_kept() {
        assert_eq!(first_meaningful_artist_word("The"), Some("The"));
        assert_eq!(first_meaningful_artist_word("The Beatles"), Some("Beatles"));
        assert_eq!(first_meaningful_artist_word("M83"), Some("M83"));
    }

    #[test]
    fn album_embedded_in_title_gets_variants() {
        let queries = build_queries("Discovery - One More Time", "Daft Punk", Some("Discovery"));
        assert!(queries.iter().any(|q| q == "Daft Punk one more time"));
        assert!(queries.iter().any(|q| q == "one more time"));
    }

    #[test]
    fn never_empty_and_first_is_most_specific() {
        let queries = build_queries("Song", "", None);
        assert_eq!(queries, vec!["Song".to_string()]);

        let queries = build_queries("Song", "Artist", None);
        assert_eq!(queries[0], "Artist Song");
        assert!(queries.iter().all(|q| !q.trim().is_empty()));
    }
}
