pub mod normalizer;
pub mod query;
pub mod scorer;

pub use normalizer::{
    clean_youtube_title, clean_youtube_uploader, normalize_for_match, normalize_for_path_check,
    strip_parentheticals,
};
pub use query::build_queries;
pub use scorer::{
    artist_similarity, detect_version, score_tracks, string_similarity, version_penalty,
    MatchScore, MatchType, ScoreInput,
};
