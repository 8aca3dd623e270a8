pub mod tmdb;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use tmdb::TmdbClient;

/// One search hit offered to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieCandidate {
    pub id: u64,
    pub title: String,
    pub year: Option<String>,
}

impl MovieCandidate {
    /// Button label, e.g. `Inception (2010)`
    pub fn label(&self) -> String {
        format!("{} ({})", self.title, self.year.as_deref().unwrap_or("????"))
    }
}

/// Full movie detail shown after selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovieDetail {
    pub id: u64,
    pub title: String,
    pub overview: String,
    pub poster_url: Option<String>,
    pub trailer_candidates: Vec<TrailerCandidate>,
}

impl MovieDetail {
    /// Downloadable trailer, official trailers first; ties go to the earliest listed
    pub fn best_trailer(&self) -> Option<&TrailerCandidate> {
        // max_by_key keeps the last of equal maxima
        self.trailer_candidates
            .iter()
            .rev()
            .filter(|c| c.url().is_some())
            .max_by_key(|c| (c.official, c.kind.eq_ignore_ascii_case("trailer")))
    }
}

/// Remotely hosted preview clip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailerCandidate {
    pub name: String,
    pub site: String,
    pub key: String,
    pub kind: String,
    pub official: bool,
}

impl TrailerCandidate {
    /// Watch URL for known hosting sites
    pub fn url(&self) -> Option<String> {
        match self.site.to_lowercase().as_str() {
            "youtube" => Some(format!("https://www.youtube.com/watch?v={}", self.key)),
            "vimeo" => Some(format!("https://vimeo.com/{}", self.key)),
            _ => None,
        }
    }
}

/// Movie database lookup
#[async_trait]
pub trait MetadataLookup: Send + Sync {
    /// Ranked candidates for a free-text query. No match is `Ok(vec![])`.
    async fn search(&self, query: &str) -> Result<Vec<MovieCandidate>>;

    /// Full detail for a candidate id
    async fn detail(&self, id: u64) -> Result<MovieDetail>;
}
