use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{MetadataLookup, MovieCandidate, MovieDetail, TrailerCandidate};
use crate::config::MetadataConfig;
use crate::{BotError, Result};

/// TMDB (themoviedb.org) API client
pub struct TmdbClient {
    config: MetadataConfig,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TmdbSearchResponse {
    #[serde(default)]
    results: Vec<TmdbMovie>,
}

#[derive(Debug, Deserialize)]
struct TmdbMovie {
    id: u64,
    title: String,
    release_date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbMovieDetail {
    id: u64,
    title: String,
    overview: Option<String>,
    poster_path: Option<String>,
    videos: Option<TmdbVideos>,
}

#[derive(Debug, Deserialize)]
struct TmdbVideos {
    #[serde(default)]
    results: Vec<TmdbVideo>,
}

#[derive(Debug, Deserialize)]
struct TmdbVideo {
    name: String,
    site: String,
    key: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    official: bool,
}

impl TmdbClient {
    pub fn new(config: MetadataConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        Ok(Self { config, client })
    }

    fn api_key(&self) -> Result<&str> {
        self.config
            .api_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| BotError::LookupUnavailable("TMDB API key not configured".to_string()))
    }

    fn search_url(&self, query: &str) -> Result<Url> {
        let url = format!("{}/search/movie", self.config.api_base.trim_end_matches('/'));
        Url::parse_with_params(
            &url,
            &[
                ("api_key", self.api_key()?),
                ("query", query),
                ("language", self.config.language.as_str()),
            ],
        )
        .map_err(|e| BotError::Configuration(format!("invalid TMDB base URL: {}", e)))
    }

    fn detail_url(&self, id: u64) -> Result<Url> {
        let url = format!("{}/movie/{}", self.config.api_base.trim_end_matches('/'), id);
        Url::parse_with_params(
            &url,
            &[
                ("api_key", self.api_key()?),
                ("language", self.config.language.as_str()),
                ("append_to_response", "videos"),
            ],
        )
        .map_err(|e| BotError::Configuration(format!("invalid TMDB base URL: {}", e)))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| BotError::LookupUnavailable(e.without_url().to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BotError::LookupUnavailable(format!("TMDB API error {}: {}", status, text)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BotError::LookupUnavailable(format!("unexpected TMDB response: {}", e)))
    }

    fn candidates(&self, response: TmdbSearchResponse) -> Vec<MovieCandidate> {
        response
            .results
            .into_iter()
            .take(self.config.max_results)
            .map(|movie| MovieCandidate {
                id: movie.id,
                title: movie.title,
                year: movie
                    .release_date
                    .and_then(|date| date.get(..4).map(str::to_string)),
            })
            .collect()
    }

    fn detail_from(&self, movie: TmdbMovieDetail) -> MovieDetail {
        let trailer_candidates = movie
            .videos
            .map(|videos| {
                videos
                    .results
                    .into_iter()
                    .map(|video| TrailerCandidate {
                        name: video.name,
                        site: video.site,
                        key: video.key,
                        kind: video.kind,
                        official: video.official,
                    })
                    .collect()
            })
            .unwrap_or_default();

        MovieDetail {
            id: movie.id,
            title: movie.title,
            overview: movie.overview.unwrap_or_default(),
            poster_url: movie
                .poster_path
                .map(|path| format!("{}{}", self.config.image_base.trim_end_matches('/'), path)),
            trailer_candidates,
        }
    }
}

#[async_trait]
impl MetadataLookup for TmdbClient {
    async fn search(&self, query: &str) -> Result<Vec<MovieCandidate>> {
        debug!("Searching TMDB for {:?}", query);
        let response: TmdbSearchResponse = self.get_json(self.search_url(query)?).await?;
        Ok(self.candidates(response))
    }

    async fn detail(&self, id: u64) -> Result<MovieDetail> {
        debug!("Fetching TMDB detail for {}", id);
        let movie: TmdbMovieDetail = self.get_json(self.detail_url(id)?).await?;
        Ok(self.detail_from(movie))
    }
}
