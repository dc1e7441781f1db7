//! TMDB (The Movie Database) API client
//!
//! Base URL: https://api.themoviedb.org/3
//!
//! Every call is issued through the shared [`RateLimitedDispatcher`]; TMDB
//! tolerates ~40 requests per 10 seconds and the dispatcher is configured
//! just under that. This client classifies failures but never retries —
//! retry policy belongs to the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::dispatcher::RateLimitedDispatcher;
use super::provider::{
    EpisodeMetadata, ImageSet, MediaKind, MetadataProvider, ProviderError, ProviderMetadata,
    SearchHit, SeasonMetadata,
};

const TMDB_BASE_URL: &str = "https://api.themoviedb.org/3";
const IMAGE_BASE_URL: &str = "https://image.tmdb.org/t/p";

/// TMDB API client sharing the provider dispatcher
pub struct TmdbClient {
    http: reqwest::Client,
    dispatcher: Arc<RateLimitedDispatcher>,
    base_url: String,
    api_key: String,
}

/// Error body TMDB returns on non-2xx responses
#[derive(Debug, Deserialize)]
struct TmdbErrorBody {
    status_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbSearchResponse {
    results: Vec<TmdbSearchEntry>,
}

#[derive(Debug, Deserialize)]
struct TmdbSearchEntry {
    id: i64,
    // Movies carry `title`/`release_date`, TV carries `name`/`first_air_date`
    title: Option<String>,
    name: Option<String>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    overview: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TmdbGenre {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TmdbExternalIds {
    imdb_id: Option<String>,
    tvdb_id: Option<i64>,
}

/// Detail response for both movie and TV endpoints; endpoint-specific fields
/// are optional and resolved during mapping
#[derive(Debug, Deserialize)]
struct TmdbDetails {
    id: i64,
    title: Option<String>,
    name: Option<String>,
    overview: Option<String>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    vote_average: Option<f64>,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    genres: Option<Vec<TmdbGenre>>,
    number_of_seasons: Option<i32>,
    imdb_id: Option<String>,
    external_ids: Option<TmdbExternalIds>,
}

#[derive(Debug, Deserialize)]
struct TmdbSeason {
    season_number: i32,
    name: Option<String>,
    overview: Option<String>,
    air_date: Option<String>,
    poster_path: Option<String>,
    #[serde(default)]
    episodes: Vec<TmdbEpisode>,
}

#[derive(Debug, Deserialize)]
struct TmdbEpisode {
    season_number: i32,
    episode_number: i32,
    name: Option<String>,
    overview: Option<String>,
    air_date: Option<String>,
    runtime: Option<i32>,
    still_path: Option<String>,
    vote_average: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TmdbImage {
    file_path: String,
    iso_639_1: Option<String>,
    vote_average: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct TmdbImagesResponse {
    #[serde(default)]
    posters: Vec<TmdbImage>,
    #[serde(default)]
    backdrops: Vec<TmdbImage>,
    #[serde(default)]
    logos: Vec<TmdbImage>,
}

impl TmdbClient {
    pub fn new(
        api_key: String,
        dispatcher: Arc<RateLimitedDispatcher>,
        timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("Failed to create HTTP client"),
            dispatcher,
            base_url: TMDB_BASE_URL.to_string(),
            api_key,
        }
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Full image URL for a TMDB image path
    fn image_url(path: &str, size: &str) -> String {
        format!("{}/{}{}", IMAGE_BASE_URL, size, path)
    }

    fn poster_url(path: Option<&str>) -> Option<String> {
        path.map(|p| Self::image_url(p, "w500"))
    }

    fn backdrop_url(path: Option<&str>) -> Option<String> {
        path.map(|p| Self::image_url(p, "w1280"))
    }

    /// One rate-limited GET, decoded as JSON, failures classified
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ProviderError> {
        if !self.has_api_key() {
            return Err(ProviderError::MissingApiKey);
        }

        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "TMDB request");

        self.dispatcher
            .schedule(async {
                let response = self
                    .http
                    .get(&url)
                    .query(&[("api_key", self.api_key.as_str())])
                    .query(query)
                    .send()
                    .await
                    .map_err(|e| ProviderError::Network(e.to_string()))?;

                let status = response.status();
                if status.as_u16() == 404 {
                    return Err(ProviderError::NotFound);
                }
                if !status.is_success() {
                    let message = response
                        .json::<TmdbErrorBody>()
                        .await
                        .ok()
                        .and_then(|b| b.status_message)
                        .unwrap_or_else(|| status.to_string());
                    return Err(ProviderError::Provider {
                        status: status.as_u16(),
                        message,
                    });
                }

                response
                    .json::<T>()
                    .await
                    .map_err(|e| ProviderError::Decode(e.to_string()))
            })
            .await
    }

    fn kind_path(kind: MediaKind) -> &'static str {
        match kind {
            MediaKind::Movie => "movie",
            MediaKind::Show => "tv",
        }
    }
}

fn parse_date(value: Option<&str>) -> Option<NaiveDate> {
    value.and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
}

fn year_of(date: Option<&str>) -> Option<i32> {
    date.and_then(|d| d.split('-').next()).and_then(|y| y.parse().ok())
}

/// Pick the best image, preferring English-tagged variants
fn best_image(images: &[TmdbImage]) -> Option<&TmdbImage> {
    images
        .iter()
        .filter(|i| i.iso_639_1.as_deref() == Some("en"))
        .max_by(|a, b| a.vote_average.partial_cmp(&b.vote_average).unwrap_or(std::cmp::Ordering::Equal))
        .or_else(|| images.first())
}

/// Pick the best language-neutral ("textless") image
fn best_textless_image(images: &[TmdbImage]) -> Option<&TmdbImage> {
    images
        .iter()
        .filter(|i| i.iso_639_1.is_none())
        .max_by(|a, b| a.vote_average.partial_cmp(&b.vote_average).unwrap_or(std::cmp::Ordering::Equal))
}

impl TmdbDetails {
    fn into_metadata(self, kind: MediaKind) -> ProviderMetadata {
        let release = match kind {
            MediaKind::Movie => self.release_date,
            MediaKind::Show => self.first_air_date,
        };
        ProviderMetadata {
            tmdb_id: self.id,
            kind,
            title: self.title.or(self.name).unwrap_or_default(),
            overview: self.overview.filter(|o| !o.is_empty()),
            release_date: parse_date(release.as_deref()),
            rating: self.vote_average,
            genres: self
                .genres
                .unwrap_or_default()
                .into_iter()
                .map(|g| g.name)
                .collect(),
            poster_url: TmdbClient::poster_url(self.poster_path.as_deref()),
            backdrop_url: TmdbClient::backdrop_url(self.backdrop_path.as_deref()),
            logo_url: None,
            textless_poster_url: None,
            imdb_id: self
                .imdb_id
                .or_else(|| self.external_ids.as_ref().and_then(|e| e.imdb_id.clone())),
            tvdb_id: self.external_ids.as_ref().and_then(|e| e.tvdb_id),
            season_count: self.number_of_seasons,
        }
    }
}

impl From<TmdbEpisode> for EpisodeMetadata {
    fn from(ep: TmdbEpisode) -> Self {
        EpisodeMetadata {
            season_number: ep.season_number,
            episode_number: ep.episode_number,
            title: ep.name,
            overview: ep.overview.filter(|o| !o.is_empty()),
            air_date: parse_date(ep.air_date.as_deref()),
            runtime: ep.runtime,
            still_url: TmdbClient::backdrop_url(ep.still_path.as_deref()),
            rating: ep.vote_average,
        }
    }
}

#[async_trait]
impl MetadataProvider for TmdbClient {
    fn ready(&self) -> Result<(), ProviderError> {
        if self.has_api_key() {
            Ok(())
        } else {
            Err(ProviderError::MissingApiKey)
        }
    }

    async fn search(
        &self,
        kind: MediaKind,
        title: &str,
        year: Option<i32>,
    ) -> Result<Vec<SearchHit>, ProviderError> {
        info!(kind = %kind, title = %title, year = ?year, "Searching TMDB");

        let mut query = vec![
            ("query", title.to_string()),
            ("include_adult", "false".to_string()),
        ];
        if let Some(y) = year {
            let param = match kind {
                MediaKind::Movie => "year",
                MediaKind::Show => "first_air_date_year",
            };
            query.push((param, y.to_string()));
        }

        let path = format!("/search/{}", Self::kind_path(kind));
        let response: TmdbSearchResponse = self.get_json(&path, &query).await?;

        let hits = response
            .results
            .into_iter()
            .map(|r| SearchHit {
                tmdb_id: r.id,
                title: r.title.or(r.name).unwrap_or_default(),
                year: year_of(r.release_date.as_deref().or(r.first_air_date.as_deref())),
                overview: r.overview,
            })
            .collect::<Vec<_>>();

        debug!(count = hits.len(), "TMDB search returned results");
        Ok(hits)
    }

    async fn get_by_id(&self, kind: MediaKind, id: i64) -> Result<ProviderMetadata, ProviderError> {
        debug!(kind = %kind, tmdb_id = id, "Fetching TMDB details");

        let path = format!("/{}/{}", Self::kind_path(kind), id);
        let query = [("append_to_response", "external_ids".to_string())];
        let details: TmdbDetails = self.get_json(&path, &query).await?;
        Ok(details.into_metadata(kind))
    }

    async fn get_season(
        &self,
        show_id: i64,
        season_number: i32,
    ) -> Result<SeasonMetadata, ProviderError> {
        debug!(show_id = show_id, season = season_number, "Fetching TMDB season");

        let path = format!("/tv/{}/season/{}", show_id, season_number);
        let season: TmdbSeason = self.get_json(&path, &[]).await?;
        Ok(SeasonMetadata {
            season_number: season.season_number,
            title: season.name,
            overview: season.overview.filter(|o| !o.is_empty()),
            air_date: parse_date(season.air_date.as_deref()),
            poster_url: Self::poster_url(season.poster_path.as_deref()),
            episodes: season.episodes.into_iter().map(EpisodeMetadata::from).collect(),
        })
    }

    async fn get_episode(
        &self,
        show_id: i64,
        season_number: i32,
        episode_number: i32,
    ) -> Result<EpisodeMetadata, ProviderError> {
        let path = format!(
            "/tv/{}/season/{}/episode/{}",
            show_id, season_number, episode_number
        );
        let episode: TmdbEpisode = self.get_json(&path, &[]).await?;
        Ok(episode.into())
    }

    async fn get_images(&self, kind: MediaKind, id: i64) -> Result<ImageSet, ProviderError> {
        let path = format!("/{}/{}/images", Self::kind_path(kind), id);
        let images: TmdbImagesResponse = self.get_json(&path, &[]).await?;

        Ok(ImageSet {
            poster_url: best_image(&images.posters)
                .map(|i| Self::image_url(&i.file_path, "w500")),
            backdrop_url: best_image(&images.backdrops)
                .map(|i| Self::image_url(&i.file_path, "w1280")),
            logo_url: best_image(&images.logos).map(|i| Self::image_url(&i.file_path, "w500")),
            textless_poster_url: best_textless_image(&images.posters)
                .map(|i| Self::image_url(&i.file_path, "w500")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_url() {
        assert_eq!(
            TmdbClient::image_url("/abc123.jpg", "w500"),
            "https://image.tmdb.org/t/p/w500/abc123.jpg"
        );
    }

    #[test]
    fn test_textless_poster_selection() {
        let posters = vec![
            TmdbImage {
                file_path: "/en.jpg".into(),
                iso_639_1: Some("en".into()),
                vote_average: Some(8.0),
            },
            TmdbImage {
                file_path: "/neutral-low.jpg".into(),
                iso_639_1: None,
                vote_average: Some(3.0),
            },
            TmdbImage {
                file_path: "/neutral-high.jpg".into(),
                iso_639_1: None,
                vote_average: Some(6.5),
            },
        ];
        assert_eq!(best_image(&posters).unwrap().file_path, "/en.jpg");
        assert_eq!(best_textless_image(&posters).unwrap().file_path, "/neutral-high.jpg");
    }

    #[test]
    fn test_date_and_year_parsing() {
        assert_eq!(
            parse_date(Some("2023-05-15")),
            NaiveDate::from_ymd_opt(2023, 5, 15)
        );
        assert_eq!(parse_date(Some("")), None);
        assert_eq!(year_of(Some("1979-05-25")), Some(1979));
    }
}
