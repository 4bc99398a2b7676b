use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use tracing::debug;

use crate::models::{CastCredit, Genre, MediaDetails, MediaSummary, MediaType, SeasonSummary};

pub const TMDB_BASE: &str = "https://api.themoviedb.org/3";
const IMAGE_BASE: &str = "https://image.tmdb.org/t/p";
pub const POSTER_SIZE: &str = "w500";
pub const BACKDROP_SIZE: &str = "original";
const PROFILE_SIZE: &str = "w185";
const LOGO_SIZE: &str = "w500";

#[derive(Debug, thiserror::Error)]
pub enum TmdbError {
    #[error("TMDB API key is missing. Set TMDB_API_KEY in the environment or .env file.")]
    MissingApiKey,
    #[error("Invalid TMDB API key. Please check TMDB_API_KEY.")]
    InvalidApiKey,
    #[error("The requested resource was not found.")]
    NotFound,
    #[error("TMDB API Error: {status} {body}")]
    Status { status: u16, body: String },
}

/// Fixed browse lists exposed by TMDB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    TrendingMovies,
    TopRatedMovies,
    PopularMovies,
    NowPlayingMovies,
    PopularTv,
    TopRatedTv,
    TrendingTv,
    AiringTodayTv,
}

impl ListKind {
    pub fn path(&self) -> &'static str {
        match self {
            ListKind::TrendingMovies => "/trending/movie/week",
            ListKind::TopRatedMovies => "/movie/top_rated",
            ListKind::PopularMovies => "/movie/popular",
            ListKind::NowPlayingMovies => "/movie/now_playing",
            ListKind::PopularTv => "/tv/popular",
            ListKind::TopRatedTv => "/tv/top_rated",
            ListKind::TrendingTv => "/trending/tv/week",
            ListKind::AiringTodayTv => "/tv/airing_today",
        }
    }

    pub fn media_type(&self) -> MediaType {
        match self {
            ListKind::TrendingMovies
            | ListKind::TopRatedMovies
            | ListKind::PopularMovies
            | ListKind::NowPlayingMovies => MediaType::Movie,
            _ => MediaType::Tv,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchScope {
    #[default]
    Movie,
    Tv,
    Multi,
}

impl SearchScope {
    fn path(&self) -> &'static str {
        match self {
            SearchScope::Movie => "/search/movie",
            SearchScope::Tv => "/search/tv",
            SearchScope::Multi => "/search/multi",
        }
    }

    fn forced_media_type(&self) -> Option<MediaType> {
        match self {
            SearchScope::Movie => Some(MediaType::Movie),
            SearchScope::Tv => Some(MediaType::Tv),
            SearchScope::Multi => None,
        }
    }
}

#[async_trait]
pub trait TmdbApi: Send + Sync {
    async fn list(&self, kind: ListKind, page: u32) -> Result<Vec<MediaSummary>>;
    async fn genres(&self, media: MediaType) -> Result<Vec<Genre>>;
    async fn discover(&self, media: MediaType, genre_id: i64, page: u32)
        -> Result<Vec<MediaSummary>>;
    async fn search(&self, scope: SearchScope, query: &str, page: u32)
        -> Result<Vec<MediaSummary>>;
    async fn details(&self, media: MediaType, id: i64) -> Result<MediaDetails>;
    async fn credits(&self, media: MediaType, id: i64) -> Result<Vec<CastCredit>>;
    async fn similar(&self, media: MediaType, id: i64) -> Result<Vec<MediaSummary>>;
    async fn recommendations(&self, media: MediaType, id: i64) -> Result<Vec<MediaSummary>>;
    async fn watch_providers(&self, media: MediaType, id: i64) -> Result<serde_json::Value>;
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl TmdbClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(TmdbError::MissingApiKey.into());
        }
        let user_agent = format!("plotwist/{}", env!("CARGO_PKG_VERSION"));
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .user_agent(user_agent)
            .build()
            .context("Failed to build TMDB HTTP client")?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_env() -> Result<Self> {
        let api_key = env::var("TMDB_API_KEY").map_err(|_| TmdbError::MissingApiKey)?;
        let base_url = env::var("TMDB_BASE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| TMDB_BASE.to_string());
        Self::new(api_key, base_url)
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> String {
        let mut url = format!(
            "{}{}?api_key={}",
            self.base_url,
            path,
            urlencoding::encode(&self.api_key)
        );
        for (key, value) in params {
            url.push('&');
            url.push_str(key);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = self.endpoint(path, params);
        debug!("TMDB GET {}", path);
        let res = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("TMDB request to {} failed", path))?;
        let status = res.status();
        let text = res.text().await.context("reading body failed")?;
        match status {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED => return Err(TmdbError::InvalidApiKey.into()),
            StatusCode::NOT_FOUND => return Err(TmdbError::NotFound.into()),
            s => {
                return Err(TmdbError::Status {
                    status: s.as_u16(),
                    body: text,
                }
                .into())
            }
        }
        let parsed: T = serde_json::from_str(&text)
            .with_context(|| format!("JSON parse failed for {}", path))?;
        Ok(parsed)
    }

    async fn results(
        &self,
        path: &str,
        params: &[(&str, String)],
        forced: Option<MediaType>,
    ) -> Result<Vec<MediaSummary>> {
        let page: ResultsPage = self.get_json(path, params).await?;
        Ok(transform(page, forced))
    }

    async fn fetch_details_appended(&self, media: MediaType, id: i64) -> Result<DetailAppended> {
        let path = format!("/{}/{}", media.as_path(), id);
        let params = [
            ("append_to_response", "videos,credits,images".to_string()),
            ("include_image_language", "en,null".to_string()),
        ];
        self.get_json(&path, &params).await
    }

    async fn fetch_details_split(&self, media: MediaType, id: i64) -> Result<DetailAppended> {
        let base = format!("/{}/{}", media.as_path(), id);
        let videos_path = format!("{base}/videos");
        let credits_path = format!("{base}/credits");
        let (detail, videos, credits) = tokio::try_join!(
            self.get_json::<RawDetail>(&base, &[]),
            self.get_json::<Videos>(&videos_path, &[]),
            self.get_json::<RawCredits>(&credits_path, &[]),
        )?;
        Ok(DetailAppended {
            detail,
            videos: Some(videos),
            credits: Some(credits),
            images: None,
        })
    }
}

#[async_trait]
impl TmdbApi for TmdbClient {
    async fn list(&self, kind: ListKind, page: u32) -> Result<Vec<MediaSummary>> {
        self.results(
            kind.path(),
            &[("page", page.to_string())],
            Some(kind.media_type()),
        )
        .await
    }

    async fn genres(&self, media: MediaType) -> Result<Vec<Genre>> {
        #[derive(Deserialize)]
        struct GenreList {
            #[serde(default)]
            genres: Vec<Genre>,
        }

        let path = format!("/genre/{}/list", media.as_path());
        let data: GenreList = self.get_json(&path, &[]).await?;
        Ok(data.genres)
    }

    async fn discover(
        &self,
        media: MediaType,
        genre_id: i64,
        page: u32,
    ) -> Result<Vec<MediaSummary>> {
        let path = format!("/discover/{}", media.as_path());
        let params = [
            ("with_genres", genre_id.to_string()),
            ("page", page.to_string()),
        ];
        self.results(&path, &params, Some(media)).await
    }

    async fn search(
        &self,
        scope: SearchScope,
        query: &str,
        page: u32,
    ) -> Result<Vec<MediaSummary>> {
        let params = [("query", query.to_string()), ("page", page.to_string())];
        self.results(scope.path(), &params, scope.forced_media_type())
            .await
    }

    async fn details(&self, media: MediaType, id: i64) -> Result<MediaDetails> {
        // One appended request covers details, videos and credits. Any failure other
        // than not-found or a rejected key falls back to separate parallel requests.
        let appended = match self.fetch_details_appended(media, id).await {
            Ok(a) => a,
            Err(e) if is_not_found(&e) || is_auth_failure(&e) => return Err(e),
            Err(e) => {
                debug!("Appended details for {} {} failed ({}), splitting", media, id, e);
                self.fetch_details_split(media, id).await?
            }
        };
        Ok(map_details(media, appended))
    }

    async fn credits(&self, media: MediaType, id: i64) -> Result<Vec<CastCredit>> {
        let path = format!("/{}/{}/credits", media.as_path(), id);
        let credits: RawCredits = self.get_json(&path, &[]).await?;
        Ok(map_cast(credits.cast))
    }

    async fn similar(&self, media: MediaType, id: i64) -> Result<Vec<MediaSummary>> {
        let path = format!("/{}/{}/similar", media.as_path(), id);
        self.results(&path, &[], Some(media)).await
    }

    async fn recommendations(&self, media: MediaType, id: i64) -> Result<Vec<MediaSummary>> {
        let path = format!("/{}/{}/recommendations", media.as_path(), id);
        self.results(&path, &[], Some(media)).await
    }

    async fn watch_providers(&self, media: MediaType, id: i64) -> Result<serde_json::Value> {
        let path = format!("/{}/{}/watch/providers", media.as_path(), id);
        self.get_json(&path, &[]).await
    }
}

fn is_not_found(err: &anyhow::Error) -> bool {
    matches!(err.downcast_ref::<TmdbError>(), Some(TmdbError::NotFound))
}

fn is_auth_failure(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<TmdbError>(),
        Some(TmdbError::InvalidApiKey | TmdbError::MissingApiKey)
    )
}

#[derive(Debug, Deserialize)]
struct ResultsPage {
    #[serde(default)]
    results: Vec<RawResult>,
}

#[derive(Debug, Deserialize)]
struct RawResult {
    id: i64,
    title: Option<String>,
    name: Option<String>,
    #[serde(default)]
    vote_average: Option<f64>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    overview: Option<String>,
    #[serde(default)]
    genre_ids: Vec<i64>,
    media_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDetail {
    id: i64,
    title: Option<String>,
    name: Option<String>,
    tagline: Option<String>,
    overview: Option<String>,
    #[serde(default)]
    vote_average: Option<f64>,
    release_date: Option<String>,
    first_air_date: Option<String>,
    runtime: Option<i32>,
    #[serde(default)]
    episode_run_time: Vec<i32>,
    status: Option<String>,
    #[serde(default)]
    genres: Vec<Genre>,
    poster_path: Option<String>,
    backdrop_path: Option<String>,
    #[serde(default)]
    seasons: Vec<RawSeason>,
    number_of_seasons: Option<i32>,
    number_of_episodes: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct RawSeason {
    season_number: i32,
    name: Option<String>,
    episode_count: Option<i32>,
    air_date: Option<String>,
    poster_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCredits {
    #[serde(default)]
    cast: Vec<RawCast>,
}

#[derive(Debug, Deserialize)]
struct RawCast {
    id: i64,
    name: String,
    character: Option<String>,
    profile_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Videos {
    #[serde(default)]
    results: Vec<Video>,
}

#[derive(Debug, Deserialize)]
struct Video {
    site: String,
    #[serde(rename = "type")]
    video_type: String,
    key: String,
}

#[derive(Debug, Deserialize)]
struct Images {
    #[serde(default)]
    logos: Vec<ImageFile>,
}

#[derive(Debug, Deserialize)]
struct ImageFile {
    file_path: String,
}

#[derive(Debug, Deserialize)]
struct DetailAppended {
    #[serde(flatten)]
    detail: RawDetail,
    videos: Option<Videos>,
    credits: Option<RawCredits>,
    images: Option<Images>,
}

pub fn image_url(path: Option<&str>, size: &str) -> Option<String> {
    path.filter(|p| !p.is_empty())
        .map(|p| format!("{IMAGE_BASE}/{size}{p}"))
}

pub fn match_percentage(vote_average: f64) -> i32 {
    (vote_average * 10.0).floor() as i32
}

/// Year of the first date that is present and parses.
pub fn release_year(release_date: Option<&str>, first_air_date: Option<&str>) -> Option<i32> {
    release_date
        .filter(|d| !d.is_empty())
        .or(first_air_date.filter(|d| !d.is_empty()))
        .and_then(extract_year)
}

fn extract_year(date: &str) -> Option<i32> {
    date.split('-').next().and_then(|y| y.trim().parse().ok())
}

fn transform(page: ResultsPage, forced: Option<MediaType>) -> Vec<MediaSummary> {
    page.results
        .into_iter()
        .filter_map(|raw| summarize(raw, forced))
        .collect()
}

fn summarize(raw: RawResult, forced: Option<MediaType>) -> Option<MediaSummary> {
    let media_type = match forced {
        Some(m) => m,
        None => match raw.media_type.as_deref() {
            Some("movie") => MediaType::Movie,
            Some("tv") => MediaType::Tv,
            // multi-search also returns people
            Some(_) => return None,
            None if raw.title.is_some() => MediaType::Movie,
            None => MediaType::Tv,
        },
    };
    let year = release_year(raw.release_date.as_deref(), raw.first_air_date.as_deref());
    Some(MediaSummary {
        id: raw.id,
        title: raw.title.or(raw.name).unwrap_or_default(),
        match_percentage: match_percentage(raw.vote_average.unwrap_or_default()),
        year,
        image_url: image_url(raw.poster_path.as_deref(), POSTER_SIZE),
        backdrop_url: image_url(raw.backdrop_path.as_deref(), BACKDROP_SIZE),
        overview: raw.overview.unwrap_or_default(),
        genre_ids: raw.genre_ids,
        media_type,
    })
}

fn map_cast(cast: Vec<RawCast>) -> Vec<CastCredit> {
    cast.into_iter()
        .map(|c| CastCredit {
            id: c.id,
            name: c.name,
            character: c.character.filter(|s| !s.is_empty()),
            profile_url: image_url(c.profile_path.as_deref(), PROFILE_SIZE),
        })
        .collect()
}

fn map_details(media: MediaType, appended: DetailAppended) -> MediaDetails {
    let DetailAppended {
        detail,
        videos,
        credits,
        images,
    } = appended;
    let release_date = detail
        .release_date
        .clone()
        .or(detail.first_air_date.clone())
        .filter(|d| !d.is_empty());
    let runtime_minutes = detail
        .runtime
        .or_else(|| detail.episode_run_time.first().copied());
    let logo_url = images
        .as_ref()
        .and_then(|i| i.logos.first())
        .and_then(|l| image_url(Some(&l.file_path), LOGO_SIZE));
    let seasons = detail
        .seasons
        .into_iter()
        .map(|s| SeasonSummary {
            season_number: s.season_number,
            name: s
                .name
                .unwrap_or_else(|| format!("Season {}", s.season_number)),
            episode_count: s.episode_count,
            air_date: s.air_date,
            poster_url: image_url(s.poster_path.as_deref(), POSTER_SIZE),
        })
        .collect();

    MediaDetails {
        id: detail.id,
        media_type: media,
        title: detail.title.or(detail.name).unwrap_or_default(),
        tagline: detail.tagline.filter(|t| !t.is_empty()),
        overview: detail.overview.unwrap_or_default(),
        match_percentage: match_percentage(detail.vote_average.unwrap_or_default()),
        year: release_year(
            detail.release_date.as_deref(),
            detail.first_air_date.as_deref(),
        ),
        release_date,
        runtime_minutes,
        status: detail.status,
        genres: detail.genres,
        image_url: image_url(detail.poster_path.as_deref(), POSTER_SIZE),
        backdrop_url: image_url(detail.backdrop_path.as_deref(), BACKDROP_SIZE),
        logo_url,
        trailer: videos.as_ref().and_then(select_trailer),
        cast: credits.map(|c| map_cast(c.cast)).unwrap_or_default(),
        seasons,
        number_of_seasons: detail.number_of_seasons,
        number_of_episodes: detail.number_of_episodes,
    }
}

fn select_trailer(videos: &Videos) -> Option<String> {
    videos
        .results
        .iter()
        .find(|v| v.site.eq_ignore_ascii_case("YouTube") && v.video_type == "Trailer")
        .or_else(|| {
            videos
                .results
                .iter()
                .find(|v| v.site.eq_ignore_ascii_case("YouTube") && v.video_type == "Teaser")
        })
        .map(|v| format!("https://www.youtube.com/watch?v={}", v.key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn page(value: serde_json::Value) -> ResultsPage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn transform_applies_card_rules() {
        let data = page(json!({
            "results": [{
                "id": 550,
                "title": "Fight Club",
                "vote_average": 7.86,
                "release_date": "1999-10-15",
                "poster_path": "/poster.jpg",
                "backdrop_path": "/backdrop.jpg",
                "overview": "Mischief.",
                "genre_ids": [18]
            }]
        }));
        let items = transform(data, None);
        assert_eq!(items.len(), 1);
        let m = &items[0];
        assert_eq!(m.match_percentage, 78);
        assert_eq!(m.year, Some(1999));
        assert_eq!(
            m.image_url.as_deref(),
            Some("https://image.tmdb.org/t/p/w500/poster.jpg")
        );
        assert_eq!(
            m.backdrop_url.as_deref(),
            Some("https://image.tmdb.org/t/p/original/backdrop.jpg")
        );
        assert_eq!(m.media_type, MediaType::Movie);
        assert_eq!(m.genre_ids, vec![18]);
    }

    #[test]
    fn transform_falls_back_to_name_and_air_date() {
        let data = page(json!({
            "results": [{
                "id": 1399,
                "name": "Game of Thrones",
                "vote_average": 8.4,
                "first_air_date": "2011-04-17",
                "poster_path": null,
                "overview": null
            }]
        }));
        let m = &transform(data, None)[0];
        assert_eq!(m.title, "Game of Thrones");
        assert_eq!(m.year, Some(2011));
        assert_eq!(m.media_type, MediaType::Tv);
        assert!(m.image_url.is_none());
        assert!(m.genre_ids.is_empty());
        assert_eq!(m.overview, "");
    }

    #[test]
    fn multi_search_drops_people_and_honours_media_type() {
        let data = page(json!({
            "results": [
                { "id": 1, "name": "Someone", "media_type": "person" },
                { "id": 2, "name": "A Show", "media_type": "tv" },
                { "id": 3, "title": "A Film", "media_type": "movie", "release_date": "" }
            ]
        }));
        let items = transform(data, None);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].media_type, MediaType::Tv);
        assert_eq!(items[1].media_type, MediaType::Movie);
        assert_eq!(items[1].year, None);
    }

    #[test]
    fn forced_media_type_wins() {
        let data = page(json!({ "results": [{ "id": 9, "title": "Odd" }] }));
        assert_eq!(
            transform(data, Some(MediaType::Tv))[0].media_type,
            MediaType::Tv
        );
    }

    #[test]
    fn prefers_trailer_over_teaser() {
        let videos: Videos = serde_json::from_value(json!({
            "results": [
                { "site": "YouTube", "type": "Teaser", "key": "teaser" },
                { "site": "Vimeo", "type": "Trailer", "key": "vimeo" },
                { "site": "YouTube", "type": "Trailer", "key": "trailer" }
            ]
        }))
        .unwrap();
        assert_eq!(
            select_trailer(&videos).as_deref(),
            Some("https://www.youtube.com/watch?v=trailer")
        );
    }

    #[test]
    fn details_map_show_fields() {
        let appended: DetailAppended = serde_json::from_value(json!({
            "id": 1399,
            "name": "Game of Thrones",
            "overview": "Seven noble families.",
            "vote_average": 8.44,
            "first_air_date": "2011-04-17",
            "episode_run_time": [60],
            "status": "Ended",
            "genres": [{ "id": 18, "name": "Drama" }],
            "seasons": [{ "season_number": 1, "name": "Season 1", "episode_count": 10 }],
            "number_of_seasons": 8,
            "number_of_episodes": 73,
            "credits": { "cast": [{ "id": 22970, "name": "Peter Dinklage", "character": "Tyrion", "profile_path": "/p.jpg" }] },
            "videos": { "results": [] }
        }))
        .unwrap();
        let d = map_details(MediaType::Tv, appended);
        assert_eq!(d.title, "Game of Thrones");
        assert_eq!(d.match_percentage, 84);
        assert_eq!(d.year, Some(2011));
        assert_eq!(d.runtime_minutes, Some(60));
        assert_eq!(d.seasons.len(), 1);
        assert_eq!(d.number_of_episodes, Some(73));
        assert_eq!(
            d.cast[0].profile_url.as_deref(),
            Some("https://image.tmdb.org/t/p/w185/p.jpg")
        );
        assert!(d.trailer.is_none());
    }

    #[test]
    fn endpoint_encodes_params() {
        let client = TmdbClient::new("k3y", "http://localhost:9/3/").unwrap();
        let url = client.endpoint("/search/movie", &[("query", "the thing".to_string())]);
        assert_eq!(
            url,
            "http://localhost:9/3/search/movie?api_key=k3y&query=the%20thing"
        );
    }

    #[test]
    fn empty_key_is_rejected() {
        let err = TmdbClient::new("  ", TMDB_BASE).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TmdbError>(),
            Some(TmdbError::MissingApiKey)
        ));
    }
}
