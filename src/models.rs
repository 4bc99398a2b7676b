use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    pub fn as_path(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_path())
    }
}

impl FromStr for MediaType {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "movie" => Ok(MediaType::Movie),
            "tv" => Ok(MediaType::Tv),
            _ => Err(anyhow::anyhow!("media type must be 'movie' or 'tv'")),
        }
    }
}

/// Card-sized view of a catalogue title, as shown in browse rows and search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSummary {
    pub id: i64,
    pub title: String,
    pub match_percentage: i32,
    pub year: Option<i32>,
    pub image_url: Option<String>,
    pub backdrop_url: Option<String>,
    pub overview: String,
    pub genre_ids: Vec<i64>,
    pub media_type: MediaType,
}

/// Entry persisted in the watchlist. Field names match what older clients wrote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchlistItem {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub match_percentage: Option<i32>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backdrop_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genre {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastCredit {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub character: Option<String>,
    #[serde(default)]
    pub profile_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonSummary {
    pub season_number: i32,
    pub name: String,
    pub episode_count: Option<i32>,
    pub air_date: Option<String>,
    pub poster_url: Option<String>,
}

/// Full record behind a detail page, normalised across movies and shows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDetails {
    pub id: i64,
    pub media_type: MediaType,
    pub title: String,
    pub tagline: Option<String>,
    pub overview: String,
    pub match_percentage: i32,
    pub year: Option<i32>,
    pub release_date: Option<String>,
    pub runtime_minutes: Option<i32>,
    pub status: Option<String>,
    pub genres: Vec<Genre>,
    pub image_url: Option<String>,
    pub backdrop_url: Option<String>,
    pub logo_url: Option<String>,
    pub trailer: Option<String>,
    pub cast: Vec<CastCredit>,
    pub seasons: Vec<SeasonSummary>,
    pub number_of_seasons: Option<i32>,
    pub number_of_episodes: Option<i32>,
}

impl MediaDetails {
    pub fn to_watchlist_item(&self) -> WatchlistItem {
        WatchlistItem {
            id: self.id,
            title: self.title.clone(),
            match_percentage: Some(self.match_percentage),
            year: self.year,
            image_url: self.image_url.clone(),
            media_type: self.media_type,
            backdrop_url: self.backdrop_url.clone(),
            overview: Some(self.overview.clone()).filter(|o| !o.is_empty()),
        }
    }
}
