use anyhow::Result;
use chrono::Utc;
use futures::future::try_join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::models::{CastCredit, Genre, MediaDetails, MediaSummary, MediaType};
use crate::tmdb::{ListKind, SearchScope, TmdbApi};
use crate::watchlist::Watchlist;

/// Action, Comedy, Drama, Horror, Animation, Romance, Science Fiction.
pub const POPULAR_GENRE_IDS: [i64; 7] = [28, 35, 18, 27, 16, 10749, 878];
const MAX_GENRE_SHELVES: usize = 6;
const SHELF_SIZE: usize = 10;
const FEATURED_COUNT: usize = 3;
const TOP_BILLED: usize = 7;
const SEARCH_LIMIT: usize = 8;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturedTitle {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub backdrop: Option<String>,
    pub logo: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HomeRows {
    pub featured: Vec<FeaturedTitle>,
    pub trending: Vec<MediaSummary>,
    pub top_rated: Vec<MediaSummary>,
    pub popular: Vec<MediaSummary>,
    pub now_playing: Vec<MediaSummary>,
    pub genres: Vec<Genre>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenreShelf {
    pub id: i64,
    pub name: String,
    pub titles: Vec<MediaSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoviesPage {
    pub genres: Vec<Genre>,
    pub shelves: Vec<GenreShelf>,
    pub selected_genre: Option<i64>,
    pub titles: Vec<MediaSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TvRows {
    pub popular: Vec<MediaSummary>,
    pub top_rated: Vec<MediaSummary>,
    pub trending: Vec<MediaSummary>,
    pub airing_today: Vec<MediaSummary>,
    pub genres: Vec<Genre>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TvPage {
    #[serde(flatten)]
    pub rows: TvRows,
    pub selected_genre: Option<i64>,
    pub titles: Vec<MediaSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailPage {
    #[serde(flatten)]
    pub details: MediaDetails,
    pub in_watchlist: bool,
    pub similar: Vec<MediaSummary>,
    pub recommendations: Vec<MediaSummary>,
}

/// Single cached value that expires `ttl_secs` after it was stored.
pub struct TtlSlot<V> {
    ttl_secs: i64,
    inner: Mutex<Option<(i64, V)>>,
}

impl<V: Clone> TtlSlot<V> {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            ttl_secs,
            inner: Mutex::new(None),
        }
    }

    pub async fn get(&self) -> Option<V> {
        let now = Utc::now().timestamp();
        let guard = self.inner.lock().await;
        match guard.as_ref() {
            Some((stored_at, value)) if now - stored_at < self.ttl_secs => Some(value.clone()),
            _ => None,
        }
    }

    pub async fn put(&self, value: V) {
        let mut guard = self.inner.lock().await;
        *guard = Some((Utc::now().timestamp(), value));
    }
}

#[derive(Clone)]
pub struct Catalogue {
    tmdb: Arc<dyn TmdbApi>,
    watchlist: Watchlist,
    home_rows: Arc<TtlSlot<HomeRows>>,
    tv_rows: Arc<TtlSlot<TvRows>>,
}

impl Catalogue {
    pub fn new(tmdb: Arc<dyn TmdbApi>, watchlist: Watchlist, cache_ttl_secs: i64) -> Self {
        Self {
            tmdb,
            watchlist,
            home_rows: Arc::new(TtlSlot::new(cache_ttl_secs)),
            tv_rows: Arc::new(TtlSlot::new(cache_ttl_secs)),
        }
    }

    pub async fn home(&self) -> Result<HomeRows> {
        if let Some(rows) = self.home_rows.get().await {
            debug!("Serving home rows from cache");
            return Ok(rows);
        }

        let (trending, top_rated, popular, now_playing, genres) = tokio::try_join!(
            self.tmdb.list(ListKind::TrendingMovies, 1),
            self.tmdb.list(ListKind::TopRatedMovies, 1),
            self.tmdb.list(ListKind::PopularMovies, 1),
            self.tmdb.list(ListKind::NowPlayingMovies, 1),
            self.tmdb.genres(MediaType::Movie),
        )?;

        // A degraded banner is served but never cached.
        let (featured, complete) = match self.featured(&popular).await {
            Ok(f) => (f, true),
            Err(e) => {
                warn!("Failed to build featured banner: {:#}", e);
                (Vec::new(), false)
            }
        };

        let rows = HomeRows {
            featured,
            trending,
            top_rated,
            popular,
            now_playing,
            genres,
        };
        info!(
            "Fetched home rows ({} trending, {} popular)",
            rows.trending.len(),
            rows.popular.len()
        );
        if complete {
            self.home_rows.put(rows.clone()).await;
        }
        Ok(rows)
    }

    async fn featured(&self, popular: &[MediaSummary]) -> Result<Vec<FeaturedTitle>> {
        let lookups = popular
            .iter()
            .take(FEATURED_COUNT)
            .map(|m| self.tmdb.details(MediaType::Movie, m.id));
        let details = try_join_all(lookups).await?;
        Ok(details
            .into_iter()
            .map(|d| FeaturedTitle {
                id: d.id,
                title: d.title,
                description: d.overview,
                backdrop: d.backdrop_url,
                logo: d.logo_url,
            })
            .collect())
    }

    pub async fn movies_page(&self, genre: Option<i64>) -> Result<MoviesPage> {
        let rows = self.home().await?;

        let shelves = match self.genre_shelves(&rows.genres).await {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to fetch genre shelves: {:#}", e);
                Vec::new()
            }
        };

        let titles = match genre {
            None => rows.popular.clone(),
            Some(id) => self.tmdb.discover(MediaType::Movie, id, 1).await?,
        };

        Ok(MoviesPage {
            genres: rows.genres,
            shelves,
            selected_genre: genre,
            titles,
        })
    }

    async fn genre_shelves(&self, genres: &[Genre]) -> Result<Vec<GenreShelf>> {
        let selected: Vec<&Genre> = genres
            .iter()
            .filter(|g| POPULAR_GENRE_IDS.contains(&g.id))
            .take(MAX_GENRE_SHELVES)
            .collect();

        let lookups = selected.iter().map(|g| async move {
            let mut titles = self.tmdb.discover(MediaType::Movie, g.id, 1).await?;
            titles.truncate(SHELF_SIZE);
            Ok::<_, anyhow::Error>(GenreShelf {
                id: g.id,
                name: g.name.clone(),
                titles,
            })
        });
        try_join_all(lookups).await
    }

    pub async fn tv_page(&self, genre: Option<i64>) -> Result<TvPage> {
        let rows = match self.tv_rows.get().await {
            Some(rows) => rows,
            None => {
                let (popular, top_rated, trending, airing_today, genres) = tokio::try_join!(
                    self.tmdb.list(ListKind::PopularTv, 1),
                    self.tmdb.list(ListKind::TopRatedTv, 1),
                    self.tmdb.list(ListKind::TrendingTv, 1),
                    self.tmdb.list(ListKind::AiringTodayTv, 1),
                    self.tmdb.genres(MediaType::Tv),
                )?;
                let rows = TvRows {
                    popular,
                    top_rated,
                    trending,
                    airing_today,
                    genres,
                };
                self.tv_rows.put(rows.clone()).await;
                rows
            }
        };

        let titles = match genre {
            None => rows.popular.clone(),
            Some(id) => self.tmdb.discover(MediaType::Tv, id, 1).await?,
        };

        Ok(TvPage {
            rows,
            selected_genre: genre,
            titles,
        })
    }

    pub async fn genre_titles(&self, genre_id: i64, page: u32) -> Result<Vec<MediaSummary>> {
        self.tmdb.discover(MediaType::Movie, genre_id, page).await
    }

    pub async fn detail_page(&self, media: MediaType, id: i64) -> Result<DetailPage> {
        let (mut details, similar, recommendations) = tokio::try_join!(
            self.tmdb.details(media, id),
            self.tmdb.similar(media, id),
            self.tmdb.recommendations(media, id),
        )?;
        details.cast.truncate(TOP_BILLED);
        let in_watchlist = self.watchlist.contains(details.id, media).await;
        Ok(DetailPage {
            details,
            in_watchlist,
            similar,
            recommendations,
        })
    }

    pub async fn credits(&self, media: MediaType, id: i64) -> Result<Vec<CastCredit>> {
        self.tmdb.credits(media, id).await
    }

    pub async fn watch_providers(&self, media: MediaType, id: i64) -> Result<serde_json::Value> {
        self.tmdb.watch_providers(media, id).await
    }

    /// Flips membership for a title known only by id. A newly saved entry is built from
    /// the title's details.
    pub async fn toggle_watchlist(&self, media: MediaType, id: i64) -> Result<bool> {
        if self.watchlist.remove(id, media).await? {
            return Ok(false);
        }
        let details = self.tmdb.details(media, id).await?;
        self.watchlist.add(details.to_watchlist_item()).await?;
        Ok(true)
    }

    /// Search overlay: prefix matches on title only, capped at a handful of results.
    pub async fn search(
        &self,
        term: &str,
        scope: SearchScope,
        page: u32,
    ) -> Result<Vec<MediaSummary>> {
        if term.trim().is_empty() {
            return Ok(Vec::new());
        }
        let needle = term.to_lowercase();
        let results = self.tmdb.search(scope, term, page).await?;
        Ok(results
            .into_iter()
            .filter(|m| m.title.to_lowercase().starts_with(&needle))
            .take(SEARCH_LIMIT)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn summary(id: i64, title: &str, media_type: MediaType) -> MediaSummary {
        MediaSummary {
            id,
            title: title.to_string(),
            match_percentage: 70,
            year: Some(2020),
            image_url: None,
            backdrop_url: None,
            overview: String::new(),
            genre_ids: Vec::new(),
            media_type,
        }
    }

    fn details(id: i64, media_type: MediaType) -> MediaDetails {
        MediaDetails {
            id,
            media_type,
            title: format!("Title {id}"),
            tagline: None,
            overview: "Overview".to_string(),
            match_percentage: 75,
            year: Some(2021),
            release_date: Some("2021-03-01".to_string()),
            runtime_minutes: Some(100),
            status: Some("Released".to_string()),
            genres: Vec::new(),
            image_url: None,
            backdrop_url: Some(format!("https://image.tmdb.org/t/p/original/{id}.jpg")),
            logo_url: None,
            trailer: None,
            cast: (0..10)
                .map(|i| CastCredit {
                    id: i,
                    name: format!("Actor {i}"),
                    character: None,
                    profile_url: None,
                })
                .collect(),
            seasons: Vec::new(),
            number_of_seasons: None,
            number_of_episodes: None,
        }
    }

    #[derive(Default)]
    struct CountingTmdb {
        list_calls: AtomicUsize,
        search_calls: AtomicUsize,
        discover_calls: AtomicUsize,
        details_calls: AtomicUsize,
        failing_details: AtomicUsize,
    }

    #[async_trait]
    impl TmdbApi for CountingTmdb {
        async fn list(&self, kind: ListKind, _page: u32) -> Result<Vec<MediaSummary>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok((1..=5)
                .map(|i| summary(i, &format!("{:?} {i}", kind), kind.media_type()))
                .collect())
        }
        async fn genres(&self, _media: MediaType) -> Result<Vec<Genre>> {
            Ok([
                (12, "Adventure"),
                (28, "Action"),
                (35, "Comedy"),
                (18, "Drama"),
                (27, "Horror"),
                (16, "Animation"),
                (10749, "Romance"),
                (878, "Science Fiction"),
            ]
            .into_iter()
            .map(|(id, name)| Genre {
                id,
                name: name.to_string(),
            })
            .collect())
        }
        async fn discover(
            &self,
            media: MediaType,
            genre_id: i64,
            _page: u32,
        ) -> Result<Vec<MediaSummary>> {
            self.discover_calls.fetch_add(1, Ordering::SeqCst);
            Ok((0..20)
                .map(|i| summary(genre_id * 100 + i, "Genre pick", media))
                .collect())
        }
        async fn search(
            &self,
            _scope: SearchScope,
            _query: &str,
            _page: u32,
        ) -> Result<Vec<MediaSummary>> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            let mut results = vec![summary(1, "The Other Batman", MediaType::Movie)];
            results.extend((2..=12).map(|i| summary(i, "Batman Returns", MediaType::Movie)));
            Ok(results)
        }
        async fn details(&self, media: MediaType, id: i64) -> Result<MediaDetails> {
            self.details_calls.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failing_details
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if failing.is_ok() {
                anyhow::bail!("TMDB API Error: 500");
            }
            Ok(details(id, media))
        }
        async fn credits(&self, _media: MediaType, _id: i64) -> Result<Vec<CastCredit>> {
            Ok(Vec::new())
        }
        async fn similar(&self, media: MediaType, _id: i64) -> Result<Vec<MediaSummary>> {
            Ok(vec![summary(900, "Similar", media)])
        }
        async fn recommendations(&self, media: MediaType, _id: i64) -> Result<Vec<MediaSummary>> {
            Ok(vec![summary(901, "Recommended", media)])
        }
        async fn watch_providers(&self, _media: MediaType, _id: i64) -> Result<serde_json::Value> {
            Ok(serde_json::json!({ "results": {} }))
        }
    }

    fn catalogue(ttl: i64) -> (Catalogue, Arc<CountingTmdb>, Watchlist) {
        let tmdb = Arc::new(CountingTmdb::default());
        let watchlist = Watchlist::new(LocalStore::in_memory().shared());
        (
            Catalogue::new(tmdb.clone(), watchlist.clone(), ttl),
            tmdb,
            watchlist,
        )
    }

    #[tokio::test]
    async fn home_rows_are_cached() {
        let (catalogue, tmdb, _) = catalogue(600);
        let first = catalogue.home().await.unwrap();
        assert_eq!(first.featured.len(), 3);
        assert_eq!(first.popular.len(), 5);
        catalogue.home().await.unwrap();
        assert_eq!(tmdb.list_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn degraded_featured_banner_is_not_cached() {
        let (catalogue, tmdb, _) = catalogue(600);
        tmdb.failing_details.store(1, Ordering::SeqCst);

        let first = catalogue.home().await.unwrap();
        assert!(first.featured.is_empty());
        assert_eq!(first.popular.len(), 5);

        let second = catalogue.home().await.unwrap();
        assert_eq!(second.featured.len(), FEATURED_COUNT);
        assert_eq!(tmdb.list_calls.load(Ordering::SeqCst), 8);

        catalogue.home().await.unwrap();
        assert_eq!(tmdb.list_calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn zero_ttl_refetches() {
        let (catalogue, tmdb, _) = catalogue(0);
        catalogue.home().await.unwrap();
        catalogue.home().await.unwrap();
        assert_eq!(tmdb.list_calls.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn movie_shelves_follow_popular_genres() {
        let (catalogue, _, _) = catalogue(600);
        let page = catalogue.movies_page(None).await.unwrap();
        let ids: Vec<i64> = page.shelves.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![28, 35, 18, 27, 16, 10749]);
        assert!(page.shelves.iter().all(|s| s.titles.len() == SHELF_SIZE));
        assert_eq!(page.titles.len(), 5);
    }

    #[tokio::test]
    async fn genre_filter_uses_discover() {
        let (catalogue, _, _) = catalogue(600);
        let page = catalogue.tv_page(Some(18)).await.unwrap();
        assert_eq!(page.selected_genre, Some(18));
        assert_eq!(page.titles.len(), 20);
        assert!(page.titles.iter().all(|t| t.media_type == MediaType::Tv));
    }

    #[tokio::test]
    async fn search_keeps_prefix_matches_only() {
        let (catalogue, _, _) = catalogue(600);
        let results = catalogue
            .search("batman", SearchScope::Movie, 1)
            .await
            .unwrap();
        assert_eq!(results.len(), SEARCH_LIMIT);
        assert!(results.iter().all(|r| r.title == "Batman Returns"));
    }

    #[tokio::test]
    async fn search_term_is_matched_untrimmed() {
        let (catalogue, tmdb, _) = catalogue(600);
        let results = catalogue
            .search(" batman", SearchScope::Movie, 1)
            .await
            .unwrap();
        assert!(results.is_empty());
        assert_eq!(tmdb.search_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn blank_search_skips_api() {
        let (catalogue, tmdb, _) = catalogue(600);
        assert!(catalogue
            .search("   ", SearchScope::Multi, 1)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(tmdb.search_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn detail_page_reports_membership_and_top_cast() {
        let (catalogue, _, watchlist) = catalogue(600);
        watchlist
            .add(details(42, MediaType::Tv).to_watchlist_item())
            .await
            .unwrap();
        let page = catalogue.detail_page(MediaType::Tv, 42).await.unwrap();
        assert!(page.in_watchlist);
        assert_eq!(page.details.cast.len(), TOP_BILLED);
        assert_eq!(page.similar[0].id, 900);

        let movie = catalogue.detail_page(MediaType::Movie, 42).await.unwrap();
        assert!(!movie.in_watchlist);
    }

    #[tokio::test]
    async fn toggle_by_id_saves_details_then_removes() {
        let (catalogue, tmdb, watchlist) = catalogue(600);
        assert!(catalogue.toggle_watchlist(MediaType::Movie, 42).await.unwrap());
        let saved = watchlist.items(crate::watchlist::WatchlistFilter::All).await;
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].title, "Title 42");
        assert_eq!(saved[0].match_percentage, Some(75));
        assert_eq!(saved[0].overview.as_deref(), Some("Overview"));

        assert!(!catalogue.toggle_watchlist(MediaType::Movie, 42).await.unwrap());
        assert!(!watchlist.contains(42, MediaType::Movie).await);
        assert_eq!(tmdb.details_calls.load(Ordering::SeqCst), 1);
    }
}
