use crate::auth::{Accounts, AuthError, ProfileUpdate, SessionGrant, UserProfile};
use crate::catalogue::{Catalogue, DetailPage, HomeRows, MoviesPage, TvPage};
use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::models::{CastCredit, MediaSummary, MediaType, WatchlistItem};
use crate::store::{LocalStore, SharedStore};
use crate::tmdb::{SearchScope, TmdbApi, TmdbClient};
use crate::watchlist::{Watchlist, WatchlistCounts, WatchlistFilter};
use anyhow::Result;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use axum_extra::TypedHeader;
use chrono::Utc;
use headers::{authorization::Bearer, Authorization};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{collections::HashMap, net::SocketAddr, sync::Arc};
use tokio::sync::Mutex;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024;
const PER_IP_LIMIT: u32 = 140; // per one-minute window
const MAX_RATE_LIMIT_ENTRIES: usize = 10_000;
const MAX_PAGE: u32 = 500;

#[derive(Clone)]
pub struct AppState {
    pub catalogue: Catalogue,
    pub watchlist: Watchlist,
    pub accounts: Accounts,
    pub rate_limits: Arc<Mutex<HashMap<String, WindowCounter>>>,
    pub trust_proxy_headers: bool,
}

#[derive(Clone, Debug)]
pub struct WindowCounter {
    pub window: u64,
    pub count: u32,
}

impl AppState {
    pub fn new(tmdb: Arc<dyn TmdbApi>, store: SharedStore, cache_ttl_secs: i64) -> Self {
        let watchlist = Watchlist::new(store.clone());
        Self {
            catalogue: Catalogue::new(tmdb, watchlist.clone(), cache_ttl_secs),
            watchlist,
            accounts: Accounts::new(store),
            rate_limits: Arc::new(Mutex::new(HashMap::new())),
            trust_proxy_headers: false,
        }
    }

    /// Key rate limits on `cf-connecting-ip` / `x-real-ip` / `x-forwarded-for` instead of
    /// the peer address. Only enable behind a proxy that overwrites those headers.
    pub fn with_proxy_headers(mut self, trust: bool) -> Self {
        self.trust_proxy_headers = trust;
        self
    }
}

pub async fn run_server(config: Config) -> Result<()> {
    let tmdb: Arc<dyn TmdbApi> = Arc::new(TmdbClient::from_env()?);
    let store = LocalStore::open(&config.data_path)?.shared();
    let state = AppState::new(tmdb, store, config.cache_ttl_secs)
        .with_proxy_headers(config.trust_proxy_headers);

    let app = build_router(state);

    info!("Listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/home", get(home))
        .route("/api/movies", get(movies_page))
        .route("/api/tv", get(tv_page))
        .route("/api/genres/:id/movies", get(genre_titles))
        .route("/api/movie/:id", get(movie_detail))
        .route("/api/movie/:id/credits", get(movie_credits))
        .route("/api/movie/:id/providers", get(movie_providers))
        .route("/api/movie/:id/watchlist", post(movie_watchlist_toggle))
        .route("/api/tv/:id", get(tv_detail))
        .route("/api/tv/:id/credits", get(tv_credits))
        .route("/api/tv/:id/providers", get(tv_providers))
        .route("/api/tv/:id/watchlist", post(tv_watchlist_toggle))
        .route("/api/search", get(search))
        .route(
            "/api/watchlist",
            get(list_watchlist)
                .post(add_to_watchlist)
                .delete(clear_watchlist),
        )
        .route("/api/watchlist/toggle", post(toggle_watchlist))
        .route(
            "/api/watchlist/:media/:id",
            get(watchlist_membership).delete(remove_from_watchlist),
        )
        .route("/api/auth/signup", post(sign_up))
        .route("/api/auth/signin", post(sign_in))
        .route("/api/auth/signout", post(sign_out))
        .route("/api/auth/me", get(me))
        .route("/api/auth/profile", patch(update_profile))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let ip = client_ip(&request, state.trust_proxy_headers);
    if !check_rate_limit(&state, &ip).await {
        warn!("Rate limit exceeded for {}", ip);
        return ApiError::TooManyRequests.into_response();
    }
    next.run(request).await
}

#[derive(Debug, Deserialize)]
struct GenreQuery {
    genre: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
    #[serde(rename = "type", default)]
    scope: SearchScope,
    page: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct WatchlistQuery {
    #[serde(default)]
    filter: WatchlistFilter,
}

/// `all`, empty or absent means no genre filter.
fn parse_genre(raw: Option<&str>) -> ApiResult<Option<i64>> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("all") => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("Unknown genre '{}'", s))),
    }
}

fn clamp_page(page: Option<u32>) -> u32 {
    page.unwrap_or(1).clamp(1, MAX_PAGE)
}

async fn home(State(state): State<AppState>) -> ApiResult<Json<HomeRows>> {
    let rows = state.catalogue.home().await.map_err(ApiError::catalogue)?;
    Ok(Json(rows))
}

async fn movies_page(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<GenreQuery>,
) -> ApiResult<Json<MoviesPage>> {
    let genre = parse_genre(query.genre.as_deref())?;
    let page = state
        .catalogue
        .movies_page(genre)
        .await
        .map_err(ApiError::catalogue)?;
    Ok(Json(page))
}

async fn tv_page(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<GenreQuery>,
) -> ApiResult<Json<TvPage>> {
    let genre = parse_genre(query.genre.as_deref())?;
    let page = state
        .catalogue
        .tv_page(genre)
        .await
        .map_err(ApiError::catalogue)?;
    Ok(Json(page))
}

async fn genre_titles(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> ApiResult<Json<Vec<MediaSummary>>> {
    let titles = state
        .catalogue
        .genre_titles(id, clamp_page(query.page))
        .await
        .map_err(ApiError::catalogue)?;
    Ok(Json(titles))
}

async fn detail(state: &AppState, media: MediaType, id: i64) -> ApiResult<Json<DetailPage>> {
    let page = state
        .catalogue
        .detail_page(media, id)
        .await
        .map_err(ApiError::catalogue)?;
    Ok(Json(page))
}

async fn movie_detail(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<DetailPage>> {
    detail(&state, MediaType::Movie, id).await
}

async fn tv_detail(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<DetailPage>> {
    detail(&state, MediaType::Tv, id).await
}

async fn credits(state: &AppState, media: MediaType, id: i64) -> ApiResult<Json<Vec<CastCredit>>> {
    let cast = state
        .catalogue
        .credits(media, id)
        .await
        .map_err(ApiError::catalogue)?;
    Ok(Json(cast))
}

async fn movie_credits(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Vec<CastCredit>>> {
    credits(&state, MediaType::Movie, id).await
}

async fn tv_credits(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<Vec<CastCredit>>> {
    credits(&state, MediaType::Tv, id).await
}

async fn providers(
    state: &AppState,
    media: MediaType,
    id: i64,
) -> ApiResult<Json<serde_json::Value>> {
    let data = state
        .catalogue
        .watch_providers(media, id)
        .await
        .map_err(ApiError::catalogue)?;
    Ok(Json(data))
}

async fn movie_providers(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    providers(&state, MediaType::Movie, id).await
}

async fn tv_providers(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    providers(&state, MediaType::Tv, id).await
}

async fn toggle_from_details(
    state: &AppState,
    media: MediaType,
    id: i64,
) -> ApiResult<Json<serde_json::Value>> {
    let in_watchlist = state
        .catalogue
        .toggle_watchlist(media, id)
        .await
        .map_err(ApiError::catalogue)?;
    Ok(Json(json!({ "inWatchlist": in_watchlist })))
}

async fn movie_watchlist_toggle(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    toggle_from_details(&state, MediaType::Movie, id).await
}

async fn tv_watchlist_toggle(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Json<serde_json::Value>> {
    toggle_from_details(&state, MediaType::Tv, id).await
}

async fn search(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<SearchQuery>,
) -> ApiResult<Json<Vec<MediaSummary>>> {
    let results = state
        .catalogue
        .search(&query.q, query.scope, clamp_page(query.page))
        .await
        .map_err(ApiError::catalogue)?;
    Ok(Json(results))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WatchlistView {
    items: Vec<WatchlistItem>,
    counts: WatchlistCounts,
}

async fn list_watchlist(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<WatchlistQuery>,
) -> Json<WatchlistView> {
    let items = state.watchlist.items(query.filter).await;
    let counts = state.watchlist.counts().await;
    Json(WatchlistView { items, counts })
}

async fn add_to_watchlist(
    State(state): State<AppState>,
    ApiJson(item): ApiJson<WatchlistItem>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    if state.watchlist.add(item).await? {
        Ok((StatusCode::CREATED, Json(json!({ "added": true }))))
    } else {
        Ok((StatusCode::OK, Json(json!({ "added": false }))))
    }
}

async fn toggle_watchlist(
    State(state): State<AppState>,
    ApiJson(item): ApiJson<WatchlistItem>,
) -> ApiResult<Json<serde_json::Value>> {
    let in_watchlist = state.watchlist.toggle(item).await?;
    Ok(Json(json!({ "inWatchlist": in_watchlist })))
}

async fn watchlist_membership(
    State(state): State<AppState>,
    ApiPath((media, id)): ApiPath<(MediaType, i64)>,
) -> Json<serde_json::Value> {
    let in_watchlist = state.watchlist.contains(id, media).await;
    Json(json!({ "inWatchlist": in_watchlist }))
}

async fn remove_from_watchlist(
    State(state): State<AppState>,
    ApiPath((media, id)): ApiPath<(MediaType, i64)>,
) -> ApiResult<StatusCode> {
    if state.watchlist.remove(id, media).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!(
            "{} {} is not in the watchlist",
            media, id
        )))
    }
}

async fn clear_watchlist(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.watchlist.clear().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SignUpBody {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    username: String,
}

#[derive(Debug, Deserialize)]
struct SignInBody {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

type BearerHeader = Option<TypedHeader<Authorization<Bearer>>>;

fn bearer_token(bearer: &BearerHeader) -> ApiResult<&str> {
    match bearer {
        Some(TypedHeader(Authorization(bearer))) => Ok(bearer.token()),
        None => Err(AuthError::InvalidToken.into()),
    }
}

async fn sign_up(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SignUpBody>,
) -> ApiResult<(StatusCode, Json<SessionGrant>)> {
    let user = state
        .accounts
        .sign_up(&body.email, &body.password, &body.username)
        .await?;
    Ok((StatusCode::CREATED, Json(SessionGrant::from(&user))))
}

async fn sign_in(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SignInBody>,
) -> ApiResult<Json<SessionGrant>> {
    let user = state.accounts.sign_in(&body.email, &body.password).await?;
    Ok(Json(SessionGrant::from(&user)))
}

async fn sign_out(State(state): State<AppState>, bearer: BearerHeader) -> ApiResult<StatusCode> {
    state.accounts.sign_out(bearer_token(&bearer)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn me(State(state): State<AppState>, bearer: BearerHeader) -> ApiResult<Json<UserProfile>> {
    let user = state.accounts.authorize(bearer_token(&bearer)?).await?;
    Ok(Json(UserProfile::from(&user)))
}

async fn update_profile(
    State(state): State<AppState>,
    bearer: BearerHeader,
    ApiJson(updates): ApiJson<ProfileUpdate>,
) -> ApiResult<Json<UserProfile>> {
    let user = state
        .accounts
        .update_profile(bearer_token(&bearer)?, updates)
        .await?;
    Ok(Json(UserProfile::from(&user)))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        term.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("cf-connecting-ip")
        .or_else(|| headers.get("x-real-ip"))
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
        .filter(|s| !s.is_empty())
}

fn client_ip(request: &Request, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        if let Some(ip) = forwarded_ip(request.headers()) {
            return ip;
        }
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn check_rate_limit(state: &AppState, ip: &str) -> bool {
    let window = (Utc::now().timestamp() / 60) as u64;
    let mut guards = state.rate_limits.lock().await;
    if guards.len() > MAX_RATE_LIMIT_ENTRIES {
        guards.retain(|_, v| v.window == window);
    }
    let entry = guards
        .entry(ip.to_string())
        .or_insert(WindowCounter { window, count: 0 });
    if entry.window != window {
        entry.window = window;
        entry.count = 0;
    }
    if entry.count >= PER_IP_LIMIT {
        return false;
    }
    entry.count += 1;
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genre_query_parsing() {
        assert_eq!(parse_genre(None).unwrap(), None);
        assert_eq!(parse_genre(Some("all")).unwrap(), None);
        assert_eq!(parse_genre(Some(" 28 ")).unwrap(), Some(28));
        assert!(parse_genre(Some("action")).is_err());
    }

    #[test]
    fn pages_are_clamped() {
        assert_eq!(clamp_page(None), 1);
        assert_eq!(clamp_page(Some(0)), 1);
        assert_eq!(clamp_page(Some(9_999)), MAX_PAGE);
    }

    fn request_from(peer: Option<&str>, forwarded: Option<&str>) -> Request {
        let mut request = Request::new(axum::body::Body::empty());
        if let Some(peer) = peer {
            let addr: SocketAddr = peer.parse().unwrap();
            request.extensions_mut().insert(ConnectInfo(addr));
        }
        if let Some(forwarded) = forwarded {
            request
                .headers_mut()
                .insert("x-forwarded-for", forwarded.parse().unwrap());
        }
        request
    }

    #[test]
    fn peer_address_keys_the_limit_by_default() {
        let request = request_from(Some("198.51.100.7:52000"), Some("1.2.3.4"));
        assert_eq!(client_ip(&request, false), "198.51.100.7");
        assert_eq!(client_ip(&request_from(None, None), false), "unknown");
    }

    #[test]
    fn trusted_proxy_uses_first_forwarded_hop() {
        let request = request_from(Some("10.0.0.9:40000"), Some("10.0.0.1, 172.16.0.2"));
        assert_eq!(client_ip(&request, true), "10.0.0.1");
        let direct = request_from(Some("10.0.0.9:40000"), None);
        assert_eq!(client_ip(&direct, true), "10.0.0.9");
    }
}
