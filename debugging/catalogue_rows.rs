//! Fetch a TMDB browse row or a detail record and print it as the service would serve it.
//! Usage:
//!   cargo run --bin catalogue_rows -- row <trending|top_rated|popular|now_playing|tv_popular|tv_top_rated|tv_trending|tv_airing>
//!   cargo run --bin catalogue_rows -- detail <movie|tv> <tmdb_id>
//!   cargo run --bin catalogue_rows -- search <movie|tv|multi> <query...>
//! Requires TMDB_API_KEY in the environment (.env supported).

use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use plotwist::models::MediaType;
use plotwist::tmdb::{ListKind, SearchScope, TmdbApi, TmdbClient};
use std::env;

fn parse_row(name: &str) -> Result<ListKind> {
    let kind = match name {
        "trending" => ListKind::TrendingMovies,
        "top_rated" => ListKind::TopRatedMovies,
        "popular" => ListKind::PopularMovies,
        "now_playing" => ListKind::NowPlayingMovies,
        "tv_popular" => ListKind::PopularTv,
        "tv_top_rated" => ListKind::TopRatedTv,
        "tv_trending" => ListKind::TrendingTv,
        "tv_airing" => ListKind::AiringTodayTv,
        other => bail!("unknown row '{}'", other),
    };
    Ok(kind)
}

fn parse_scope(name: &str) -> Result<SearchScope> {
    match name {
        "movie" => Ok(SearchScope::Movie),
        "tv" => Ok(SearchScope::Tv),
        "multi" => Ok(SearchScope::Multi),
        other => bail!("unknown search scope '{}'", other),
    }
}

fn usage() -> ! {
    eprintln!("Usage: cargo run --bin catalogue_rows -- row <name>");
    eprintln!("       cargo run --bin catalogue_rows -- detail <movie|tv> <tmdb_id>");
    eprintln!("       cargo run --bin catalogue_rows -- search <movie|tv|multi> <query...>");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        usage();
    }
    let client = TmdbClient::from_env()?;

    let output = match args[1].as_str() {
        "row" => {
            let kind = parse_row(&args[2])?;
            serde_json::to_value(client.list(kind, 1).await?)?
        }
        "detail" => {
            if args.len() < 4 {
                usage();
            }
            let media: MediaType = args[2].parse()?;
            let id: i64 = args[3].parse().context("tmdb_id must be a number")?;
            serde_json::to_value(client.details(media, id).await?)?
        }
        "search" => {
            if args.len() < 4 {
                usage();
            }
            let scope = parse_scope(&args[2])?;
            let query = args[3..].join(" ");
            serde_json::to_value(client.search(scope, &query, 1).await?)?
        }
        _ => usage(),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
