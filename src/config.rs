use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

const DEFAULT_DATA_PATH: &str = "data/plotwist.json";
const DEFAULT_ADDR: &str = "0.0.0.0:3146";
const DEFAULT_CACHE_TTL_SECS: i64 = 600;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_path: PathBuf,
    pub addr: SocketAddr,
    pub cache_ttl_secs: i64,
    pub trust_proxy_headers: bool,
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.trim().is_empty())
}

impl Config {
    /// Server settings from the environment. The TMDB key is read by the client itself.
    pub fn from_env() -> Result<Self> {
        let data_path = optional_var("PLOTWIST_DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_PATH));
        let addr = optional_var("PLOTWIST_ADDR")
            .unwrap_or_else(|| DEFAULT_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("PLOTWIST_ADDR must be a socket address like 0.0.0.0:3146")?;
        let cache_ttl_secs = match optional_var("PLOTWIST_CACHE_TTL_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .context("PLOTWIST_CACHE_TTL_SECS must be a whole number of seconds")?
                .max(0),
            None => DEFAULT_CACHE_TTL_SECS,
        };

        let trust_proxy_headers = optional_var("PLOTWIST_TRUST_PROXY")
            .map(|raw| matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        info!(
            "Config: data at {:?}, listening on {}, row cache {}s, proxy headers {}",
            data_path,
            addr,
            cache_ttl_secs,
            if trust_proxy_headers { "trusted" } else { "ignored" }
        );
        Ok(Self {
            data_path,
            addr,
            cache_ttl_secs,
            trust_proxy_headers,
        })
    }
}
