use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{MediaType, WatchlistItem};
use crate::store::{LocalStore, SharedStore};

pub const WATCHLIST_KEY: &str = "watchlist";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchlistFilter {
    #[default]
    All,
    Movie,
    Tv,
}

impl WatchlistFilter {
    fn matches(&self, item: &WatchlistItem) -> bool {
        match self {
            WatchlistFilter::All => true,
            WatchlistFilter::Movie => item.media_type == MediaType::Movie,
            WatchlistFilter::Tv => item.media_type == MediaType::Tv,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WatchlistCounts {
    pub all: usize,
    pub movie: usize,
    pub tv: usize,
}

/// Titles the user saved for later. Entries are unique on `(id, media_type)` and keep
/// insertion order.
#[derive(Clone)]
pub struct Watchlist {
    store: SharedStore,
}

fn same_title(item: &WatchlistItem, id: i64, media_type: MediaType) -> bool {
    item.id == id && item.media_type == media_type
}

fn load(store: &mut LocalStore) -> Vec<WatchlistItem> {
    store.get(WATCHLIST_KEY).unwrap_or_default()
}

impl Watchlist {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Returns false when the title was already saved.
    pub async fn add(&self, item: WatchlistItem) -> Result<bool> {
        let mut store = self.store.lock().await;
        let mut items = load(&mut store);
        if items.iter().any(|w| same_title(w, item.id, item.media_type)) {
            return Ok(false);
        }
        info!("Adding {} {} '{}' to watchlist", item.media_type, item.id, item.title);
        items.push(item);
        store.set(WATCHLIST_KEY, &items)?;
        Ok(true)
    }

    pub async fn remove(&self, id: i64, media_type: MediaType) -> Result<bool> {
        let mut store = self.store.lock().await;
        let mut items = load(&mut store);
        let before = items.len();
        items.retain(|w| !same_title(w, id, media_type));
        if items.len() == before {
            return Ok(false);
        }
        info!("Removed {} {} from watchlist", media_type, id);
        store.set(WATCHLIST_KEY, &items)?;
        Ok(true)
    }

    pub async fn contains(&self, id: i64, media_type: MediaType) -> bool {
        let mut store = self.store.lock().await;
        load(&mut store)
            .iter()
            .any(|w| same_title(w, id, media_type))
    }

    /// Flips membership and reports whether the title is saved afterwards.
    pub async fn toggle(&self, item: WatchlistItem) -> Result<bool> {
        let mut store = self.store.lock().await;
        let mut items = load(&mut store);
        let before = items.len();
        items.retain(|w| !same_title(w, item.id, item.media_type));
        let now_saved = items.len() == before;
        if now_saved {
            items.push(item);
        }
        store.set(WATCHLIST_KEY, &items)?;
        Ok(now_saved)
    }

    pub async fn clear(&self) -> Result<()> {
        let mut store = self.store.lock().await;
        info!("Clearing watchlist");
        store.set(WATCHLIST_KEY, &Vec::<WatchlistItem>::new())
    }

    pub async fn items(&self, filter: WatchlistFilter) -> Vec<WatchlistItem> {
        let mut store = self.store.lock().await;
        load(&mut store)
            .into_iter()
            .filter(|w| filter.matches(w))
            .collect()
    }

    pub async fn counts(&self) -> WatchlistCounts {
        let mut store = self.store.lock().await;
        let items = load(&mut store);
        WatchlistCounts {
            all: items.len(),
            movie: items
                .iter()
                .filter(|w| w.media_type == MediaType::Movie)
                .count(),
            tv: items.iter().filter(|w| w.media_type == MediaType::Tv).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(id: i64, media_type: MediaType) -> WatchlistItem {
        WatchlistItem {
            id,
            title: format!("Title {id}"),
            match_percentage: Some(70),
            year: Some(2020),
            image_url: None,
            media_type,
            backdrop_url: None,
            overview: None,
        }
    }

    fn watchlist() -> Watchlist {
        Watchlist::new(LocalStore::in_memory().shared())
    }

    #[tokio::test]
    async fn duplicate_add_is_rejected() {
        let list = watchlist();
        assert!(list.add(item(1, MediaType::Movie)).await.unwrap());
        assert!(!list.add(item(1, MediaType::Movie)).await.unwrap());
        assert_eq!(list.items(WatchlistFilter::All).await.len(), 1);
    }

    #[tokio::test]
    async fn same_id_different_media_type_coexist() {
        let list = watchlist();
        list.add(item(7, MediaType::Movie)).await.unwrap();
        list.add(item(7, MediaType::Tv)).await.unwrap();
        assert!(list.remove(7, MediaType::Movie).await.unwrap());
        assert!(!list.contains(7, MediaType::Movie).await);
        assert!(list.contains(7, MediaType::Tv).await);
    }

    #[tokio::test]
    async fn toggle_twice_restores_membership() {
        let list = watchlist();
        assert!(list.toggle(item(3, MediaType::Tv)).await.unwrap());
        assert!(list.contains(3, MediaType::Tv).await);
        assert!(!list.toggle(item(3, MediaType::Tv)).await.unwrap());
        assert!(!list.contains(3, MediaType::Tv).await);
    }

    #[tokio::test]
    async fn filters_and_counts() {
        let list = watchlist();
        list.add(item(1, MediaType::Movie)).await.unwrap();
        list.add(item(2, MediaType::Tv)).await.unwrap();
        list.add(item(3, MediaType::Movie)).await.unwrap();

        let movies = list.items(WatchlistFilter::Movie).await;
        assert_eq!(movies.iter().map(|w| w.id).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(
            list.counts().await,
            WatchlistCounts {
                all: 3,
                movie: 2,
                tv: 1
            }
        );

        list.clear().await.unwrap();
        assert!(list.items(WatchlistFilter::All).await.is_empty());
    }

    #[tokio::test]
    async fn removing_missing_entry_reports_false() {
        let list = watchlist();
        assert!(!list.remove(99, MediaType::Movie).await.unwrap());
    }

    #[tokio::test]
    async fn reads_entries_written_in_legacy_shape() {
        let store = LocalStore::in_memory().shared();
        store
            .lock()
            .await
            .set(
                WATCHLIST_KEY,
                &json!([{
                    "id": 603,
                    "title": "The Matrix",
                    "matchPercentage": 82,
                    "year": 1999,
                    "imageUrl": "https://image.tmdb.org/t/p/w500/m.jpg",
                    "mediaType": "movie"
                }]),
            )
            .unwrap();
        let list = Watchlist::new(store);
        assert!(list.contains(603, MediaType::Movie).await);
    }

    #[tokio::test]
    async fn corrupt_list_reads_empty() {
        let store = LocalStore::in_memory().shared();
        store.lock().await.set(WATCHLIST_KEY, &"oops").unwrap();
        let list = Watchlist::new(store);
        assert!(list.items(WatchlistFilter::All).await.is_empty());
        assert!(list.add(item(1, MediaType::Movie)).await.unwrap());
    }
}
