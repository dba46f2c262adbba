//! This module provides the album and tag caches shared by the upload workers.
//!
//! Both remember server IDs in [ServerIds], which keeps one slot per album title or tag value: two workers
//! meeting the same new album queue on its slot, so only the first creates it while the second finds its ID.

use {
    crate::metadata::{Album, Tag},
    anyhow::{anyhow, Result},
    immigrate_shared::Client,
    std::{collections::HashMap, sync::Arc},
    tokio::sync::{Mutex, RwLock},
    tracing::{info, warn},
};

/// A slot holding the server ID of one name, empty until the server knows the name
pub type IdSlot = Arc<Mutex<Option<String>>>;

/// Server IDs by album title or tag value
#[derive(Debug, Default)]
pub struct ServerIds(RwLock<HashMap<String, IdSlot>>);

impl ServerIds {
    /// Return the slot of `name`, adding an empty one the first time the name is seen.
    pub async fn slot(&self, name: &str) -> IdSlot {
        if let Some(slot) = self.0.read().await.get(name) {
            return slot.clone();
        }

        self.0
            .write()
            .await
            .entry(name.to_owned())
            .or_default()
            .clone()
    }

    /// Record that the server already knows `name` as `id`.
    pub async fn remember(&self, name: String, id: String) {
        self.0
            .write()
            .await
            .insert(name, Arc::new(Mutex::new(Some(id))));
    }

    /// Number of names seen so far, known to the server or not
    pub async fn len(&self) -> usize {
        self.0.read().await.len()
    }
}

/// What happened when adding assets to an album
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AlbumUpdate {
    Created,
    Added,
}

/// Server albums by title
#[derive(Debug, Default)]
pub struct AlbumCache {
    ids: ServerIds,
}

impl AlbumCache {
    /// Fill the cache with the albums of the server.
    pub async fn load(client: &dyn Client) -> Result<Self> {
        let cache = Self::default();

        for album in client.get_all_albums().await? {
            cache.ids.remember(album.album_name, album.id).await;
        }

        info!("albums on the server: {}", cache.ids.len().await);

        Ok(cache)
    }

    /// Add `asset_ids` to `album`, creating the album on the server if it does not exist yet.
    ///
    /// With `dry_run` set, nothing is sent: the album is only remembered as existing.
    pub async fn add(
        &self,
        client: &dyn Client,
        album: &Album,
        asset_ids: &[String],
        dry_run: bool,
    ) -> Result<AlbumUpdate> {
        let slot = self.ids.slot(&album.title).await;
        let mut id = slot.lock().await;

        if let Some(id) = id.as_ref() {
            if !dry_run {
                for result in client.add_assets_to_album(id, asset_ids).await? {
                    if !result.success {
                        warn!(
                            "unable to add {} to album {}: {}",
                            result.id,
                            album.title,
                            result.error.unwrap_or_default()
                        );
                    }
                }
            }

            return Ok(AlbumUpdate::Added);
        }

        *id = Some(if dry_run {
            String::new()
        } else {
            client
                .create_album(&album.title, &album.description, asset_ids)
                .await?
                .id
        });

        info!("created album {}", album.title);

        Ok(AlbumUpdate::Created)
    }
}

/// Server tag IDs by value
#[derive(Debug, Default)]
pub struct TagCache {
    ids: ServerIds,
}

impl TagCache {
    /// Return the ID of `tag`, creating it (and its parents) on the server if needed.
    pub async fn id(&self, client: &dyn Client, tag: &Tag, dry_run: bool) -> Result<String> {
        let slot = self.ids.slot(&tag.value).await;
        let mut id = slot.lock().await;

        if let Some(id) = id.as_ref() {
            return Ok(id.clone());
        }

        let new = if dry_run {
            String::new()
        } else {
            client
                .upsert_tags(&[tag.value.clone()])
                .await?
                .into_iter()
                .find(|server| server.value == tag.value)
                .map(|server| server.id)
                .ok_or_else(|| anyhow!("the server did not create tag {}", tag.value))?
        };

        *id = Some(new.clone());

        Ok(new)
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::upload::test::FakeServer,
        maplit::hashset,
        std::{collections::HashSet, time::Duration},
    };

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_worker_waits_for_the_first() -> Result<()> {
        let ids = Arc::new(ServerIds::default());

        let first = ids.slot("Holidays").await;
        let mut creating = first.lock().await;

        let task = tokio::spawn({
            let ids = ids.clone();
            async move { ids.slot("Holidays").await.lock().await.clone() }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());

        *creating = Some("album-1".into());
        drop(creating);

        assert_eq!(Some("album-1".to_owned()), task.await?);
        assert_eq!(1, ids.len().await);

        ids.remember("Birthday".into(), "album-2".into()).await;
        assert_eq!(
            Some("album-2".to_owned()),
            ids.slot("Birthday").await.lock().await.clone()
        );
        assert_eq!(None, ids.slot("Wedding").await.lock().await.clone());
        assert_eq!(3, ids.len().await);

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn new_album_is_created_once() -> Result<()> {
        let server = Arc::new(FakeServer::default());
        let cache = Arc::new(AlbumCache::load(server.as_ref()).await?);
        let album = Album {
            title: "Holidays".into(),
            ..Album::default()
        };

        let tasks = ["id1", "id2"].map(|id| {
            tokio::spawn({
                let server = server.clone();
                let cache = cache.clone();
                let album = album.clone();
                async move {
                    cache
                        .add(server.as_ref(), &album, &[id.to_owned()], false)
                        .await
                }
            })
        });

        let mut updates = Vec::new();
        for task in tasks {
            updates.push(task.await??);
        }
        updates.sort_by_key(|update| *update == AlbumUpdate::Added);

        assert_eq!(vec![AlbumUpdate::Created, AlbumUpdate::Added], updates);
        assert_eq!(1, server.calls("create_album"));
        assert_eq!(
            hashset!["id1".to_owned(), "id2".to_owned()],
            server
                .album("Holidays")
                .unwrap_or_default()
                .into_iter()
                .collect::<HashSet<_>>()
        );

        Ok(())
    }
}
