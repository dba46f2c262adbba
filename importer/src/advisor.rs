//! This module provides the [ServerIndex] type, a snapshot of the assets of the server taken at the start of a
//! run, and the advice it gives about each local asset.

use {
    crate::{asset::Asset, metadata::Album},
    anyhow::Result,
    chrono::{DateTime, Duration, Utc},
    futures::TryStreamExt,
    immigrate_shared::{AssetQuery, Client, ServerAsset},
    std::{
        collections::HashMap,
        fmt::{self, Display},
    },
    tracing::{debug, info},
};

/// Capture dates closer than this are considered equal.
fn date_tolerance() -> Duration {
    Duration::minutes(5)
}

/// What to do with a local asset
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AdviceKind {
    /// Upload it
    NotOnServer,

    /// The server has this very asset
    SameOnServer,

    /// The server has a smaller copy: upload this one and delete the server's
    SmallerOnServer,

    /// The server has a bigger copy: keep it
    BetterOnServer,
}

impl Display for AdviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AdviceKind::NotOnServer => "NotOnServer",
            AdviceKind::SameOnServer => "SameOnServer",
            AdviceKind::SmallerOnServer => "SmallerOnServer",
            AdviceKind::BetterOnServer => "BetterOnServer",
        })
    }
}

/// A server asset as indexed, with the albums it belongs to
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Known {
    pub asset: ServerAsset,
    pub albums: Vec<Album>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Advice {
    pub kind: AdviceKind,
    pub message: String,

    /// The matching server asset, unless the asset is not on the server
    pub server: Option<Known>,
}

/// Format a size the way humans read it: "100 B", "1.5 KB", "2.0 MB".
pub fn format_bytes(size: u64) -> String {
    const SUFFIXES: &[&str] = &["B", "KB", "MB", "GB"];

    if size < 1024 {
        return format!("{size} B");
    }

    let mut value = size as f64;
    let mut exp = 0;

    while value >= 1024.0 && exp < SUFFIXES.len() - 1 {
        value /= 1024.0;
        exp += 1;
    }

    format!("{value:.1} {}", SUFFIXES[exp])
}

fn describe(asset: &ServerAsset) -> String {
    format!(
        "name: {:?}, date: {}, size: {}",
        asset.original_file_name,
        asset
            .capture_date()
            .map(|date| date.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "unknown".into()),
        asset
            .file_size()
            .map(format_bytes)
            .unwrap_or_else(|| "unknown".into())
    )
}

fn same_date(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    (a - b).abs() < date_tolerance()
}

/// The assets of the user on the server, by ID, by device asset ID and by lowercase file name
///
/// Assets owned by other users and assets of external libraries are left out: the importer must neither match
/// nor touch them.
#[derive(Debug, Default)]
pub struct ServerIndex {
    by_id: HashMap<String, Known>,
    by_device_id: HashMap<String, String>,
    by_name: HashMap<String, Vec<String>>,
}

impl ServerIndex {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            by_id: HashMap::with_capacity(capacity),
            by_device_id: HashMap::with_capacity(capacity),
            by_name: HashMap::with_capacity(capacity),
        }
    }

    /// Fetch every asset of the server, then the albums they belong to.
    pub async fn load(client: &dyn Client, user_id: &str) -> Result<Self> {
        let statistics = client.get_asset_statistics().await?;

        let mut index = Self::with_capacity(statistics.total as usize);
        let mut assets = client.get_all_assets(AssetQuery::default());

        while let Some(asset) = assets.try_next().await? {
            index.add(asset, user_id);
        }

        drop(assets);

        for album in client.get_all_albums().await? {
            let ids = client.get_album_asset_ids(&album.id).await?;

            debug!("server album {} holds {} assets", album.album_name, ids.len());

            let album = Album {
                title: album.album_name,
                description: album.description,
                ..Album::default()
            };

            for id in ids {
                if let Some(known) = index.by_id.get_mut(&id) {
                    known.albums.push(album.clone());
                }
            }
        }

        info!("assets on the server: {}", index.len());

        Ok(index)
    }

    /// Index `asset` if `user_id` owns it and it is not part of an external library.  Return true if indexed.
    pub fn add(&mut self, asset: ServerAsset, user_id: &str) -> bool {
        if asset.owner_id != user_id {
            debug!("skipping server asset {} of another owner", asset.id);
            return false;
        }

        if asset.library_id.as_deref().map(|id| !id.is_empty()).unwrap_or(false) {
            debug!("skipping server asset {} of an external library", asset.id);
            return false;
        }

        self.insert(Known {
            asset,
            albums: Vec::new(),
        });

        true
    }

    fn insert(&mut self, known: Known) {
        let id = known.asset.id.clone();

        self.by_device_id
            .insert(known.asset.device_asset_id.clone(), id.clone());

        self.by_name
            .entry(known.asset.original_file_name.to_lowercase())
            .or_default()
            .push(id.clone());

        self.by_id.insert(id, known);
    }

    fn remove(&mut self, id: &str) {
        if let Some(known) = self.by_id.remove(id) {
            if self.by_device_id.get(&known.asset.device_asset_id).map(String::as_str) == Some(id) {
                self.by_device_id.remove(&known.asset.device_asset_id);
            }

            if let Some(ids) = self
                .by_name
                .get_mut(&known.asset.original_file_name.to_lowercase())
            {
                ids.retain(|other| other != id);
            }
        }
    }

    /// Record that `asset` now lives on the server as `id`, so later copies in the same run are recognised.
    pub fn add_uploaded(&mut self, asset: &Asset, id: &str, replaced: Option<&str>) {
        if let Some(replaced) = replaced {
            self.remove(replaced);
        }

        let metadata = asset.metadata();

        self.insert(Known {
            asset: ServerAsset {
                id: id.to_owned(),
                device_asset_id: asset.device_asset_id(),
                original_file_name: asset.title.clone(),
                exif_info: Some(immigrate_shared::ExifInfo {
                    date_time_original: metadata.date_taken,
                    file_size_in_byte: Some(asset.size),
                    latitude: metadata.latitude,
                    longitude: metadata.longitude,
                }),
                ..ServerAsset::default()
            },
            albums: metadata.albums.clone(),
        });
    }

    pub fn get(&self, id: &str) -> Option<&Known> {
        self.by_id.get(id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Decide what to do with `asset`.  This never contacts the server.
    pub fn advise(&self, asset: &Asset) -> Advice {
        if let Some(known) = self
            .by_device_id
            .get(&asset.device_asset_id())
            .and_then(|id| self.by_id.get(id))
        {
            return Advice {
                kind: AdviceKind::SameOnServer,
                message: format!("the server has the same asset ({})", describe(&known.asset)),
                server: Some(known.clone()),
            };
        }

        let candidates = self
            .by_name
            .get(&asset.title.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or_default();

        let date = asset.capture_date();
        let mut uncertain = false;

        for known in candidates.iter().filter_map(|id| self.by_id.get(id)) {
            let (Some(date), Some(server_date), Some(server_size)) =
                (date, known.asset.capture_date(), known.asset.file_size())
            else {
                uncertain = true;
                continue;
            };

            if !same_date(date, server_date) {
                continue;
            }

            let (kind, message) = match asset.size.cmp(&server_size) {
                std::cmp::Ordering::Equal => (AdviceKind::SameOnServer, "the same"),
                std::cmp::Ordering::Greater => (AdviceKind::SmallerOnServer, "a smaller"),
                std::cmp::Ordering::Less => (AdviceKind::BetterOnServer, "a bigger"),
            };

            return Advice {
                kind,
                message: format!("the server has {message} asset ({})", describe(&known.asset)),
                server: Some(known.clone()),
            };
        }

        Advice {
            kind: AdviceKind::NotOnServer,
            message: if uncertain {
                "new asset, although the server has a file of the same name without date or size"
                    .into()
            } else {
                "new asset".into()
            },
            server: None,
        }
    }
}
