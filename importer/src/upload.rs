//! This module provides the upload coordinator: it consumes the groups a source produces, asks the
//! [ServerIndex] what to do with each asset, then uploads, upgrades or skips it before dealing with the albums,
//! stacks and tags of the group.
//!
//! Groups are handled concurrently, up to `--concurrent-uploads` at a time.  Within a group the cover goes first.

use {
    crate::{
        advisor::{AdviceKind, ServerIndex},
        asset::Asset,
        cache::{AlbumCache, AlbumUpdate, TagCache},
        events::{Event, Recorder},
        filetypes::{self, FileKind},
        filters::GroupFilters,
        groups::{Group, GroupKind},
        metadata::{Album, Tag},
        ConfigError,
    },
    anyhow::{anyhow, Result},
    chrono::{FixedOffset, Local, Offset, Utc},
    futures::{stream, StreamExt},
    immigrate_shared::{AssetType, Client, UploadRequest, UploadStatus},
    std::{
        collections::BTreeMap,
        fmt::{self, Display},
        pin::pin,
        str::FromStr,
        sync::Arc,
        time::Duration,
    },
    structopt::StructOpt,
    tokio::{
        sync::{mpsc, RwLock},
        task,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

/// Duration sent for assets whose duration is unknown
const UNKNOWN_DURATION: &str = "0:00:00.000000";

/// What to do when the server reports errors
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum OnServerErrors {
    /// Abort on the first error
    #[default]
    Stop,

    /// Never abort
    Continue,

    /// Abort on the n-th error
    Limit(u64),
}

impl OnServerErrors {
    /// Return true if `errors` errors are too many.
    pub fn exceeded(self, errors: u64) -> bool {
        match self {
            OnServerErrors::Stop => errors > 0,
            OnServerErrors::Continue => false,
            OnServerErrors::Limit(limit) => errors >= limit,
        }
    }
}

impl FromStr for OnServerErrors {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" | "stop" => Ok(OnServerErrors::Stop),
            "continue" => Ok(OnServerErrors::Continue),
            other => match other.parse::<u64>() {
                Ok(0) => Ok(OnServerErrors::Continue),
                Ok(limit) => Ok(OnServerErrors::Limit(limit)),
                Err(_) => Err(ConfigError::InvalidValue {
                    flag: "on-server-errors",
                    value: s.to_owned(),
                }),
            },
        }
    }
}

impl Display for OnServerErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OnServerErrors::Stop => f.write_str("stop"),
            OnServerErrors::Continue => f.write_str("continue"),
            OnServerErrors::Limit(limit) => write!(f, "{limit}"),
        }
    }
}

/// Time zone given on the command line: "local", "UTC", or an offset such as "+02:00"
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TimeZoneArg(pub FixedOffset);

impl Default for TimeZoneArg {
    fn default() -> Self {
        Self(Local::now().offset().fix())
    }
}

impl FromStr for TimeZoneArg {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidValue {
            flag: "time-zone",
            value: s.to_owned(),
        };

        match s.to_lowercase().as_str() {
            "" | "local" => return Ok(Self::default()),
            "utc" | "z" => return Ok(Self(Utc.fix())),
            _ => (),
        }

        let (sign, rest) = if let Some(rest) = s.strip_prefix('+') {
            (1, rest)
        } else if let Some(rest) = s.strip_prefix('-') {
            (-1, rest)
        } else {
            return Err(invalid());
        };

        let (hours, minutes) = rest.split_once(':').unwrap_or((rest, "0"));
        let hours = hours.parse::<i32>().map_err(|_| invalid())?;
        let minutes = minutes.parse::<i32>().map_err(|_| invalid())?;

        if hours > 14 || minutes > 59 {
            return Err(invalid());
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(Self)
            .ok_or_else(invalid)
    }
}

/// Server connection and upload flags, shared by every import command
#[derive(StructOpt, Debug, Clone)]
pub struct ServerOptions {
    /// Address of the Immich server, e.g. http://localhost:2283
    #[structopt(short, long, env = "IMMICH_SERVER", default_value = "")]
    pub server: String,

    /// API key of the user to import for
    #[structopt(
        short = "k",
        long,
        env = "IMMICH_API_KEY",
        hide_env_values = true,
        default_value = ""
    )]
    pub api_key: String,

    /// Timeout of server calls, in seconds
    #[structopt(long, default_value = "1200")]
    pub client_timeout: u64,

    /// Number of groups uploaded at the same time
    #[structopt(long, default_value = "3")]
    pub concurrent_uploads: usize,

    /// What to do on server errors: stop, continue, or the number of errors to tolerate
    #[structopt(long, default_value = "stop")]
    pub on_server_errors: OnServerErrors,

    /// Do everything but change the server
    #[structopt(long)]
    pub dry_run: bool,

    /// Device ID given to uploaded assets
    #[structopt(long, default_value = "immigrate")]
    pub device_id: String,

    /// Tag assets with "{immigrate}/<start of the run>"
    #[structopt(long)]
    pub session_tag: bool,

    /// Tag every asset with this tag, e.g. "Holidays/2024"; may be repeated
    #[structopt(long = "tag", number_of_values = 1)]
    pub tags: Vec<String>,

    /// Time zone of dates found without one: local, UTC or an offset such as +02:00
    #[structopt(long, default_value = "local")]
    pub time_zone: TimeZoneArg,
}

impl ServerOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout)
    }
}

/// Build the upload request of `asset`, extracting it from its source if needed.
///
/// This blocks; call it from `task::block_in_place`.
pub fn upload_request(asset: &mut Asset, device_id: &str) -> Result<UploadRequest> {
    let file_path = asset.local_path()?;

    let sidecar_path = asset.sidecar.as_ref().and_then(|sidecar| {
        let path = sidecar.fs.local_path(&sidecar.path);

        if path.is_none() {
            debug!("sidecar {sidecar} is not a local file, not sending it");
        }

        path
    });

    let metadata = asset.metadata();
    let created = asset
        .capture_date()
        .or(asset.modified)
        .unwrap_or_else(Utc::now);

    Ok(UploadRequest {
        device_asset_id: asset.device_asset_id(),
        device_id: device_id.to_owned(),
        asset_type: match asset.kind {
            FileKind::Image => AssetType::Image,
            FileKind::Video => AssetType::Video,
            _ => AssetType::Other,
        },
        file_created_at: created,
        file_modified_at: asset.modified.unwrap_or(created),
        is_favorite: metadata.favorited,
        is_archived: metadata.archived,
        is_read_only: false,
        file_extension: filetypes::extension(&asset.title).to_owned(),
        duration: UNKNOWN_DURATION.to_owned(),
        file_name: asset.title.clone(),
        file_path,
        sidecar_path,
    })
}

/// Settings of the coordinator
#[derive(Debug, Clone)]
pub struct UploadSettings {
    pub concurrent_uploads: usize,
    pub on_server_errors: OnServerErrors,
    pub dry_run: bool,
    pub device_id: String,
    pub group_filters: GroupFilters,
}

impl UploadSettings {
    pub fn new(options: &ServerOptions, group_filters: GroupFilters) -> Self {
        Self {
            concurrent_uploads: options.concurrent_uploads.clamp(1, 20),
            on_server_errors: options.on_server_errors,
            dry_run: options.dry_run,
            device_id: options.device_id.clone(),
            group_filters,
        }
    }
}

/// Drives the uploads of a run
pub struct Uploader {
    client: Arc<dyn Client>,
    settings: UploadSettings,
    recorder: Arc<Recorder>,
    cancel: CancellationToken,
    index: RwLock<ServerIndex>,
    albums: AlbumCache,
    tags: TagCache,
}

impl Uploader {
    pub fn new(
        client: Arc<dyn Client>,
        settings: UploadSettings,
        recorder: Arc<Recorder>,
        cancel: CancellationToken,
        index: ServerIndex,
        albums: AlbumCache,
    ) -> Self {
        Self {
            client,
            settings,
            recorder,
            cancel,
            index: RwLock::new(index),
            albums,
            tags: TagCache::default(),
        }
    }

    /// Handle every group received on `groups`, stopping early if the error policy says so.
    pub async fn run(self: Arc<Self>, groups: mpsc::Receiver<Group>) -> Result<()> {
        let concurrency = self.settings.concurrent_uploads;

        let mut results = pin!(stream::unfold(groups, |mut groups| async move {
            groups.recv().await.map(|group| (group, groups))
        })
        .map(|group| {
            let uploader = self.clone();
            async move { uploader.handle_group(group).await }
        })
        .buffer_unordered(concurrency));

        let mut errors = 0;

        loop {
            let result = tokio::select! {
                result = results.next() => result,
                _ = self.cancel.cancelled() => return Err(anyhow!("cancelled")),
            };

            let Some(result) = result else {
                break;
            };

            if let Err(e) = result {
                errors += 1;
                error!("{e:?}");

                if self.settings.on_server_errors.exceeded(errors) {
                    self.cancel.cancel();
                    return Err(anyhow!("too many server errors ({errors}), aborting"));
                }
            }
        }

        Ok(())
    }

    /// Handle one group: filters, then each asset, then albums, stack and tags.
    pub async fn handle_group(&self, mut group: Group) -> Result<()> {
        self.settings.group_filters.apply(&mut group);

        for removed in group.take_removed() {
            self.recorder.record(
                Event::UploadNotSelected,
                &removed.asset.file,
                &removed.reason,
            );
        }

        let mut first_error = None;
        let mut inherited = Vec::with_capacity(group.assets.len());

        for asset in &mut group.assets {
            match self.handle_asset(asset).await {
                Ok(albums) => inherited.push(albums),
                Err(e) => {
                    inherited.push(Vec::new());
                    first_error.get_or_insert(e);
                }
            }
        }

        self.manage_albums(&group, &inherited).await;
        self.manage_stack(&group).await;
        self.manage_tags(&group).await;

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Upload, upgrade or skip `asset`, setting its ID.  Return the albums of the server copy it replaces.
    async fn handle_asset(&self, asset: &mut Asset) -> Result<Vec<Album>> {
        let advice = self.index.read().await.advise(asset);

        debug!("{}: {}: {}", asset.file, advice.kind, advice.message);

        match (advice.kind, advice.server) {
            (AdviceKind::SmallerOnServer, Some(server)) => {
                self.upload(asset, Some(&server.asset.id)).await?;

                if !self.settings.dry_run {
                    if let Err(e) = self
                        .client
                        .delete_assets(&[server.asset.id.clone()], true)
                        .await
                    {
                        warn!("unable to delete {}: {e:?}", server.asset.id);
                    }
                }

                Ok(server.albums)
            }

            (AdviceKind::SameOnServer, Some(server)) => {
                asset.id = Some(server.asset.id.clone());
                self.recorder
                    .record(Event::UploadServerDuplicate, &asset.file, &advice.message);
                Ok(server.albums)
            }

            (AdviceKind::BetterOnServer, Some(server)) => {
                asset.id = Some(server.asset.id.clone());
                self.recorder
                    .record(Event::UploadServerBetter, &asset.file, &advice.message);
                Ok(Vec::new())
            }

            _ => {
                self.upload(asset, None).await?;
                Ok(Vec::new())
            }
        }
    }

    async fn upload(&self, asset: &mut Asset, replacing: Option<&str>) -> Result<()> {
        let (id, status) = if self.settings.dry_run {
            (format!("dry-run:{}", asset.device_asset_id()), UploadStatus::Created)
        } else {
            let request = match task::block_in_place(|| {
                upload_request(asset, &self.settings.device_id)
            }) {
                Ok(request) => request,
                Err(e) => {
                    self.recorder
                        .record(Event::Error, &asset.file, &format!("{e:?}"));
                    return Err(e);
                }
            };

            match self.client.asset_upload(&request).await {
                Ok(response) => (response.id, response.status),
                Err(e) => {
                    self.recorder
                        .record(Event::UploadServerError, &asset.file, &format!("{e}"));
                    return Err(anyhow!("unable to upload {}: {e}", asset.file));
                }
            }
        };

        asset.close();

        match (status, replacing) {
            (UploadStatus::Duplicate, _) => self.recorder.record(
                Event::UploadServerDuplicate,
                &asset.file,
                "the server already has this file",
            ),
            (_, Some(_)) => self.recorder.record(Event::UploadUpgraded, &asset.file, ""),
            (_, None) => self.recorder.record(Event::Uploaded, &asset.file, ""),
        }

        self.index.write().await.add_uploaded(asset, &id, replacing);

        asset.id = Some(id);

        Ok(())
    }

    async fn manage_albums(&self, group: &Group, inherited: &[Vec<Album>]) {
        let mut albums = BTreeMap::<String, (Album, Vec<&Asset>)>::new();

        for (asset, inherited) in group.assets.iter().zip(inherited) {
            if asset.id.is_none() {
                continue;
            }

            let all = asset
                .metadata()
                .albums
                .iter()
                .chain(&group.albums)
                .chain(inherited);

            for album in all.filter(|album| !album.title.is_empty()) {
                let (_, members) = albums
                    .entry(album.title.clone())
                    .or_insert_with(|| (album.clone(), Vec::new()));

                if !members.iter().any(|member| member.id == asset.id) {
                    members.push(asset);
                }
            }
        }

        for (album, members) in albums.values() {
            let ids = members
                .iter()
                .filter_map(|asset| asset.id.clone())
                .collect::<Vec<_>>();

            match self
                .albums
                .add(self.client.as_ref(), album, &ids, self.settings.dry_run)
                .await
            {
                Ok(update) => {
                    if update == AlbumUpdate::Created {
                        self.recorder
                            .record(Event::UploadAlbumCreated, &album.title, "");
                    }

                    for asset in members {
                        self.recorder
                            .record(Event::UploadAddToAlbum, &asset.file, &album.title);
                    }
                }
                Err(e) => {
                    warn!("unable to update album {}: {e:?}", album.title);
                    self.recorder
                        .record(Event::Error, &album.title, &format!("{e}"));
                }
            }
        }
    }

    async fn manage_stack(&self, group: &Group) {
        if group.kind == GroupKind::None || group.assets.len() < 2 {
            return;
        }

        let ids = group
            .assets
            .iter()
            .filter_map(|asset| asset.id.clone())
            .collect::<Vec<_>>();

        if ids.len() < 2 {
            return;
        }

        if !self.settings.dry_run {
            if let Err(e) = self.client.create_stack(&ids).await {
                warn!("unable to stack {:?}: {e:?}", ids);
                return;
            }
        }

        for asset in &group.assets {
            self.recorder
                .record(Event::Stacked, &asset.file, &group.kind.to_string());
        }
    }

    async fn manage_tags(&self, group: &Group) {
        for asset in &group.assets {
            let Some(id) = &asset.id else {
                continue;
            };

            let mut tags = Vec::<&Tag>::new();

            for tag in asset.metadata().tags.iter().chain(&group.tags) {
                if !tag.value.is_empty() && !tags.contains(&tag) {
                    tags.push(tag);
                }
            }

            for tag in tags {
                if let Err(e) = self.tag(tag, id).await {
                    warn!("unable to tag {} with {}: {e:?}", asset.file, tag.value);
                    self.recorder
                        .record(Event::Error, &asset.file, &format!("tag {}: {e}", tag.value));
                    continue;
                }

                self.recorder.record(Event::Tagged, &asset.file, &tag.value);
            }
        }
    }

    async fn tag(&self, tag: &Tag, asset_id: &str) -> Result<()> {
        let tag_id = self
            .tags
            .id(self.client.as_ref(), tag, self.settings.dry_run)
            .await?;

        if !self.settings.dry_run {
            for result in self
                .client
                .tag_assets(&tag_id, &[asset_id.to_owned()])
                .await?
            {
                if !result.success {
                    return Err(anyhow!(
                        "{}",
                        result.error.unwrap_or_else(|| "unknown error".into())
                    ));
                }
            }
        }

        Ok(())
    }

    /// Log the totals of the run.
    pub fn summary(&self) {
        info!(
            "uploaded: {}, upgraded: {}, already on the server: {}, errors: {}",
            self.recorder.count(Event::Uploaded),
            self.recorder.count(Event::UploadUpgraded),
            self.recorder.count(Event::UploadServerDuplicate)
                + self.recorder.count(Event::UploadServerBetter),
            self.recorder.errors()
        );
    }
}

#[cfg(test)]
pub(crate) mod test {
    use {
        super::*,
        crate::{
            asset::FileRef,
            filetypes::Registry,
            fsys::{DirFs, SourceFs},
            metadata::Metadata,
            names::NameAnalyser,
        },
        async_trait::async_trait,
        chrono::{DateTime, TimeZone},
        futures::stream::BoxStream,
        immigrate_shared::{
            Album as ServerAlbum, AssetQuery, AssetStatistics, ExifInfo, ServerAsset,
            SupportedMedia, Tag as ServerTag, UpdateResult, UploadResponse, User,
        },
        std::{fs, path::Path, sync::Mutex},
        tempfile::TempDir,
    };

    /// In-memory server recording every call it receives
    #[derive(Default)]
    pub struct FakeServer {
        pub assets: Mutex<Vec<ServerAsset>>,
        pub albums: Mutex<Vec<(ServerAlbum, Vec<String>)>>,
        pub tags: Mutex<Vec<(ServerTag, Vec<String>)>>,
        pub stacks: Mutex<Vec<Vec<String>>>,
        pub deleted: Mutex<Vec<String>>,
        pub calls: Mutex<Vec<String>>,

        /// Number of uploads to fail before accepting them
        pub failures: Mutex<usize>,
    }

    impl FakeServer {
        fn call(&self, name: &str) {
            self.calls.lock().unwrap().push(name.to_owned());
        }

        pub fn calls(&self, name: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|call| *call == name)
                .count()
        }

        pub fn album(&self, title: &str) -> Option<Vec<String>> {
            self.albums
                .lock()
                .unwrap()
                .iter()
                .find(|(album, _)| album.album_name == title)
                .map(|(_, ids)| ids.clone())
        }
    }

    #[async_trait]
    impl Client for FakeServer {
        async fn ping_server(&self) -> Result<()> {
            self.call("ping_server");
            Ok(())
        }

        async fn validate_connection(&self) -> Result<User> {
            self.call("validate_connection");
            Ok(User {
                id: "me".into(),
                email: "me@example.com".into(),
                name: "Me".into(),
            })
        }

        async fn get_supported_media_types(&self) -> Result<SupportedMedia> {
            self.call("get_supported_media_types");
            Ok(SupportedMedia {
                image: vec![".jpg".into(), ".jpeg".into(), ".heic".into(), ".dng".into()],
                video: vec![".mp4".into(), ".mov".into()],
                sidecar: vec![".xmp".into()],
            })
        }

        async fn get_asset_statistics(&self) -> Result<AssetStatistics> {
            self.call("get_asset_statistics");
            let total = self.assets.lock().unwrap().len() as u64;
            Ok(AssetStatistics {
                images: total,
                videos: 0,
                total,
            })
        }

        fn get_all_assets(&self, _query: AssetQuery) -> BoxStream<'_, Result<ServerAsset>> {
            self.call("get_all_assets");
            let assets = self.assets.lock().unwrap().clone();
            stream::iter(assets.into_iter().map(Ok)).boxed()
        }

        async fn get_all_albums(&self) -> Result<Vec<ServerAlbum>> {
            self.call("get_all_albums");
            Ok(self
                .albums
                .lock()
                .unwrap()
                .iter()
                .map(|(album, _)| album.clone())
                .collect())
        }

        async fn get_album_asset_ids(&self, album_id: &str) -> Result<Vec<String>> {
            self.call("get_album_asset_ids");
            Ok(self
                .albums
                .lock()
                .unwrap()
                .iter()
                .find(|(album, _)| album.id == album_id)
                .map(|(_, ids)| ids.clone())
                .unwrap_or_default())
        }

        async fn asset_upload(&self, request: &UploadRequest) -> Result<UploadResponse> {
            self.call("asset_upload");

            {
                let mut failures = self.failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(immigrate_shared::ClientError::Http {
                        status: 500,
                        message: "boom".into(),
                    }
                    .into());
                }
            }

            let size = fs::metadata(&request.file_path)?.len();
            let mut assets = self.assets.lock().unwrap();
            let id = format!("id{}", assets.len() + 1);

            assets.push(ServerAsset {
                id: id.clone(),
                device_asset_id: request.device_asset_id.clone(),
                owner_id: "me".into(),
                original_file_name: request.wire_file_name(),
                exif_info: Some(ExifInfo {
                    date_time_original: Some(request.file_created_at),
                    file_size_in_byte: Some(size),
                    ..ExifInfo::default()
                }),
                ..ServerAsset::default()
            });

            Ok(UploadResponse {
                id,
                status: UploadStatus::Created,
            })
        }

        async fn delete_assets(&self, ids: &[String], _force: bool) -> Result<()> {
            self.call("delete_assets");
            self.deleted.lock().unwrap().extend(ids.iter().cloned());
            self.assets
                .lock()
                .unwrap()
                .retain(|asset| !ids.contains(&asset.id));
            Ok(())
        }

        async fn create_album(
            &self,
            title: &str,
            description: &str,
            asset_ids: &[String],
        ) -> Result<ServerAlbum> {
            self.call("create_album");
            let mut albums = self.albums.lock().unwrap();
            let album = ServerAlbum {
                id: format!("album{}", albums.len() + 1),
                album_name: title.into(),
                description: description.into(),
                asset_count: asset_ids.len() as u64,
            };
            albums.push((album.clone(), asset_ids.to_vec()));
            Ok(album)
        }

        async fn add_assets_to_album(
            &self,
            album_id: &str,
            asset_ids: &[String],
        ) -> Result<Vec<UpdateResult>> {
            self.call("add_assets_to_album");
            let mut albums = self.albums.lock().unwrap();
            let (_, ids) = albums
                .iter_mut()
                .find(|(album, _)| album.id == album_id)
                .ok_or_else(|| anyhow!("no album {album_id}"))?;

            Ok(asset_ids
                .iter()
                .map(|id| {
                    if !ids.contains(id) {
                        ids.push(id.clone());
                    }
                    UpdateResult {
                        id: id.clone(),
                        success: true,
                        error: None,
                    }
                })
                .collect())
        }

        async fn upsert_tags(&self, values: &[String]) -> Result<Vec<ServerTag>> {
            self.call("upsert_tags");
            let mut tags = self.tags.lock().unwrap();

            Ok(values
                .iter()
                .map(|value| {
                    if let Some((tag, _)) = tags.iter().find(|(tag, _)| &tag.value == value) {
                        return tag.clone();
                    }
                    let tag = ServerTag {
                        id: format!("tag{}", tags.len() + 1),
                        name: value.rsplit('/').next().unwrap_or(value).into(),
                        value: value.clone(),
                    };
                    tags.push((tag.clone(), Vec::new()));
                    tag
                })
                .collect())
        }

        async fn tag_assets(
            &self,
            tag_id: &str,
            asset_ids: &[String],
        ) -> Result<Vec<UpdateResult>> {
            self.call("tag_assets");
            let mut tags = self.tags.lock().unwrap();
            let (_, ids) = tags
                .iter_mut()
                .find(|(tag, _)| tag.id == tag_id)
                .ok_or_else(|| anyhow!("no tag {tag_id}"))?;
            ids.extend(asset_ids.iter().cloned());

            Ok(asset_ids
                .iter()
                .map(|id| UpdateResult {
                    id: id.clone(),
                    success: true,
                    error: None,
                })
                .collect())
        }

        async fn create_stack(&self, asset_ids: &[String]) -> Result<String> {
            self.call("create_stack");
            let mut stacks = self.stacks.lock().unwrap();
            stacks.push(asset_ids.to_vec());
            Ok(format!("stack{}", stacks.len()))
        }
    }

    fn taken() -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap())
    }

    fn local(fs: &Arc<dyn SourceFs>, name: &str, size: u64, kind: FileKind) -> Asset {
        let analyser = NameAnalyser::new(
            FixedOffset::east_opt(0).unwrap(),
            Arc::new(Registry::default()),
        );

        let mut asset = Asset::new(FileRef::new(fs.clone(), name), size, kind, analyser.info(name));

        asset.from_sidecar = Some(Metadata {
            date_taken: taken(),
            albums: vec![Album::named("Holidays")],
            tags: vec![Tag::new("Trips/Sea")],
            ..Metadata::default()
        });

        asset
    }

    fn write(root: &Path, name: &str, size: usize) -> Result<()> {
        fs::write(root.join(name), vec![b'x'; size])?;
        Ok(())
    }

    fn uploader(
        server: &Arc<FakeServer>,
        settings: UploadSettings,
        index: ServerIndex,
    ) -> Uploader {
        Uploader::new(
            server.clone(),
            settings,
            Arc::new(Recorder::new()),
            CancellationToken::new(),
            index,
            AlbumCache::default(),
        )
    }

    fn settings() -> UploadSettings {
        UploadSettings {
            concurrent_uploads: 2,
            on_server_errors: OnServerErrors::Continue,
            dry_run: false,
            device_id: "test".into(),
            group_filters: GroupFilters::default(),
        }
    }

    #[test]
    fn flags() -> Result<()> {
        assert_eq!(OnServerErrors::Stop, "stop".parse()?);
        assert_eq!(OnServerErrors::Continue, "Continue".parse()?);
        assert_eq!(OnServerErrors::Limit(3), "3".parse()?);
        assert!("often".parse::<OnServerErrors>().is_err());

        assert!(OnServerErrors::Stop.exceeded(1));
        assert!(!OnServerErrors::Continue.exceeded(100));
        assert!(!OnServerErrors::Limit(3).exceeded(2));
        assert!(OnServerErrors::Limit(3).exceeded(3));

        assert_eq!(
            FixedOffset::east_opt(2 * 3600).unwrap(),
            "+02:00".parse::<TimeZoneArg>()?.0
        );
        assert_eq!(
            FixedOffset::west_opt(5 * 3600 + 30 * 60).unwrap(),
            "-05:30".parse::<TimeZoneArg>()?.0
        );
        assert_eq!(Utc.fix(), "UTC".parse::<TimeZoneArg>()?.0);
        assert!("Mars/Olympus".parse::<TimeZoneArg>().is_err());

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn uploads_albums_stacks_and_tags() -> Result<()> {
        let tmp = TempDir::new()?;
        write(tmp.path(), "IMG_0001.HEIC", 10)?;
        write(tmp.path(), "IMG_0001.MOV", 20)?;
        let fs: Arc<dyn SourceFs> = Arc::new(DirFs::new(tmp.path()));

        let server = Arc::new(FakeServer::default());
        let uploader = uploader(&server, settings(), ServerIndex::default());

        let group = Group::new(
            GroupKind::LivePhoto,
            vec![
                local(&fs, "IMG_0001.HEIC", 10, FileKind::Image),
                local(&fs, "IMG_0001.MOV", 20, FileKind::Video),
            ],
            0,
        );

        uploader.handle_group(group).await?;

        assert_eq!(2, uploader.recorder.count(Event::Uploaded));
        assert_eq!(1, uploader.recorder.count(Event::UploadAlbumCreated));
        assert_eq!(2, uploader.recorder.count(Event::UploadAddToAlbum));
        assert_eq!(2, uploader.recorder.count(Event::Stacked));
        assert_eq!(2, uploader.recorder.count(Event::Tagged));

        assert_eq!(Some(vec!["id1".to_owned(), "id2".to_owned()]), server.album("Holidays"));
        assert_eq!(vec![vec!["id1".to_owned(), "id2".to_owned()]], *server.stacks.lock().unwrap());
        assert_eq!(1, server.calls("upsert_tags"));
        assert_eq!(2, server.tags.lock().unwrap()[0].1.len());

        // a second run finds everything on the server
        let again = Uploader::new(
            server.clone(),
            settings(),
            Arc::new(Recorder::new()),
            CancellationToken::new(),
            ServerIndex::load(server.as_ref(), "me").await?,
            AlbumCache::load(server.as_ref()).await?,
        );

        again
            .handle_group(Group::single(local(&fs, "IMG_0001.HEIC", 10, FileKind::Image)))
            .await?;

        assert_eq!(0, again.recorder.count(Event::Uploaded));
        assert_eq!(1, again.recorder.count(Event::UploadServerDuplicate));
        assert_eq!(2, server.calls("asset_upload"));
        assert_eq!(1, server.calls("add_assets_to_album"));

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn upgrades_replace_the_server_copy() -> Result<()> {
        let tmp = TempDir::new()?;
        write(tmp.path(), "IMG.jpg", 200)?;
        let fs: Arc<dyn SourceFs> = Arc::new(DirFs::new(tmp.path()));

        let server = Arc::new(FakeServer::default());
        server.assets.lock().unwrap().push(ServerAsset {
            id: "small".into(),
            device_asset_id: "phone-IMG.jpg".into(),
            owner_id: "me".into(),
            original_file_name: "IMG.jpg".into(),
            exif_info: Some(ExifInfo {
                date_time_original: taken(),
                file_size_in_byte: Some(100),
                ..ExifInfo::default()
            }),
            ..ServerAsset::default()
        });
        server.albums.lock().unwrap().push((
            ServerAlbum {
                id: "album1".into(),
                album_name: "Family".into(),
                ..ServerAlbum::default()
            },
            vec!["small".into()],
        ));

        let index = ServerIndex::load(server.as_ref(), "me").await?;
        let albums = AlbumCache::load(server.as_ref()).await?;

        let uploader = Uploader::new(
            server.clone(),
            settings(),
            Arc::new(Recorder::new()),
            CancellationToken::new(),
            index,
            albums,
        );

        uploader
            .handle_group(Group::single(local(&fs, "IMG.jpg", 200, FileKind::Image)))
            .await?;

        assert_eq!(1, uploader.recorder.count(Event::UploadUpgraded));
        assert_eq!(vec!["small".to_owned()], *server.deleted.lock().unwrap());

        let family = server.album("Family").unwrap_or_default();
        assert!(family.contains(&"id2".to_owned()));

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn error_policy_and_dry_run() -> Result<()> {
        let tmp = TempDir::new()?;
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            write(tmp.path(), name, 10)?;
        }
        let fs: Arc<dyn SourceFs> = Arc::new(DirFs::new(tmp.path()));

        let groups = || {
            let (sender, receiver) = mpsc::channel(4);
            for name in ["a.jpg", "b.jpg", "c.jpg"] {
                sender
                    .try_send(Group::single(local(&fs, name, 10, FileKind::Image)))
                    .unwrap();
            }
            receiver
        };

        let server = Arc::new(FakeServer::default());
        *server.failures.lock().unwrap() = 1;

        let stopping = Arc::new(uploader(
            &server,
            UploadSettings {
                on_server_errors: OnServerErrors::Stop,
                concurrent_uploads: 1,
                ..settings()
            },
            ServerIndex::default(),
        ));

        assert!(stopping.clone().run(groups()).await.is_err());
        assert_eq!(1, stopping.recorder.count(Event::UploadServerError));

        *server.failures.lock().unwrap() = 1;
        let continuing = Arc::new(uploader(&server, settings(), ServerIndex::default()));

        continuing.clone().run(groups()).await?;
        assert_eq!(1, continuing.recorder.errors());
        assert_eq!(2, continuing.recorder.count(Event::Uploaded));

        let dry = Arc::new(uploader(
            &server,
            UploadSettings {
                dry_run: true,
                ..settings()
            },
            ServerIndex::default(),
        ));
        let uploads = server.calls("asset_upload");

        dry.clone().run(groups()).await?;
        assert_eq!(3, dry.recorder.count(Event::Uploaded));
        assert_eq!(3, dry.recorder.count(Event::Tagged));
        assert_eq!(uploads, server.calls("asset_upload"));
        assert_eq!(0, server.calls("create_stack"));

        Ok(())
    }
}
