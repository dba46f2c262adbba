//! This module provides the folder source: a concurrent walk over directories and zip files which turns the
//! media files it finds into [Group]s.
//!
//! Each directory is handled by its own task, bounded by a semaphore.  A task reads the directory, classifies
//! its files, spawns tasks for its subdirectories, attaches sidecars and albums to its assets, then sorts and
//! groups them before sending the groups away.

use {
    crate::{
        asset::{Asset, DateMethod, FileRef},
        banned::BannedFiles,
        events::Event,
        filetypes::{self, FileKind},
        filters::{DateRange, ExtensionList, ImportFilters},
        fsys::{self, Entry, SourceFs},
        groups::{self, Group},
        icloud::ICloudCatalog,
        metadata::{Album, Metadata, Tag},
        picasa, sidecar, ConfigError, Session,
    },
    anyhow::{anyhow, Result},
    futures::{future::BoxFuture, FutureExt},
    std::{
        fmt::{self, Display},
        str::FromStr,
        sync::Arc,
    },
    structopt::StructOpt,
    tokio::{
        sync::{mpsc, Semaphore},
        task,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

/// Groups waiting for the consumer
const CHANNEL_CAPACITY: usize = 16;

/// How a folder becomes an album
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum AlbumPathMode {
    #[default]
    None,

    /// The name of the folder
    Folder,

    /// The path of the folder, from the root of its source
    Path,
}

impl FromStr for AlbumPathMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" | "none" => Ok(AlbumPathMode::None),
            "folder" => Ok(AlbumPathMode::Folder),
            "path" => Ok(AlbumPathMode::Path),
            _ => Err(ConfigError::InvalidValue {
                flag: "folder-as-album",
                value: s.to_owned(),
            }),
        }
    }
}

impl Display for AlbumPathMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlbumPathMode::None => "NONE",
            AlbumPathMode::Folder => "FOLDER",
            AlbumPathMode::Path => "PATH",
        })
    }
}

/// Options of the folder family of commands (`from-folder`, `from-icloud`, `from-picasa`)
#[derive(StructOpt, Debug, Clone)]
pub struct FolderOptions {
    /// Folders, zip files or glob patterns to import
    #[structopt(required = true)]
    pub paths: Vec<String>,

    /// Walk subfolders too
    #[structopt(long, parse(try_from_str), default_value = "true")]
    pub recursive: bool,

    /// Put every asset into this album
    #[structopt(long)]
    pub into_album: Option<String>,

    /// Make albums from folders: NONE, FOLDER (the folder name) or PATH (the whole path)
    #[structopt(long, default_value = "none")]
    pub folder_as_album: AlbumPathMode,

    /// Separator between folder names when making albums from paths
    #[structopt(long, default_value = " / ")]
    pub album_path_joiner: String,

    /// Tag assets with the path of their folder
    #[structopt(long)]
    pub folder_as_tags: bool,

    /// Make albums from the .picasa.ini file of folders
    #[structopt(long)]
    pub picasa_album: bool,

    /// Read the CSV files of an iCloud export for dates and albums
    #[structopt(long)]
    pub icloud: bool,

    /// Make albums from the memories of an iCloud export
    #[structopt(long)]
    pub icloud_memories_as_albums: bool,

    /// Do not look for XMP and JSON sidecars
    #[structopt(long)]
    pub ignore_sidecar_files: bool,

    /// Where capture dates come from: NONE, FILENAME, EXIF, FILENAME-EXIF or EXIF-FILENAME
    #[structopt(long, default_value = "exif-filename")]
    pub date_method: DateMethod,

    /// Number of folders read at the same time
    #[structopt(long, default_value = "3")]
    pub concurrent_tasks: usize,

    #[structopt(flatten)]
    pub filters: ImportFilters,
}

impl FolderOptions {
    /// Options for `paths` with every flag at its default value
    pub fn new(paths: Vec<String>) -> Self {
        Self {
            paths,
            recursive: true,
            into_album: None,
            folder_as_album: AlbumPathMode::None,
            album_path_joiner: " / ".into(),
            folder_as_tags: false,
            picasa_album: false,
            icloud: false,
            icloud_memories_as_albums: false,
            ignore_sidecar_files: false,
            date_method: DateMethod::default(),
            concurrent_tasks: 3,
            filters: ImportFilters::default(),
        }
    }

    /// Fail if incompatible flags are set together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.into_album.is_some() && self.folder_as_album != AlbumPathMode::None {
            return Err(ConfigError::MutuallyExclusive(
                "--into-album",
                "--folder-as-album",
            ));
        }

        Ok(())
    }
}

/// Walk settings, resolved once from [FolderOptions]
struct Settings {
    recursive: bool,
    into_album: Option<String>,
    folder_as_album: AlbumPathMode,
    album_path_joiner: String,
    folder_as_tags: bool,
    picasa_album: bool,
    ignore_sidecar_files: bool,
    date_method: DateMethod,
    date_range: DateRange,
    include_extensions: ExtensionList,
    exclude_extensions: ExtensionList,
    banned: BannedFiles,
}

/// State shared by the tasks walking one source
struct Walker {
    settings: Arc<Settings>,
    session: Arc<Session>,
    fs: Arc<dyn SourceFs>,
    icloud: Option<ICloudCatalog>,
    permits: Arc<Semaphore>,
}

/// What the first pass over a directory found
#[derive(Default)]
struct Listing {
    assets: Vec<Asset>,
    subdirs: Vec<String>,
    picasa: Option<Album>,
}

/// Walk `sources` and return the channel their groups arrive on.
///
/// The channel closes once every directory has been handled.  Errors in a directory are recorded and cancel the
/// walk below that directory only.
pub fn browse(
    options: &FolderOptions,
    sources: Vec<Arc<dyn SourceFs>>,
    session: Arc<Session>,
) -> Result<mpsc::Receiver<Group>> {
    options.validate()?;

    let settings = Arc::new(Settings {
        recursive: options.recursive,
        into_album: options.into_album.clone().filter(|album| !album.is_empty()),
        folder_as_album: options.folder_as_album,
        album_path_joiner: options.album_path_joiner.clone(),
        folder_as_tags: options.folder_as_tags,
        picasa_album: options.picasa_album,
        ignore_sidecar_files: options.ignore_sidecar_files,
        date_method: options.date_method,
        date_range: options.filters.date_range(),
        include_extensions: options.filters.include_extensions.clone(),
        exclude_extensions: options.filters.exclude_extensions.clone(),
        banned: options.filters.banned(),
    });

    let permits = Arc::new(Semaphore::new(options.concurrent_tasks.max(1)));

    let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);

    for fs in sources {
        let icloud = if options.icloud || options.icloud_memories_as_albums {
            let mut catalog = ICloudCatalog::default();

            task::block_in_place(|| {
                catalog.scan(fs.as_ref(), "", options.icloud_memories_as_albums)
            })?;

            Some(catalog)
        } else {
            None
        };

        info!("walking {}", fs.name());

        let walker = Arc::new(Walker {
            settings: settings.clone(),
            session: session.clone(),
            fs,
            icloud,
            permits: permits.clone(),
        });

        spawn_dir(walker, String::new(), session.cancel.child_token(), sender.clone());
    }

    Ok(receiver)
}

fn spawn_dir(
    walker: Arc<Walker>,
    dir: String,
    cancel: CancellationToken,
    output: mpsc::Sender<Group>,
) {
    task::spawn(async move {
        let result = walker.clone().parse_dir(&dir, &cancel, output).await;

        if let Err(e) = result {
            walker.session.recorder.record(
                Event::Error,
                FileRef::new(walker.fs.clone(), dir),
                &format!("{e:?}"),
            );
            cancel.cancel();
        }
    });
}

/// Find the sidecar of `base` with extension `ext` among `entries`, accepting both "name.jpg.xmp" and "name.xmp",
/// in any case.
fn find_sidecar<'a>(entries: &'a [Entry], base: &str, ext: &str) -> Option<&'a Entry> {
    let long = format!("{base}{ext}");
    let short = format!("{}{ext}", filetypes::strip_extension(base));

    entries
        .iter()
        .filter(|entry| !entry.is_dir)
        .find(|entry| entry.name.eq_ignore_ascii_case(&long))
        .or_else(|| {
            entries
                .iter()
                .filter(|entry| !entry.is_dir)
                .find(|entry| entry.name.eq_ignore_ascii_case(&short))
        })
}

impl Walker {
    fn parse_dir<'a>(
        self: Arc<Self>,
        dir: &'a str,
        cancel: &'a CancellationToken,
        output: mpsc::Sender<Group>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let _permit = self.permits.clone().acquire_owned().await?;

            if cancel.is_cancelled() {
                return Err(anyhow!("cancelled"));
            }

            let entries = task::block_in_place(|| self.fs.read_dir(dir))?;

            let listing = task::block_in_place(|| self.list(dir, &entries));

            for subdir in listing.subdirs {
                spawn_dir(self.clone(), subdir, cancel.child_token(), output.clone());
            }

            let mut assets = Vec::with_capacity(listing.assets.len());

            for mut asset in listing.assets {
                if cancel.is_cancelled() {
                    return Err(anyhow!("cancelled"));
                }

                task::block_in_place(|| self.complete(&mut asset, dir, &entries, &listing.picasa));

                if !self
                    .settings
                    .date_range
                    .contains(asset.capture_date(), self.session.analyser.tz())
                {
                    self.session.recorder.record(
                        Event::DiscoveredDiscarded,
                        &asset.file,
                        "asset outside date range",
                    );
                    continue;
                }

                assets.push(asset);
            }

            groups::sort_assets(&mut assets);

            for group in groups::group(assets) {
                tokio::select! {
                    result = output.send(group) => {
                        result.map_err(|_| anyhow!("group receiver dropped"))?
                    }
                    _ = cancel.cancelled() => return Err(anyhow!("cancelled")),
                }
            }

            debug!("done with {}:{dir}", self.fs.name());

            Ok(())
        }
        .boxed()
    }

    /// Classify the entries of `dir`, keeping media files as assets and subdirectories to walk.
    fn list(&self, dir: &str, entries: &[Entry]) -> Listing {
        let settings = &self.settings;
        let recorder = &self.session.recorder;
        let registry = self.session.analyser.registry();

        let images = entries
            .iter()
            .filter(|entry| !entry.is_dir && registry.kind_of(&entry.name) == FileKind::Image)
            .map(|entry| entry.name.to_lowercase())
            .collect::<Vec<_>>();

        let mut listing = Listing::default();

        for entry in entries {
            let path = fsys::join(dir, &entry.name);
            let file = || FileRef::new(self.fs.clone(), path.clone());

            if entry.is_dir {
                if settings.banned.is_banned_dir(&path) {
                    recorder.record(Event::DiscoveredDiscarded, file(), "banned folder");
                } else if settings.recursive {
                    listing.subdirs.push(path.clone());
                }
                continue;
            }

            if settings.banned.is_banned(&path) {
                recorder.record(Event::DiscoveredDiscarded, file(), "banned file");
                continue;
            }

            if settings.picasa_album && picasa::is_picasa_ini(&entry.name) {
                match self.fs.read(&path).and_then(|content| {
                    picasa::parse(&String::from_utf8_lossy(&content))
                }) {
                    Ok(album) => {
                        info!("Picasa album detected in {}: {}", file(), album.title);
                        listing.picasa = Some(album);
                    }
                    Err(e) => recorder.record(Event::Error, file(), &format!("{e:?}")),
                }
                continue;
            }

            let ext = filetypes::extension(&entry.name);

            let kind = if filetypes::is_motion_container(ext)
                && filetypes::has_still_image(&entry.name, &images)
            {
                FileKind::Video
            } else {
                match registry.kind(ext) {
                    FileKind::Image | FileKind::Video if registry.is_useless(&entry.name) => {
                        FileKind::Useless
                    }
                    kind => kind,
                }
            };

            match kind {
                FileKind::Unknown => {
                    recorder.record(Event::DiscoveredUnsupported, file(), "unsupported file type");
                    continue;
                }
                FileKind::Useless => {
                    recorder.record(Event::DiscoveredUseless, file(), "");
                    continue;
                }
                FileKind::Sidecar => {
                    if settings.ignore_sidecar_files {
                        recorder.record(Event::DiscoveredDiscarded, file(), "sidecar file ignored");
                    } else {
                        recorder.record(Event::DiscoveredSidecar, file(), "");
                    }
                    continue;
                }
                FileKind::Image => recorder.record(Event::DiscoveredImage, file(), ""),
                FileKind::Video => recorder.record(Event::DiscoveredVideo, file(), ""),
            }

            if !settings.include_extensions.includes(ext) {
                recorder.record(Event::DiscoveredDiscarded, file(), "extension not included");
                continue;
            }

            if settings.exclude_extensions.excludes(ext) {
                recorder.record(Event::DiscoveredDiscarded, file(), "extension excluded");
                continue;
            }

            let stat = match self.fs.stat(&path) {
                Ok(stat) => stat,
                Err(e) => {
                    recorder.record(Event::Error, file(), &format!("{e:?}"));
                    continue;
                }
            };

            let info = self
                .session
                .analyser
                .info(&fsys::join(self.fs.name(), &path));

            let mut asset =
                Asset::new(file(), stat.size, kind, info).with_date_method(settings.date_method);
            asset.modified = stat.modified;

            listing.assets.push(asset);
        }

        listing
    }

    /// Attach sidecars, iCloud data, embedded metadata, tags and albums to `asset`.
    fn complete(&self, asset: &mut Asset, dir: &str, entries: &[Entry], picasa: &Option<Album>) {
        let settings = &self.settings;
        let recorder = &self.session.recorder;
        let tz = self.session.analyser.tz();

        if !settings.ignore_sidecar_files {
            if let Some(json) = find_sidecar(entries, &asset.original_name, ".json") {
                let path = fsys::join(dir, &json.name);

                match self.fs.read(&path) {
                    Ok(content) if sidecar::is_tool_record(&content) => {
                        let metadata = sidecar::read_application_record(&content);

                        if !metadata.title.is_empty() {
                            asset.title = metadata.title.clone();
                        }

                        asset.from_application = Some(metadata);
                        recorder.record(Event::AnalysisAssociatedMetadata, &asset.file, &json.name);
                    }
                    Ok(_) => warn!(
                        "JSON file {} is not a record of this tool",
                        FileRef::new(self.fs.clone(), path)
                    ),
                    Err(e) => recorder.record(
                        Event::Error,
                        FileRef::new(self.fs.clone(), path),
                        &format!("{e:?}"),
                    ),
                }
            }

            if let Some(xmp) = find_sidecar(entries, &asset.original_name, ".xmp") {
                let sidecar_file = FileRef::new(self.fs.clone(), fsys::join(dir, &xmp.name));

                match self.fs.read(&sidecar_file.path) {
                    Ok(content) => {
                        asset.from_sidecar =
                            Some(sidecar::read_xmp(&String::from_utf8_lossy(&content), tz));
                        asset.sidecar = Some(sidecar_file);
                        recorder.record(Event::AnalysisAssociatedMetadata, &asset.file, &xmp.name);
                    }
                    Err(e) => recorder.record(Event::Error, sidecar_file, &format!("{e:?}")),
                }
            }
        }

        if let Some(meta) = self
            .icloud
            .as_ref()
            .and_then(|catalog| catalog.get(&asset.original_name))
        {
            if settings.into_album.is_none() {
                asset.albums.extend(meta.albums.iter().cloned());
            }

            if let Some(date) = meta.original_creation_date {
                match &mut asset.from_sidecar {
                    Some(layer) if layer.date_taken.is_none() => layer.date_taken = Some(date),
                    Some(_) => (),
                    None => {
                        asset.from_sidecar = Some(Metadata {
                            date_taken: Some(date),
                            ..Metadata::default()
                        })
                    }
                }
            }
        }

        let dated_by_records = [&asset.from_application, &asset.from_sidecar]
            .into_iter()
            .flatten()
            .any(|layer| layer.date_taken.is_some());

        if settings.date_method.reads_source() && !dated_by_records {
            asset.read_source_metadata(tz);
        }

        asset.tags.extend(self.session.tags.iter().cloned());

        if settings.folder_as_tags {
            let tag = fsys::join(self.fs.name(), dir);

            if !tag.is_empty() {
                asset.tags.push(Tag::new(&tag));
            }
        }

        if let Some(title) = &settings.into_album {
            asset.albums = vec![Album::named(title.clone())];
        } else if let Some(album) = picasa {
            asset.albums.push(album.clone());
        } else {
            let title = match settings.folder_as_album {
                AlbumPathMode::None => None,
                AlbumPathMode::Folder => Some(if dir.is_empty() {
                    self.fs.name().to_owned()
                } else {
                    fsys::base(dir).to_owned()
                }),
                AlbumPathMode::Path => Some(
                    [self.fs.name()]
                        .into_iter()
                        .chain(dir.split('/'))
                        .filter(|part| !part.is_empty())
                        .collect::<Vec<_>>()
                        .join(&settings.album_path_joiner),
                ),
            };

            if let Some(title) = title.filter(|title| !title.is_empty()) {
                asset.albums.push(Album::named(title));
            }
        }
    }
}
