//! This module provides the Google Photos takeout source.
//!
//! A takeout is a tree of year folders ("Photos from 2023") and album folders, one or more zip files deep, where
//! most media files have a JSON record beside them.  The first pass inventories every folder of every part of the
//! takeout: records, albums, media files.  The records are then paired with their files using
//! [crate::matchers], and a second pass turns the paired files into assets, skipping the copies album folders hold
//! of files already seen, and groups them.

use {
    crate::{
        asset::{Asset, FileRef},
        banned::BannedFiles,
        events::Event,
        filetypes::{self, FileKind},
        filters::ImportFilters,
        fsys::{self, SourceFs},
        groups::{self, Group},
        matchers::MATCHERS,
        metadata::{Album, Metadata, Tag},
        sidecar::{self, GoogleRecord},
        Session,
    },
    anyhow::{anyhow, Result},
    chrono::{DateTime, Utc},
    std::{
        collections::{BTreeMap, HashMap, HashSet},
        sync::Arc,
    },
    structopt::StructOpt,
    tokio::{sync::mpsc, task},
    tracing::{debug, info},
};

/// Groups waiting for the consumer
const CHANNEL_CAPACITY: usize = 16;

/// Folder Google puts the videos it failed to process in
const FAILED_VIDEOS: &str = "Failed Videos";

/// Options of `from-google-photos`
#[derive(StructOpt, Debug, Clone)]
pub struct TakeoutOptions {
    /// Takeout zip files or folders.  The parts of a takeout must be given together.
    #[structopt(required = true)]
    pub paths: Vec<String>,

    /// Create albums matching the albums of the takeout
    #[structopt(long, parse(try_from_str), default_value = "true")]
    pub sync_albums: bool,

    /// Put every asset into this album
    #[structopt(long)]
    pub into_album: Option<String>,

    /// Import only the assets of this album
    #[structopt(long)]
    pub from_album_name: Option<String>,

    /// Import assets Google Photos has in its trash
    #[structopt(long)]
    pub include_trashed: bool,

    /// Import archived assets
    #[structopt(long, parse(try_from_str), default_value = "true")]
    pub include_archived: bool,

    /// Import assets shared by a partner
    #[structopt(long, parse(try_from_str), default_value = "true")]
    pub include_partner: bool,

    /// Put assets shared by a partner into this album
    #[structopt(long)]
    pub partner_shared_album: Option<String>,

    /// Import files without a JSON record
    #[structopt(long)]
    pub include_unmatched: bool,

    /// Tag assets with "{takeout}/<name of the takeout>"
    #[structopt(long, parse(try_from_str), default_value = "true")]
    pub takeout_tag: bool,

    /// Tag assets with "People/<name>" for the people named in their record
    #[structopt(long, parse(try_from_str), default_value = "true")]
    pub people_tag: bool,

    #[structopt(flatten)]
    pub filters: ImportFilters,
}

impl TakeoutOptions {
    /// Options for `paths` with every flag at its default value
    pub fn new(paths: Vec<String>) -> Self {
        Self {
            paths,
            sync_albums: true,
            into_album: None,
            from_album_name: None,
            include_trashed: false,
            include_archived: true,
            include_partner: true,
            partner_shared_album: None,
            include_unmatched: false,
            takeout_tag: true,
            people_tag: true,
            filters: ImportFilters::default(),
        }
    }
}

/// A media file seen during the first pass
#[derive(Debug, Clone)]
struct FileEntry {
    fs: Arc<dyn SourceFs>,
    base: String,
    size: u64,
    modified: Option<DateTime<Utc>>,
    kind: FileKind,
}

/// A file paired with its record, if any
#[derive(Debug)]
struct Matched {
    file: FileEntry,
    metadata: Option<Metadata>,
    matcher: Option<&'static str>,
}

/// What a folder of the takeout holds
#[derive(Debug, Default)]
struct Catalog {
    /// Asset records by base name
    jsons: BTreeMap<String, Metadata>,

    unmatched: BTreeMap<String, FileEntry>,
    matched: BTreeMap<String, Matched>,
}

/// Return `title` with the extension of the file it names: Google records may give a longer form of the name
/// ("photo.jpg" for "photo.MP") or double extensions.
pub fn canonical_title(title: &str, file: &str) -> String {
    let file_ext = filetypes::extension(file);
    let title_ext = filetypes::extension(title);

    if title_ext.eq_ignore_ascii_case(file_ext) {
        return title.to_owned();
    }

    let title = filetypes::strip_extension(title);

    if filetypes::extension(title).eq_ignore_ascii_case(file_ext) {
        title.to_owned()
    } else {
        format!("{}{file_ext}", filetypes::strip_extension(title))
    }
}

/// The takeout puzzle: folders, albums and the places each file was seen
pub struct Takeout {
    options: TakeoutOptions,
    session: Arc<Session>,
    banned: BannedFiles,
    catalogs: BTreeMap<String, Catalog>,

    /// Albums by folder
    albums: HashMap<String, Album>,

    /// Folders each (base name, size) was seen in
    tracker: HashMap<(String, u64), Vec<String>>,

    /// Name of the takeout, used for the takeout tag
    name: String,
}

impl Takeout {
    pub fn new(options: TakeoutOptions, session: Arc<Session>) -> Self {
        Self {
            banned: options.filters.banned(),
            options,
            session,
            catalogs: BTreeMap::new(),
            albums: HashMap::new(),
            tracker: HashMap::new(),
            name: String::new(),
        }
    }

    /// First pass: inventory `fs`.
    pub fn scan(&mut self, fs: &Arc<dyn SourceFs>) -> Result<()> {
        if self.name.is_empty() {
            self.name = fs.name().to_owned();
        }

        info!("scanning takeout part {}", fs.name());

        self.scan_dir(fs, "")
    }

    fn scan_dir(&mut self, fs: &Arc<dyn SourceFs>, dir: &str) -> Result<()> {
        let entries = fs.read_dir(dir)?;
        let registry = self.session.analyser.registry().clone();
        let recorder = self.session.recorder.clone();

        let images = entries
            .iter()
            .filter(|entry| !entry.is_dir && registry.kind_of(&entry.name) == FileKind::Image)
            .map(|entry| entry.name.to_lowercase())
            .collect::<Vec<_>>();

        for entry in &entries {
            let path = fsys::join(dir, &entry.name);
            let file = || FileRef::new(fs.clone(), path.clone());

            if entry.is_dir {
                if self.banned.is_banned_dir(&path) {
                    recorder.record(Event::DiscoveredDiscarded, file(), "banned folder");
                } else {
                    self.scan_dir(fs, &path)?;
                }
                continue;
            }

            if self.banned.is_banned(&path) {
                recorder.record(Event::DiscoveredDiscarded, file(), "banned file");
                continue;
            }

            let ext = filetypes::extension(&entry.name).to_lowercase();

            if ext == ".json" {
                self.scan_json(fs, dir, &entry.name);
                continue;
            }

            let kind = if filetypes::is_motion_container(&ext)
                && filetypes::has_still_image(&entry.name, &images)
            {
                FileKind::Video
            } else {
                match registry.kind(&ext) {
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
                    recorder.record(Event::DiscoveredSidecar, file(), "");
                    continue;
                }
                FileKind::Image => recorder.record(Event::DiscoveredImage, file(), ""),
                FileKind::Video => {
                    recorder.record(Event::DiscoveredVideo, file(), "");

                    if path.contains(FAILED_VIDEOS) {
                        recorder.record(
                            Event::DiscoveredDiscarded,
                            file(),
                            "can't upload failed videos",
                        );
                        continue;
                    }
                }
            }

            if !self.options.filters.include_extensions.includes(&ext) {
                recorder.record(Event::DiscoveredDiscarded, file(), "extension not included");
                continue;
            }

            if self.options.filters.exclude_extensions.excludes(&ext) {
                recorder.record(Event::DiscoveredDiscarded, file(), "extension excluded");
                continue;
            }

            let stat = match fs.stat(&path) {
                Ok(stat) => stat,
                Err(e) => {
                    recorder.record(Event::Error, file(), &format!("{e:?}"));
                    continue;
                }
            };

            self.tracker
                .entry((entry.name.clone(), stat.size))
                .or_default()
                .push(dir.to_owned());

            let catalog = self.catalogs.entry(dir.to_owned()).or_default();

            if catalog.unmatched.contains_key(&entry.name) {
                recorder.record(
                    Event::AnalysisLocalDuplicate,
                    file(),
                    "duplicated in the directory",
                );
                continue;
            }

            catalog.unmatched.insert(
                entry.name.clone(),
                FileEntry {
                    fs: fs.clone(),
                    base: entry.name.clone(),
                    size: stat.size,
                    modified: stat.modified,
                    kind,
                },
            );
        }

        Ok(())
    }

    fn scan_json(&mut self, fs: &Arc<dyn SourceFs>, dir: &str, base: &str) {
        let recorder = &self.session.recorder;
        let file = FileRef::new(fs.clone(), fsys::join(dir, base));

        let content = match fs.read(&file.path) {
            Ok(content) => content,
            Err(e) => {
                recorder.record(Event::Error, &file, &format!("{e:?}"));
                return;
            }
        };

        if sidecar::is_tool_record(&content) {
            recorder.record(Event::DiscoveredSidecar, &file, "application metadata");
            return;
        }

        match GoogleRecord::parse(&content) {
            Ok(record) if record.is_asset() => {
                self.catalogs
                    .entry(dir.to_owned())
                    .or_default()
                    .jsons
                    .insert(base.to_owned(), record.to_metadata(self.options.people_tag));
                recorder.record(Event::DiscoveredSidecar, &file, "asset metadata");
            }
            Ok(record) if record.is_album() => {
                let album = record.to_album(fsys::base(dir));
                debug!("album {} in {dir}", album.title);
                self.albums.insert(dir.to_owned(), album);
                recorder.record(Event::DiscoveredSidecar, &file, "album metadata");
            }
            Ok(_) => recorder.record(Event::DiscoveredUnsupported, &file, "unknown JSON file"),
            Err(e) => {
                debug!("unable to parse {file}: {e:?}");
                recorder.record(Event::DiscoveredUnsupported, &file, "unknown JSON file")
            }
        }
    }

    /// Pair the records of each folder with its files, then deal with the files left alone.
    pub fn solve(&mut self) {
        let registry = self.session.analyser.registry().clone();
        let recorder = self.session.recorder.clone();

        for (dir, catalog) in &mut self.catalogs {
            for matcher in MATCHERS {
                for (json, metadata) in &catalog.jsons {
                    let names = catalog.unmatched.keys().cloned().collect::<Vec<_>>();

                    for name in names {
                        if !(matcher.matches)(json, &name, &registry) {
                            continue;
                        }

                        if let Some(file) = catalog.unmatched.remove(&name) {
                            recorder.record(
                                Event::AnalysisAssociatedMetadata,
                                FileRef::new(file.fs.clone(), fsys::join(dir, &name)),
                                &format!("{json} ({})", matcher.name),
                            );

                            catalog.matched.insert(
                                name,
                                Matched {
                                    file,
                                    metadata: Some(metadata.clone()),
                                    matcher: Some(matcher.name),
                                },
                            );
                        }
                    }
                }
            }

            if self.options.include_unmatched {
                for (name, file) in std::mem::take(&mut catalog.unmatched) {
                    catalog.matched.insert(
                        name,
                        Matched {
                            file,
                            metadata: None,
                            matcher: None,
                        },
                    );
                }
            } else {
                for (name, file) in &catalog.unmatched {
                    recorder.record(
                        Event::AnalysisMissingAssociatedMetadata,
                        FileRef::new(file.fs.clone(), fsys::join(dir, name)),
                        "",
                    );
                }
            }
        }
    }

    /// Build the asset of a paired file, or return the reason why it must be skipped.
    fn make_asset(&self, dir: &str, matched: &Matched) -> std::result::Result<Asset, &'static str> {
        let file = &matched.file;
        let path = fsys::join(dir, &file.base);

        let title = matched
            .metadata
            .as_ref()
            .map(|metadata| metadata.title.as_str())
            .filter(|title| !title.is_empty())
            .map(|title| canonical_title(title, &file.base))
            .unwrap_or_else(|| file.base.clone());

        let info = self.session.analyser.info(&fsys::join(dir, &title));

        let mut asset = Asset::new(
            FileRef::new(file.fs.clone(), path),
            file.size,
            file.kind,
            info,
        );
        asset.title = title;
        asset.modified = file.modified;

        match &matched.metadata {
            Some(metadata) => {
                if metadata.archived && !self.options.include_archived {
                    return Err("discarding archived file");
                }

                if metadata.from_partner && !self.options.include_partner {
                    return Err("discarding partner file");
                }

                if metadata.trashed && !self.options.include_trashed {
                    return Err("discarding trashed file");
                }

                asset.from_sidecar = Some(metadata.clone());
            }
            None => asset.read_source_metadata(self.session.analyser.tz()),
        }

        if let Some(album) = &self.options.from_album_name {
            if self.albums.get(dir).map(|a| &a.title) != Some(album) {
                return Err("discarding files not in the specified album");
            }
        }

        let partner = asset
            .from_sidecar
            .as_ref()
            .map(|metadata| metadata.from_partner)
            .unwrap_or(false);

        if self.options.sync_albums {
            if let Some(title) = self.options.into_album.as_ref().filter(|t| !t.is_empty()) {
                asset.albums.push(Album::named(title.clone()));
            } else {
                let dirs = self
                    .tracker
                    .get(&(file.base.clone(), file.size))
                    .map(Vec::as_slice)
                    .unwrap_or_default();

                for album in dirs.iter().filter_map(|dir| self.albums.get(dir)) {
                    if !asset.albums.iter().any(|a| a.title == album.title) {
                        asset.albums.push(album.clone());
                    }
                }
            }

            if let Some(title) = self
                .options
                .partner_shared_album
                .as_ref()
                .filter(|title| partner && !title.is_empty())
            {
                asset.albums.push(Album::named(title.clone()));
            }
        }

        let located = asset
            .from_sidecar
            .as_ref()
            .map(Metadata::has_gps)
            .unwrap_or(false);

        if !located {
            if let Some(album) = asset
                .albums
                .iter()
                .find(|album| album.latitude != 0.0 || album.longitude != 0.0)
            {
                let layer = asset.from_sidecar.get_or_insert_with(Metadata::default);
                layer.latitude = Some(album.latitude);
                layer.longitude = Some(album.longitude);
            }
        }

        asset.tags.extend(self.session.tags.iter().cloned());

        if self.options.takeout_tag && !self.name.is_empty() {
            asset.tags.push(Tag::new(&format!("{{takeout}}/{}", self.name)));
        }

        let date_range = self.options.filters.date_range();

        if date_range.is_set()
            && !date_range.contains(asset.capture_date(), self.session.analyser.tz())
        {
            return Err("discarding files out of date range");
        }

        Ok(asset)
    }

    /// Second pass: emit the groups of every folder, in folder order.
    pub async fn emit(self, output: mpsc::Sender<Group>) -> Result<()> {
        let recorder = self.session.recorder.clone();
        let cancel = self.session.cancel.clone();
        let mut emitted = HashSet::<(String, u64)>::new();

        for (dir, catalog) in &self.catalogs {
            let mut assets = Vec::with_capacity(catalog.matched.len());

            for (name, matched) in &catalog.matched {
                let key = (name.clone(), matched.file.size);
                let file = || FileRef::new(matched.file.fs.clone(), fsys::join(dir, name));

                if emitted.contains(&key) {
                    recorder.record(Event::AnalysisLocalDuplicate, file(), "local duplicate");
                    continue;
                }

                match task::block_in_place(|| self.make_asset(dir, matched)) {
                    Ok(asset) => {
                        emitted.insert(key);
                        assets.push(asset);
                    }
                    Err(reason) => recorder.record(Event::DiscoveredDiscarded, file(), reason),
                }
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
        }

        Ok(())
    }

    /// Return the name of the matcher which paired `file` in `dir`, if any.
    pub fn matcher_of(&self, dir: &str, file: &str) -> Option<&'static str> {
        self.catalogs
            .get(dir)
            .and_then(|catalog| catalog.matched.get(file))
            .and_then(|matched| matched.matcher)
    }

    /// Return the number of files of `dir` paired with a record (or kept without one) and left alone.
    pub fn counts(&self, dir: &str) -> (usize, usize) {
        self.catalogs
            .get(dir)
            .map(|catalog| (catalog.matched.len(), catalog.unmatched.len()))
            .unwrap_or_default()
    }
}

/// Inventory the parts of a takeout, pair records with files, and return the channel the groups arrive on.
pub fn browse(
    options: &TakeoutOptions,
    sources: Vec<Arc<dyn SourceFs>>,
    session: Arc<Session>,
) -> Result<mpsc::Receiver<Group>> {
    let mut takeout = Takeout::new(options.clone(), session.clone());

    for fs in &sources {
        task::block_in_place(|| takeout.scan(fs))?;
    }

    takeout.solve();

    let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);

    task::spawn(async move {
        if let Err(e) = takeout.emit(sender).await {
            session
                .recorder
                .record(Event::Error, "takeout", &format!("{e:?}"));
        }
    });

    Ok(receiver)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            events::Recorder,
            filetypes::Registry,
            fsys::DirFs,
            groups::GroupKind,
            names::NameAnalyser,
            test::init_logger,
        },
        chrono::FixedOffset,
        std::{fs, path::Path},
        tempfile::TempDir,
    };

    fn write(root: &Path, path: &str, content: &[u8]) -> Result<()> {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap())?;
        fs::write(path, content)?;
        Ok(())
    }

    fn record(title: &str, timestamp: i64) -> Vec<u8> {
        format!(
            r#"{{"title": "{title}", "photoTakenTime": {{"timestamp": "{timestamp}"}}}}"#
        )
        .into_bytes()
    }

    fn session() -> Arc<Session> {
        Arc::new(Session::new(
            NameAnalyser::new(
                FixedOffset::east_opt(0).unwrap(),
                Arc::new(Registry::default()),
            ),
            Arc::new(Recorder::new()),
        ))
    }

    async fn collect(mut receiver: mpsc::Receiver<Group>) -> Vec<Group> {
        let mut groups = Vec::new();
        while let Some(group) = receiver.recv().await {
            groups.push(group);
        }
        groups
    }

    #[test]
    fn titles() {
        assert_eq!("photo.jpg", canonical_title("photo.jpg", "photo.jpg"));
        assert_eq!("PXL_1.MP", canonical_title("PXL_1.MP.jpg", "PXL_1.MP"));
        assert_eq!("IMG_1.MOV", canonical_title("IMG_1.HEIC", "IMG_1.MOV"));
        assert_eq!("IMG_1.mp4", canonical_title("IMG_1.jpg.jpg", "IMG_1.mp4"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn truncated_name() -> Result<()> {
        init_logger();

        let tmp = TempDir::new()?;
        let dir = "Takeout/Google Photos/Photos from 2023";

        write(
            tmp.path(),
            &format!("{dir}/PXL_20230809_203449253.LONG_EXPOSURE-02.ORIGIN.json"),
            &record("PXL_20230809_203449253.LONG_EXPOSURE-02.ORIGINAL.jpg", 1691613289),
        )?;
        write(
            tmp.path(),
            &format!("{dir}/PXL_20230809_203449253.LONG_EXPOSURE-02.ORIGINA.jpg"),
            b"jpeg",
        )?;

        let session = session();
        let fs: Arc<dyn SourceFs> = Arc::new(DirFs::new(tmp.path()));

        let mut takeout = Takeout::new(TakeoutOptions::new(vec![]), session.clone());
        takeout.scan(&fs)?;
        takeout.solve();

        assert_eq!(
            Some("matchWithOneCharOmitted"),
            takeout.matcher_of(dir, "PXL_20230809_203449253.LONG_EXPOSURE-02.ORIGINA.jpg")
        );
        assert_eq!((1, 0), takeout.counts(dir));

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        takeout.emit(sender).await?;
        let groups = collect(receiver).await;

        assert_eq!(1, groups.len());
        assert_eq!(GroupKind::None, groups[0].kind);
        assert_eq!(
            "PXL_20230809_203449253.LONG_EXPOSURE-02.ORIGINAL.jpg",
            groups[0].assets[0].title
        );
        assert!(groups[0].assets[0].capture_date().is_some());

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn duplicates_across_folders() -> Result<()> {
        init_logger();

        let tmp = TempDir::new()?;
        let content = [b'x'; 52];

        for dir in ["Photos from 2023", "Album/Album"] {
            write(tmp.path(), &format!("{dir}/IMG_8172.jpg"), &content)?;
            write(
                tmp.path(),
                &format!("{dir}/IMG_8172.jpg.json"),
                &record("IMG_8172.jpg", 1690000000),
            )?;
        }

        write(
            tmp.path(),
            "Album/Album/metadata.json",
            br#"{"title": "Album", "date": {"timestamp": "1690000000"}}"#,
        )?;

        let session = session();
        let fs: Arc<dyn SourceFs> = Arc::new(DirFs::new(tmp.path()));

        let groups = collect(browse(
            &TakeoutOptions::new(vec![]),
            vec![fs],
            session.clone(),
        )?)
        .await;

        assert_eq!(1, groups.len());
        assert_eq!(1, session.recorder.count(Event::AnalysisLocalDuplicate));

        let asset = &groups[0].assets[0];
        assert!(asset.albums.iter().any(|album| album.title == "Album"));
        assert!(asset
            .tags
            .iter()
            .any(|tag| tag.value.starts_with("{takeout}/")));

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn live_photos_and_leftovers() -> Result<()> {
        init_logger();

        let tmp = TempDir::new()?;
        let dir = "Photos from 2022";

        write(tmp.path(), &format!("{dir}/IMG_1234.HEIC"), b"heic")?;
        write(tmp.path(), &format!("{dir}/IMG_1234.MOV"), b"mov")?;
        write(
            tmp.path(),
            &format!("{dir}/IMG_1234.HEIC.json"),
            &record("IMG_1234.HEIC", 1650000000),
        )?;
        write(tmp.path(), &format!("{dir}/lonely.jpg"), b"jpeg")?;
        write(
            tmp.path(),
            &format!("{dir}/trashed.jpg.json"),
            br#"{"title": "trashed.jpg", "photoTakenTime": {"timestamp": "1650000000"}, "trashed": true}"#,
        )?;
        write(tmp.path(), &format!("{dir}/trashed.jpg"), b"jpeg")?;
        write(tmp.path(), "Failed Videos/broken.mp4", b"mp4")?;

        let session = session();
        let fs: Arc<dyn SourceFs> = Arc::new(DirFs::new(tmp.path()));

        let mut takeout = Takeout::new(TakeoutOptions::new(vec![]), session.clone());
        takeout.scan(&fs)?;
        takeout.solve();

        assert_eq!(Some("normalMatch"), takeout.matcher_of(dir, "IMG_1234.HEIC"));
        assert_eq!(Some("livePhotoMatch"), takeout.matcher_of(dir, "IMG_1234.MOV"));
        assert_eq!((3, 1), takeout.counts(dir));
        assert_eq!(
            1,
            session
                .recorder
                .count(Event::AnalysisMissingAssociatedMetadata)
        );

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        takeout.emit(sender).await?;
        let groups = collect(receiver).await;

        assert_eq!(1, groups.len());
        assert_eq!(GroupKind::LivePhoto, groups[0].kind);
        assert_eq!("IMG_1234.HEIC", groups[0].assets[0].title);
        assert_eq!("IMG_1234.MOV", groups[0].assets[1].title);

        let report = session.recorder.report();
        assert!(report.contains("discarding trashed file"));
        assert!(report.contains("can't upload failed videos"));

        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn unmatched_files_may_be_kept() -> Result<()> {
        init_logger();

        let tmp = TempDir::new()?;
        write(tmp.path(), "Photos from 2020/IMG_20200101_101010.jpg", b"jpeg")?;

        let mut options = TakeoutOptions::new(vec![]);
        options.include_unmatched = true;

        let session = session();
        let fs: Arc<dyn SourceFs> = Arc::new(DirFs::new(tmp.path()));
        let groups = collect(browse(&options, vec![fs], session.clone())?).await;

        assert_eq!(1, groups.len());
        assert_eq!(
            0,
            session
                .recorder
                .count(Event::AnalysisMissingAssociatedMetadata)
        );
        assert_eq!(
            "2020-01-01",
            groups[0].assets[0]
                .capture_date()
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_default()
        );

        Ok(())
    }

    /// Build a two part takeout: a matched photo, a photo without record, a failed video, and a second copy of the
    /// matched photo in the same folder of the other part.
    fn two_parts(first: &Path, second: &Path) -> Result<Vec<Arc<dyn SourceFs>>> {
        let dir = "Takeout/Google Photos/Photos from 2023";

        write(first, &format!("{dir}/IMG_0001.jpg"), b"first")?;
        write(
            first,
            &format!("{dir}/IMG_0001.jpg.json"),
            &record("IMG_0001.jpg", 1690000000),
        )?;
        write(first, &format!("{dir}/IMG_0002.jpg"), b"second")?;
        write(first, "Takeout/Google Photos/Failed Videos/broken.mp4", b"mp4")?;

        write(second, &format!("{dir}/IMG_0001.jpg"), b"first")?;
        write(second, &format!("{dir}/IMG_0003.mp4"), b"video")?;
        write(
            second,
            &format!("{dir}/IMG_0003.mp4.json"),
            &record("IMG_0003.mp4", 1690000100),
        )?;

        Ok(vec![
            Arc::new(DirFs::new(first)),
            Arc::new(DirFs::new(second)),
        ])
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn every_file_is_accounted_for() -> Result<()> {
        init_logger();

        let dir = "Takeout/Google Photos/Photos from 2023";

        for include_unmatched in [false, true] {
            let first = TempDir::new()?;
            let second = TempDir::new()?;

            let mut options = TakeoutOptions::new(vec![]);
            options.include_unmatched = include_unmatched;

            let session = session();
            let mut takeout = Takeout::new(options, session.clone());

            for fs in two_parts(first.path(), second.path())? {
                takeout.scan(&fs)?;
            }

            takeout.solve();

            let recorder = &session.recorder;
            let discovered =
                recorder.count(Event::DiscoveredImage) + recorder.count(Event::DiscoveredVideo);
            let matched = recorder.count(Event::AnalysisAssociatedMetadata);
            let missing = recorder.count(Event::AnalysisMissingAssociatedMetadata);
            let discarded = recorder.count(Event::DiscoveredDiscarded);
            let duplicates = recorder.count(Event::AnalysisLocalDuplicate);
            let (paired, unmatched) = takeout.counts(dir);
            let kept = paired as u64 - matched;

            assert_eq!(5, discovered);
            assert_eq!(2, matched);
            assert_eq!(1, discarded);
            assert_eq!(1, duplicates);
            assert_eq!(missing, unmatched as u64);
            assert_eq!(discovered, matched + kept + missing + discarded + duplicates);

            if include_unmatched {
                assert_eq!((1, 0), (kept, missing));
            } else {
                assert_eq!((0, 1), (kept, missing));
            }

            let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
            takeout.emit(sender).await?;

            let emitted = collect(receiver)
                .await
                .iter()
                .map(|group| group.assets.len() as u64)
                .sum::<u64>();

            assert_eq!(matched + kept, emitted);
        }

        Ok(())
    }
}
