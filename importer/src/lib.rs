//! Import photos and videos from folders, Google Photos takeouts, iCloud exports and Picasa trees into an Immich
//! server.
//!
//! A run has three stages.  A source ([folder] or [takeout]) walks its inputs and sends [groups::Group]s of
//! assets down a channel; the [upload] coordinator consults the [advisor] about each asset and talks to the server
//! through an [immigrate_shared::Client]; every decision along the way is counted by an [events::Recorder].

#![deny(warnings)]

use {
    anyhow::Result,
    chrono::{DateTime, Local},
    events::Recorder,
    filetypes::Registry,
    folder::FolderOptions,
    immigrate_shared::Client,
    metadata::Tag,
    names::NameAnalyser,
    std::sync::Arc,
    structopt::StructOpt,
    takeout::TakeoutOptions,
    tokio::{sync::mpsc, task},
    tokio_util::sync::CancellationToken,
    tracing::info,
    upload::{ServerOptions, UploadSettings, Uploader},
};

pub mod advisor;
pub mod asset;
pub mod banned;
pub mod cache;
pub mod events;
pub mod exif;
pub mod filetypes;
pub mod filters;
pub mod folder;
pub mod fsys;
pub mod groups;
pub mod icloud;
pub mod matchers;
pub mod metadata;
pub mod names;
pub mod picasa;
pub mod quicktime;
pub mod sidecar;
pub mod takeout;
pub mod upload;

/// Invalid command line
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for --{flag}: {value:?}")]
    InvalidValue { flag: &'static str, value: String },

    #[error("{0} and {1} can't be used together")]
    MutuallyExclusive(&'static str, &'static str),
}

/// What every source of a run shares
pub struct Session {
    pub analyser: NameAnalyser,
    pub recorder: Arc<Recorder>,

    /// Tags given to every asset of the run
    pub tags: Vec<Tag>,

    /// Cancelled when the run must stop
    pub cancel: CancellationToken,
}

impl Session {
    pub fn new(analyser: NameAnalyser, recorder: Arc<Recorder>) -> Self {
        Self {
            analyser,
            recorder,
            tags: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }
}

/// Return the tags of a run started at `start`: the `--tag` values, then the session tag if requested.
pub fn session_tags(options: &ServerOptions, start: DateTime<Local>) -> Vec<Tag> {
    let mut tags = options
        .tags
        .iter()
        .filter(|value| !value.trim_matches('/').is_empty())
        .map(|value| Tag::new(value))
        .collect::<Vec<_>>();

    if options.session_tag {
        tags.push(Tag::new(&format!(
            "{{immigrate}}/{}",
            start.format("%Y-%m-%d %H:%M:%S")
        )));
    }

    tags
}

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Import folders, zip files or glob patterns
    #[structopt(name = "from-folder")]
    FromFolder(FolderOptions),

    /// Import a Google Photos takeout
    #[structopt(name = "from-google-photos")]
    FromGooglePhotos(TakeoutOptions),

    /// Import an iCloud Photos export, reading its CSV files for dates and albums
    #[structopt(name = "from-icloud")]
    FromICloud(FolderOptions),

    /// Import a Picasa tree, making albums from its .picasa.ini files
    #[structopt(name = "from-picasa")]
    FromPicasa(FolderOptions),
}

#[derive(StructOpt, Debug)]
#[structopt(name = "immigrate", about = "Import photos and videos into an Immich server")]
pub struct Options {
    #[structopt(flatten)]
    pub server: ServerOptions,

    #[structopt(subcommand)]
    pub command: Command,
}

impl Command {
    /// Start the source the command names, returning the channel its groups arrive on along with the filters to
    /// apply to them.
    fn browse(
        &self,
        session: Arc<Session>,
    ) -> Result<(mpsc::Receiver<groups::Group>, filters::GroupFilters)> {
        let from_folder = |options: &FolderOptions| -> Result<_> {
            options.validate()?;
            let sources = task::block_in_place(|| fsys::parse_args(&options.paths))?;
            Ok((
                folder::browse(options, sources, session.clone())?,
                options.filters.group_filters(),
            ))
        };

        match self {
            Command::FromFolder(options) => from_folder(options),

            Command::FromICloud(options) => from_folder(&FolderOptions {
                icloud: true,
                ..options.clone()
            }),

            Command::FromPicasa(options) => from_folder(&FolderOptions {
                picasa_album: true,
                ..options.clone()
            }),

            Command::FromGooglePhotos(options) => {
                let sources = task::block_in_place(|| fsys::parse_args(&options.paths))?;
                Ok((
                    takeout::browse(options, sources, session.clone())?,
                    options.filters.group_filters(),
                ))
            }
        }
    }
}

/// Run an import against the server `client` talks to, returning the recorder of the run.
pub async fn run(options: &Options, client: Arc<dyn Client>) -> Result<Arc<Recorder>> {
    client.ping_server().await?;

    let user = client.validate_connection().await?;
    info!("connected as {} ({})", user.name, user.email);

    let registry: Arc<Registry> =
        Registry::from_server(&client.get_supported_media_types().await?);

    let recorder = Arc::new(Recorder::new());

    let session = Arc::new(
        Session::new(
            NameAnalyser::new(options.server.time_zone.0, registry),
            recorder.clone(),
        )
        .with_tags(session_tags(&options.server, Local::now())),
    );

    let index = advisor::ServerIndex::load(client.as_ref(), &user.id).await?;
    let albums = cache::AlbumCache::load(client.as_ref()).await?;

    if options.server.dry_run {
        info!("dry run: the server will not be changed");
    }

    let (groups, group_filters) = options.command.browse(session.clone())?;

    let uploader = Arc::new(Uploader::new(
        client,
        UploadSettings::new(&options.server, group_filters),
        recorder.clone(),
        session.cancel.clone(),
        index,
        albums,
    ));

    let result = uploader.clone().run(groups).await;

    uploader.summary();

    result.map(|()| recorder)
}
