//! This module provides the [Asset] type, a media file considered for import along with everything its source
//! learned about it.

use {
    crate::{
        exif,
        filetypes::{self, FileKind},
        fsys::SourceFs,
        metadata::{Album, Metadata, Tag},
        names::NameInfo,
        quicktime, ConfigError,
    },
    anyhow::{anyhow, Result},
    chrono::{DateTime, FixedOffset, Utc},
    std::{
        fmt::{self, Debug, Display},
        path::PathBuf,
        str::FromStr,
        sync::{Arc, OnceLock},
    },
    tempfile::NamedTempFile,
    tokio::task,
    tracing::debug,
};

/// Policy deciding where the capture date of an asset comes from, after the records of this tool and the
/// sidecars
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum DateMethod {
    /// Only trust sidecars, never guess
    None,

    /// Fall back to the date found in the file name
    Filename,

    /// Fall back to the embedded EXIF/container date
    Exif,

    /// Try the file name, then the embedded date
    FilenameExif,

    /// Try the embedded date, then the file name
    #[default]
    ExifFilename,
}

impl DateMethod {
    /// Return true if this method needs the embedded metadata of the file.
    pub fn reads_source(self) -> bool {
        matches!(
            self,
            DateMethod::Exif | DateMethod::FilenameExif | DateMethod::ExifFilename
        )
    }
}

impl FromStr for DateMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" => Ok(DateMethod::None),
            "filename" | "name" => Ok(DateMethod::Filename),
            "exif" => Ok(DateMethod::Exif),
            "filename-exif" | "name-exif" => Ok(DateMethod::FilenameExif),
            "exif-filename" | "exif-name" => Ok(DateMethod::ExifFilename),
            _ => Err(ConfigError::InvalidValue {
                flag: "date-method",
                value: s.to_owned(),
            }),
        }
    }
}

impl Display for DateMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DateMethod::None => "none",
            DateMethod::Filename => "filename",
            DateMethod::Exif => "exif",
            DateMethod::FilenameExif => "filename-exif",
            DateMethod::ExifFilename => "exif-filename",
        })
    }
}

/// A temporary copy of a file which cannot be read in place (e.g. a zip entry), deleted when dropped
#[derive(Default)]
pub struct TempFile(pub Option<NamedTempFile>);

impl Drop for TempFile {
    fn drop(&mut self) {
        if self.0.is_some() {
            task::block_in_place(|| drop(self.0.take()))
        }
    }
}

/// A file of a source
#[derive(Clone)]
pub struct FileRef {
    pub fs: Arc<dyn SourceFs>,
    pub path: String,
}

impl FileRef {
    pub fn new(fs: Arc<dyn SourceFs>, path: impl Into<String>) -> Self {
        Self {
            fs,
            path: path.into(),
        }
    }

    pub fn base(&self) -> &str {
        crate::fsys::base(&self.path)
    }

    pub fn dir(&self) -> &str {
        crate::fsys::parent(&self.path)
    }
}

impl Display for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fs.name().is_empty() {
            write!(f, "{}", self.path)
        } else {
            write!(f, "{}:{}", self.fs.name(), self.path)
        }
    }
}

impl Debug for FileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// A single media file considered for import
///
/// A source builds the asset, attaching metadata layers as it discovers them, then sends it away; from then on
/// the receiver owns it.  The resolved view ([Asset::metadata]) is computed on first access and cached, so
/// layers must not change afterwards.
pub struct Asset {
    pub file: FileRef,

    /// Base name of the file in its source, never changed
    pub original_name: String,

    /// Name reported to the server
    pub title: String,

    pub size: u64,
    pub modified: Option<DateTime<Utc>>,

    /// Image or video
    pub kind: FileKind,

    pub name_info: NameInfo,

    /// Record of a prior export by this tool, trusted absolutely
    pub from_application: Option<Metadata>,

    /// XMP or JSON sidecar
    pub from_sidecar: Option<Metadata>,

    /// Embedded EXIF or container metadata
    pub from_source: Option<Metadata>,

    /// XMP sidecar to send along the file
    pub sidecar: Option<FileRef>,

    /// Albums and tags assigned by the source itself (folder names, command line, takeout album folders)
    pub albums: Vec<Album>,
    pub tags: Vec<Tag>,

    /// Server identifier, known once uploaded or matched with a server asset
    pub id: Option<String>,

    date_method: DateMethod,
    resolved: OnceLock<Metadata>,
    temp: TempFile,
}

impl Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Asset({})", self.file)
    }
}

impl Asset {
    pub fn new(file: FileRef, size: u64, kind: FileKind, name_info: NameInfo) -> Self {
        let original_name = file.base().to_owned();

        Self {
            title: original_name.clone(),
            original_name,
            file,
            size,
            modified: None,
            kind,
            name_info,
            from_application: None,
            from_sidecar: None,
            from_source: None,
            sidecar: None,
            albums: Vec::new(),
            tags: Vec::new(),
            id: None,
            date_method: DateMethod::default(),
            resolved: OnceLock::new(),
            temp: TempFile::default(),
        }
    }

    pub fn with_date_method(mut self, date_method: DateMethod) -> Self {
        self.date_method = date_method;
        self
    }

    /// Lowercase extension of the file, with its leading dot
    pub fn ext(&self) -> String {
        filetypes::extension(&self.original_name).to_lowercase()
    }

    pub fn is_image(&self) -> bool {
        self.kind == FileKind::Image
    }

    pub fn is_video(&self) -> bool {
        self.kind == FileKind::Video
    }

    /// Identifier given to the asset on the server: `<title>-<size>`
    pub fn device_asset_id(&self) -> String {
        format!("{}-{}", self.title, self.size)
    }

    /// Read the metadata embedded in the file (EXIF for images, `mvhd` for videos) into the source layer.
    ///
    /// Reading never fails: unreadable files yield an empty layer.  The file is opened anew, so it stays readable
    /// for the upload.
    pub fn read_source_metadata(&mut self, tz: &FixedOffset) {
        let ext = self.ext();

        let metadata = match self.file.fs.open(&self.file.path) {
            Ok(mut reader) => match self.kind {
                FileKind::Image => exif::read_image(&mut reader, &ext, tz),
                FileKind::Video => quicktime::read_video(&mut reader),
                _ => Metadata::default(),
            },
            Err(e) => {
                debug!("unable to open {}: {e:?}", self.file);
                Metadata::default()
            }
        };

        self.from_source = Some(metadata);
    }

    fn layers(&self) -> impl Iterator<Item = &Metadata> {
        [&self.from_application, &self.from_sidecar]
            .into_iter()
            .flatten()
    }

    fn capture_date_from_layers(&self) -> Option<DateTime<Utc>> {
        if let Some(date) = self.layers().find_map(|layer| layer.date_taken) {
            return Some(date);
        }

        let from_name = || self.name_info.taken;
        let from_source = || self.from_source.as_ref().and_then(|layer| layer.date_taken);

        let chosen = match self.date_method {
            DateMethod::None => return None,
            DateMethod::Filename => from_name(),
            DateMethod::Exif => from_source(),
            DateMethod::FilenameExif => from_name().or_else(from_source),
            DateMethod::ExifFilename => from_source().or_else(from_name),
        };

        chosen.or(self.modified)
    }

    fn resolve(&self) -> Metadata {
        let mut resolved = Metadata {
            date_taken: self.capture_date_from_layers(),
            ..Metadata::default()
        };

        let location = self
            .layers()
            .chain(self.from_source.iter())
            .find(|layer| layer.has_gps());

        if let Some(layer) = location {
            resolved.latitude = layer.latitude;
            resolved.longitude = layer.longitude;
        }

        for layer in self.layers() {
            if resolved.title.is_empty() {
                resolved.title = layer.title.clone();
            }

            if resolved.description.is_empty() {
                resolved.description = layer.description.clone();
            }

            if resolved.rating == 0 {
                resolved.rating = layer.rating;
            }

            resolved.favorited |= layer.favorited;
            resolved.archived |= layer.archived;
            resolved.trashed |= layer.trashed;
            resolved.from_partner |= layer.from_partner;

            for album in &layer.albums {
                if !resolved.albums.iter().any(|a| a.title == album.title) {
                    resolved.albums.push(album.clone());
                }
            }

            for tag in &layer.tags {
                if !resolved.tags.contains(tag) {
                    resolved.tags.push(tag.clone());
                }
            }
        }

        for album in &self.albums {
            if !resolved.albums.iter().any(|a| a.title == album.title) {
                resolved.albums.push(album.clone());
            }
        }

        for tag in &self.tags {
            if !resolved.tags.contains(tag) {
                resolved.tags.push(tag.clone());
            }
        }

        resolved
    }

    /// Resolved view of the metadata layers, picking field by field the first layer that knows the answer
    pub fn metadata(&self) -> &Metadata {
        self.resolved.get_or_init(|| self.resolve())
    }

    pub fn capture_date(&self) -> Option<DateTime<Utc>> {
        self.metadata().date_taken
    }

    /// Return a path to the file on the local disk, extracting it to a temporary file if needed.
    ///
    /// This blocks; call it from `task::block_in_place`.
    pub fn local_path(&mut self) -> Result<PathBuf> {
        if let Some(path) = self.file.fs.local_path(&self.file.path) {
            return Ok(path);
        }

        if let Some(temp) = &self.temp.0 {
            return Ok(temp.path().to_path_buf());
        }

        let mut temp = NamedTempFile::new()?;

        self.file
            .fs
            .copy_to(&self.file.path, temp.as_file_mut())
            .map_err(|e| anyhow!("unable to extract {}: {e:?}", self.file))?;

        let path = temp.path().to_path_buf();

        self.temp.0 = Some(temp);

        Ok(path)
    }

    /// Release the temporary copy of the file, if any.  Closing twice is harmless.
    pub fn close(&mut self) {
        if let Some(temp) = self.temp.0.take() {
            if let Err(e) = task::block_in_place(|| temp.close()) {
                debug!("unable to remove temporary copy of {}: {e:?}", self.file);
            }
        }
    }
}

impl Drop for Asset {
    fn drop(&mut self) {
        self.close();
    }
}
