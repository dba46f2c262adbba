//! Immigrate shared (e.g. protocol) code
//!
//! This crate contains code shared between the Immigrate importer and client crates.  It consists of the
//! [serde](https://crates.io/crates/serde)-enabled structs and enums which describe what the Immich server sends
//! and receives, plus the [Client] trait: the capability surface the importer consumes.  The importer never talks
//! HTTP itself; it only calls the methods of a [Client].

#![deny(warnings)]

use {
    anyhow::Result,
    async_trait::async_trait,
    chrono::{DateTime, SecondsFormat, Utc},
    futures::stream::BoxStream,
    serde_derive::{Deserialize, Serialize},
    std::{
        fmt::{self, Display},
        path::PathBuf,
    },
};

/// Error reported by a [Client] implementation when the server answers with something other than success
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// The server answered with a non-success HTTP status
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The server answered the ping with something other than "pong"
    #[error("unexpected ping response: {0}")]
    UnexpectedPing(String),
}

/// The user the API key belongs to
#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
}

/// Lists of file extensions the server accepts, by kind
///
/// Extensions include the leading dot, e.g. ".jpg".
#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq)]
pub struct SupportedMedia {
    pub image: Vec<String>,
    pub video: Vec<String>,
    pub sidecar: Vec<String>,
}

/// Asset counters returned by the server
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct AssetStatistics {
    pub images: u64,
    pub videos: u64,
    pub total: u64,
}

/// Filter used when paging through every asset of the server
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AssetQuery {
    pub with_exif: bool,
    pub is_visible: bool,
    pub with_deleted: bool,

    /// Page size
    pub size: u32,

    /// One-based page number
    pub page: u32,
}

impl Default for AssetQuery {
    fn default() -> Self {
        Self {
            with_exif: true,
            is_visible: true,
            with_deleted: true,
            size: 1000,
            page: 1,
        }
    }
}

/// Subset of the EXIF information the server extracted from an asset
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExifInfo {
    pub date_time_original: Option<DateTime<Utc>>,
    pub file_size_in_byte: Option<u64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// An asset as known by the server
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerAsset {
    pub id: String,

    /// The identifier the uploading device gave to the asset, `<file name>-<size>` for assets uploaded by this
    /// tool
    pub device_asset_id: String,

    pub owner_id: String,

    /// Set when the asset belongs to an external library rather than to the user's upload area
    pub library_id: Option<String>,

    pub original_file_name: String,
    pub checksum: String,

    #[serde(default)]
    pub is_trashed: bool,

    #[serde(default)]
    pub is_archived: bool,

    #[serde(default)]
    pub is_favorite: bool,

    pub exif_info: Option<ExifInfo>,
}

impl ServerAsset {
    /// Capture date as extracted by the server, if any
    pub fn capture_date(&self) -> Option<DateTime<Utc>> {
        self.exif_info.as_ref().and_then(|e| e.date_time_original)
    }

    /// File size as extracted by the server, if any
    pub fn file_size(&self) -> Option<u64> {
        self.exif_info.as_ref().and_then(|e| e.file_size_in_byte)
    }
}

/// A server album
#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Album {
    pub id: String,
    pub album_name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub asset_count: u64,
}

/// A server tag
///
/// Tags are hierarchical: `value` is the full path using `/` delimiters while `name` is its last segment.
#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub value: String,
}

/// Outcome of an asset upload
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    /// The server stored a new asset
    Created,

    /// The server already had an asset with the same checksum
    Duplicate,

    /// The server replaced the original of an existing asset
    Replaced,
}

/// Response to an asset upload
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct UploadResponse {
    pub id: String,
    pub status: UploadStatus,
}

/// Per-asset outcome of a bulk operation (album membership, tagging)
///
/// An asset already in the album or already tagged is reported as a success.
#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq)]
pub struct UpdateResult {
    pub id: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Kind of asset as the server names it on the wire
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Eq, PartialEq)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetType {
    Image,
    Video,
    Other,
}

impl Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "IMAGE"),
            Self::Video => write!(f, "VIDEO"),
            Self::Other => write!(f, "OTHER"),
        }
    }
}

/// Everything a [Client] needs to upload one asset
///
/// `file_path` must name a readable local file holding the asset's bytes.  For assets read from an archive, the
/// importer extracts them to a temporary file first.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub device_asset_id: String,
    pub device_id: String,
    pub asset_type: AssetType,
    pub file_created_at: DateTime<Utc>,
    pub file_modified_at: DateTime<Utc>,
    pub is_favorite: bool,
    pub is_archived: bool,
    pub is_read_only: bool,

    /// Extension of the file as sent to the server, with its leading dot
    pub file_extension: String,

    /// Duration of a video as "HH:MM:SS.ffffff"
    pub duration: String,

    /// File name reported to the server
    pub file_name: String,

    pub file_path: PathBuf,

    /// Optional XMP sidecar sent along the asset
    pub sidecar_path: Option<PathBuf>,
}

impl UploadRequest {
    /// Format a timestamp the way the upload form expects it (RFC 3339 in UTC).
    pub fn format_time(time: &DateTime<Utc>) -> String {
        time.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Return the name of the file as sent to the server.
    ///
    /// Google Motion Photo containers (`.MP`) are renamed to `.mp4` on the wire.
    pub fn wire_file_name(&self) -> String {
        let lowercase = self.file_extension.to_lowercase();

        if lowercase == ".mp" || lowercase.starts_with(".mp~") {
            let stem = self
                .file_name
                .strip_suffix(&self.file_extension)
                .unwrap_or(&self.file_name);

            format!("{stem}.mp4")
        } else {
            self.file_name.clone()
        }
    }
}

/// The capability surface of an Immich server, as consumed by the importer
///
/// Implementations are expected to handle transient errors and timeouts themselves.  Every method may be
/// cancelled by dropping its future.
#[async_trait]
pub trait Client: Send + Sync {
    /// Check the server is alive (it answers "pong").
    async fn ping_server(&self) -> Result<()>;

    /// Return the user owning the API key.
    async fn validate_connection(&self) -> Result<User>;

    /// Return the extensions the server accepts.
    async fn get_supported_media_types(&self) -> Result<SupportedMedia>;

    /// Return the asset counters, used to pre-size the server index.
    async fn get_asset_statistics(&self) -> Result<AssetStatistics>;

    /// Stream every asset matching `query`, paging through the server with the query's page size.
    fn get_all_assets(&self, query: AssetQuery) -> BoxStream<'_, Result<ServerAsset>>;

    /// Return every album of the user.
    async fn get_all_albums(&self) -> Result<Vec<Album>>;

    /// Return the IDs of the assets of an album.
    async fn get_album_asset_ids(&self, album_id: &str) -> Result<Vec<String>>;

    /// Upload one asset.
    async fn asset_upload(&self, request: &UploadRequest) -> Result<UploadResponse>;

    /// Delete assets, bypassing the trash when `force` is set.
    async fn delete_assets(&self, ids: &[String], force: bool) -> Result<()>;

    /// Create an album holding `asset_ids`.
    async fn create_album(
        &self,
        title: &str,
        description: &str,
        asset_ids: &[String],
    ) -> Result<Album>;

    /// Add assets to an existing album.
    async fn add_assets_to_album(
        &self,
        album_id: &str,
        asset_ids: &[String],
    ) -> Result<Vec<UpdateResult>>;

    /// Create the tags (and their parents) which do not exist yet, and return all of them.
    async fn upsert_tags(&self, values: &[String]) -> Result<Vec<Tag>>;

    /// Attach a tag to assets.
    async fn tag_assets(&self, tag_id: &str, asset_ids: &[String]) -> Result<Vec<UpdateResult>>;

    /// Stack assets; the first ID is the cover.  Return the ID of the stack.
    async fn create_stack(&self, asset_ids: &[String]) -> Result<String>;
}
