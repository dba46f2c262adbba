//! This module provides the [Registry] type, which classifies files by extension.

use {
    immigrate_shared::SupportedMedia,
    std::{collections::HashMap, sync::Arc},
};

/// What a file is, as far as an import is concerned
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum FileKind {
    Image,
    Video,
    Sidecar,
    Useless,
    Unknown,
}

const DEFAULT_VIDEOS: &[&str] = &[
    ".3gp", ".avi", ".flv", ".insv", ".m2ts", ".m4v", ".mkv", ".mov", ".mp4", ".mpg", ".mts",
    ".webm", ".wmv",
];

const DEFAULT_IMAGES: &[&str] = &[
    ".3fr", ".ari", ".arw", ".avif", ".bmp", ".cap", ".cin", ".cr2", ".cr3", ".crw", ".dcr", ".dng",
    ".erf", ".fff", ".gif", ".heic", ".heif", ".hif", ".iiq", ".insp", ".jpe", ".jpeg", ".jpg",
    ".jxl", ".k25", ".kdc", ".mrw", ".nef", ".orf", ".ori", ".pef", ".png", ".psd", ".raf", ".raw",
    ".rw2", ".rwl", ".sr2", ".srf", ".srw", ".tif", ".tiff", ".webp", ".x3f",
];

const DEFAULT_SIDECARS: &[&str] = &[".xmp", ".json"];

const DEFAULT_USELESS: &[&str] = &[".mp"];

const RAW: &[&str] = &[
    ".3fr", ".ari", ".arw", ".cap", ".cin", ".cr2", ".cr3", ".crw", ".dcr", ".dng", ".erf", ".fff",
    ".iiq", ".k25", ".kdc", ".mrw", ".nef", ".nrw", ".orf", ".ori", ".pef", ".psd", ".raf", ".raw",
    ".rw2", ".rwl", ".sr2", ".srf", ".srw", ".x3f",
];

/// Return the extension of `name`, including the leading dot, or an empty string.
///
/// Like a shell, this considers everything after the last dot of the last path component to be the extension,
/// so "archive.tar.gz" yields ".gz" and ".hidden" yields ".hidden".
pub fn extension(name: &str) -> &str {
    let base = name.rsplit('/').next().unwrap_or(name);

    base.rfind('.').map(|index| &base[index..]).unwrap_or("")
}

/// Return `name` without its extension.
pub fn strip_extension(name: &str) -> &str {
    &name[..name.len() - extension(name).len()]
}

/// Normalize an extension for lookup: lowercase, and `.mp~N` collapsed to `.mp`.
pub fn normalize(ext: &str) -> String {
    let lowercase = ext.to_lowercase();

    match lowercase.strip_prefix(".mp~") {
        Some(suffix) if suffix.chars().all(|c| c.is_ascii_digit()) => ".mp".into(),
        _ => lowercase,
    }
}

/// Return true if `ext` is a Google Motion Photo container extension (`.MP` or `.MP~N`).
pub fn is_motion_container(ext: &str) -> bool {
    normalize(ext) == ".mp"
}

/// Return true if `ext` is a camera raw extension.
pub fn is_raw(ext: &str) -> bool {
    RAW.contains(&normalize(ext).as_str())
}

/// Return true if `ext` is a JPEG extension.
pub fn is_jpeg(ext: &str) -> bool {
    matches!(normalize(ext).as_str(), ".jpg" | ".jpeg" | ".jpe")
}

/// Return true if `ext` is a HEIC/HEIF extension.
pub fn is_heic(ext: &str) -> bool {
    matches!(normalize(ext).as_str(), ".heic" | ".heif" | ".hif")
}

/// Return true if the motion photo container `base` (e.g. "X.MP" or "X.MP~2") has its still image among
/// `images` (lowercase names), either as "X.MP.jpg" or as "X.jpg".
pub fn has_still_image(base: &str, images: &[String]) -> bool {
    let base = base.to_lowercase();
    let stem = strip_extension(&base);

    images.iter().any(|image| {
        let image_stem = strip_extension(image);
        image_stem == base || image_stem == stem
    })
}

/// Maps extensions to [FileKind]s
///
/// A [Registry] starts from a built-in table and may then be replaced by what the server advertises (see
/// [Registry::from_server]).  It is shared between tasks behind an [Arc].
#[derive(Debug, Clone)]
pub struct Registry {
    kinds: HashMap<String, FileKind>,

    /// Sorted list of known extensions, used for prefix queries
    sorted: Vec<String>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(
            DEFAULT_IMAGES
                .iter()
                .map(|ext| (*ext, FileKind::Image))
                .chain(DEFAULT_VIDEOS.iter().map(|ext| (*ext, FileKind::Video)))
                .chain(DEFAULT_SIDECARS.iter().map(|ext| (*ext, FileKind::Sidecar)))
                .chain(DEFAULT_USELESS.iter().map(|ext| (*ext, FileKind::Useless))),
        )
    }
}

impl Registry {
    fn new<'a>(kinds: impl Iterator<Item = (&'a str, FileKind)>) -> Self {
        let kinds = kinds
            .map(|(ext, kind)| (ext.to_lowercase(), kind))
            .collect::<HashMap<_, _>>();

        let mut sorted = kinds.keys().cloned().collect::<Vec<_>>();
        sorted.sort();

        Self { kinds, sorted }
    }

    /// Build the registry from the media types the server supports.
    ///
    /// `.mp` is always useless, while `.json` and `.xmp` are always sidecars.
    pub fn from_server(media: &SupportedMedia) -> Arc<Self> {
        Arc::new(Self::new(
            media
                .image
                .iter()
                .map(|ext| (ext.as_str(), FileKind::Image))
                .chain(media.video.iter().map(|ext| (ext.as_str(), FileKind::Video)))
                .chain(media.sidecar.iter().map(|ext| (ext.as_str(), FileKind::Sidecar)))
                .chain(
                    DEFAULT_SIDECARS
                        .iter()
                        .map(|ext| (*ext, FileKind::Sidecar))
                        .chain(DEFAULT_USELESS.iter().map(|ext| (*ext, FileKind::Useless))),
                ),
        ))
    }

    /// Classify an extension (with its leading dot, any case).
    pub fn kind(&self, ext: &str) -> FileKind {
        self.kinds
            .get(&normalize(ext))
            .copied()
            .unwrap_or(FileKind::Unknown)
    }

    /// Classify a file name by its extension.
    pub fn kind_of(&self, name: &str) -> FileKind {
        self.kind(extension(name))
    }

    /// Return true if `ext` is an image or video extension.
    pub fn is_media(&self, ext: &str) -> bool {
        matches!(self.kind(ext), FileKind::Image | FileKind::Video)
    }

    /// Return true if `ext` is a strict prefix of some known extension, e.g. ".jp" for ".jpg".
    pub fn is_extension_prefix(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();

        if ext.len() < 2 || !ext.starts_with('.') {
            return false;
        }

        let start = self.sorted.partition_point(|known| known.as_str() < ext.as_str());

        self.sorted[start..]
            .iter()
            .take_while(|known| known.starts_with(&ext))
            .any(|known| known.len() > ext.len())
    }

    /// Return true if the file cannot be imported: unknown extension, or an `MVIMG` companion video.
    pub fn is_useless(&self, name: &str) -> bool {
        let base = name.rsplit('/').next().unwrap_or(name);
        let ext = extension(base);

        match self.kind(ext) {
            FileKind::Unknown | FileKind::Useless => true,
            FileKind::Video if base.to_uppercase().starts_with("MVIMG") => true,
            _ => ext.is_empty() && base.to_uppercase().starts_with("MVIMG"),
        }
    }

    /// Return the MIME type sent along a file with extension `ext`.
    pub fn mime_type(&self, ext: &str) -> String {
        let ext = normalize(ext);
        let bare = ext.trim_start_matches('.');

        match (self.kind(&ext), bare) {
            (_, "jpg" | "jpe" | "jpeg") => "image/jpeg".into(),
            (_, "tif") => "image/tiff".into(),
            (_, "mov") => "video/quicktime".into(),
            (_, "mp" | "mp4") => "video/mp4".into(),
            (_, "mkv") => "video/x-matroska".into(),
            (_, "xmp") => "application/xml".into(),
            (_, "json") => "application/json".into(),
            (FileKind::Image, bare) => format!("image/{bare}"),
            (FileKind::Video, bare) => format!("video/{bare}"),
            _ => "application/octet-stream".into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extensions() {
        assert_eq!(".jpg", extension("a/b/IMG_1234.jpg"));
        assert_eq!(".json", extension("IMG_1234.jpg.json"));
        assert_eq!("", extension("dir.d/README"));
        assert_eq!(".MP~2", extension("PXL_20210102_221126856.MP~2"));
        assert_eq!("PXL_20210102_221126856.MP", strip_extension("PXL_20210102_221126856.MP.jpg"));
    }

    #[test]
    fn classification() {
        let registry = Registry::default();

        assert_eq!(FileKind::Image, registry.kind(".JPG"));
        assert_eq!(FileKind::Video, registry.kind(".mp4"));
        assert_eq!(FileKind::Sidecar, registry.kind(".json"));
        assert_eq!(FileKind::Useless, registry.kind(".MP"));
        assert_eq!(FileKind::Unknown, registry.kind(".txt"));
        assert_eq!(registry.kind(".MP"), registry.kind(".MP~2"));
        assert_eq!(FileKind::Image, registry.kind_of("photos/PXL_20210102_221126856.MP.jpg"));
    }

    #[test]
    fn server_overrides() {
        let registry = Registry::from_server(&SupportedMedia {
            image: vec![".jpg".into(), ".heic".into()],
            video: vec![".mp4".into()],
            sidecar: vec![],
        });

        assert_eq!(FileKind::Image, registry.kind(".heic"));
        assert_eq!(FileKind::Unknown, registry.kind(".png"));
        assert_eq!(FileKind::Useless, registry.kind(".mp"));
        assert_eq!(FileKind::Sidecar, registry.kind(".xmp"));
        assert_eq!(FileKind::Sidecar, registry.kind(".json"));
    }

    #[test]
    fn prefixes() {
        let registry = Registry::default();

        assert!(registry.is_extension_prefix(".jp"));
        assert!(registry.is_extension_prefix(".JPE"));
        assert!(registry.is_extension_prefix(".h"));
        assert!(!registry.is_extension_prefix(".jpg"));
        assert!(!registry.is_extension_prefix(".xyz"));
        assert!(!registry.is_extension_prefix("."));
    }

    #[test]
    fn useless_files() {
        let registry = Registry::default();

        assert!(registry.is_useless("notes.txt"));
        assert!(registry.is_useless("PXL_20210102_221126856.MP"));
        assert!(registry.is_useless("MVIMG_20190101_120000"));
        assert!(registry.is_useless("MVIMG_20190101_120000.mp4"));
        assert!(!registry.is_useless("MVIMG_20190101_120000.jpg"));
        assert!(!registry.is_useless("IMG_1234.HEIC"));
    }

    #[test]
    fn raw_and_friends() {
        assert!(is_raw(".CR3"));
        assert!(is_raw(".dng"));
        assert!(!is_raw(".jpg"));
        assert!(is_jpeg(".JPEG"));
        assert!(is_heic(".HEIF"));
        assert!(is_motion_container(".MP~3"));
        assert!(!is_motion_container(".mp4"));

        assert!(has_still_image("X.MP~2", &["x.mp~2.jpg".to_owned()]));
        assert!(has_still_image("X.MP", &["x.jpg".to_owned()]));
        assert!(!has_still_image("X.MP", &["y.jpg".to_owned()]));
    }

    #[test]
    fn mime_types() {
        let registry = Registry::default();

        assert_eq!("image/jpeg", registry.mime_type(".JPG"));
        assert_eq!("image/heic", registry.mime_type(".heic"));
        assert_eq!("video/quicktime", registry.mime_type(".MOV"));
        assert_eq!("video/mp4", registry.mime_type(".MP"));
        assert_eq!("application/octet-stream", registry.mime_type(".txt"));
    }
}
