//! Plain data records describing what a metadata source knows about an asset

use {
    chrono::{DateTime, Utc},
    serde_derive::{Deserialize, Serialize},
};

/// A local album an asset belongs to
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Album {
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub latitude: f64,

    #[serde(default)]
    pub longitude: f64,
}

impl Album {
    pub fn named(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// A local tag, hierarchical with `/` delimiters
#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Tag {
    /// Last segment of the value
    pub name: String,

    /// Full path of the tag, e.g. "People/Alice"
    pub value: String,
}

impl Tag {
    pub fn new(value: &str) -> Self {
        let value = value.trim_matches('/').to_owned();

        Self {
            name: value.rsplit('/').next().unwrap_or(&value).to_owned(),
            value,
        }
    }
}

/// Metadata as extracted from one source (embedded EXIF, container atoms, a sidecar, an export record)
///
/// Every field is optional; an empty record means the source did not know anything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub date_taken: Option<DateTime<Utc>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub title: String,
    pub description: String,
    pub favorited: bool,
    pub archived: bool,
    pub trashed: bool,
    pub from_partner: bool,
    pub albums: Vec<Album>,
    pub tags: Vec<Tag>,

    /// Rating from 0 to 5
    pub rating: u8,
}

impl Metadata {
    /// Return true if both coordinates are known and not both zero.
    pub fn has_gps(&self) -> bool {
        matches!(
            (self.latitude, self.longitude),
            (Some(latitude), Some(longitude)) if latitude != 0.0 || longitude != 0.0
        )
    }

    /// Return true if the record carries nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tags() {
        assert_eq!(
            Tag {
                name: "Alice".into(),
                value: "People/Alice".into()
            },
            Tag::new("/People/Alice")
        );

        assert_eq!("holidays", Tag::new("holidays").name);
    }

    #[test]
    fn gps() {
        let mut metadata = Metadata::default();
        assert!(!metadata.has_gps());

        metadata.latitude = Some(0.0);
        metadata.longitude = Some(0.0);
        assert!(!metadata.has_gps());

        metadata.latitude = Some(48.8029439);
        assert!(metadata.has_gps());
        assert!(!metadata.is_empty());
    }
}
