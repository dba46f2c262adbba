//! Readers for metadata stored beside media files: XMP sidecars, Google Photos JSON records, and JSON records
//! written by a previous export of this tool (or of immich-go)

use {
    crate::metadata::{Album, Metadata, Tag},
    anyhow::Result,
    chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc},
    lazy_static::lazy_static,
    regex::Regex,
    serde::{Deserialize, Deserializer},
    serde_derive::Deserialize,
    serde_json::Value,
    tracing::debug,
};

/// Markers identifying JSON files written by this tool or by immich-go
pub const TOOL_MARKERS: &[&str] = &["immich-go version", "immigrate version"];

/// Return true if `content` is a JSON record written by this tool rather than by Google Photos.
pub fn is_tool_record(content: &[u8]) -> bool {
    TOOL_MARKERS.iter().any(|marker| {
        content
            .windows(marker.len())
            .any(|window| window == marker.as_bytes())
    })
}

lazy_static! {
    static ref DATE_TIME_ORIGINAL: (Regex, Regex) = property("exif:DateTimeOriginal");
    static ref GPS_LATITUDE: (Regex, Regex) = property("exif:GPSLatitude");
    static ref GPS_LONGITUDE: (Regex, Regex) = property("exif:GPSLongitude");
    static ref RATING: (Regex, Regex) = property("xmp:Rating");
    static ref DESCRIPTION: Regex = Regex::new(
        r"(?s)<(?:dc:description|tiff:ImageDescription)>.*?<rdf:li[^>]*>(.*?)</rdf:li>"
    )
    .unwrap();
    static ref DIGIKAM_TAGS: Regex =
        Regex::new(r"(?s)<digiKam:TagsList>(.*?)</digiKam:TagsList>").unwrap();
    static ref LIGHTROOM_TAGS: Regex =
        Regex::new(r"(?s)<lr:hierarchicalSubject>(.*?)</lr:hierarchicalSubject>").unwrap();
    static ref LIST_ITEM: Regex = Regex::new(r"(?s)<rdf:li[^>]*>(.*?)</rdf:li>").unwrap();
    static ref GPS_COORDINATE: Regex =
        Regex::new(r"^(\d+),(\d+(?:\.\d+)?)(?:,(\d+(?:\.\d+)?))?([NSEW])$").unwrap();
    static ref UNSAFE_TITLE_CHARACTERS: Regex = Regex::new(r#"[\r\n\\/:*?"<>|]"#).unwrap();
}

/// Build the regexes matching an XMP property written as an attribute or as an element.
fn property(name: &str) -> (Regex, Regex) {
    let name = regex::escape(name);

    (
        Regex::new(&format!(r#"\b{name}\s*=\s*"([^"]*)""#)).unwrap(),
        Regex::new(&format!(r"<{name}(?:\s[^>]*)?>([^<]*)</{name}>")).unwrap(),
    )
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#10;", "\n")
        .replace("&amp;", "&")
}

fn find_property(xmp: &str, (attribute, element): &(Regex, Regex)) -> Option<String> {
    attribute
        .captures(xmp)
        .or_else(|| element.captures(xmp))
        .map(|captures| unescape(captures[1].trim()))
        .filter(|value| !value.is_empty())
}

/// Parse an XMP date, which may or may not carry a time zone designator.
fn xmp_date(text: &str, tz: &FixedOffset) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|time| time.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
                .and_then(|naive| tz.from_local_datetime(&naive).single())
                .map(|time| time.with_timezone(&Utc))
        })
}

/// Parse an XMP GPS coordinate, written as "DDD,MM.mmk", "DDD,MM,SSk" or as a plain decimal number.
pub fn gps_coordinate(text: &str) -> Option<f64> {
    if let Some(captures) = GPS_COORDINATE.captures(text.trim()) {
        let degrees = captures[1].parse::<f64>().ok()?;
        let minutes = captures[2].parse::<f64>().ok()?;
        let seconds = captures
            .get(3)
            .and_then(|seconds| seconds.as_str().parse::<f64>().ok())
            .unwrap_or(0.0);

        let value = degrees + minutes / 60.0 + seconds / 3600.0;

        Some(if matches!(&captures[4], "S" | "W") {
            -value
        } else {
            value
        })
    } else {
        text.trim().parse().ok()
    }
}

fn list_items(block: &str) -> impl Iterator<Item = String> + '_ {
    LIST_ITEM
        .captures_iter(block)
        .map(|captures| unescape(captures[1].trim()))
        .filter(|item| !item.is_empty())
}

/// Read an XMP sidecar.
///
/// Dates without a time zone designator are interpreted in `tz`.  Unparseable values are skipped.
pub fn read_xmp(xmp: &str, tz: &FixedOffset) -> Metadata {
    let mut metadata = Metadata {
        date_taken: find_property(xmp, &DATE_TIME_ORIGINAL).and_then(|date| xmp_date(&date, tz)),
        latitude: find_property(xmp, &GPS_LATITUDE).and_then(|text| gps_coordinate(&text)),
        longitude: find_property(xmp, &GPS_LONGITUDE).and_then(|text| gps_coordinate(&text)),
        description: DESCRIPTION
            .captures(xmp)
            .map(|captures| unescape(captures[1].trim()))
            .unwrap_or_default(),
        rating: find_property(xmp, &RATING)
            .and_then(|rating| rating.parse::<i32>().ok())
            .map(|rating| rating.clamp(0, 5) as u8)
            .unwrap_or(0),
        ..Metadata::default()
    };

    let digikam = DIGIKAM_TAGS.captures_iter(xmp).flat_map(|captures| {
        list_items(captures.get(1).map_or("", |m| m.as_str())).collect::<Vec<_>>()
    });

    let lightroom = LIGHTROOM_TAGS.captures_iter(xmp).flat_map(|captures| {
        list_items(captures.get(1).map_or("", |m| m.as_str()))
            .map(|item| item.replace('|', "/"))
            .collect::<Vec<_>>()
    });

    for value in digikam.chain(lightroom) {
        let tag = Tag::new(&value);

        if !tag.value.is_empty() && !metadata.tags.contains(&tag) {
            metadata.tags.push(tag);
        }
    }

    metadata
}

/// Deserialize a flag Google writes either as a boolean or as an object whose mere presence means true.
fn presence<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Bool(value) => value,
        Value::Null => false,
        _ => true,
    })
}

/// Deserialize a timestamp Google writes as a string (or, rarely, as a number).
fn timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(value) => value,
        Value::Number(value) => value.to_string(),
        _ => String::new(),
    })
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TimeObject {
    #[serde(default, deserialize_with = "timestamp")]
    pub timestamp: String,
}

impl TimeObject {
    /// Return the time, or `None` for a missing or zero timestamp.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        match self.timestamp.trim().parse::<i64>() {
            Ok(0) | Err(_) => None,
            Ok(seconds) => Utc.timestamp_opt(seconds, 0).single(),
        }
    }
}

#[derive(Deserialize, Debug, Copy, Clone, Default, PartialEq)]
pub struct GeoData {
    #[serde(default)]
    pub latitude: f64,

    #[serde(default)]
    pub longitude: f64,
}

impl GeoData {
    fn is_set(&self) -> bool {
        self.latitude != 0.0 || self.longitude != 0.0
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Person {
    #[serde(default)]
    pub name: String,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    #[serde(default, deserialize_with = "presence")]
    pub from_partner_sharing: bool,

    #[serde(default, deserialize_with = "presence")]
    pub from_shared_album: bool,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct NarrativeEnrichment {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct Location {
    #[serde(default)]
    name: String,

    #[serde(default)]
    description: String,

    #[serde(default, rename = "latitudeE7")]
    latitude_e7: i64,

    #[serde(default, rename = "longitudeE7")]
    longitude_e7: i64,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct LocationEnrichment {
    #[serde(default)]
    location: Vec<Location>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct Enrichment {
    narrative_enrichment: Option<NarrativeEnrichment>,
    location_enrichment: Option<LocationEnrichment>,
}

/// Album enrichments flattened into a text and a location
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Enrichments {
    pub text: String,
    pub latitude: f64,
    pub longitude: f64,
}

fn append(text: &mut String, separator: &str, addition: &str) {
    if !text.is_empty() {
        text.push_str(separator);
    }

    text.push_str(addition);
}

fn enrichments<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Enrichments>, D::Error> {
    let list = Option::<Vec<Enrichment>>::deserialize(deserializer)?;

    Ok(list.map(|list| {
        let mut result = Enrichments::default();

        for enrichment in list {
            if let Some(narrative) = enrichment.narrative_enrichment {
                if !narrative.text.is_empty() {
                    append(&mut result.text, "\n", &narrative.text);
                }
            }

            for location in enrichment
                .location_enrichment
                .map(|enrichment| enrichment.location)
                .unwrap_or_default()
            {
                if !location.name.is_empty() {
                    append(&mut result.text, "\n", &location.name);
                }

                if !location.description.is_empty() {
                    append(&mut result.text, " - ", &location.description);
                }

                result.latitude = location.latitude_e7 as f64 / 1e7;
                result.longitude = location.longitude_e7 as f64 / 1e7;
            }
        }

        result
    }))
}

/// A Google Photos JSON record, describing either an asset or an album
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GoogleRecord {
    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub category: String,

    pub date: Option<TimeObject>,
    pub photo_taken_time: Option<TimeObject>,
    pub geo_data_exif: Option<GeoData>,
    pub geo_data: Option<GeoData>,

    #[serde(default, deserialize_with = "presence")]
    pub trashed: bool,

    #[serde(default, deserialize_with = "presence")]
    pub archived: bool,

    #[serde(default, deserialize_with = "presence")]
    pub favorited: bool,

    #[serde(default, deserialize_with = "enrichments")]
    pub enrichments: Option<Enrichments>,

    #[serde(default)]
    pub people: Vec<Person>,

    #[serde(default)]
    pub google_photos_origin: Origin,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct LegacyAlbum {
    album_data: GoogleRecord,
}

/// Replace the characters which may not appear in a file name.
pub fn sanitize_title(title: &str) -> String {
    UNSAFE_TITLE_CHARACTERS.replace_all(title, "_").into_owned()
}

impl GoogleRecord {
    /// Parse a record, unwrapping legacy album records (`{"albumData": {...}}`).
    pub fn parse(content: &[u8]) -> Result<Self> {
        if let Ok(legacy) = serde_json::from_slice::<LegacyAlbum>(content) {
            return Ok(legacy.album_data);
        }

        Ok(serde_json::from_slice(content)?)
    }

    /// Return true if this record describes a media file.
    pub fn is_asset(&self) -> bool {
        self.photo_taken_time
            .as_ref()
            .map(|time| !time.timestamp.is_empty())
            .unwrap_or(false)
    }

    /// Return true if this record describes an album.
    pub fn is_album(&self) -> bool {
        !self.is_asset() && (self.date.is_some() || !self.title.is_empty())
    }

    /// Return the location, preferring the one extracted from EXIF unless it is unset.
    pub fn location(&self) -> Option<GeoData> {
        self.geo_data_exif
            .filter(GeoData::is_set)
            .or_else(|| self.geo_data.filter(GeoData::is_set))
    }

    /// Convert an asset record to [Metadata].  Names of people become `People/<name>` tags when `people_tags` is
    /// set.
    pub fn to_metadata(&self, people_tags: bool) -> Metadata {
        let location = self.location();

        Metadata {
            date_taken: self.photo_taken_time.as_ref().and_then(TimeObject::time),
            latitude: location.map(|location| location.latitude),
            longitude: location.map(|location| location.longitude),
            title: sanitize_title(&self.title),
            description: self.description.clone(),
            favorited: self.favorited,
            archived: self.archived,
            trashed: self.trashed,
            from_partner: self.google_photos_origin.from_partner_sharing,
            tags: if people_tags {
                self.people
                    .iter()
                    .filter(|person| !person.name.is_empty())
                    .map(|person| Tag::new(&format!("People/{}", person.name)))
                    .collect()
            } else {
                Vec::new()
            },
            ..Metadata::default()
        }
    }

    /// Convert an album record to an [Album], named `fallback_title` if the record has no title.
    pub fn to_album(&self, fallback_title: &str) -> Album {
        let enrichments = self.enrichments.clone().unwrap_or_default();

        let mut description = self.description.clone();

        if !enrichments.text.is_empty() {
            append(&mut description, "\n", &enrichments.text);
        }

        Album {
            title: if self.title.trim().is_empty() {
                fallback_title.to_owned()
            } else {
                self.title.clone()
            },
            description,
            latitude: enrichments.latitude,
            longitude: enrichments.longitude,
        }
    }
}

/// A JSON record written beside a file by a previous export of this tool
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRecord {
    #[serde(default)]
    pub file_name: String,

    pub date_taken: Option<DateTime<Utc>>,

    #[serde(default)]
    pub latitude: f64,

    #[serde(default)]
    pub longitude: f64,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub albums: Vec<Album>,

    #[serde(default)]
    pub tags: Vec<Tag>,

    #[serde(default)]
    pub rating: u8,

    #[serde(default)]
    pub trashed: bool,

    #[serde(default)]
    pub archived: bool,

    #[serde(default)]
    pub favorited: bool,

    #[serde(default)]
    pub from_partner: bool,
}

/// Read a JSON record written by this tool.  Unparseable records yield empty metadata.
pub fn read_application_record(content: &[u8]) -> Metadata {
    match serde_json::from_slice::<ApplicationRecord>(content) {
        Ok(record) => {
            let has_gps = record.latitude != 0.0 || record.longitude != 0.0;

            Metadata {
                date_taken: record.date_taken,
                latitude: has_gps.then_some(record.latitude),
                longitude: has_gps.then_some(record.longitude),
                title: record.file_name,
                description: record.description,
                favorited: record.favorited,
                archived: record.archived,
                trashed: record.trashed,
                from_partner: record.from_partner,
                albums: record.albums,
                tags: record.tags,
                rating: record.rating.min(5),
            }
        }
        Err(e) => {
            debug!("invalid application record: {e}");
            Metadata::default()
        }
    }
}
