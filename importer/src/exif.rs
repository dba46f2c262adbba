//! Capture date and location of images, read from their embedded EXIF data

use {
    crate::{metadata::Metadata, quicktime},
    anyhow::Result,
    chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc},
    exif::{Exif, Field, In, Reader, Tag, Value},
    std::io::{BufReader, Cursor, Read},
    tracing::debug,
};

/// Amount of data handed to the EXIF decoder
const EXIF_WINDOW: usize = 64 * 1024;

fn decode_container(head: &[u8]) -> Option<Exif> {
    match Reader::new()
        .continue_on_error(true)
        .read_from_container(&mut BufReader::new(Cursor::new(head)))
    {
        Ok(exif) => Some(exif),
        Err(exif::Error::PartialResult(partial)) => Some(partial.into_inner().0),
        Err(e) => {
            debug!("EXIF container not recognized: {e}");
            None
        }
    }
}

fn decode_raw(tiff: Vec<u8>) -> Option<Exif> {
    match Reader::new().continue_on_error(true).read_raw(tiff) {
        Ok(exif) => Some(exif),
        Err(exif::Error::PartialResult(partial)) => Some(partial.into_inner().0),
        Err(e) => {
            debug!("invalid EXIF data: {e}");
            None
        }
    }
}

/// Locate a TIFF payload in a container the decoder does not understand by scanning for the marker which
/// precedes it (`Exif\0\0` in HEIC files, the `CMT1` box tag in CR3 files).
fn search_tiff(reader: &mut dyn Read, marker: &[u8]) -> Result<Option<Exif>> {
    Ok(
        quicktime::find_pattern(reader, marker, EXIF_WINDOW + marker.len())?
            .and_then(|found| decode_raw(found[marker.len()..].to_vec())),
    )
}

fn ascii(field: &Field) -> Option<String> {
    match &field.value {
        Value::Ascii(values) => values
            .first()
            .map(|value| String::from_utf8_lossy(value).trim_end_matches('\0').trim().to_owned()),
        _ => None,
    }
}

fn rationals(field: &Field) -> Option<Vec<f64>> {
    match &field.value {
        Value::Rational(values) => Some(values.iter().map(|value| value.to_f64()).collect()),
        _ => None,
    }
}

fn field<'a>(exif: &'a Exif, tag: Tag) -> Option<&'a Field> {
    exif.get_field(tag, In::PRIMARY)
}

fn gps_time(exif: &Exif) -> Option<DateTime<Utc>> {
    let stamp = ascii(field(exif, Tag::GPSDateStamp)?)?;
    let date = NaiveDate::parse_from_str(&stamp, "%Y:%m:%d").ok()?;
    let time = rationals(field(exif, Tag::GPSTimeStamp)?)?;

    let naive = date.and_hms_opt(
        *time.first()? as u32,
        *time.get(1)? as u32,
        *time.get(2)? as u32,
    )?;

    Some(Utc.from_utc_datetime(&naive))
}

fn local_time(exif: &Exif, tag: Tag, tz: &FixedOffset) -> Option<DateTime<Utc>> {
    let text = ascii(field(exif, tag)?)?;

    NaiveDateTime::parse_from_str(&text, "%Y:%m:%d %H:%M:%S")
        .ok()
        .and_then(|naive| tz.from_local_datetime(&naive).single())
        .map(|time| time.with_timezone(&Utc))
}

fn coordinate(exif: &Exif, value: Tag, reference: Tag, negative: &str) -> Option<f64> {
    let parts = rationals(field(exif, value)?)?;

    let degrees = parts.first()? + parts.get(1).unwrap_or(&0.0) / 60.0
        + parts.get(2).unwrap_or(&0.0) / 3600.0;

    if field(exif, reference)
        .and_then(ascii)
        .map(|reference| reference.eq_ignore_ascii_case(negative))
        .unwrap_or(false)
    {
        Some(-degrees)
    } else {
        Some(degrees)
    }
}

fn metadata(exif: &Exif, tz: &FixedOffset) -> Metadata {
    Metadata {
        date_taken: gps_time(exif)
            .or_else(|| local_time(exif, Tag::DateTimeOriginal, tz))
            .or_else(|| local_time(exif, Tag::DateTime, tz)),
        latitude: coordinate(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef, "S"),
        longitude: coordinate(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef, "W"),
        ..Metadata::default()
    }
}

/// Read the capture date and GPS location of an image.
///
/// The GPS time stamp is UTC; other dates are interpreted in `tz`.  Errors yield empty metadata.
pub fn read_image(reader: &mut dyn Read, ext: &str, tz: &FixedOffset) -> Metadata {
    match try_read_image(reader, ext) {
        Ok(Some(exif)) => metadata(&exif, tz),
        Ok(None) => Metadata::default(),
        Err(e) => {
            debug!("unable to read EXIF data: {e:?}");
            Metadata::default()
        }
    }
}

fn try_read_image(reader: &mut dyn Read, ext: &str) -> Result<Option<Exif>> {
    let mut head = Vec::with_capacity(EXIF_WINDOW);
    (&mut *reader)
        .take(EXIF_WINDOW as u64)
        .read_to_end(&mut head)?;

    let marker: &[u8] = if ext.eq_ignore_ascii_case(".cr3") {
        b"CMT1"
    } else {
        b"Exif\0\0"
    };

    if let Some(exif) = decode_container(&head) {
        return Ok(Some(exif));
    }

    search_tiff(&mut Cursor::new(head).chain(reader), marker)
}
