//! Capture dates of MP4/QuickTime videos, read from the `mvhd` atom
//!
//! The atom tree is not walked.  Instead, the file is scanned linearly for the atom's tag, which is good enough to
//! find the movie header of files produced by phones and cameras.

use {
    crate::metadata::Metadata,
    anyhow::Result,
    chrono::{DateTime, Datelike, TimeZone, Utc},
    std::io::Read,
    tracing::debug,
};

/// Size of the sliding buffer used when scanning files for a marker
pub const SEARCH_BUFFER_SIZE: usize = 32 * 1024;

const SECONDS_FROM_1904_TO_1970: i64 = 2_082_844_800;

/// Scan `reader` for `pattern` and return at most `length` bytes starting at its first occurrence, or `None` if
/// the pattern does not appear before the end of the stream.
pub fn find_pattern(
    reader: &mut dyn Read,
    pattern: &[u8],
    length: usize,
) -> Result<Option<Vec<u8>>> {
    let mut buffer = vec![0; SEARCH_BUFFER_SIZE.max(pattern.len() * 2)];
    let mut filled = 0;

    loop {
        let count = reader.read(&mut buffer[filled..])?;

        if count == 0 {
            return Ok(None);
        }

        filled += count;

        if let Some(index) = buffer[..filled]
            .windows(pattern.len())
            .position(|window| window == pattern)
        {
            let mut found = buffer[index..filled].to_vec();

            if found.len() < length {
                (&mut *reader)
                    .take((length - found.len()) as u64)
                    .read_to_end(&mut found)?;
            }

            found.truncate(length);

            return Ok(Some(found));
        }

        // Keep the tail in case the pattern straddles two reads.
        let keep = (pattern.len() - 1).min(filled);
        buffer.copy_within(filled - keep..filled, 0);
        filled = keep;
    }
}

fn mac_time(seconds: u64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(
        i64::try_from(seconds).ok()? - SECONDS_FROM_1904_TO_1970,
        0,
    )
    .single()
}

/// Decode the times of an `mvhd` atom starting with its tag.
///
/// Return the modification and creation times, in that order.
fn decode_mvhd(atom: &[u8]) -> Option<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
    let version = *atom.get(4)?;
    let times = atom.get(8..)?;

    if version == 0 {
        let first = u32::from_be_bytes(times.get(0..4)?.try_into().ok()?);
        let second = u32::from_be_bytes(times.get(4..8)?.try_into().ok()?);

        Some((mac_time(first.into()), mac_time(second.into())))
    } else {
        let first = u64::from_be_bytes(times.get(0..8)?.try_into().ok()?);
        let second = u64::from_be_bytes(times.get(8..16)?.try_into().ok()?);

        Some((mac_time(first), mac_time(second)))
    }
}

/// Read the capture date of a video.
///
/// The creation time is used unless it predates 2000 (cameras without a clock write zero), in which case the
/// modification time is used.  Errors yield empty metadata.
pub fn read_video(reader: &mut dyn Read) -> Metadata {
    let atom = match find_pattern(reader, b"mvhd", 24) {
        Ok(Some(atom)) => atom,
        Ok(None) => {
            debug!("no mvhd atom found");
            return Metadata::default();
        }
        Err(e) => {
            debug!("unable to scan video: {e:?}");
            return Metadata::default();
        }
    };

    let date_taken = decode_mvhd(&atom).and_then(|(modification, creation)| match creation {
        Some(creation) if creation.year() >= 2000 => Some(creation),
        _ => modification.filter(|time| time.year() >= 2000),
    });

    Metadata {
        date_taken,
        ..Metadata::default()
    }
}
