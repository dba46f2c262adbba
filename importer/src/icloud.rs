//! Capture dates and albums from the CSV files of an iCloud Photos export
//!
//! An export holds a `Photo Details.csv` per part, listing the original creation date of every file, an
//! `Albums` folder with one CSV per album, and a `Memories` folder with one CSV per memory.  Album CSVs have a
//! single column of file names.

use {
    crate::{
        fsys::{self, SourceFs},
        metadata::Album,
    },
    anyhow::{anyhow, Result},
    chrono::{DateTime, NaiveDateTime, TimeZone, Utc},
    std::collections::HashMap,
    tracing::{info, warn},
};

/// What the export says about one file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ICloudMeta {
    pub albums: Vec<Album>,
    pub original_creation_date: Option<DateTime<Utc>>,
}

/// Parse an iCloud date such as "Saturday January 6,2024 8:10 PM GMT".
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();

    NaiveDateTime::parse_from_str(text, "%A %B %d,%Y %I:%M %p GMT")
        .or_else(|_| {
            let stripped = text.replace(" AM ", " ").replace(" PM ", " ");
            NaiveDateTime::parse_from_str(&stripped, "%A %B %d,%Y %H:%M GMT")
        })
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn records(content: &[u8]) -> Result<Vec<csv::StringRecord>> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(content)
        .records()
        .map(|record| record.map_err(|e| anyhow!("{e}")))
        .collect()
}

/// Per file name metadata gathered from the CSVs of an export
#[derive(Debug, Default)]
pub struct ICloudCatalog {
    files: HashMap<String, ICloudMeta>,
}

impl ICloudCatalog {
    /// Read the details CSV: 8 columns, the first being the file name and the sixth its creation date.
    pub fn read_photo_details(&mut self, content: &[u8]) -> Result<()> {
        for record in records(content)? {
            if record.len() != 8 {
                return Err(anyhow!("invalid record: {record:?}"));
            }

            let date = parse_date(&record[5])
                .ok_or_else(|| anyhow!("invalid original creation date: {}", &record[5]))?;

            self.files
                .entry(record[0].to_owned())
                .or_default()
                .original_creation_date = Some(date);
        }

        Ok(())
    }

    /// Read an album CSV titled `title`.
    pub fn read_album(&mut self, title: &str, content: &[u8]) -> Result<()> {
        for record in records(content)? {
            if record.len() != 1 {
                return Err(anyhow!("invalid record: {record:?}"));
            }

            let albums = &mut self.files.entry(record[0].to_owned()).or_default().albums;

            if !albums.iter().any(|album| album.title == title) {
                albums.push(Album::named(title));
            }
        }

        Ok(())
    }

    /// Walk `fs` for the CSVs of an export.  Memories become albums only if `memories` is set.
    pub fn scan(&mut self, fs: &dyn SourceFs, dir: &str, memories: bool) -> Result<()> {
        for entry in fs.read_dir(dir)? {
            let path = fsys::join(dir, &entry.name);

            if entry.is_dir {
                self.scan(fs, &path, memories)?;
                continue;
            }

            let Some(stem) = entry
                .name
                .strip_suffix(".csv")
                .or_else(|| entry.name.strip_suffix(".CSV"))
            else {
                continue;
            };

            let folder = fsys::base(dir);

            let result = if stem.starts_with("Photo Details") {
                self.read_photo_details(&fs.read(&path)?)
            } else if folder == "Albums" {
                info!("iCloud album {stem}");
                self.read_album(stem, &fs.read(&path)?)
            } else if folder == "Memories" && memories {
                info!("iCloud memory {stem}");
                self.read_album(&format!("Memory {stem}"), &fs.read(&path)?)
            } else {
                Ok(())
            };

            if let Err(e) = result {
                warn!("unable to read {path}: {e:?}");
            }
        }

        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ICloudMeta> {
        self.files.get(name)
    }
}
