//! Filters applied to assets before grouping (date range, extensions) and to groups afterwards (stacking
//! policies)

use {
    crate::{
        asset::Asset,
        banned::BannedFiles,
        filetypes,
        groups::{Group, GroupKind},
        ConfigError,
    },
    chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, Utc},
    std::{
        fmt::{self, Display},
        str::FromStr,
    },
    structopt::StructOpt,
};

/// Half-open range of capture dates, in local time
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct DateRange {
    /// `None` when unset, in which case every asset is in range
    range: Option<(NaiveDateTime, NaiveDateTime)>,
}

impl DateRange {
    pub fn is_set(&self) -> bool {
        self.range.is_some()
    }

    /// Return true if `date` falls within the range.  An unknown date is never within a set range.
    pub fn contains(&self, date: Option<DateTime<Utc>>, tz: &FixedOffset) -> bool {
        match (self.range, date) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some((after, before)), Some(date)) => {
                let local = date.with_timezone(tz).naive_local();
                after <= local && local < before
            }
        }
    }
}

fn parse_day(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}

fn next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

impl FromStr for DateRange {
    type Err = ConfigError;

    /// Parse "YYYY", "YYYY-MM", "YYYY-MM-DD", or "YYYY-MM-DD,YYYY-MM-DD" (both days included).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidValue {
            flag: "date-range",
            value: s.to_owned(),
        };

        let (after, before) = match s.len() {
            4 => {
                let after = parse_day(&format!("{s}-01-01")).ok_or_else(invalid)?;
                (
                    after,
                    NaiveDate::from_ymd_opt(after.year() + 1, 1, 1).ok_or_else(invalid)?,
                )
            }
            7 => {
                let after = parse_day(&format!("{s}-01")).ok_or_else(invalid)?;
                (after, next_month(after).ok_or_else(invalid)?)
            }
            10 => {
                let after = parse_day(s).ok_or_else(invalid)?;
                (after, after.succ_opt().ok_or_else(invalid)?)
            }
            21 => {
                let (after, before) = s.split_once(',').ok_or_else(invalid)?;
                (
                    parse_day(after).ok_or_else(invalid)?,
                    parse_day(before)
                        .and_then(|before| before.succ_opt())
                        .ok_or_else(invalid)?,
                )
            }
            _ => return Err(invalid()),
        };

        if before <= after {
            return Err(invalid());
        }

        Ok(Self {
            range: Some((
                after.and_hms_opt(0, 0, 0).ok_or_else(invalid)?,
                before.and_hms_opt(0, 0, 0).ok_or_else(invalid)?,
            )),
        })
    }
}

impl Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.range {
            None => write!(f, "unset"),
            Some((after, before)) => write!(
                f,
                "[{}, {})",
                after.format("%Y-%m-%d"),
                before.format("%Y-%m-%d")
            ),
        }
    }
}

/// A comma separated list of extensions, normalized to lowercase with a leading dot
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ExtensionList(Vec<String>);

impl ExtensionList {
    /// Return true if the list is empty or holds `ext`.
    pub fn includes(&self, ext: &str) -> bool {
        self.0.is_empty() || self.0.contains(&ext.to_lowercase())
    }

    /// Return true if the list holds `ext`.
    pub fn excludes(&self, ext: &str) -> bool {
        self.0.contains(&ext.to_lowercase())
    }
}

impl FromStr for ExtensionList {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(
            s.split(',')
                .map(|ext| ext.trim().to_lowercase())
                .filter(|ext| !ext.is_empty())
                .map(|ext| {
                    if ext.starts_with('.') {
                        ext
                    } else {
                        format!(".{ext}")
                    }
                })
                .collect(),
        ))
    }
}

impl Display for ExtensionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}

macro_rules! policy {
    (@first $first:literal $(| $rest:literal)*) => { $first };

    ($(#[$doc:meta])* $name:ident, $flag:literal { $($variant:ident => $($text:literal)|+,)+ }) => {
        $(#[$doc])*
        #[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
        pub enum $name {
            #[default]
            $($variant,)+
        }

        impl FromStr for $name {
            type Err = ConfigError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($($text)|+ => Ok($name::$variant),)+
                    _ => Err(ConfigError::InvalidValue {
                        flag: $flag,
                        value: s.to_owned(),
                    }),
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self {
                    $($name::$variant => policy!(@first $($text)|+),)+
                })
            }
        }
    };
}

policy!(
    /// What to do with bursts
    StackPolicy, "manage-burst" {
        Nothing => "nostack" | "",
        Stack => "stack",
        StackKeepRaw => "stackkeepraw",
        StackKeepJpg => "stackkeepjpeg" | "stackkeepjpg",
    }
);

policy!(
    /// What to do with raw+JPEG pairs
    RawJpgPolicy, "manage-raw-jpeg" {
        Nothing => "nostack" | "",
        KeepRaw => "keepraw",
        KeepJpg => "keepjpg",
        StackCoverRaw => "stackcoverraw",
        StackCoverJpg => "stackcoverjpg",
    }
);

policy!(
    /// What to do with HEIC+JPEG pairs
    HeicJpgPolicy, "manage-heic-jpeg" {
        Nothing => "nostack" | "",
        KeepHeic => "keepheic",
        KeepJpg => "keepjpg",
        StackCoverHeic => "stackcoverheic",
        StackCoverJpg => "stackcoverjpg",
    }
);

fn is_jpeg(asset: &Asset) -> bool {
    filetypes::is_jpeg(&asset.ext())
}

fn is_raw(asset: &Asset) -> bool {
    filetypes::is_raw(&asset.ext())
}

fn is_heic(asset: &Asset) -> bool {
    filetypes::is_heic(&asset.ext())
}

/// Keep only the members matching `keep`, unless none does.
fn keep_only(group: &mut Group, reason: &str, keep: fn(&Asset) -> bool) {
    if group.assets.iter().any(keep) {
        group.remove_where(reason, |asset| !keep(asset));
    }
}

fn cover_with(group: &mut Group, cover: fn(&Asset) -> bool) {
    if let Some(index) = group.assets.iter().position(cover) {
        group.set_cover(index);
    }
}

/// Post-grouping policies
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupFilters {
    pub bursts: StackPolicy,
    pub raw_jpg: RawJpgPolicy,
    pub heic_jpg: HeicJpgPolicy,
}

impl GroupFilters {
    /// Apply the policy matching the kind of `group`.  Removed members land in `group.removed`.
    pub fn apply(&self, group: &mut Group) {
        match group.kind {
            GroupKind::Burst => match self.bursts {
                StackPolicy::Nothing => group.kind = GroupKind::None,
                StackPolicy::Stack => (),
                StackPolicy::StackKeepRaw => {
                    keep_only(group, "keep only raw files in burst", is_raw)
                }
                StackPolicy::StackKeepJpg => {
                    keep_only(group, "keep only JPEG files in burst", is_jpeg)
                }
            },

            GroupKind::RawJpg => match self.raw_jpg {
                RawJpgPolicy::Nothing => group.kind = GroupKind::None,
                RawJpgPolicy::KeepRaw => {
                    keep_only(group, "keep only raw files in raw/JPEG pair", is_raw)
                }
                RawJpgPolicy::KeepJpg => {
                    keep_only(group, "keep only JPEG files in raw/JPEG pair", is_jpeg)
                }
                RawJpgPolicy::StackCoverRaw => cover_with(group, is_raw),
                RawJpgPolicy::StackCoverJpg => cover_with(group, is_jpeg),
            },

            GroupKind::HeicJpg => match self.heic_jpg {
                HeicJpgPolicy::Nothing => group.kind = GroupKind::None,
                HeicJpgPolicy::KeepHeic => {
                    keep_only(group, "keep only HEIC files in HEIC/JPEG pair", is_heic)
                }
                HeicJpgPolicy::KeepJpg => {
                    keep_only(group, "keep only JPEG files in HEIC/JPEG pair", is_jpeg)
                }
                HeicJpgPolicy::StackCoverHeic => cover_with(group, is_heic),
                HeicJpgPolicy::StackCoverJpg => cover_with(group, is_jpeg),
            },

            GroupKind::None | GroupKind::LivePhoto | GroupKind::MotionPhoto => (),
        }
    }
}

/// Selection flags shared by every import command
#[derive(StructOpt, Debug, Clone, Default)]
pub struct ImportFilters {
    /// Import only assets captured in this range: YYYY, YYYY-MM, YYYY-MM-DD or YYYY-MM-DD,YYYY-MM-DD
    #[structopt(long)]
    pub date_range: Option<DateRange>,

    /// Comma separated extensions to import, all supported ones if empty
    #[structopt(long, default_value = "")]
    pub include_extensions: ExtensionList,

    /// Comma separated extensions to skip
    #[structopt(long, default_value = "")]
    pub exclude_extensions: ExtensionList,

    /// Comma separated patterns of files and folders to skip.  Patterns ending with "/" name folders.
    #[structopt(long)]
    pub banned_files: Option<BannedFiles>,

    /// Bursts: NoStack, Stack, StackKeepRaw or StackKeepJPEG
    #[structopt(long, default_value = "")]
    pub manage_burst: StackPolicy,

    /// Raw+JPEG pairs: NoStack, KeepRaw, KeepJPG, StackCoverRaw or StackCoverJPG
    #[structopt(long, default_value = "")]
    pub manage_raw_jpeg: RawJpgPolicy,

    /// HEIC+JPEG pairs: NoStack, KeepHeic, KeepJPG, StackCoverHeic or StackCoverJPG
    #[structopt(long, default_value = "")]
    pub manage_heic_jpeg: HeicJpgPolicy,
}

impl ImportFilters {
    pub fn date_range(&self) -> DateRange {
        self.date_range.unwrap_or_default()
    }

    /// The banned patterns given on the command line, or the default ones
    pub fn banned(&self) -> BannedFiles {
        self.banned_files
            .clone()
            .unwrap_or_else(BannedFiles::defaults)
    }

    pub fn group_filters(&self) -> GroupFilters {
        GroupFilters {
            bursts: self.manage_burst,
            raw_jpg: self.manage_raw_jpeg,
            heic_jpg: self.manage_heic_jpeg,
        }
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::groups::{self, test::asset_at},
        chrono::TimeZone,
    };

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap())
    }

    #[test]
    fn date_ranges() -> anyhow::Result<()> {
        let august = "2023-08".parse::<DateRange>()?;

        assert!(august.contains(day(2023, 8, 1), &utc()));
        assert!(august.contains(day(2023, 8, 31), &utc()));
        assert!(!august.contains(day(2023, 9, 1), &utc()));
        assert!(!august.contains(day(2023, 3, 1), &utc()));
        assert!(!august.contains(None, &utc()));

        // 2023-08-31 23:00 UTC is already September in UTC+2
        assert!(!august.contains(
            Some(Utc.with_ymd_and_hms(2023, 8, 31, 23, 0, 0).unwrap()),
            &FixedOffset::east_opt(2 * 3600).unwrap()
        ));

        let span = "2023-01-15,2023-02-15".parse::<DateRange>()?;
        assert!(span.contains(day(2023, 2, 15), &utc()));
        assert!(!span.contains(day(2023, 2, 16), &utc()));

        assert!("2023".parse::<DateRange>()?.contains(day(2023, 12, 31), &utc()));
        assert!(DateRange::default().contains(None, &utc()));
        assert!("2023-02-15,2023-01-15".parse::<DateRange>().is_err());
        assert!("yesterday".parse::<DateRange>().is_err());

        Ok(())
    }

    #[test]
    fn extension_lists() -> anyhow::Result<()> {
        let list = "jpg, .HEIC".parse::<ExtensionList>()?;

        assert!(list.includes(".JPG"));
        assert!(list.excludes(".heic"));
        assert!(!list.includes(".png"));
        assert!(ExtensionList::default().includes(".png"));
        assert!(!ExtensionList::default().excludes(".png"));

        Ok(())
    }

    #[test]
    fn policies() -> anyhow::Result<()> {
        assert_eq!(RawJpgPolicy::KeepRaw, "KeepRaw".parse::<RawJpgPolicy>()?);
        assert_eq!(StackPolicy::Nothing, "".parse::<StackPolicy>()?);
        assert_eq!("stackcoverheic", HeicJpgPolicy::StackCoverHeic.to_string());
        assert!("sometimes".parse::<StackPolicy>().is_err());

        let pair = || {
            let mut assets = vec![
                asset_at("IMG_1234.CR2", day(2023, 1, 1)),
                asset_at("IMG_1234.JPG", day(2023, 1, 1)),
            ];
            groups::sort_assets(&mut assets);
            groups::group(assets).remove(0)
        };

        let mut group = pair();
        GroupFilters {
            raw_jpg: RawJpgPolicy::StackCoverRaw,
            ..GroupFilters::default()
        }
        .apply(&mut group);
        assert_eq!(GroupKind::RawJpg, group.kind);
        assert_eq!("IMG_1234.CR2", group.assets[0].original_name);

        let mut group = pair();
        GroupFilters {
            raw_jpg: RawJpgPolicy::KeepJpg,
            ..GroupFilters::default()
        }
        .apply(&mut group);
        assert_eq!(GroupKind::None, group.kind);
        assert_eq!(1, group.assets.len());
        assert_eq!(1, group.removed.len());
        assert_eq!("IMG_1234.CR2", group.removed[0].asset.original_name);

        let mut group = pair();
        GroupFilters::default().apply(&mut group);
        assert_eq!(GroupKind::None, group.kind);
        assert_eq!(2, group.assets.len());

        Ok(())
    }
}
