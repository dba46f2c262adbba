//! This module provides the [NameAnalyser], which extracts what can be learned from a file name: the capture
//! time, the series the file belongs to, and its role within that series.

use {
    crate::filetypes::{self, FileKind, Registry},
    chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc},
    lazy_static::lazy_static,
    regex::{Captures, Regex},
    std::sync::Arc,
};

/// Role of a file within a series, as told by its name
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub enum NameKind {
    #[default]
    None,
    Burst,
    RawJpg,
    Edited,
    Portrait,
    Night,
    Motion,
    LongExposure,
}

/// What a file name says about a file
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NameInfo {
    /// Base name with series suffixes and extension stripped, used to group files of the same shot
    pub radical: String,

    /// Base name of the file
    pub base: String,

    /// Lowercase extension, with its leading dot
    pub ext: String,

    pub kind: NameKind,

    /// Index of the file within its series
    pub index: u32,

    pub is_cover: bool,

    /// Capture time, if the name carries one
    pub taken: Option<DateTime<Utc>>,

    pub file_kind: Option<FileKind>,
}

lazy_static! {
    static ref PIXEL: Regex =
        Regex::new(r"^(PXL_\d{8}_\d{9})((.*)?(\d{2}))?(.*)?(\..*)$").unwrap();
    static ref SAMSUNG: Regex = Regex::new(r"^(\d{8}_\d{6})_(\d{3})(\..+)$").unwrap();
    static ref NEXUS: Regex = Regex::new(r"^(\d+)\D+_\d+_(BURST\d+)(\D+)?(\..+)$").unwrap();
    static ref HUAWEI: Regex =
        Regex::new(r"^(IMG_\d{8}_\d{6})_BURST(\d{3})(?:_(\w+))?(\..+)$").unwrap();
    static ref SONY: Regex = Regex::new(r"^DSC_(\d+)_BURST(\d+)(\D+)?(\..+)$").unwrap();
    static ref DATE: Regex = Regex::new(
        r"(19[89]\d|20\d\d)\D?(0\d|1[0-2])\D?([0-3]\d)\D{0,1}([01]\d|2[0-4])?\D?([0-5]\d)?\D?([0-5]\d)?"
    )
    .unwrap();
}

fn group<'a>(captures: &'a Captures, index: usize) -> &'a str {
    captures.get(index).map(|m| m.as_str()).unwrap_or("")
}

fn to_utc(naive: NaiveDateTime, tz: &FixedOffset) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&naive)
        .single()
        .map(|time| time.with_timezone(&Utc))
}

/// Parse `digits` laid out as `format` (a chrono format string) in time zone `tz`.
fn parse_local(digits: &str, format: &str, tz: &FixedOffset) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(digits, format)
        .ok()
        .and_then(|naive| to_utc(naive, tz))
}

/// Find a date in a single name, e.g. "Screenshot from 2022-12-17 19-45-43.png".
///
/// Components that do not form a valid calendar date and time, and dates more than a day in the future, are
/// rejected.
pub fn time_from_name(name: &str, tz: &FixedOffset) -> Option<DateTime<Utc>> {
    let captures = DATE.captures(name)?;

    let number = |index| group(&captures, index).parse::<u32>().unwrap_or(0);

    let year = i32::try_from(number(1)).ok()?;

    let time = to_utc(
        NaiveDate::from_ymd_opt(year, number(2), number(3))?.and_hms_opt(
            number(4),
            number(5),
            number(6),
        )?,
        tz,
    )?;

    if time - Utc::now() > Duration::hours(24) {
        None
    } else {
        Some(time)
    }
}

/// Find a date in a path, looking at each component from the last to the first, then at the whole path.
pub fn time_from_path(path: &str, tz: &FixedOffset) -> Option<DateTime<Utc>> {
    path.rsplit('/')
        .find_map(|component| time_from_name(component, tz))
        .or_else(|| time_from_name(path, tz))
}

/// Extracts [NameInfo] from file names, trying camera specific recognisers first
#[derive(Debug, Clone)]
pub struct NameAnalyser {
    tz: FixedOffset,
    registry: Arc<Registry>,
}

type Recogniser = fn(&NameAnalyser, &str) -> Option<NameInfo>;

impl NameAnalyser {
    pub fn new(tz: FixedOffset, registry: Arc<Registry>) -> Self {
        Self { tz, registry }
    }

    pub fn tz(&self) -> &FixedOffset {
        &self.tz
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Analyse the file at `path` (a `/` separated path).
    pub fn info(&self, path: &str) -> NameInfo {
        let base = path.rsplit('/').next().unwrap_or(path);

        let recognisers: [Recogniser; 5] = [
            Self::pixel,
            Self::samsung,
            Self::nexus,
            Self::huawei,
            Self::sony,
        ];

        recognisers
            .iter()
            .find_map(|recogniser| recogniser(self, base))
            .unwrap_or_else(|| {
                let ext = filetypes::extension(base);

                NameInfo {
                    radical: filetypes::strip_extension(base).to_owned(),
                    base: base.to_owned(),
                    ext: ext.to_lowercase(),
                    taken: time_from_path(path, &self.tz),
                    file_kind: Some(self.registry.kind(ext)),
                    ..NameInfo::default()
                }
            })
    }

    fn base_info(&self, base: &str, radical: &str, ext: &str) -> NameInfo {
        NameInfo {
            radical: radical.to_owned(),
            base: base.to_owned(),
            ext: ext.to_lowercase(),
            file_kind: Some(self.registry.kind(ext)),
            ..NameInfo::default()
        }
    }

    // PXL_20231207_032111247.RAW-01.COVER.jpg, PXL_20230330_184138390.MOTION-02.ORIGINAL.jpg,
    // PXL_20211014_171433750.MP.jpg
    fn pixel(&self, base: &str) -> Option<NameInfo> {
        let captures = PIXEL.captures(base)?;
        let radical = group(&captures, 1);
        let suffix = group(&captures, 5);
        let tail = format!("{}{suffix}", group(&captures, 3));

        let kind = if tail.contains("RAW") {
            NameKind::RawJpg
        } else if tail.contains("PORTRAIT") {
            NameKind::Portrait
        } else if tail.contains("NIGHT") {
            NameKind::Night
        } else if tail.contains("LONG_EXPOSURE") {
            NameKind::LongExposure
        } else if tail.contains("MOTION") || suffix.contains(".MP") {
            NameKind::Motion
        } else {
            NameKind::None
        };

        Some(NameInfo {
            kind,
            is_cover: suffix.ends_with("COVER"),
            index: group(&captures, 4).parse().unwrap_or(0),
            taken: parse_local(&radical[4..19], "%Y%m%d_%H%M%S", &FixedOffset::east_opt(0)?),
            ..self.base_info(base, radical, group(&captures, 6))
        })
    }

    // 20231207_101605_001.jpg
    fn samsung(&self, base: &str) -> Option<NameInfo> {
        let captures = SAMSUNG.captures(base)?;
        let radical = group(&captures, 1);
        let index = group(&captures, 2).parse().unwrap_or(0);

        Some(NameInfo {
            kind: NameKind::Burst,
            index,
            is_cover: index == 1,
            taken: parse_local(radical, "%Y%m%d_%H%M%S", &self.tz),
            ..self.base_info(base, radical, group(&captures, 3))
        })
    }

    // 00015IMG_00015_BURST20171111030039_COVER.jpg, 00002IMG_00002_BURST1723801037429.jpg
    fn nexus(&self, base: &str) -> Option<NameInfo> {
        let captures = NEXUS.captures(base)?;
        let radical = group(&captures, 2);
        let stamp = &radical["BURST".len()..];

        let taken = match stamp.len() {
            14 => parse_local(stamp, "%Y%m%d%H%M%S", &self.tz),
            13 => stamp
                .parse::<i64>()
                .ok()
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
            17 => parse_local(
                &format!("{}.{}", &stamp[..14], &stamp[14..]),
                "%Y%m%d%H%M%S%.3f",
                &self.tz,
            ),
            _ => None,
        };

        Some(NameInfo {
            kind: NameKind::Burst,
            index: group(&captures, 1).parse().unwrap_or(0),
            is_cover: group(&captures, 3).contains("COVER"),
            taken,
            ..self.base_info(base, radical, group(&captures, 4))
        })
    }

    // IMG_20231014_183246_BURST001_COVER.jpg
    fn huawei(&self, base: &str) -> Option<NameInfo> {
        let captures = HUAWEI.captures(base)?;
        let radical = group(&captures, 1);

        Some(NameInfo {
            kind: NameKind::Burst,
            index: group(&captures, 2).parse().unwrap_or(0),
            is_cover: group(&captures, 3).ends_with("COVER"),
            taken: parse_local(&radical[4..19], "%Y%m%d_%H%M%S", &self.tz),
            ..self.base_info(base, radical, group(&captures, 4))
        })
    }

    // DSC_0001_BURST20230709220904977.JPG
    fn sony(&self, base: &str) -> Option<NameInfo> {
        let captures = SONY.captures(base)?;
        let stamp = group(&captures, 2);
        let radical = format!("BURST{stamp}");

        let taken = if stamp.len() > 14 {
            parse_local(
                &format!("{}.{}", &stamp[..14], &stamp[14..]),
                "%Y%m%d%H%M%S%.f",
                &self.tz,
            )
        } else {
            None
        };

        Some(NameInfo {
            kind: NameKind::Burst,
            index: group(&captures, 1).parse().unwrap_or(0),
            is_cover: group(&captures, 3).contains("COVER"),
            taken,
            ..self.base_info(base, &radical, group(&captures, 4))
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn analyser() -> NameAnalyser {
        NameAnalyser::new(utc(), Arc::new(Registry::default()))
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> Option<DateTime<Utc>> {
        Some(Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap())
    }

    #[test]
    fn dates_from_paths() {
        let cases = [
            ("2024.png", None),
            ("2024-05.png", None),
            (
                "A/B/2022/2022.11/2022.11.09/IMG_1234.HEIC",
                at(2022, 11, 9, 0, 0, 0),
            ),
            ("A/B/2022/2022.11/IMG_1234.HEIC", None),
            (
                "A/B/2022.11.09/2022.11/2022/IMG_1234.HEIC",
                at(2022, 11, 9, 0, 0, 0),
            ),
            ("2024-05-05.png", at(2024, 5, 5, 0, 0, 0)),
            ("PXL_20220909_154515546.TS.mp4", at(2022, 9, 9, 15, 45, 15)),
            (
                "Screenshot from 2022-12-17 19-45-43.png",
                at(2022, 12, 17, 19, 45, 43),
            ),
            ("Bebop2_20180719194940+0200.mp4", at(2018, 7, 19, 19, 49, 40)),
            ("AR_EFFECT_20141126193511.mp4", at(2014, 11, 26, 19, 35, 11)),
            ("2023-07-20 14:15:30", at(2023, 7, 20, 14, 15, 30)),
            ("20001010120000", at(2000, 10, 10, 12, 0, 0)),
            ("2023_07_20_10_09_20.mp4", at(2023, 7, 20, 10, 9, 20)),
            ("19991231", at(1999, 12, 31, 0, 0, 0)),
            ("991231-125200", None),
            ("20223112-125200", None),
            ("IMG_1234.HEIC", None),
            ("20221109/IMG_1234.HEIC", at(2022, 11, 9, 0, 0, 0)),
            ("20221109T2030/IMG_1234.HEIC", at(2022, 11, 9, 20, 30, 0)),
            ("2022.11.09T20.30/IMG_1234.HEIC", at(2022, 11, 9, 20, 30, 0)),
            ("2022/11/09/IMG_1234.HEIC", at(2022, 11, 9, 0, 0, 0)),
            (
                "something_2011-05-11 something/IMG_1234.JPG",
                at(2011, 5, 11, 0, 0, 0),
            ),
        ];

        for (path, expected) in cases {
            assert_eq!(expected, time_from_path(path, &utc()), "{path}");
        }
    }

    #[test]
    fn future_dates_are_rejected() {
        let next_year = Utc::now() + Duration::days(400);

        assert_eq!(
            None,
            time_from_name(&next_year.format("%Y%m%d_%H%M%S.jpg").to_string(), &utc())
        );
    }

    #[test]
    fn time_zone_applies() {
        let paris = FixedOffset::east_opt(3600).unwrap();

        assert_eq!(
            at(2023, 7, 20, 13, 15, 30),
            time_from_name("2023-07-20 14:15:30", &paris)
        );
    }

    #[test]
    fn pixel() {
        let analyser = analyser();

        let info = analyser.info("PXL_20231026_210642603.dng");
        assert_eq!("PXL_20231026_210642603", info.radical);
        assert_eq!(".dng", info.ext);
        assert_eq!(NameKind::None, info.kind);
        assert_eq!(at(2023, 10, 26, 21, 6, 42), info.taken);

        let info = analyser.info("PXL_20231207_032111247.RAW-01.COVER.jpg");
        assert_eq!("PXL_20231207_032111247", info.radical);
        assert_eq!(NameKind::RawJpg, info.kind);
        assert_eq!(1, info.index);
        assert!(info.is_cover);

        let info = analyser.info("PXL_20230330_184138390.MOTION-02.ORIGINAL.jpg");
        assert_eq!(NameKind::Motion, info.kind);
        assert_eq!(2, info.index);
        assert!(!info.is_cover);

        let info = analyser.info("PXL_20230809_203029471.LONG_EXPOSURE-01.COVER.jpg");
        assert_eq!(NameKind::LongExposure, info.kind);
        assert!(info.is_cover);

        assert_eq!(
            NameKind::Portrait,
            analyser.info("PXL_20211015_192314061.PORTRAIT.jpg").kind
        );

        let info = analyser.info("motion/PXL_20210102_221126856.MP.jpg");
        assert_eq!("PXL_20210102_221126856", info.radical);
        assert_eq!(NameKind::Motion, info.kind);
        assert_eq!(".jpg", info.ext);

        let info = analyser.info("motion/PXL_20210102_221126856.MP");
        assert_eq!("PXL_20210102_221126856", info.radical);
        assert_eq!(".mp", info.ext);
        assert_eq!(Some(FileKind::Useless), info.file_kind);
    }

    #[test]
    fn samsung() {
        let info = analyser().info("20231207_101605_001.jpg");

        assert_eq!("20231207_101605", info.radical);
        assert_eq!(NameKind::Burst, info.kind);
        assert_eq!(1, info.index);
        assert!(info.is_cover);
        assert_eq!(at(2023, 12, 7, 10, 16, 5), info.taken);

        let info = analyser().info("20231207_101605_031.jpg");
        assert_eq!(31, info.index);
        assert!(!info.is_cover);
    }

    #[test]
    fn nexus() {
        let analyser = analyser();

        let info = analyser.info("00015IMG_00015_BURST20171111030039_COVER.jpg");
        assert_eq!("BURST20171111030039", info.radical);
        assert_eq!(15, info.index);
        assert!(info.is_cover);
        assert_eq!(at(2017, 11, 11, 3, 0, 39), info.taken);

        let info = analyser.info("00000PORTRAIT_00000_BURST20190828181853475.jpg");
        assert_eq!("BURST20190828181853475", info.radical);
        assert_eq!(0, info.index);
        assert_eq!(
            Some(
                Utc.with_ymd_and_hms(2019, 8, 28, 18, 18, 53).unwrap()
                    + Duration::milliseconds(475)
            ),
            info.taken
        );

        let info = analyser.info("00002IMG_00002_BURST1723801037429.jpg");
        assert_eq!(Utc.timestamp_millis_opt(1723801037429).single(), info.taken);

        assert_eq!(NameKind::None, analyser.info("IMG_1123.jpg").kind);
    }

    #[test]
    fn huawei_and_sony() {
        let analyser = analyser();

        let info = analyser.info("IMG_20231014_183246_BURST001_COVER.jpg");
        assert_eq!("IMG_20231014_183246", info.radical);
        assert_eq!(NameKind::Burst, info.kind);
        assert_eq!(1, info.index);
        assert!(info.is_cover);
        assert_eq!(at(2023, 10, 14, 18, 32, 46), info.taken);

        let info = analyser.info("DSC_0002_BURST20230709220904977.JPG");
        assert_eq!("BURST20230709220904977", info.radical);
        assert_eq!(2, info.index);
        assert!(!info.is_cover);
        assert_eq!(".jpg", info.ext);
    }

    #[test]
    fn radical_and_extension_rebuild_the_name() {
        let analyser = analyser();

        for (name, radical, ext) in [
            ("20231207_101605_001.jpg", "20231207_101605", ".jpg"),
            (
                "IMG_20231014_183246_BURST001_COVER.jpg",
                "IMG_20231014_183246",
                ".jpg",
            ),
            (
                "00015IMG_00015_BURST20171111030039_COVER.jpg",
                "BURST20171111030039",
                ".jpg",
            ),
            ("DSC_0002_BURST20230709220904977.JPG", "BURST20230709220904977", ".jpg"),
            ("IMG_1234.HEIC", "IMG_1234", ".heic"),
            ("PXL_20231207_032111247.RAW-01.COVER.jpg", "PXL_20231207_032111247", ".jpg"),
        ] {
            let info = analyser.info(name);

            assert_eq!(radical, info.radical, "{name}");
            assert_eq!(ext, info.ext, "{name}");
        }
    }

    #[test]
    fn generic_names() {
        let info = analyser().info("2023/20230801-001.jpg");

        assert_eq!("20230801-001", info.radical);
        assert_eq!(NameKind::None, info.kind);
        assert_eq!(at(2023, 8, 1, 0, 0, 0), info.taken);
    }
}
