//! Rules pairing the JSON records of a Google Photos takeout with the files they describe
//!
//! Google names the record of `photo.jpg` `photo.jpg.json`, but not always: long names are truncated, duplicate
//! counters move around, and edited copies share the record of their original.  Each rule recognizes one of
//! these shapes.  They are tried in order, the most specific first.

use crate::filetypes::{self, FileKind, Registry};

/// Largest number of characters an unknown suffix may add to a name
const FORGOTTEN_SUFFIX_LENGTH: usize = 10;

/// A rule telling whether a record (by its base name) describes a file (by its base name)
pub type MatchFn = fn(json: &str, file: &str, registry: &Registry) -> bool;

/// A named rule
#[derive(Copy, Clone)]
pub struct Matcher {
    pub name: &'static str,
    pub matches: MatchFn,
}

/// Every rule, in the order they must be tried
pub const MATCHERS: &[Matcher] = &[
    Matcher {
        name: "normalMatch",
        matches: normal_match,
    },
    Matcher {
        name: "livePhotoMatch",
        matches: live_photo_match,
    },
    Matcher {
        name: "matchWithOneCharOmitted",
        matches: match_with_one_char_omitted,
    },
    Matcher {
        name: "matchVeryLongNameWithNumber",
        matches: match_very_long_name_with_number,
    },
    Matcher {
        name: "matchDuplicateInYear",
        matches: match_duplicate_in_year,
    },
    Matcher {
        name: "matchEditedName",
        matches: match_edited_name,
    },
    Matcher {
        name: "matchForgottenDuplicates",
        matches: match_forgotten_duplicates,
    },
];

/// Return the name of the first rule pairing `json` with `file`.
pub fn find_matcher(json: &str, file: &str, registry: &Registry) -> Option<&'static str> {
    MATCHERS
        .iter()
        .find(|matcher| (matcher.matches)(json, file, registry))
        .map(|matcher| matcher.name)
}

/// Split a trailing "(n)" counter off `name`: "a(1).jpg" gives ("a.jpg", "1").
fn split_counter(name: &str) -> (String, &str) {
    if let Some(open) = name.rfind('(') {
        if let Some(close) = name[open..].find(')').map(|close| open + close) {
            let counter = &name[open + 1..close];

            if !counter.is_empty() && counter.chars().all(|c| c.is_ascii_digit()) {
                return (format!("{}{}", &name[..open], &name[close + 1..]), counter);
            }
        }
    }

    (name.to_owned(), "")
}

fn json_stem(json: &str) -> &str {
    filetypes::strip_extension(json)
}

/// Return true if `long` starts with `short` and has at most `extra` more characters.
fn extends(long: &str, short: &str, extra: usize) -> bool {
    long.starts_with(short) && long.chars().count() - short.chars().count() <= extra
}

/// `photo.jpg.json` describes `photo.jpg`.
pub fn normal_match(json: &str, file: &str, _registry: &Registry) -> bool {
    json_stem(json) == file
}

/// `photo.heic.json` describes the video `photo.mov` of a live photo, and `PXL_X.MP.jpg.json` describes the
/// motion photo container `PXL_X.MP`.
pub fn live_photo_match(json: &str, file: &str, registry: &Registry) -> bool {
    let file_ext = filetypes::extension(file);

    if !(registry.kind(file_ext) == FileKind::Video || filetypes::is_motion_container(file_ext)) {
        return false;
    }

    let stem = json_stem(json);
    let inner = filetypes::extension(stem);

    if inner.is_empty() || !registry.is_media(inner) {
        return false;
    }

    let still = filetypes::strip_extension(stem);
    let file_stem = filetypes::strip_extension(file);

    if still == file_stem {
        return true;
    }

    let container = filetypes::extension(still);

    !container.is_empty()
        && filetypes::is_motion_container(container)
        && filetypes::strip_extension(still) == file_stem
}

/// Google truncates names to 46 UTF-16 code units, sometimes cutting the extension in the middle:
/// `PXL_20230809_203449253.LONG_EXPOSURE-02.ORIGIN.json` describes
/// `PXL_20230809_203449253.LONG_EXPOSURE-02.ORIGINA.jpg`, and `IMG 2.jp.json` describes `IMG 2.jpg`.
pub fn match_with_one_char_omitted(json: &str, file: &str, registry: &Registry) -> bool {
    let mut stem = json_stem(json);

    if !file.starts_with(stem) {
        return false;
    }

    if registry.is_extension_prefix(filetypes::extension(stem)) {
        stem = filetypes::strip_extension(stem);
    }

    filetypes::strip_extension(file).chars().count() <= stem.chars().count() + 1
}

/// `Backyard_ceremony_wedding_photography_xxxxxxx_(494).json` describes
/// `Backyard_ceremony_wedding_photography_xxxxxxx_m(494).jpg`.
pub fn match_very_long_name_with_number(json: &str, file: &str, _registry: &Registry) -> bool {
    let (json_name, json_counter) = split_counter(json_stem(json));
    let (file_name, file_counter) = split_counter(file);

    if json_counter.is_empty() || json_counter != file_counter {
        return false;
    }

    let file_stem = filetypes::strip_extension(&file_name);

    !json_name.is_empty() && extends(file_stem, &json_name, 1)
}

/// `IMG_2710.HEIC(1).json` describes `IMG_2710(1).HEIC`.  The extension of the record may be truncated, as in
/// `13039_n.j(1).json` for `13039_n(1).jpg`.
pub fn match_duplicate_in_year(json: &str, file: &str, registry: &Registry) -> bool {
    let (json_name, json_counter) = split_counter(json_stem(json));
    let (file_name, file_counter) = split_counter(file);

    if json_counter.is_empty() || json_counter != file_counter {
        return false;
    }

    if json_name == file_name {
        return true;
    }

    let json_ext = filetypes::extension(&json_name);

    !json_ext.is_empty()
        && registry.is_extension_prefix(json_ext)
        && filetypes::strip_extension(&json_name) == filetypes::strip_extension(&file_name)
        && filetypes::extension(&file_name)
            .to_lowercase()
            .starts_with(&json_ext.to_lowercase())
}

/// `PXL_20220405_090123740.PORTRAIT.jpg.json` describes `PXL_20220405_090123740.PORTRAIT-modifié.jpg`.
pub fn match_edited_name(json: &str, file: &str, registry: &Registry) -> bool {
    if !split_counter(file).1.is_empty() {
        return false;
    }

    let stem = json_stem(json);
    let inner = filetypes::extension(stem);

    !inner.is_empty()
        && registry.is_media(inner)
        && filetypes::strip_extension(file).starts_with(filetypes::strip_extension(stem))
}

/// `original_1d4caa6f-16c6-4c3d-901b-9387de10e528_.json` describes
/// `original_1d4caa6f-16c6-4c3d-901b-9387de10e528_P(1).jpg`.
pub fn match_forgotten_duplicates(json: &str, file: &str, _registry: &Registry) -> bool {
    extends(
        filetypes::strip_extension(file),
        json_stem(json),
        FORGOTTEN_SUFFIX_LENGTH,
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cascade() {
        let registry = Registry::default();

        let cases = [
            (
                "PXL_20211013_220651983.jpg.json",
                "PXL_20211013_220651983.jpg",
                Some("normalMatch"),
            ),
            (
                "PXL_20211013_220651983.jpg.json",
                "PXL_20211013_220651958.jpg",
                None,
            ),
            (
                "IMG_1234.HEIC.json",
                "IMG_1234.MOV",
                Some("livePhotoMatch"),
            ),
            (
                "PXL_20231118_035751175.MP.jpg.json",
                "PXL_20231118_035751175.MP",
                Some("livePhotoMatch"),
            ),
            (
                "PXL_20210102_221126856.MP~2.jpg.json",
                "PXL_20210102_221126856.MP~2",
                Some("livePhotoMatch"),
            ),
            (
                "PXL_20230809_203449253.LONG_EXPOSURE-02.ORIGIN.json",
                "PXL_20230809_203449253.LONG_EXPOSURE-02.ORIGINA.jpg",
                Some("matchWithOneCharOmitted"),
            ),
            (
                "05yqt21kruxwwlhhgrwrdyb6chhwszi9bqmzu16w0 2.jp.json",
                "05yqt21kruxwwlhhgrwrdyb6chhwszi9bqmzu16w0 2.jpg",
                Some("matchWithOneCharOmitted"),
            ),
            (
                "😀😃😄😁😆😅😂🤣🥲🙂😊😇🙂🙃😉😌😍🥰😘😗😙😚😋.json",
                "😀😃😄😁😆😅😂🤣🥲🙂😊😇🙂🙃😉😌😍🥰😘😗😙😚😋😛.jpg",
                Some("matchWithOneCharOmitted"),
            ),
            (
                "original_1d4caa6f-16c6-4c3d-901b-9387de10e528_.json",
                "original_1d4caa6f-16c6-4c3d-901b-9387de10e528_P.jpg",
                Some("matchWithOneCharOmitted"),
            ),
            (
                "Backyard_ceremony_wedding_photography_xxxxxxx_(494).json",
                "Backyard_ceremony_wedding_photography_xxxxxxx_m(494).jpg",
                Some("matchVeryLongNameWithNumber"),
            ),
            (
                "Backyard_ceremony_wedding_photography_xxxxxxx_(494).json",
                "Backyard_ceremony_wedding_photography_xxxxxxx_m(185).jpg",
                None,
            ),
            (
                "DSC_0101.JPG(1).json",
                "DSC_0101(1).JPG",
                Some("matchDuplicateInYear"),
            ),
            (
                "IMG_2710.HEIC(1).json",
                "IMG_2710(1).HEIC",
                Some("matchDuplicateInYear"),
            ),
            (
                "13039_327707840323_537645323_9470255_27214_n.j(1).json",
                "13039_327707840323_537645323_9470255_27214_n(1).jpg",
                Some("matchDuplicateInYear"),
            ),
            ("DSC_0102.JPG(2).json", "DSC_0102(1).JPG", None),
            ("DSC_0103.JPG(1).json", "DSC_0103.JPG", None),
            ("DSC_0104.JPG.json", "DSC_0104(1).JPG", None),
            (
                "PXL_20220405_090123740.PORTRAIT.jpg.json",
                "PXL_20220405_090123740.PORTRAIT-modifié.jpg",
                Some("matchEditedName"),
            ),
            (
                "PXL_20220405_090123740.PORTRAIT.jpg.json",
                "PXL_20220405_090123741.PORTRAIT-modifié.jpg",
                None,
            ),
            (
                "original_1d4caa6f-16c6-4c3d-901b-9387de10e528_.json",
                "original_1d4caa6f-16c6-4c3d-901b-9387de10e528_P(1).jpg",
                Some("matchForgottenDuplicates"),
            ),
        ];

        for (json, file, expected) in cases {
            assert_eq!(
                expected,
                find_matcher(json, file, &registry),
                "{json} <-> {file}"
            );
        }
    }

    #[test]
    fn truncated_names() {
        let registry = Registry::default();
        let utf16_len = |name: &str| json_stem(name).encode_utf16().count();

        let json = "ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrs.json";
        let file = "ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrst.jpg";

        assert_eq!(46, utf16_len(json));
        assert_eq!(
            Some("matchWithOneCharOmitted"),
            find_matcher(json, file, &registry)
        );

        let json = "ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqr.json";
        let file = "ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrs.jpg";

        assert_eq!(45, utf16_len(json));
        assert_eq!(
            Some("matchWithOneCharOmitted"),
            find_matcher(json, file, &registry)
        );

        let longer = "ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrst.jpg";
        assert!(!match_with_one_char_omitted(json, longer, &registry));

        assert!(!match_with_one_char_omitted(
            "IMG_1.jpg.json",
            "IMG_12.jpg",
            &registry
        ));
    }

    #[test]
    fn counters() {
        assert_eq!(("a.jpg".to_owned(), "1"), split_counter("a(1).jpg"));
        assert_eq!(("a.jpg(x)".to_owned(), ""), split_counter("a.jpg(x)"));
        assert_eq!(("a.jpg".to_owned(), ""), split_counter("a.jpg"));
    }
}
