//! This module provides the grouping pipeline, which turns the sorted assets of a directory into [Group]s: live
//! and motion photos, bursts, raw+JPEG and HEIC+JPEG pairs, and singletons.

use {
    crate::{
        asset::Asset,
        filetypes,
        metadata::{Album, Tag},
        names::NameKind,
    },
    chrono::Duration,
    std::{
        cmp::Ordering,
        fmt::{self, Display},
    },
};

/// How the members of a group relate to each other
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum GroupKind {
    None,
    LivePhoto,
    MotionPhoto,
    Burst,
    RawJpg,
    HeicJpg,
}

impl Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GroupKind::None => "none",
            GroupKind::LivePhoto => "live photo",
            GroupKind::MotionPhoto => "motion photo",
            GroupKind::Burst => "burst",
            GroupKind::RawJpg => "raw+jpg",
            GroupKind::HeicJpg => "heic+jpg",
        })
    }
}

/// An asset taken out of a group, with the reason why
#[derive(Debug)]
pub struct Removed {
    pub asset: Asset,
    pub reason: String,
}

/// Assets the server should treat as a unit
///
/// The cover, if the group has one, is always the first asset.
#[derive(Debug)]
pub struct Group {
    pub kind: GroupKind,
    pub assets: Vec<Asset>,

    /// Albums shared by every member
    pub albums: Vec<Album>,

    /// Tags shared by every member
    pub tags: Vec<Tag>,

    /// Assets filtered out of the group
    pub removed: Vec<Removed>,
}

impl Group {
    /// Create a group whose cover is `assets[cover]`.
    pub fn new(kind: GroupKind, mut assets: Vec<Asset>, cover: usize) -> Self {
        if cover < assets.len() {
            let asset = assets.remove(cover);
            assets.insert(0, asset);
        }

        Self {
            kind,
            assets,
            albums: Vec::new(),
            tags: Vec::new(),
            removed: Vec::new(),
        }
    }

    pub fn single(asset: Asset) -> Self {
        Self::new(GroupKind::None, vec![asset], 0)
    }

    /// Make `assets[index]` the cover.
    pub fn set_cover(&mut self, index: usize) {
        if index < self.assets.len() && index > 0 {
            let asset = self.assets.remove(index);
            self.assets.insert(0, asset);
        }
    }

    /// Remove the assets for which `remove` returns true, recording `reason`.
    ///
    /// A group left with fewer than two members is no longer a group.
    pub fn remove_where(&mut self, reason: &str, mut remove: impl FnMut(&Asset) -> bool) {
        let (removed, kept) = self.assets.drain(..).partition::<Vec<_>, _>(|a| remove(a));

        self.assets = kept;

        self.removed
            .extend(removed.into_iter().map(|asset| Removed {
                asset,
                reason: reason.to_owned(),
            }));

        if self.assets.len() < 2 {
            self.kind = GroupKind::None;
        }
    }

    /// Take the removed assets out of the group.
    pub fn take_removed(&mut self) -> Vec<Removed> {
        std::mem::take(&mut self.removed)
    }
}

/// A step of the pipeline: claim some of the assets into groups and hand back the others, in order.
pub type Grouper = fn(Vec<Asset>, &mut Vec<Group>) -> Vec<Asset>;

/// The groupers, most specific first
pub const PIPELINE: &[Grouper] = &[group_series, group_bursts];

/// Two members of a series must have been captured within this delay
fn series_delay() -> Duration {
    Duration::minutes(1)
}

/// Key used to gather the files of one shot: the radical, less any motion photo container extension (so that
/// "X.MP.jpg" and "X.MP" gather)
pub fn series_key(asset: &Asset) -> &str {
    let radical = asset.name_info.radical.as_str();
    let ext = filetypes::extension(radical);

    if !ext.is_empty() && filetypes::is_motion_container(ext) {
        &radical[..radical.len() - ext.len()]
    } else {
        radical
    }
}

/// Sort assets by series key then capture date, the order the groupers expect.
pub fn sort_assets(assets: &mut [Asset]) {
    assets.sort_by(|a, b| {
        series_key(a)
            .cmp(series_key(b))
            .then_with(|| match (a.capture_date(), b.capture_date()) {
                (Some(a), Some(b)) => a.cmp(&b),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| a.name_info.index.cmp(&b.name_info.index))
            .then_with(|| a.original_name.cmp(&b.original_name))
    });
}

/// Run the whole pipeline; whatever no grouper claims becomes a singleton group.
pub fn group(assets: Vec<Asset>) -> Vec<Group> {
    let mut groups = Vec::new();

    let leftovers = PIPELINE
        .iter()
        .fold(assets, |assets, grouper| grouper(assets, &mut groups));

    groups.extend(leftovers.into_iter().map(Group::single));

    groups
}

fn close_in_time(a: &Asset, b: &Asset) -> bool {
    match (a.capture_date(), b.capture_date()) {
        (Some(a), Some(b)) => (a - b).abs() <= series_delay(),
        _ => true,
    }
}

/// Split `assets` into runs of consecutive items sharing the same key.
fn runs<K: PartialEq>(assets: Vec<Asset>, key: impl Fn(&Asset) -> K) -> Vec<Vec<Asset>> {
    let mut runs = Vec::<Vec<Asset>>::new();

    for asset in assets {
        match runs.last_mut() {
            Some(run) if run.last().map(|last| key(last) == key(&asset)).unwrap_or(false) => {
                run.push(asset)
            }
            _ => runs.push(vec![asset]),
        }
    }

    runs
}

/// Detect the kind of a series, along with the index of its cover.
///
/// One image with one or more videos is a live photo, or a motion photo if the image is named as such. Raw +
/// JPEG and HEIC + JPEG pairs are exactly two files.
fn series_kind(run: &[Asset]) -> Option<(GroupKind, usize)> {
    if run.len() < 2 {
        return None;
    }

    let mut images = run.iter().enumerate().filter(|(_, asset)| asset.is_image());
    let (image, still) = images.next()?;
    let single_image = images.next().is_none();

    if single_image {
        let videos = run
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != image)
            .all(|(_, asset)| asset.is_video() && close_in_time(still, asset));

        if !videos {
            return None;
        }

        return Some((
            if still.name_info.kind == NameKind::Motion {
                GroupKind::MotionPhoto
            } else {
                GroupKind::LivePhoto
            },
            image,
        ));
    }

    let [first, second] = run else {
        return None;
    };

    if !close_in_time(first, second) {
        return None;
    }

    let jpeg = run.iter().position(|a| filetypes::is_jpeg(&a.ext()))?;
    let other = &run[1 - jpeg];

    if filetypes::is_raw(&other.ext()) {
        Some((GroupKind::RawJpg, jpeg))
    } else if filetypes::is_heic(&other.ext()) {
        Some((GroupKind::HeicJpg, jpeg))
    } else {
        None
    }
}

/// Claim the files of the same shot: image + videos (live or motion photo), raw + JPEG, HEIC + JPEG.
pub fn group_series(assets: Vec<Asset>, groups: &mut Vec<Group>) -> Vec<Asset> {
    let mut leftovers = Vec::new();

    for run in runs(assets, |asset| series_key(asset).to_owned()) {
        match series_kind(&run) {
            Some((kind, cover)) => groups.push(Group::new(kind, run, cover)),
            None => leftovers.extend(run),
        }
    }

    leftovers
}

/// Claim bursts: consecutive files named as members of the same burst.  The cover is the file named as such, or
/// else the one with the lowest index.
pub fn group_bursts(assets: Vec<Asset>, groups: &mut Vec<Group>) -> Vec<Asset> {
    let mut leftovers = Vec::new();

    let key = |asset: &Asset| {
        (asset.name_info.kind == NameKind::Burst && asset.is_image())
            .then(|| asset.name_info.radical.clone())
    };

    for run in runs(assets, &key) {
        if run.len() < 2 || key(&run[0]).is_none() {
            leftovers.extend(run);
            continue;
        }

        let cover = run
            .iter()
            .position(|asset| asset.name_info.is_cover)
            .or_else(|| {
                run.iter()
                    .enumerate()
                    .min_by_key(|(_, asset)| asset.name_info.index)
                    .map(|(index, _)| index)
            })
            .unwrap_or(0);

        groups.push(Group::new(GroupKind::Burst, run, cover));
    }

    leftovers
}
