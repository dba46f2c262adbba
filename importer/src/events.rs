//! This module provides the [Recorder], a bank of counters summarizing what happened to every file of an import.

use {
    std::{
        collections::BTreeMap,
        fmt::{self, Display, Write},
        sync::Mutex,
    },
    tracing::{error, info},
};

/// Something which happened to a file
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Event {
    DiscoveredImage,
    DiscoveredVideo,
    DiscoveredSidecar,
    DiscoveredDiscarded,
    DiscoveredUnsupported,
    DiscoveredUseless,
    AnalysisAssociatedMetadata,
    AnalysisMissingAssociatedMetadata,
    AnalysisLocalDuplicate,
    UploadNotSelected,
    Uploaded,
    UploadUpgraded,
    UploadServerDuplicate,
    UploadServerBetter,
    UploadServerError,
    UploadAlbumCreated,
    UploadAddToAlbum,
    Stacked,
    Tagged,
    Error,
    Info,
}

impl Event {
    /// Events which discard a file, reported by reason at the end of a run
    fn is_discard(self) -> bool {
        matches!(
            self,
            Event::DiscoveredDiscarded
                | Event::DiscoveredUnsupported
                | Event::DiscoveredUseless
                | Event::AnalysisLocalDuplicate
                | Event::AnalysisMissingAssociatedMetadata
                | Event::UploadNotSelected
        )
    }

    fn is_error(self) -> bool {
        matches!(self, Event::Error | Event::UploadServerError)
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Event::DiscoveredImage => "scanned image file",
            Event::DiscoveredVideo => "scanned video file",
            Event::DiscoveredSidecar => "scanned sidecar file",
            Event::DiscoveredDiscarded => "discarded file",
            Event::DiscoveredUnsupported => "unsupported file",
            Event::DiscoveredUseless => "useless file",
            Event::AnalysisAssociatedMetadata => "associated metadata file",
            Event::AnalysisMissingAssociatedMetadata => "missing associated metadata file",
            Event::AnalysisLocalDuplicate => "file duplicated in the input",
            Event::UploadNotSelected => "file not selected",
            Event::Uploaded => "uploaded",
            Event::UploadUpgraded => "server's asset upgraded with the input",
            Event::UploadServerDuplicate => "server has same asset",
            Event::UploadServerBetter => "server has a better asset",
            Event::UploadServerError => "upload error",
            Event::UploadAlbumCreated => "album created",
            Event::UploadAddToAlbum => "added to an album",
            Event::Stacked => "stacked",
            Event::Tagged => "tagged",
            Event::Error => "error",
            Event::Info => "info",
        })
    }
}

#[derive(Default)]
struct State {
    counts: BTreeMap<Event, u64>,
    reasons: BTreeMap<(Event, String), u64>,
}

/// Thread-safe, monotonic counters keyed by [Event]
///
/// Every recorded event is also logged along with the file and the reason.
#[derive(Default)]
pub struct Recorder(Mutex<State>);

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `event` happened to `file`.  `reason` may be empty.
    pub fn record(&self, event: Event, file: impl Display, reason: &str) {
        if event.is_error() {
            error!("{event}: {file}: {reason}");
        } else if reason.is_empty() {
            info!("{event}: {file}");
        } else {
            info!("{event}: {file}: {reason}");
        }

        if let Ok(mut state) = self.0.lock() {
            *state.counts.entry(event).or_default() += 1;

            if event.is_discard() && !reason.is_empty() {
                *state
                    .reasons
                    .entry((event, reason.to_owned()))
                    .or_default() += 1;
            }
        }
    }

    pub fn count(&self, event: Event) -> u64 {
        self.0
            .lock()
            .map(|state| state.counts.get(&event).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Return a copy of the non-zero counters.
    pub fn snapshot(&self) -> BTreeMap<Event, u64> {
        self.0
            .lock()
            .map(|state| state.counts.clone())
            .unwrap_or_default()
    }

    /// Number of error events so far
    pub fn errors(&self) -> u64 {
        self.count(Event::Error) + self.count(Event::UploadServerError)
    }

    /// Return the end of run report: one line per non-zero counter, then the discards by reason.
    pub fn report(&self) -> String {
        let mut report = String::new();

        if let Ok(state) = self.0.lock() {
            let _ = writeln!(report, "Counters:");

            for (event, count) in &state.counts {
                let _ = writeln!(report, "{:<40}: {count:>7}", event.to_string());
            }

            if !state.reasons.is_empty() {
                let _ = writeln!(report, "\nDiscarded:");

                for ((event, reason), count) in &state.reasons {
                    let _ = writeln!(report, "{:<40}: {count:>7}", format!("{event}, {reason}"));
                }
            }
        }

        report
    }
}
