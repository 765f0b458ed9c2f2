use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::osu_parser::{MapFileScan, scan_map_file};
use crate::BeatmapsetId;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub files_scanned: usize,
    pub map_files: usize,
    /// Sorted, no duplicates.
    pub set_ids: Vec<BeatmapsetId>,
}

/// Walks `root` and collects every beatmapset id found in map files below it.
///
/// The result only reflects what is on disk right now; merging it with the
/// ledger is up to the caller. A missing root yields an empty report.
pub fn scan_beatmapsets(root: &Path) -> ScanReport {
    let mut report = ScanReport::default();
    if !root.exists() {
        warn!("scan root {} does not exist", root.display());
        return report;
    }
    info!("scanning {}", root.display());

    let mut found = BTreeSet::new();
    for entry in WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        report.files_scanned += 1;
        let file = match File::open(entry.path()) {
            Ok(f) => f,
            Err(err) => {
                debug!("skipping {}: {err}", entry.path().display());
                continue;
            }
        };
        match scan_map_file(BufReader::new(file)) {
            MapFileScan::NotAMap => {}
            MapFileScan::Map(id) => {
                report.map_files += 1;
                if let Some(id) = id {
                    found.insert(id);
                }
            }
        }
    }

    report.set_ids = found.into_iter().collect();
    info!(
        "scanned {} files, {} map files, {} unique sets",
        report.files_scanned,
        report.map_files,
        report.set_ids.len()
    );
    report
}
