use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use tracing::{error, info, warn};

use crate::handoff::MapOpener;
use crate::ledger::Ledger;
use crate::BeatmapsetId;

pub const PACKAGE_EXTENSION: &str = "osz";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadEvent {
    Started { set_id: BeatmapsetId, url: String },
    Completed { set_id: BeatmapsetId, path: PathBuf, bytes: u64 },
    AlreadyDownloaded { set_id: BeatmapsetId },
    Failed { set_id: BeatmapsetId, reason: String },
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub completed: Vec<PathBuf>,
    pub skipped: usize,
    pub failed: usize,
}

pub fn package_path(download_dir: &Path, set_id: BeatmapsetId) -> PathBuf {
    download_dir.join(format!("{set_id}.{PACKAGE_EXTENSION}"))
}

/// Streams `url` into `target`, going through a `.part` file so a broken
/// transfer never leaves a truncated package behind.
pub fn download_to_path(client: &Client, url: &str, target: &Path) -> Result<u64> {
    let part_path = target.with_extension(format!("{PACKAGE_EXTENSION}.part"));
    let res = (|| {
        let mut response = client
            .get(url)
            .send()
            .with_context(|| format!("request failed for {url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("HTTP {} while downloading {url}", status.as_u16());
        }
        if let Some(parent) = part_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&part_path)
            .with_context(|| format!("creating {}", part_path.display()))?;
        let mut buf = [0u8; 32 * 1024];
        let mut downloaded = 0u64;
        loop {
            let n = response.read(&mut buf)?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n])?;
            downloaded += n as u64;
        }
        file.flush()?;
        fs::rename(&part_path, target)?;
        Ok::<u64, anyhow::Error>(downloaded)
    })();
    if res.is_err() {
        let _ = fs::remove_file(&part_path);
    }
    res
}

/// Downloads each `(set_id, url)` pair in order.
///
/// Failures are logged and skipped. Every package that lands on disk is
/// handed to `opener` and then recorded in the ledger; a failed handoff does
/// not undo the download.
pub fn download_all(
    pairs: &[(BeatmapsetId, String)],
    download_dir: &Path,
    client: &Client,
    ledger: &Ledger,
    opener: &dyn MapOpener,
    notify: &mut dyn FnMut(&DownloadEvent),
) -> DownloadSummary {
    let mut summary = DownloadSummary::default();
    for (set_id, url) in pairs {
        let set_id = *set_id;
        match ledger.contains(set_id) {
            Ok(true) => {
                info!("{set_id} is already downloaded, skipping");
                summary.skipped += 1;
                notify(&DownloadEvent::AlreadyDownloaded { set_id });
                continue;
            }
            Ok(false) => {}
            Err(err) => warn!("could not check ledger for {set_id}: {err:#}"),
        }

        info!("downloading {set_id} from {url}");
        notify(&DownloadEvent::Started {
            set_id,
            url: url.clone(),
        });
        let target = package_path(download_dir, set_id);
        let bytes = match download_to_path(client, url, &target) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("download of {set_id} failed: {err:#}");
                summary.failed += 1;
                notify(&DownloadEvent::Failed {
                    set_id,
                    reason: format!("{err:#}"),
                });
                continue;
            }
        };
        info!("saved {set_id} to {} ({bytes} bytes)", target.display());

        if let Err(err) = opener.open(&target) {
            warn!("could not hand {} to osu!: {err:#}", target.display());
        }
        if let Err(err) = ledger.record_download(set_id) {
            error!("could not record {set_id} in the ledger: {err:#}");
        }
        summary.completed.push(target.clone());
        notify(&DownloadEvent::Completed {
            set_id,
            path: target,
            bytes,
        });
    }
    summary
}
