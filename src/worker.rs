use std::path::PathBuf;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::error;

use crate::auth::{self, OAuthApp};
use crate::downloader::{self, DownloadEvent, DownloadSummary};
use crate::handoff::MapOpener;
use crate::ledger::Ledger;
use crate::osu_api::{SearchApi, http_client};
use crate::search::{self, PageProgress, SearchOutcome};
use crate::BeatmapsetId;

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Everything a background job reports back to the foreground.
#[derive(Debug)]
pub enum CampaignEvent {
    Page(PageProgress),
    SearchFinished(SearchOutcome),
    Download(DownloadEvent),
    DownloadsFinished(DownloadSummary),
    LoginStatus(String),
    LoginFinished(Result<String, String>),
}

pub fn spawn_search<A>(api: A, params: Vec<(String, String)>) -> mpsc::Receiver<CampaignEvent>
where
    A: SearchApi + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let outcome = search::collect_beatmapset_ids(&api, &params, &mut |progress| {
            let _ = tx.send(CampaignEvent::Page(progress.clone()));
        });
        let _ = tx.send(CampaignEvent::SearchFinished(outcome));
    });
    rx
}

pub fn spawn_downloads(
    pairs: Vec<(BeatmapsetId, String)>,
    download_dir: PathBuf,
    ledger: Arc<Ledger>,
    opener: Box<dyn MapOpener>,
) -> mpsc::Receiver<CampaignEvent> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let client = match http_client(DOWNLOAD_TIMEOUT) {
            Ok(client) => client,
            Err(err) => {
                error!("could not build the download client: {err}");
                let failed = DownloadSummary {
                    failed: pairs.len(),
                    ..DownloadSummary::default()
                };
                let _ = tx.send(CampaignEvent::DownloadsFinished(failed));
                return;
            }
        };
        let summary = downloader::download_all(
            &pairs,
            &download_dir,
            &client,
            &ledger,
            opener.as_ref(),
            &mut |event| {
                let _ = tx.send(CampaignEvent::Download(event.clone()));
            },
        );
        let _ = tx.send(CampaignEvent::DownloadsFinished(summary));
    });
    rx
}

pub fn spawn_login(app: OAuthApp) -> mpsc::Receiver<CampaignEvent> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let result = auth::login(&app, &mut |status| {
            let _ = tx.send(CampaignEvent::LoginStatus(status.to_string()));
        })
        .map_err(|err| format!("{err:#}"));
        let _ = tx.send(CampaignEvent::LoginFinished(result));
    });
    rx
}
