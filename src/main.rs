mod auth;
mod downloader;
mod error;
mod handoff;
mod ledger;
mod mirrors;
mod osu_api;
mod osu_parser;
mod scanner;
mod search;
mod settings;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use auth::OAuthApp;
use downloader::DownloadEvent;
use ledger::Ledger;
use mirrors::Mirror;
use osu_api::OsuClient;
use search::{DateFilter, GameMode, QueryFilters, RankStatus, SearchOutcome, StarFilter};
use settings::{AppConfig, ensure_dir, load_config, save_config};
use worker::CampaignEvent;

/// osu! beatmapset identifier.
pub type BeatmapsetId = u64;

const SCAN_PREVIEW_LEN: usize = 20;

#[derive(Parser, Debug)]
#[command(
    name = "osu-map-downloader",
    version,
    about = "Search osu! beatmapsets and download them through a mirror"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Authorize with osu! in the browser and store the access token
    Login {
        #[arg(long, env = "OSU_CLIENT_ID")]
        client_id: Option<String>,
        #[arg(long, env = "OSU_CLIENT_SECRET", hide_env_values = true)]
        client_secret: Option<String>,
        /// Port of the local redirect listener
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print the ids of every beatmapset matching the filters
    Search(FilterArgs),
    /// Search, then download every match not already in the ledger
    Download {
        #[command(flatten)]
        filters: FilterArgs,
        /// chimu, sayobot, nerinyan or their index 0-2
        #[arg(long)]
        mirror: Option<Mirror>,
        /// Keep the packages on disk instead of opening them in osu!
        #[arg(long)]
        no_open: bool,
        /// Print the download links without fetching anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Rebuild the ledger from the maps found in the osu!lazer file store
    Scan {
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Show or change the stored settings
    Config(ConfigArgs),
}

#[derive(Args, Debug, Clone)]
struct FilterArgs {
    /// Star rating, e.g. `>=5.5`, `<7` or `6` (repeatable)
    #[arg(long = "stars", value_name = "EXPR")]
    stars: Vec<StarFilter>,
    /// Ranked date, e.g. `>=2023-01-01`, `<2024-01-01` (repeatable)
    #[arg(long = "date", value_name = "EXPR")]
    dates: Vec<DateFilter>,
    #[arg(long, default_value = "osu")]
    mode: GameMode,
    /// Status letters r, l, p, u, a (comma separated or repeated)
    #[arg(long = "status", value_delimiter = ',')]
    statuses: Vec<RankStatus>,
}

impl FilterArgs {
    fn into_filters(self) -> QueryFilters {
        QueryFilters {
            stars: self.stars,
            dates: self.dates,
            mode: self.mode,
            statuses: self.statuses,
        }
    }
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[arg(long)]
    download_dir: Option<PathBuf>,
    #[arg(long)]
    lazer_files_dir: Option<PathBuf>,
    #[arg(long)]
    mirror: Option<Mirror>,
    #[arg(long)]
    osu_executable: Option<PathBuf>,
    /// Go back to the OS default handler for `.osz` files
    #[arg(long, conflicts_with = "osu_executable")]
    system_opener: bool,
    #[arg(long)]
    client_id: Option<String>,
    #[arg(long)]
    client_secret: Option<String>,
    #[arg(long)]
    redirect_port: Option<u16>,
    /// Forget the stored access token
    #[arg(long)]
    clear_token: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    ensure_dir(&settings::base_dir())?;
    ensure_dir(&settings::logs_dir())?;

    let file_appender =
        tracing_appender::rolling::never(settings::logs_dir(), "osu-map-downloader.log");
    let (nb_writer, _log_guard) = tracing_appender::non_blocking(file_appender);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(nb_writer);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(console_layer)
        .with(file_layer)
        .init();

    let mut config = load_config();
    match cli.command {
        Command::Login {
            client_id,
            client_secret,
            port,
        } => run_login(&mut config, client_id, client_secret, port),
        Command::Search(filters) => run_search(&config, filters),
        Command::Download {
            filters,
            mirror,
            no_open,
            dry_run,
        } => run_download(&config, filters, mirror, !no_open, dry_run),
        Command::Scan { root } => run_scan(&config, root),
        Command::Config(args) => run_config(&mut config, args),
    }
}

fn run_login(
    config: &mut AppConfig,
    client_id: Option<String>,
    client_secret: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let app = OAuthApp {
        client_id: client_id.unwrap_or_else(|| config.client_id.clone()),
        client_secret: client_secret.unwrap_or_else(|| config.client_secret.clone()),
        redirect_port: port.unwrap_or(config.redirect_port),
    };
    app.validate()?;

    let mut token = None;
    for event in worker::spawn_login(app.clone()) {
        match event {
            CampaignEvent::LoginStatus(status) => info!("{status}"),
            CampaignEvent::LoginFinished(Ok(access_token)) => token = Some(access_token),
            CampaignEvent::LoginFinished(Err(reason)) => bail!("login failed: {reason}"),
            _ => {}
        }
    }
    let Some(token) = token else {
        bail!("login worker stopped without a result");
    };

    config.client_id = app.client_id;
    config.client_secret = app.client_secret;
    config.redirect_port = app.redirect_port;
    config.access_token = Some(token);
    save_config(config)?;
    println!(
        "Logged in. Token stored in {}",
        settings::settings_path().display()
    );
    Ok(())
}

/// Runs a search campaign and logs its progress until it finishes.
fn search_campaign(config: &AppConfig, filters: FilterArgs) -> anyhow::Result<SearchOutcome> {
    let params = filters.into_filters().to_params()?;
    let token = config.session().token()?.to_string();
    let client = OsuClient::new(token).context("building the osu! API client")?;

    let mut outcome = None;
    for event in worker::spawn_search(client, params) {
        match event {
            CampaignEvent::Page(progress) => info!(
                "page {}: {} sets, {} new, {} total",
                progress.page, progress.received, progress.new_ids, progress.total
            ),
            CampaignEvent::SearchFinished(done) => outcome = Some(done),
            _ => {}
        }
    }
    let Some(outcome) = outcome else {
        bail!("search worker stopped without a result");
    };
    if outcome.stop.is_error() {
        warn!(
            "search stopped early ({:?}); continuing with {} ids",
            outcome.stop,
            outcome.ids.len()
        );
    }
    Ok(outcome)
}

fn run_search(config: &AppConfig, filters: FilterArgs) -> anyhow::Result<()> {
    let outcome = search_campaign(config, filters)?;
    for id in &outcome.ids {
        println!("{id}");
    }
    info!(
        "{} beatmapsets over {} pages ({:?})",
        outcome.ids.len(),
        outcome.pages,
        outcome.stop
    );
    Ok(())
}

fn run_download(
    config: &AppConfig,
    filters: FilterArgs,
    mirror: Option<Mirror>,
    open_after: bool,
    dry_run: bool,
) -> anyhow::Result<()> {
    let mirror = mirror.unwrap_or(config.mirror);
    let session = config.session();
    session.token()?;

    ensure_dir(&config.download_dir)?;
    let ledger = Arc::new(Ledger::open(settings::ledger_path()));
    if ledger.ensure_exists()? {
        info!("created empty ledger at {}", ledger.path().display());
    }

    let outcome = search_campaign(config, filters)?;
    let mut pending = Vec::new();
    for (set_id, url) in mirrors::resolve_all(&outcome.ids, mirror) {
        match ledger.contains(set_id) {
            Ok(true) => info!("{set_id} already downloaded, skipping"),
            Ok(false) => pending.push((set_id, url)),
            Err(err) => {
                warn!("could not check ledger for {set_id}: {err:#}");
                pending.push((set_id, url));
            }
        }
    }
    info!(
        "{} of {} beatmapsets to fetch from {mirror}",
        pending.len(),
        outcome.ids.len()
    );

    if dry_run {
        for (_, url) in &pending {
            println!("{url}");
        }
        return Ok(());
    }
    if pending.is_empty() {
        println!("Nothing to download.");
        return Ok(());
    }

    let opener = handoff::opener_for(&session, open_after);
    let events = worker::spawn_downloads(
        pending,
        config.download_dir.clone(),
        Arc::clone(&ledger),
        opener,
    );
    for event in events {
        match event {
            CampaignEvent::Download(DownloadEvent::Started { set_id, url }) => {
                debug!("fetching {set_id} from {url}")
            }
            CampaignEvent::Download(DownloadEvent::Completed {
                set_id,
                path,
                bytes,
            }) => println!("{set_id} -> {} ({bytes} bytes)", path.display()),
            CampaignEvent::Download(DownloadEvent::AlreadyDownloaded { set_id }) => {
                debug!("{set_id} was recorded meanwhile")
            }
            CampaignEvent::Download(DownloadEvent::Failed { set_id, reason }) => {
                error!("{set_id} failed: {reason}")
            }
            CampaignEvent::DownloadsFinished(summary) => println!(
                "Downloaded {}, skipped {}, failed {}.",
                summary.completed.len(),
                summary.skipped,
                summary.failed
            ),
            _ => {}
        }
    }
    Ok(())
}

fn run_scan(config: &AppConfig, root: Option<PathBuf>) -> anyhow::Result<()> {
    let root = root.unwrap_or_else(|| config.lazer_files_dir.clone());
    ensure_dir(&root)?;

    let report = scanner::scan_beatmapsets(&root);
    let ledger = Ledger::open(settings::ledger_path());
    ledger
        .replace_all(report.set_ids.iter().copied())
        .context("writing the scanned ids to the ledger")?;

    println!("Scanned {} files under {}", report.files_scanned, root.display());
    println!("Map files: {}", report.map_files);
    println!("Unique beatmapsets: {}", report.set_ids.len());
    if !report.set_ids.is_empty() {
        let preview: Vec<String> = report
            .set_ids
            .iter()
            .take(SCAN_PREVIEW_LEN)
            .map(ToString::to_string)
            .collect();
        let more = if report.set_ids.len() > SCAN_PREVIEW_LEN {
            ", ..."
        } else {
            ""
        };
        println!("First ids: {}{more}", preview.join(", "));
    }
    println!("Ledger updated: {}", ledger.path().display());
    Ok(())
}

fn run_config(config: &mut AppConfig, args: ConfigArgs) -> anyhow::Result<()> {
    let mut changed = false;
    if let Some(dir) = args.download_dir {
        config.download_dir = dir;
        changed = true;
    }
    if let Some(dir) = args.lazer_files_dir {
        config.lazer_files_dir = dir;
        changed = true;
    }
    if let Some(mirror) = args.mirror {
        config.mirror = mirror;
        changed = true;
    }
    if let Some(exe) = args.osu_executable {
        config.osu_executable = Some(exe);
        changed = true;
    }
    if args.system_opener {
        config.osu_executable = None;
        changed = true;
    }
    if let Some(id) = args.client_id {
        config.client_id = id;
        changed = true;
    }
    if let Some(secret) = args.client_secret {
        config.client_secret = secret;
        changed = true;
    }
    if let Some(port) = args.redirect_port {
        config.redirect_port = port;
        changed = true;
    }
    if args.clear_token {
        config.access_token = None;
        changed = true;
    }
    if changed {
        save_config(config)?;
        info!("settings saved");
    }

    let ledger = Ledger::open(settings::ledger_path());
    let downloaded = ledger.downloaded().unwrap_or_default();
    println!("settings file:    {}", settings::settings_path().display());
    println!(
        "ledger:           {} ({} sets)",
        ledger.path().display(),
        downloaded.len()
    );
    println!("logs:             {}", settings::logs_dir().display());
    println!("download dir:     {}", config.download_dir.display());
    println!("lazer files dir:  {}", config.lazer_files_dir.display());
    println!(
        "mirror:           {} ({})",
        config.mirror,
        config.mirror.to_index()
    );
    println!(
        "osu executable:   {}",
        config
            .osu_executable
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "system default".into())
    );
    println!(
        "client id:        {}",
        if config.client_id.is_empty() {
            "(not set)"
        } else {
            config.client_id.as_str()
        }
    );
    println!(
        "client secret:    {}",
        if config.client_secret.is_empty() {
            "(not set)"
        } else {
            "(set)"
        }
    );
    println!("redirect port:    {}", config.redirect_port);
    println!(
        "access token:     {}",
        if config.session().token().is_ok() {
            "stored"
        } else {
            "none"
        }
    );
    Ok(())
}
