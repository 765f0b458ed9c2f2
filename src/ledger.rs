use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Deserializer, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::BeatmapsetId;

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerData {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_ids"
    )]
    downloaded_maps: Option<Vec<BeatmapsetId>>,
    /// Keys written by other tools are carried over untouched.
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

/// Keeps every entry that is a positive integer (or a string holding one)
/// and drops the rest instead of rejecting the whole document.
fn lenient_ids<'de, D>(deserializer: D) -> Result<Option<Vec<BeatmapsetId>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<Vec<serde_json::Value>>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let ids: Vec<BeatmapsetId> = raw
        .iter()
        .filter_map(|value| match value {
            serde_json::Value::String(s) => s.trim().parse::<BeatmapsetId>().ok(),
            other => other.as_u64(),
        })
        .filter(|id| *id > 0)
        .collect();
    if ids.len() != raw.len() {
        warn!("ignoring {} invalid ledger entries", raw.len() - ids.len());
    }
    Ok(Some(ids))
}

/// What was found at the ledger path.
enum Stored {
    Missing,
    Parsed(LedgerData),
    Unreadable,
}

/// The `db.json` record of beatmapsets that already exist locally.
///
/// Meant for a single process. Each mutation rewrites the whole document
/// through a temp file in the same directory followed by a rename.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Ledger {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates an empty ledger file when none exists yet.
    pub fn ensure_exists(&self) -> Result<bool> {
        let _guard = self.guard()?;
        if self.path.exists() {
            return Ok(false);
        }
        self.write(&LedgerData {
            downloaded_maps: Some(Vec::new()),
            ..Default::default()
        })?;
        Ok(true)
    }

    /// Membership test. A missing or unreadable file counts as empty; a
    /// document without `downloaded_maps` gets the field added on the spot.
    pub fn contains(&self, id: BeatmapsetId) -> Result<bool> {
        let _guard = self.guard()?;
        let Stored::Parsed(mut data) = self.read() else {
            return Ok(false);
        };
        match data.downloaded_maps.as_ref() {
            Some(ids) => Ok(ids.contains(&id)),
            None => {
                data.downloaded_maps = Some(Vec::new());
                self.write(&data)?;
                Ok(false)
            }
        }
    }

    /// Appends `id` after a successful download. Ids already listed are not
    /// appended a second time.
    pub fn record_download(&self, id: BeatmapsetId) -> Result<()> {
        let _guard = self.guard()?;
        let mut data = self.read_for_update()?;
        let ids = data.downloaded_maps.get_or_insert_with(Vec::new);
        if ids.contains(&id) {
            debug!("{id} already recorded in {}", self.path.display());
            return Ok(());
        }
        ids.push(id);
        self.write(&data)
    }

    /// Replaces the whole set with `ids`. Only the local scan uses this.
    pub fn replace_all<I>(&self, ids: I) -> Result<()>
    where
        I: IntoIterator<Item = BeatmapsetId>,
    {
        let _guard = self.guard()?;
        let mut data = self.read_for_update()?;
        let sorted: BTreeSet<_> = ids.into_iter().collect();
        data.downloaded_maps = Some(sorted.into_iter().collect());
        self.write(&data)
    }

    pub fn downloaded(&self) -> Result<Vec<BeatmapsetId>> {
        let _guard = self.guard()?;
        match self.read() {
            Stored::Parsed(data) => Ok(data.downloaded_maps.unwrap_or_default()),
            Stored::Missing | Stored::Unreadable => Ok(Vec::new()),
        }
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|e| anyhow!("ledger lock poisoned: {e}"))
    }

    pub fn backup_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".bak");
        PathBuf::from(name)
    }

    fn read(&self) -> Stored {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Stored::Missing,
            Err(err) => {
                warn!("cannot read ledger {}: {err}", self.path.display());
                return Stored::Unreadable;
            }
        };
        match serde_json::from_str(&text) {
            Ok(data) => Stored::Parsed(data),
            Err(err) => {
                warn!("ignoring unreadable ledger {}: {err}", self.path.display());
                Stored::Unreadable
            }
        }
    }

    /// Starting point for a mutation. An unreadable file is moved aside to
    /// `<name>.bak` before a fresh document replaces it.
    fn read_for_update(&self) -> Result<LedgerData> {
        match self.read() {
            Stored::Parsed(data) => Ok(data),
            Stored::Missing => Ok(LedgerData::default()),
            Stored::Unreadable => {
                let backup = self.backup_path();
                fs::rename(&self.path, &backup).with_context(|| {
                    format!(
                        "moving unreadable ledger {} to {}",
                        self.path.display(),
                        backup.display()
                    )
                })?;
                warn!(
                    "unreadable ledger kept as {}, starting a new one",
                    backup.display()
                );
                Ok(LedgerData::default())
            }
        }
    }

    fn write(&self, data: &LedgerData) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating ledger directory {}", dir.display()))?;
        let json = serde_json::to_string_pretty(data)?;
        let mut tmp = NamedTempFile::new_in(&dir)
            .with_context(|| format!("creating temp file in {}", dir.display()))?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn record_then_contains() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("db.json"));
        assert!(!ledger.contains(42).unwrap());
        ledger.record_download(42).unwrap();
        assert!(ledger.contains(42).unwrap());
    }

    #[test]
    fn replace_all_drops_previous_entries() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("db.json"));
        ledger.record_download(4).unwrap();
        ledger.replace_all([3, 1, 2, 2]).unwrap();
        assert!(!ledger.contains(4).unwrap());
        assert!(ledger.contains(2).unwrap());
        assert_eq!(ledger.downloaded().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn recording_twice_keeps_one_entry() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::open(dir.path().join("db.json"));
        ledger.record_download(7).unwrap();
        ledger.record_download(7).unwrap();
        ledger.record_download(8).unwrap();
        assert_eq!(ledger.downloaded().unwrap(), vec![7, 8]);
    }

    #[test]
    fn missing_field_is_initialized_on_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, r#"{"note": "kept"}"#).unwrap();
        let ledger = Ledger::open(&path);
        assert!(!ledger.contains(1).unwrap());

        let on_disk: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk["downloaded_maps"], serde_json::json!([]));
        assert_eq!(on_disk["note"], "kept");
    }

    #[test]
    fn missing_file_is_not_created_by_contains() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");
        let ledger = Ledger::open(&path);
        assert!(!ledger.contains(1).unwrap());
        assert!(!path.exists());
        assert!(ledger.ensure_exists().unwrap());
        assert!(!ledger.ensure_exists().unwrap());
        assert!(fs::read_to_string(&path).unwrap().contains("downloaded_maps"));
    }

    #[test]
    fn corrupt_file_reads_as_empty_and_is_kept_aside() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, "{not json").unwrap();
        let ledger = Ledger::open(&path);
        assert!(!ledger.contains(5).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{not json");

        ledger.record_download(5).unwrap();
        assert!(ledger.contains(5).unwrap());
        assert_eq!(
            fs::read_to_string(ledger.backup_path()).unwrap(),
            "{not json"
        );
    }

    #[test]
    fn invalid_entries_do_not_discard_the_rest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(
            &path,
            r#"{"downloaded_maps": [100, 200, 300, -1, 2.5, "450", "x"], "note": "x"}"#,
        )
        .unwrap();
        let ledger = Ledger::open(&path);
        assert!(ledger.contains(100).unwrap());
        assert!(ledger.contains(450).unwrap());

        ledger.record_download(400).unwrap();
        let on_disk: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            on_disk,
            serde_json::json!({"downloaded_maps": [100, 200, 300, 450, 400], "note": "x"})
        );
        assert!(!ledger.backup_path().exists());
    }

    #[test]
    fn wrong_shape_is_backed_up_before_replace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, r#"{"downloaded_maps": "lots"}"#).unwrap();
        let ledger = Ledger::open(&path);
        ledger.replace_all([1, 2]).unwrap();
        assert_eq!(ledger.downloaded().unwrap(), vec![1, 2]);
        assert!(
            fs::read_to_string(ledger.backup_path())
                .unwrap()
                .contains("lots")
        );
    }

    #[test]
    fn writes_the_documented_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("db.json");
        let ledger = Ledger::open(&path);
        ledger.record_download(11).unwrap();
        let on_disk: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk, serde_json::json!({"downloaded_maps": [11]}));
    }
}
