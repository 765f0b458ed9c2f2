use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result, bail};
use tracing::warn;

use crate::settings::Session;

/// Passes a downloaded package on to the game.
pub trait MapOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<()>;
}

/// Lets the OS pick the application associated with `.osz`.
#[derive(Debug, Default)]
pub struct SystemOpener;

impl MapOpener for SystemOpener {
    fn open(&self, path: &Path) -> Result<()> {
        open::that(path).with_context(|| format!("opening {} with the default app", path.display()))
    }
}

/// Starts a specific game executable (an AppImage on Linux, for instance)
/// with the package as its only argument.
#[derive(Debug)]
pub struct ExecutableOpener {
    executable: PathBuf,
}

impl ExecutableOpener {
    pub fn new(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
        }
    }

    /// Starts the game and waits for it on a background thread so the
    /// process is reaped when it exits.
    fn launch(&self, path: &Path) -> Result<JoinHandle<Option<ExitStatus>>> {
        if !self.executable.exists() {
            bail!("osu executable not found at {}", self.executable.display());
        }
        let mut child = Command::new(&self.executable)
            .arg(path)
            .spawn()
            .with_context(|| format!("starting {}", self.executable.display()))?;
        let program = self.executable.clone();
        Ok(thread::spawn(move || match child.wait() {
            Ok(status) => {
                if !status.success() {
                    warn!("{} exited with {status}", program.display());
                }
                Some(status)
            }
            Err(err) => {
                warn!("could not wait for {}: {err}", program.display());
                None
            }
        }))
    }
}

impl MapOpener for ExecutableOpener {
    fn open(&self, path: &Path) -> Result<()> {
        self.launch(path).map(|_| ())
    }
}

/// Leaves the file where it is.
#[derive(Debug, Default)]
pub struct KeepOnDisk;

impl MapOpener for KeepOnDisk {
    fn open(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

pub fn opener_for(session: &Session, enabled: bool) -> Box<dyn MapOpener> {
    if !enabled {
        return Box::new(KeepOnDisk);
    }
    match session.osu_executable.as_ref() {
        Some(exe) => Box::new(ExecutableOpener::new(exe)),
        None => Box::new(SystemOpener),
    }
}
