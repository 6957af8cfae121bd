use std::{
    io,
    path::{Path, PathBuf},
};

use directories::ProjectDirs;
use log::{debug, warn};
use serde_json::Value;
use tokio::fs;

use super::credentials::CredentialState;

/// Returns `true` if `name` can be used as a single path component.
///
/// Account ids and credential entry names both end up on disk, so separators,
/// NUL and the relative components `.`/`..` are refused.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(|c| matches!(c, '/' | '\\' | '\0'))
}

fn invalid(kind: &str, name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("invalid {kind} name {name:?}"),
    )
}

/// One directory per account under a sessions root; one JSON file per entry.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    /// `~/.local/share/msgbridge/sessions` on Linux, `%APPDATA%\msgbridge\data\sessions` on Windows, etc.
    pub fn new() -> io::Result<Self> {
        let proj = ProjectDirs::from("", "", "msgbridge")
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "Unable to locate data dir"))?;
        Ok(Self::with_root(proj.data_dir().join("sessions")))
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn dir_for(&self, account: &str) -> io::Result<PathBuf> {
        if !is_valid_name(account) {
            return Err(invalid("account", account));
        }
        Ok(self.root.join(account))
    }

    /// Loads the stored material, creating an empty account directory on first use.
    ///
    /// Malformed entry files are skipped with a warning.
    pub async fn load(&self, account: &str) -> io::Result<CredentialState> {
        let dir = self.dir_for(account)?;
        fs::create_dir_all(&dir).await?;

        let mut state = CredentialState::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let parsed = fs::read(&path)
                .await
                .and_then(|raw| serde_json::from_slice::<Value>(&raw).map_err(io::Error::from));
            match parsed {
                Ok(value) => {
                    state.insert(name, value);
                }
                Err(e) => warn!("Could not read credential file {:?}: {}", path, e),
            }
        }
        debug!("Loaded {} credential entries for '{}'", state.entries().count(), account);
        Ok(state)
    }

    /// Writes every entry of `state`; `null` entries delete their file.
    pub async fn save(&self, account: &str, state: &CredentialState) -> io::Result<()> {
        let dir = self.dir_for(account)?;
        fs::create_dir_all(&dir).await?;

        for (name, value) in state.entries() {
            if !is_valid_name(name) {
                return Err(invalid("credential entry", name));
            }
            let path = dir.join(format!("{name}.json"));
            if value.is_null() {
                match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e),
                }
                continue;
            }
            // write-then-rename so a crash never leaves a truncated entry
            let tmp = dir.join(format!("{name}.json.tmp"));
            fs::write(&tmp, serde_json::to_vec_pretty(value)?).await?;
            fs::rename(&tmp, &path).await?;
        }
        Ok(())
    }

    /// Remove every persisted file of an account (`Ok(true)` if removed, `Ok(false)` if it didn't exist).
    pub async fn delete(&self, account: &str) -> io::Result<bool> {
        let dir = self.dir_for(account)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Accounts that have a credential directory, sorted by name.
    pub async fn list_accounts(&self) -> io::Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if is_valid_name(&name) => out.push(name),
                Ok(_) | Err(_) => warn!("Skipping unusable session directory {:?}", entry.path()),
            }
        }
        out.sort();
        Ok(out)
    }
}
