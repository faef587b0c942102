//! Local snapshots of remote config files.
//!
//! Snapshots live under `<root>/<role>/<file>/` as
//! `<version>-<timestamp>.bak`. Versions increase per role and file and
//! snapshot files are never overwritten. Backup and restore of the same
//! role and file are serialized through a per-key lock.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use dashmap::DashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::executor::{ExecutionResult, ExecutionUnit, RemoteExecutor, UnitOperation};
use crate::topology::{Host, Role};

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.3fZ";

/// A stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigBackup {
    pub version: u64,
    pub role: String,
    /// File name, e.g. `yarn-site.xml`
    pub file: String,
    pub content: Vec<u8>,
    pub created_at: DateTime<Utc>,
    /// Where the snapshot is stored locally
    pub path: PathBuf,
}

/// Snapshot metadata parsed from a file name.
fn parse_name(name: &str) -> Option<(u64, DateTime<Utc>)> {
    let stem = name.strip_suffix(".bak")?;
    let (version, timestamp) = stem.split_once('-')?;
    let version = version.parse().ok()?;
    let created = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
    Some((version, Utc.from_utc_datetime(&created)))
}

/// Write `content` to a staging file in `dir` and move it to `path`.
///
/// `path` only ever appears complete: a failed write leaves nothing behind
/// under a snapshot name, and an existing snapshot is never replaced.
fn write_snapshot(dir: &Path, path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut staged = tempfile::NamedTempFile::new_in(dir)?;
    staged.write_all(content)?;
    staged.as_file().sync_all()?;
    staged.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

/// Replace path separators and other awkward characters in a key component.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Stores snapshots of remote config files on the control node.
pub struct ConfigBackupStore {
    root: PathBuf,
    executor: Arc<RemoteExecutor>,
    locks: DashMap<(String, String), Arc<Mutex<()>>>,
    timeout: Duration,
}

impl ConfigBackupStore {
    pub fn new(root: impl Into<PathBuf>, executor: Arc<RemoteExecutor>) -> Self {
        Self {
            root: root.into(),
            executor,
            locks: DashMap::new(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_name(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string())
    }

    fn dir_for(&self, role: &str, file: &str) -> PathBuf {
        self.root.join(sanitize(role)).join(sanitize(file))
    }

    /// Exclusive access to one role's config file until the session drops.
    pub async fn session(&self, role: &Role, host: &Host, path: &Path) -> BackupSession<'_> {
        let file = Self::file_name(path);
        let lock = self
            .locks
            .entry((role.name.clone(), file.clone()))
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;

        BackupSession {
            store: self,
            _guard: guard,
            role: role.clone(),
            host: host.clone(),
            path: path.to_path_buf(),
            file,
        }
    }

    /// Snapshot the current content of `path` on `role`.
    pub async fn backup(&self, role: &Role, host: &Host, path: &Path) -> Result<ConfigBackup> {
        self.session(role, host, path).await.backup().await
    }

    /// Write a snapshot back; the latest one when `backup` is `None`.
    pub async fn restore(
        &self,
        role: &Role,
        host: &Host,
        path: &Path,
        backup: Option<&ConfigBackup>,
    ) -> Result<ExecutionResult> {
        self.session(role, host, path).await.restore(backup).await
    }

    /// Snapshot names in `dir` as (version, created, path), oldest first.
    /// Contents are not read.
    async fn entries(&self, role: &str, file: &str) -> Result<Vec<(u64, DateTime<Utc>, PathBuf)>> {
        let dir = self.dir_for(role, file);
        let mut read = match tokio::fs::read_dir(&dir).await {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::backup(role, file, e.to_string())),
        };

        let mut entries = Vec::new();
        while let Some(entry) = read.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            match parse_name(&name) {
                Some((version, created_at)) => entries.push((version, created_at, entry.path())),
                None => debug!(file = %name, "Ignoring unrecognized file in backup directory"),
            }
        }
        entries.sort_by_key(|(version, _, _)| *version);
        Ok(entries)
    }

    async fn load(
        &self,
        role: &str,
        file: &str,
        (version, created_at, path): (u64, DateTime<Utc>, PathBuf),
    ) -> Result<ConfigBackup> {
        let content = tokio::fs::read(&path).await?;
        Ok(ConfigBackup {
            version,
            role: role.to_string(),
            file: file.to_string(),
            content,
            created_at,
            path,
        })
    }

    /// All snapshots of `file` on `role`, oldest first.
    pub async fn history(&self, role: &str, file: &str) -> Result<Vec<ConfigBackup>> {
        let mut backups = Vec::new();
        for entry in self.entries(role, file).await? {
            backups.push(self.load(role, file, entry).await?);
        }
        Ok(backups)
    }

    pub async fn latest(&self, role: &str, file: &str) -> Result<Option<ConfigBackup>> {
        match self.entries(role, file).await?.pop() {
            Some(entry) => Ok(Some(self.load(role, file, entry).await?)),
            None => Ok(None),
        }
    }

    async fn store(&self, role: &str, file: &str, content: Vec<u8>) -> Result<ConfigBackup> {
        let dir = self.dir_for(role, file);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::backup(role, file, format!("{}: {}", dir.display(), e)))?;

        let version = self
            .entries(role, file)
            .await?
            .last()
            .map(|(version, _, _)| version + 1)
            .unwrap_or(1);
        let created_at = Utc::now();
        let path = dir.join(format!(
            "{:06}-{}.bak",
            version,
            created_at.format(TIMESTAMP_FORMAT)
        ));

        let written = {
            let (dir, path, content) = (dir.clone(), path.clone(), content.clone());
            tokio::task::spawn_blocking(move || write_snapshot(&dir, &path, &content)).await
        };
        match written {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                return Err(Error::backup(role, file, format!("{}: {}", path.display(), e)))
            }
            Err(e) => return Err(Error::backup(role, file, e.to_string())),
        }

        // Parse back so the in-memory timestamp matches the stored one.
        let created_at = path
            .file_name()
            .and_then(|n| parse_name(&n.to_string_lossy()))
            .map(|(_, ts)| ts)
            .unwrap_or(created_at);

        Ok(ConfigBackup {
            version,
            role: role.to_string(),
            file: file.to_string(),
            content,
            created_at,
            path,
        })
    }
}

/// Holds the lock for one role and file.
pub struct BackupSession<'a> {
    store: &'a ConfigBackupStore,
    _guard: OwnedMutexGuard<()>,
    role: Role,
    host: Host,
    path: PathBuf,
    file: String,
}

impl BackupSession<'_> {
    pub fn file(&self) -> &str {
        &self.file
    }

    pub async fn backup(&self) -> Result<ConfigBackup> {
        let unit = ExecutionUnit::new(
            &self.role,
            &self.host,
            UnitOperation::Fetch {
                path: self.path.clone(),
            },
            self.store.timeout,
        )
        .with_label(format!("backup {}", self.file));

        let fetched = self.store.executor.execute(&unit).await;
        let content = match fetched.data {
            Some(content) if fetched.is_success() => content,
            _ => {
                return Err(Error::backup(
                    &self.role.name,
                    &self.file,
                    fetched.failure_detail(),
                ))
            }
        };

        let backup = self.store.store(&self.role.name, &self.file, content).await?;
        info!(
            role = %self.role.name,
            file = %self.file,
            version = backup.version,
            "Config backed up"
        );
        Ok(backup)
    }

    /// Write `backup` (or the latest snapshot) back to the role.
    pub async fn restore(&self, backup: Option<&ConfigBackup>) -> Result<ExecutionResult> {
        let latest;
        let backup = match backup {
            Some(b) => b,
            None => {
                latest = self
                    .store
                    .latest(&self.role.name, &self.file)
                    .await?
                    .ok_or_else(|| {
                        Error::backup(&self.role.name, &self.file, "no snapshot to restore")
                    })?;
                &latest
            }
        };

        let unit = ExecutionUnit::new(
            &self.role,
            &self.host,
            UnitOperation::Write {
                path: self.path.clone(),
                content: backup.content.clone(),
            },
            self.store.timeout,
        )
        .with_label(format!("restore {} v{}", self.file, backup.version));

        let result = self.store.executor.execute(&unit).await;
        info!(
            role = %self.role.name,
            file = %self.file,
            version = backup.version,
            status = %result.status,
            "Config restored"
        );
        Ok(result)
    }
}
