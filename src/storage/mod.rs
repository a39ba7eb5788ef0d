use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;

use crate::engine::models::{CachedInstall, Release, Settings};
use crate::error::{CacheReadError, InstallError};

pub const SNAPSHOT_FILE: &str = "releases.json";
pub const SETTINGS_FILE: &str = "settings.json";
pub const MANIFEST_FILE: &str = "release.json";
/// Name prefix of the scratch directories installs stage in.
pub const WORKSPACE_PREFIX: &str = ".install-";

/// Owns the cache directory: one subdirectory per installed tag plus the
/// snapshot and settings files at the top level.
#[derive(Clone, Debug)]
pub struct CacheStore {
    base_dir: PathBuf,
}

impl CacheStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn install_dir(&self, tag: &str) -> PathBuf {
        self.base_dir.join(tag)
    }

    /// Every subdirectory holding a parsable manifest, newest first.
    /// Directories without one (interrupted installs, temp dirs) are skipped.
    pub async fn list_cached_installs(&self) -> Vec<CachedInstall> {
        let mut entries = match fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(err) => {
                debug!("cache: unable to scan {}: {err}", self.base_dir.display());
                return Vec::new();
            }
        };

        let mut installs = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!("cache: directory scan stopped early: {err}");
                    break;
                }
            };
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            match entry.file_type().await {
                Ok(kind) if kind.is_dir() => {}
                _ => continue,
            }
            match self.read_manifest(&name).await {
                Ok(release) => installs.push(CachedInstall {
                    release,
                    path: entry.path(),
                }),
                Err(err) => debug!("cache: ignoring {name}: {err}"),
            }
        }

        installs.sort_by(|a, b| Release::by_recency(&a.release, &b.release));
        installs
    }

    pub async fn read_manifest(&self, tag: &str) -> Result<Release, CacheReadError> {
        let path = self.install_dir(tag).join(MANIFEST_FILE);
        let release: Release = read_json(&path).await?;
        if release.tag.is_empty() {
            return Err(CacheReadError::Invalid {
                path,
                reason: "empty tag".into(),
            });
        }
        if release.tag != tag {
            return Err(CacheReadError::Invalid {
                path,
                reason: format!("manifest names {} but lives under {tag}", release.tag),
            });
        }
        Ok(release)
    }

    /// The last persisted release list, or `None` when there is none usable.
    pub async fn read_snapshot(&self) -> Option<Vec<Release>> {
        let path = self.base_dir.join(SNAPSHOT_FILE);
        match read_json::<Vec<Release>>(&path).await {
            Ok(releases) => Some(releases),
            Err(CacheReadError::Missing { .. }) => None,
            Err(err) => {
                warn!("cache: discarding snapshot: {err}");
                None
            }
        }
    }

    /// Replaces the snapshot wholesale.
    pub async fn write_snapshot(&self, releases: &[Release]) -> io::Result<()> {
        write_json(&self.base_dir.join(SNAPSHOT_FILE), &releases).await?;
        debug!("cache: snapshot written with {} releases", releases.len());
        Ok(())
    }

    pub async fn read_settings(&self) -> Settings {
        let path = self.base_dir.join(SETTINGS_FILE);
        match read_json::<Settings>(&path).await {
            Ok(settings) => settings,
            Err(CacheReadError::Missing { .. }) => Settings::default(),
            Err(err) => {
                warn!("cache: using default settings: {err}");
                Settings::default()
            }
        }
    }

    pub async fn write_settings(&self, settings: &Settings) -> io::Result<()> {
        write_json(&self.base_dir.join(SETTINGS_FILE), settings).await
    }

    /// Moves `payload` to `<cache>/<tag>/` and writes the manifest as the
    /// final step. On failure nothing is left under `<cache>/<tag>/`.
    pub async fn commit_install(
        &self,
        tag: &str,
        payload: &Path,
        release: &Release,
    ) -> Result<CachedInstall, InstallError> {
        if !is_safe_tag(tag) {
            return Err(InstallError::Commit(format!(
                "tag `{tag}` cannot be used as a directory name"
            )));
        }
        fs::create_dir_all(&self.base_dir)
            .await
            .map_err(InstallError::io("unable to create cache dir"))?;

        let target = self.install_dir(tag);
        match fs::symlink_metadata(&target).await {
            Ok(meta) if meta.is_dir() => {
                warn!("cache: replacing stale directory {}", target.display());
                fs::remove_dir_all(&target)
                    .await
                    .map_err(|e| InstallError::Commit(format!("unable to clear stale {tag}: {e}")))?;
            }
            Ok(_) => {
                return Err(InstallError::Commit(format!(
                    "{} exists and is not a directory",
                    target.display()
                )));
            }
            Err(_) => {}
        }

        if let Err(rename_err) = fs::rename(payload, &target).await {
            debug!("cache: rename failed ({rename_err}); copying instead");
            let (from, to) = (payload.to_path_buf(), target.clone());
            let copied = tokio::task::spawn_blocking(move || copy_dir(&from, &to))
                .await
                .map_err(|e| InstallError::Commit(e.to_string()))
                .and_then(|res| res.map_err(InstallError::Commit));
            if let Err(err) = copied {
                let _ = fs::remove_dir_all(&target).await;
                return Err(err);
            }
        }

        if let Err(err) = write_json(&target.join(MANIFEST_FILE), release).await {
            let _ = fs::remove_dir_all(&target).await;
            return Err(InstallError::Commit(format!("unable to write manifest: {err}")));
        }

        info!("cache: committed {tag} at {}", target.display());
        Ok(CachedInstall {
            release: release.clone(),
            path: target,
        })
    }

    /// Removes `<cache>/<tag>/`. The caller is responsible for confirmation.
    pub async fn delete_install(&self, tag: &str) -> io::Result<()> {
        if !is_safe_tag(tag) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("refusing to delete `{tag}`"),
            ));
        }
        let target = self.install_dir(tag);
        match fs::remove_dir_all(&target).await {
            Ok(()) => {
                info!("cache: deleted {tag}");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

impl CacheStore {
    /// Removes install workspaces left behind by a process that never got to
    /// clean up (killed, power loss). Returns how many were removed.
    pub async fn sweep_workspaces(&self) -> usize {
        let mut entries = match fs::read_dir(&self.base_dir).await {
            Ok(entries) => entries,
            Err(_) => return 0,
        };
        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(WORKSPACE_PREFIX) {
                continue;
            }
            if !entry.file_type().await.is_ok_and(|kind| kind.is_dir()) {
                continue;
            }
            match fs::remove_dir_all(entry.path()).await {
                Ok(()) => {
                    debug!("cache: removed stale workspace {name}");
                    removed += 1;
                }
                Err(err) => warn!("cache: unable to remove stale workspace {name}: {err}"),
            }
        }
        removed
    }
}

fn is_safe_tag(tag: &str) -> bool {
    !tag.is_empty()
        && !tag.starts_with('.')
        && !tag.contains(['/', '\\', ':'])
        && Path::new(tag).file_name().is_some_and(|name| name == tag)
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CacheReadError> {
    let bytes = fs::read(path).await.map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            CacheReadError::Missing {
                path: path.to_path_buf(),
            }
        } else {
            CacheReadError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    serde_json::from_slice(&bytes).map_err(|source| CacheReadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes next to the destination and renames over it.
async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await
}

pub(crate) fn copy_dir(from: &Path, to: &Path) -> Result<(), String> {
    std::fs::create_dir_all(to).map_err(|e| format!("copy dir create error: {e}"))?;
    for entry in std::fs::read_dir(from).map_err(|e| format!("copy dir read error: {e}"))? {
        let entry = entry.map_err(|e| format!("copy dir entry error: {e}"))?;
        let src_path = entry.path();
        let dst_path = to.join(entry.file_name());
        let file_type = entry
            .file_type()
            .map_err(|e| format!("copy filetype error: {e}"))?;
        if file_type.is_dir() {
            copy_dir(&src_path, &dst_path)?;
        } else if file_type.is_symlink() {
            copy_symlink(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path).map_err(|e| format!("copy file error: {e}"))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(from: &Path, to: &Path) -> Result<(), String> {
    let target = std::fs::read_link(from).map_err(|e| format!("read link error: {e}"))?;
    std::os::unix::fs::symlink(target, to).map_err(|e| format!("symlink error: {e}"))
}

#[cfg(not(unix))]
fn copy_symlink(from: &Path, to: &Path) -> Result<(), String> {
    std::fs::copy(from, to)
        .map(|_| ())
        .map_err(|e| format!("copy file error: {e}"))
}
