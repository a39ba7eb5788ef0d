use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{debug, info, warn};
use regex::Regex;
use tar::Archive;
use tempfile::TempDir;
use zip::read::ZipArchive;

use crate::engine::models::{CachedInstall, Release};
use crate::error::{InstallError, NoMatchingAssetError};
use crate::networking::ReleaseClient;
use crate::platform::{self, ArchiveKind};
use crate::storage::{CacheStore, WORKSPACE_PREFIX};
use crate::util::progress_percent;

mod dmg;

/// Pipeline stages, in order. Any failure aborts the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstallStage {
    Selected,
    Downloading,
    Downloaded,
    Extracting,
    Installed,
}

impl InstallStage {
    fn label(self) -> &'static str {
        match self {
            InstallStage::Selected => "selected",
            InstallStage::Downloading => "downloading",
            InstallStage::Downloaded => "downloaded",
            InstallStage::Extracting => "extracting",
            InstallStage::Installed => "installed",
        }
    }
}

/// Downloads a release asset, unpacks it and commits it to the cache.
pub struct Installer<'a> {
    client: &'a ReleaseClient,
    store: &'a CacheStore,
    pattern: &'a Regex,
    draw: bool,
}

impl<'a> Installer<'a> {
    pub fn new(client: &'a ReleaseClient, store: &'a CacheStore, pattern: &'a Regex) -> Self {
        Self {
            client,
            store,
            pattern,
            draw: true,
        }
    }

    /// Suppresses progress bars.
    pub fn quiet(mut self) -> Self {
        self.draw = false;
        self
    }

    /// Runs the pipeline. The temp workspace is removed on every exit path,
    /// including Ctrl-C or the future being dropped, and the cache is
    /// untouched unless the commit succeeds. Workspaces orphaned by a killed
    /// process are swept by [`CacheStore::sweep_workspaces`].
    pub async fn install(&self, release: &Release) -> Result<CachedInstall, InstallError> {
        tokio::select! {
            result = self.run(release) => result,
            Ok(()) = tokio::signal::ctrl_c() => {
                warn!("install: interrupted while installing {}", release.tag);
                Err(InstallError::Interrupted)
            }
        }
    }

    async fn run(&self, release: &Release) -> Result<CachedInstall, InstallError> {
        let mut stage = InstallStage::Selected;
        debug!("install: {} {}", release.tag, stage.label());
        let asset = platform::platform_asset(release, self.pattern).ok_or_else(|| {
            NoMatchingAssetError {
                tag: release.tag.clone(),
                pattern: self.pattern.as_str().to_owned(),
            }
        })?;

        tokio::fs::create_dir_all(self.store.base_dir())
            .await
            .map_err(InstallError::io("unable to create cache dir"))?;
        let workspace = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(self.store.base_dir())
            .map_err(InstallError::io("unable to create temp dir"))?;

        stage = InstallStage::Downloading;
        debug!("install: {} {}", release.tag, stage.label());
        let archive = workspace.path().join(file_name_for(&asset.name));
        let bar = self.download_bar(&release.tag, asset.size_bytes);
        let downloaded = self
            .client
            .download_to_path(
                &asset.download_url,
                &archive,
                Some(asset.size_bytes),
                |done, total, speed| {
                    if let Some(total) = total {
                        bar.set_length(total);
                    }
                    bar.set_position(done);
                    bar.set_message(speed.to_owned());
                    debug!(
                        "install: downloaded {done} bytes ({:.1}%)",
                        progress_percent(done, total)
                    );
                },
            )
            .await;
        let downloaded = finish(&bar, downloaded, format!("downloaded {}", asset.name))?;
        stage = InstallStage::Downloaded;
        info!("install: {} {} ({downloaded} bytes)", release.tag, stage.label());

        stage = InstallStage::Extracting;
        debug!("install: {} {}", release.tag, stage.label());
        let spinner = self.spinner(format!("extracting {}", asset.name));
        let extracted = self
            .extract(&archive, ArchiveKind::from_name(&asset.name), &workspace)
            .await;
        let payload = finish(&spinner, extracted, format!("extracted {}", asset.name))?;

        let spinner = self.spinner(format!("installing {}", release.tag));
        let committed = self.store.commit_install(&release.tag, &payload, release).await;
        let install = finish(&spinner, committed, format!("installed {}", release.tag))?;
        stage = InstallStage::Installed;
        info!("install: {} {}", release.tag, stage.label());

        if let Err(err) = workspace.close() {
            warn!("install: failed to remove temp dir: {err}");
        }
        Ok(install)
    }

    async fn extract(
        &self,
        archive: &Path,
        kind: ArchiveKind,
        workspace: &TempDir,
    ) -> Result<PathBuf, InstallError> {
        let payload = workspace.path().join("payload");
        fs::create_dir_all(&payload).map_err(InstallError::io("unable to create payload dir"))?;
        info!("install: extracting {} as {:?}", archive.display(), kind);

        if kind == ArchiveKind::Dmg {
            dmg::extract_dmg(archive, workspace.path(), &payload).await?;
        } else {
            let (archive, target) = (archive.to_path_buf(), payload.clone());
            tokio::task::spawn_blocking(move || match kind {
                ArchiveKind::TarGz => extract_targz(&archive, &target),
                ArchiveKind::Zip => extract_zip(&archive, &target),
                _ => install_binary(&archive, &target),
            })
            .await
            .map_err(|e| InstallError::Extract(e.to_string()))??;
        }

        payload_root(&payload).map_err(InstallError::io("unable to inspect payload"))
    }

    fn download_bar(&self, tag: &str, size: u64) -> ProgressBar {
        let bar = ProgressBar::with_draw_target(Some(size), self.draw_target());
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner} {prefix} [{bar:30}] {bytes}/{total_bytes} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
        );
        bar.set_prefix(format!("downloading {tag}"));
        bar
    }

    fn spinner(&self, message: String) -> ProgressBar {
        let spinner = ProgressBar::with_draw_target(None, self.draw_target());
        spinner.set_message(message);
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }

    fn draw_target(&self) -> ProgressDrawTarget {
        if self.draw {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        }
    }
}

/// Closes a progress indicator with a success or failure line.
fn finish<T>(
    bar: &ProgressBar,
    result: Result<T, InstallError>,
    done: String,
) -> Result<T, InstallError> {
    match &result {
        Ok(_) => bar.finish_with_message(format!("✔ {done}")),
        Err(err) => bar.abandon_with_message(format!("✘ {err}")),
    }
    result
}

fn file_name_for(asset_name: &str) -> String {
    let name = asset_name
        .rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .unwrap_or("download");
    name.to_owned()
}

fn extract_targz(archive_path: &Path, target: &Path) -> Result<(), InstallError> {
    let file = fs::File::open(archive_path)
        .map_err(|e| InstallError::Extract(format!("tar.gz open error: {e}")))?;
    let mut archive = Archive::new(flate2::read::GzDecoder::new(file));
    archive.set_preserve_permissions(true);
    archive
        .unpack(target)
        .map_err(|e| InstallError::Extract(format!("tar.gz extract error: {e}")))
}

fn extract_zip(archive_path: &Path, target: &Path) -> Result<(), InstallError> {
    let file = fs::File::open(archive_path)
        .map_err(|e| InstallError::Extract(format!("zip open error: {e}")))?;
    let mut archive =
        ZipArchive::new(file).map_err(|e| InstallError::Extract(format!("zip parse error: {e}")))?;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| InstallError::Extract(format!("zip entry error: {e}")))?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("install: skipping unsafe zip entry {}", entry.name());
            continue;
        };
        let out_path = target.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .map_err(|e| InstallError::Extract(format!("zip dir create error: {e}")))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| InstallError::Extract(format!("zip parent dir error: {e}")))?;
        }
        let mut out_file = fs::File::create(&out_path)
            .map_err(|e| InstallError::Extract(format!("zip create file error: {e}")))?;
        io::copy(&mut entry, &mut out_file)
            .map_err(|e| InstallError::Extract(format!("zip write error: {e}")))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&out_path, fs::Permissions::from_mode(mode));
        }
    }
    Ok(())
}

/// A bare executable download becomes the only file in the payload.
fn install_binary(file: &Path, target: &Path) -> Result<(), InstallError> {
    let name = file
        .file_name()
        .ok_or_else(|| InstallError::Extract("download has no file name".into()))?;
    let dest = target.join(name);
    fs::rename(file, &dest)
        .or_else(|_| fs::copy(file, &dest).map(|_| ()))
        .map_err(|e| InstallError::Extract(format!("unable to place binary: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(&dest, fs::Permissions::from_mode(0o755));
    }
    Ok(())
}

/// Archives that wrap everything in one top-level folder are flattened;
/// application bundles are kept whole.
fn payload_root(payload: &Path) -> io::Result<PathBuf> {
    let mut entries = fs::read_dir(payload)?;
    let first = match entries.next() {
        Some(entry) => entry?,
        None => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "archive contained no files",
            ));
        }
    };
    if entries.next().is_some() {
        return Ok(payload.to_path_buf());
    }
    let path = first.path();
    let is_bundle = path.extension().is_some_and(|ext| ext == "app");
    if first.file_type()?.is_dir() && !is_bundle {
        Ok(path)
    } else {
        Ok(payload.to_path_buf())
    }
}
