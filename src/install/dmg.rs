use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tokio::process::Command;

use crate::error::InstallError;
use crate::storage::copy_dir;

/// Mounts a disk image, copies the application bundle out, then detaches.
pub async fn extract_dmg(image: &Path, workspace: &Path, payload: &Path) -> Result<(), InstallError> {
    let mount_point = workspace.join("mnt");
    tokio::fs::create_dir_all(&mount_point)
        .await
        .map_err(InstallError::io("failed to create mount point"))?;

    attach(image, &mount_point).await?;
    let copied = copy_bundle(&mount_point, payload).await;
    detach(&mount_point).await;
    copied
}

async fn attach(image: &Path, mount_point: &Path) -> Result<(), InstallError> {
    info!("install: mounting {}", image.display());
    let output = Command::new("hdiutil")
        .arg("attach")
        .arg("-nobrowse")
        .arg("-readonly")
        .arg("-noautoopen")
        .arg("-mountpoint")
        .arg(mount_point)
        .arg(image)
        .output()
        .await
        .map_err(|e| InstallError::Extract(format!("failed to run hdiutil: {e}")))?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(InstallError::Extract(format!(
            "hdiutil attach failed: {}",
            stderr.trim()
        )));
    }
    Ok(())
}

async fn detach(mount_point: &Path) {
    for force in [false, true] {
        let mut cmd = Command::new("hdiutil");
        cmd.arg("detach").arg(mount_point);
        if force {
            cmd.arg("-force");
        }
        match cmd.output().await {
            Ok(output) if output.status.success() => {
                debug!("install: detached {}", mount_point.display());
                return;
            }
            Ok(output) => warn!(
                "install: hdiutil detach failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(err) => warn!("install: failed to run hdiutil detach: {err}"),
        }
    }
}

async fn copy_bundle(mount_point: &Path, payload: &Path) -> Result<(), InstallError> {
    let (from, to) = match find_app_bundle(mount_point).await {
        Some(bundle) => {
            let name = bundle.file_name().map(PathBuf::from).unwrap_or_default();
            (bundle, payload.join(name))
        }
        None => {
            warn!("install: no .app bundle in image; copying whole volume");
            (mount_point.to_path_buf(), payload.to_path_buf())
        }
    };
    tokio::task::spawn_blocking(move || copy_dir(&from, &to))
        .await
        .map_err(|e| InstallError::Extract(e.to_string()))?
        .map_err(InstallError::Extract)
}

async fn find_app_bundle(dir: &Path) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "app") {
            return Some(path);
        }
    }
    None
}
