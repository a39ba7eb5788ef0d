use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::LauncherError;

/// Starts an installed build, forwarding extra command-line arguments.
#[derive(Clone, Debug, Default)]
pub struct ProcessLauncher {
    exec: Option<PathBuf>,
}

impl ProcessLauncher {
    pub fn new(exec: Option<PathBuf>) -> Self {
        Self { exec }
    }

    pub fn launch(&self, install_dir: &Path, args: &[OsString]) -> Result<(), LauncherError> {
        let mut cmd = self.command(install_dir)?;
        cmd.args(args);
        cmd.current_dir(install_dir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());

        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            // DETACHED_PROCESS
            cmd.creation_flags(0x00000008);
        }

        debug!("launch: {:?}", cmd);
        cmd.spawn()
            .map_err(|e| LauncherError::Launch(format!("failed to start process: {e}")))?;
        info!("launch: process started from {}", install_dir.display());
        Ok(())
    }

    fn command(&self, install_dir: &Path) -> Result<Command, LauncherError> {
        if let Some(exec) = &self.exec {
            let path = install_dir.join(exec);
            if !path.exists() {
                return Err(LauncherError::Launch(format!(
                    "configured executable not found at {}",
                    path.display()
                )));
            }
            return Ok(Command::new(path));
        }

        if cfg!(target_os = "macos")
            && let Some(bundle) = find_app_bundle(install_dir)
        {
            let mut command = Command::new("open");
            command.arg("-n").arg("-a").arg(bundle).arg("--args");
            return Ok(command);
        }

        find_executable(install_dir)
            .map(Command::new)
            .ok_or_else(|| {
                warn!("launch: nothing executable under {}", install_dir.display());
                LauncherError::Launch(format!(
                    "no executable found in {}; pass --exec",
                    install_dir.display()
                ))
            })
    }
}

fn find_app_bundle(dir: &Path) -> Option<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .flatten()
        .find(|entry| entry.file_type().is_dir() && entry.path().extension().is_some_and(|e| e == "app"))
        .map(|entry| entry.into_path())
}

/// First executable regular file, shallowest first, `bin/` preferred at equal depth.
fn find_executable(dir: &Path) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .flatten()
        .filter(|entry| entry.file_type().is_file() && is_executable(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    candidates.sort_by_key(|path| {
        let depth = path.strip_prefix(dir).map(|p| p.components().count()).unwrap_or(usize::MAX);
        let in_bin = path
            .parent()
            .and_then(Path::file_name)
            .is_some_and(|name| name == "bin");
        (depth, !in_bin)
    });
    candidates.into_iter().next()
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    let is_manifest = path
        .file_name()
        .is_some_and(|name| name == crate::storage::MANIFEST_FILE);
    !is_manifest
        && path
            .metadata()
            .map(|meta| meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("exe"))
}
