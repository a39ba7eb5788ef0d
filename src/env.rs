use std::env;
use std::path::PathBuf;

/// Returns the root data directory used by the launcher.
pub fn default_app_dir() -> PathBuf {
    let base = match env::consts::OS {
        "windows" => env::var_os("LOCALAPPDATA")
            .or_else(|| env::var_os("APPDATA"))
            .map(PathBuf::from),
        "macos" => env::var_os("HOME")
            .map(PathBuf::from)
            .map(|home| home.join("Library").join("Application Support")),
        _ => env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                env::var_os("HOME")
                    .map(PathBuf::from)
                    .map(|home| home.join(".local").join("share"))
            }),
    }
    .unwrap_or_else(|| PathBuf::from("."));

    base.join("release-launcher")
}

/// Cache directory for one repository, e.g. `.../release-launcher/owner_app`.
pub fn repo_cache_dir(owner: &str, name: &str) -> PathBuf {
    default_app_dir().join(format!("{owner}_{name}"))
}
