use regex::Regex;

use crate::engine::models::{Asset, Release};

/// Asset-name pattern for the host platform. Exactly one is active per run.
pub fn default_asset_pattern() -> &'static str {
    if cfg!(target_os = "macos") {
        if cfg!(target_arch = "aarch64") {
            r"(?i)(mac|darwin|osx).*(arm64|aarch64|universal).*\.(dmg|tar\.gz|zip)$"
        } else {
            r"(?i)(mac|darwin|osx).*(x86_64|x64|amd64|intel|universal).*\.(dmg|tar\.gz|zip)$"
        }
    } else if cfg!(target_os = "windows") {
        if cfg!(target_arch = "aarch64") {
            r"(?i)win.*(arm64|aarch64).*\.zip$"
        } else {
            r"(?i)win(64|.*(x86_64|x64|amd64)).*\.zip$"
        }
    } else if cfg!(target_arch = "aarch64") {
        r"(?i)linux.*(arm64|aarch64).*\.(tar\.gz|tgz|zip|appimage)$"
    } else {
        r"(?i)linux.*(x86_64|x64|amd64).*\.(tar\.gz|tgz|zip|appimage)$"
    }
}

/// The first asset whose name matches the platform pattern.
pub fn platform_asset<'a>(release: &'a Release, pattern: &Regex) -> Option<&'a Asset> {
    release
        .assets
        .iter()
        .find(|asset| pattern.is_match(&asset.name))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveKind {
    TarGz,
    Zip,
    Dmg,
    /// Anything else is a single executable file.
    Binary,
}

impl ArchiveKind {
    pub fn from_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            ArchiveKind::TarGz
        } else if lower.ends_with(".zip") {
            ArchiveKind::Zip
        } else if lower.ends_with(".dmg") {
            ArchiveKind::Dmg
        } else {
            ArchiveKind::Binary
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::fixtures::release;

    #[test]
    fn default_pattern_compiles() {
        assert!(Regex::new(default_asset_pattern()).is_ok());
    }

    #[test]
    fn picks_first_matching_asset() {
        let pattern = Regex::new(r"linux.*\.tar\.gz$").unwrap();
        let rel = release(
            "v1",
            1,
            false,
            &["app-macos.dmg", "app-linux-x64.tar.gz", "app-linux-arm64.tar.gz"],
        );
        let asset = platform_asset(&rel, &pattern).unwrap();
        assert_eq!(asset.name, "app-linux-x64.tar.gz");
    }

    #[test]
    fn no_match_yields_none() {
        let pattern = Regex::new(r"\.dmg$").unwrap();
        let rel = release("v1", 1, false, &["app-linux.tar.gz"]);
        assert!(platform_asset(&rel, &pattern).is_none());
    }

    #[test]
    fn detects_archive_kind_from_name() {
        assert_eq!(ArchiveKind::from_name("a.tar.gz"), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::from_name("a.TGZ"), ArchiveKind::TarGz);
        assert_eq!(ArchiveKind::from_name("a.zip"), ArchiveKind::Zip);
        assert_eq!(ArchiveKind::from_name("a.dmg"), ArchiveKind::Dmg);
        assert_eq!(ArchiveKind::from_name("a.AppImage"), ArchiveKind::Binary);
    }
}
