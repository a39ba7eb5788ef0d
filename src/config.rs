use std::path::PathBuf;

use regex::Regex;

use crate::env;
use crate::error::LauncherError;
use crate::platform;

pub const DEFAULT_REPO: &str = "neovim/neovim";
pub const DEFAULT_API_URL: &str = "https://api.github.com";

/// Validated run configuration shared by every component.
#[derive(Clone, Debug)]
pub struct LauncherConfig {
    pub owner: String,
    pub name: String,
    pub api_url: String,
    pub token: Option<String>,
    pub pages: u32,
    pub cache_dir: PathBuf,
    pub asset_pattern: Regex,
    pub exec: Option<PathBuf>,
    pub offline: bool,
}

impl LauncherConfig {
    pub fn new(
        repo: &str,
        api_url: &str,
        cache_dir: Option<PathBuf>,
        asset_pattern: Option<&str>,
    ) -> Result<Self, LauncherError> {
        let (owner, name) = split_repo(repo)?;
        let pattern = asset_pattern.unwrap_or_else(|| platform::default_asset_pattern());
        let asset_pattern = Regex::new(pattern)
            .map_err(|e| LauncherError::Config(format!("bad asset pattern `{pattern}`: {e}")))?;
        let cache_dir = cache_dir.unwrap_or_else(|| env::repo_cache_dir(&owner, &name));
        Ok(Self {
            owner,
            name,
            api_url: api_url.trim_end_matches('/').to_owned(),
            token: None,
            pages: 1,
            cache_dir,
            asset_pattern,
            exec: None,
            offline: false,
        })
    }

    pub fn repo_label(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

fn split_repo(repo: &str) -> Result<(String, String), LauncherError> {
    match repo.trim().split_once('/') {
        Some((owner, name))
            if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok((owner.to_owned(), name.to_owned()))
        }
        _ => Err(LauncherError::Config(format!(
            "repository must look like `owner/name`, got `{repo}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_owner_and_name() {
        let config = LauncherConfig::new("owner/app", "https://api.example/", None, None).unwrap();
        assert_eq!(config.owner, "owner");
        assert_eq!(config.name, "app");
        assert_eq!(config.api_url, "https://api.example");
        assert!(config.cache_dir.ends_with("owner_app"));
    }

    #[test]
    fn rejects_malformed_repo() {
        for repo in ["app", "/app", "owner/", "a/b/c"] {
            assert!(LauncherConfig::new(repo, DEFAULT_API_URL, None, None).is_err());
        }
    }

    #[test]
    fn rejects_invalid_pattern() {
        let err = LauncherConfig::new("o/a", DEFAULT_API_URL, None, Some("(")).unwrap_err();
        assert!(matches!(err, LauncherError::Config(_)));
    }
}
