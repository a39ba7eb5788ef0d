use std::cmp::Ordering;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A downloadable file attached to a release.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    #[serde(rename = "browser_download_url")]
    pub download_url: String,
    #[serde(rename = "size", default)]
    pub size_bytes: u64,
}

/// A release as published by the remote index. The same record is written
/// to the snapshot file and to each install's manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    #[serde(rename = "tag_name")]
    pub tag: String,
    #[serde(rename = "published_at", default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(rename = "prerelease", default)]
    pub is_prerelease: bool,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl Release {
    pub fn is_stable(&self) -> bool {
        !self.is_prerelease
    }

    /// Newest first; releases without a publish time sort last.
    pub fn by_recency(a: &Release, b: &Release) -> Ordering {
        match (a.published_at, b.published_at) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

/// A release whose files live under `<cache>/<tag>/` next to a valid manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedInstall {
    pub release: Release,
    pub path: PathBuf,
}

impl CachedInstall {
    pub fn tag(&self) -> &str {
        &self.release.tag
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub last_version: Option<String>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn release(tag: &str, day: u32, prerelease: bool, assets: &[&str]) -> Release {
        Release {
            tag: tag.into(),
            published_at: Some(
                DateTime::parse_from_rfc3339(&format!("2024-05-{day:02}T12:00:00Z"))
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap(),
            ),
            is_prerelease: prerelease,
            assets: assets
                .iter()
                .map(|name| Asset {
                    name: (*name).into(),
                    download_url: format!("https://example.invalid/{tag}/{name}"),
                    size_bytes: 1024,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::release;
    use super::*;

    #[test]
    fn parses_github_release_payload() {
        let raw = r#"{
            "tag_name": "v1.2.0",
            "prerelease": true,
            "published_at": "2024-05-03T10:00:00Z",
            "html_url": "https://github.com/owner/app/releases/tag/v1.2.0",
            "assets": [
                {"name": "app-linux-x86_64.tar.gz", "browser_download_url": "https://dl/app.tgz", "size": 42}
            ]
        }"#;
        let release: Release = serde_json::from_str(raw).unwrap();
        assert_eq!(release.tag, "v1.2.0");
        assert!(release.is_prerelease);
        assert_eq!(release.assets[0].download_url, "https://dl/app.tgz");
        assert_eq!(release.assets[0].size_bytes, 42);
    }

    #[test]
    fn tolerates_missing_optional_fields() {
        let release: Release = serde_json::from_str(r#"{"tag_name": "v0.1"}"#).unwrap();
        assert!(release.is_stable());
        assert!(release.published_at.is_none());
        assert!(release.assets.is_empty());
    }

    #[test]
    fn orders_newest_first_with_undated_last() {
        let mut undated = release("v0", 1, false, &[]);
        undated.published_at = None;
        let mut list = vec![
            release("v1", 1, false, &[]),
            undated,
            release("v3", 3, false, &[]),
        ];
        list.sort_by(Release::by_recency);
        let tags: Vec<_> = list.iter().map(|r| r.tag.as_str()).collect();
        assert_eq!(tags, ["v3", "v1", "v0"]);
    }

    #[test]
    fn settings_use_camel_case_key() {
        let settings = Settings {
            last_version: Some("v2".into()),
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert_eq!(json, r#"{"lastVersion":"v2"}"#);
    }
}
