use std::collections::HashSet;
use std::path::Path;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::config::LauncherConfig;
use crate::engine::models::Release;
use crate::error::{FetchError, InstallError};
use crate::storage::CacheStore;
use crate::util::format_speed;

const PER_PAGE: u32 = 100;

/// Client for the remote release index plus the streaming asset download.
#[derive(Clone)]
pub struct ReleaseClient {
    client: Client,
    releases_url: String,
    token: Option<String>,
    pages: u32,
}

impl ReleaseClient {
    pub fn new(config: &LauncherConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("release-launcher/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|err| {
                warn!("network client: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self {
            client,
            releases_url: format!(
                "{}/repos/{}/{}/releases",
                config.api_url, config.owner, config.name
            ),
            token: config.token.clone(),
            pages: config.pages.max(1),
        }
    }

    /// All releases, newest first, up to the configured number of pages.
    pub async fn fetch_all_releases(&self) -> Result<Vec<Release>, FetchError> {
        let mut releases = Vec::new();
        for page in 1..=self.pages {
            let url = format!("{}?per_page={PER_PAGE}&page={page}", self.releases_url);
            let batch: Vec<Release> = self.get_json(&url).await?;
            let short_page = batch.len() < PER_PAGE as usize;
            releases.extend(batch);
            if short_page {
                break;
            }
        }
        debug!("refresh: fetched {} releases", releases.len());
        Ok(releases)
    }

    /// The index's own "latest" pointer.
    pub async fn fetch_latest_release(&self) -> Result<Release, FetchError> {
        self.get_json(&format!("{}/latest", self.releases_url)).await
    }

    /// Fetches both endpoints concurrently, prepends the latest pointer,
    /// drops repeated tags and replaces the snapshot. Nothing is written
    /// unless both fetches succeed.
    pub async fn refresh(&self, store: &CacheStore) -> Result<Vec<Release>, FetchError> {
        let started = Instant::now();
        let (latest, all) = tokio::try_join!(self.fetch_latest_release(), self.fetch_all_releases())?;

        let mut combined = Vec::with_capacity(all.len() + 1);
        combined.push(latest);
        combined.extend(all);
        let releases = dedup_by_tag(combined);

        store
            .write_snapshot(&releases)
            .await
            .map_err(FetchError::Persist)?;
        info!(
            "refresh: {} releases in {:.1}s",
            releases.len(),
            started.elapsed().as_secs_f32()
        );
        Ok(releases)
    }

    /// Streams `url` into `dest`, calling `progress` with (downloaded, total, speed_text).
    pub async fn download_to_path<F>(
        &self,
        url: &str,
        dest: &Path,
        expected_size: Option<u64>,
        mut progress: F,
    ) -> Result<u64, InstallError>
    where
        F: FnMut(u64, Option<u64>, &str),
    {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| InstallError::Download(format!("request failed: {e}")))?
            .error_for_status()
            .map_err(|e| InstallError::Download(format!("status error: {e}")))?;

        let mut file = File::create(dest)
            .await
            .map_err(InstallError::io("failed to create download file"))?;

        let total = response
            .content_length()
            .or(expected_size.filter(|size| *size > 0));
        let mut stream = response.bytes_stream();
        let mut downloaded: u64 = 0;
        let mut last_tick = Instant::now();
        let mut last_bytes = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| InstallError::Download(format!("stream error: {e}")))?;
            file.write_all(&chunk)
                .await
                .map_err(InstallError::io("write error"))?;
            downloaded += chunk.len() as u64;

            let since = last_tick.elapsed().as_secs_f32();
            if since > 0.2 {
                let speed = (downloaded - last_bytes) as f32 / since;
                progress(downloaded, total, &format_speed(speed));
                last_tick = Instant::now();
                last_bytes = downloaded;
            }
        }

        progress(downloaded, total, "0 B/s");

        file.flush().await.map_err(InstallError::io("flush error"))?;

        if let Some(total) = total
            && downloaded < total
        {
            return Err(InstallError::Incomplete {
                received: downloaded,
                expected: total,
            });
        }

        Ok(downloaded)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_owned(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_owned(),
                status,
            });
        }
        response.json().await.map_err(|source| FetchError::Transport {
            url: url.to_owned(),
            source,
        })
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .timeout(Duration::from_secs(30));
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Keeps the first occurrence of each tag.
pub fn dedup_by_tag(releases: Vec<Release>) -> Vec<Release> {
    let mut seen = HashSet::new();
    releases
        .into_iter()
        .filter(|release| seen.insert(release.tag.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn release_json(tag: &str, prerelease: bool, day: u32) -> serde_json::Value {
        json!({
            "tag_name": tag,
            "prerelease": prerelease,
            "published_at": format!("2024-05-{day:02}T00:00:00Z"),
            "assets": [{
                "name": "app-linux-x86_64.tar.gz",
                "browser_download_url": format!("https://dl.invalid/{tag}.tar.gz"),
                "size": 10
            }]
        })
    }

    fn client_for(server: &MockServer, tmp: &TempDir) -> (ReleaseClient, CacheStore) {
        let config = LauncherConfig::new(
            "owner/app",
            &server.uri(),
            Some(tmp.path().to_path_buf()),
            None,
        )
        .unwrap();
        (ReleaseClient::new(&config), CacheStore::new(tmp.path()))
    }

    async fn mount_index(server: &MockServer, list: serde_json::Value, latest: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/repos/owner/app/releases"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(list))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/owner/app/releases/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(latest))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn refresh_prepends_latest_and_persists_snapshot() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        mount_index(
            &server,
            json!([release_json("nightly", true, 5), release_json("v2", false, 4)]),
            release_json("v2", false, 4),
        )
        .await;
        let (client, store) = client_for(&server, &tmp);

        let releases = client.refresh(&store).await.unwrap();
        let tags: Vec<_> = releases.iter().map(|r| r.tag.as_str()).collect();
        assert_eq!(tags, ["v2", "nightly"]);
        assert_eq!(store.read_snapshot().await.unwrap(), releases);
    }

    #[tokio::test]
    async fn refresh_replaces_previous_snapshot() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        mount_index(&server, json!([release_json("v3", false, 6)]), release_json("v3", false, 6))
            .await;
        let (client, store) = client_for(&server, &tmp);
        store
            .write_snapshot(&[crate::engine::models::fixtures::release("v1", 1, false, &[])])
            .await
            .unwrap();

        client.refresh(&store).await.unwrap();
        let tags: Vec<_> = store
            .read_snapshot()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.tag)
            .collect();
        assert_eq!(tags, ["v3"]);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_snapshot_untouched() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        Mock::given(method("GET"))
            .and(path("/repos/owner/app/releases"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/owner/app/releases/latest"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let (client, store) = client_for(&server, &tmp);
        let previous = vec![crate::engine::models::fixtures::release("v1", 1, false, &[])];
        store.write_snapshot(&previous).await.unwrap();

        let err = client.refresh(&store).await.unwrap_err();
        assert!(matches!(
            err,
            FetchError::Status { status, .. } if status == reqwest::StatusCode::FORBIDDEN
        ));
        assert_eq!(store.read_snapshot().await.unwrap(), previous);
    }

    #[tokio::test]
    async fn follows_pages_until_short_page() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        let full: Vec<_> = (0..PER_PAGE)
            .map(|i| release_json(&format!("v{i}"), false, 1))
            .collect();
        Mock::given(method("GET"))
            .and(path("/repos/owner/app/releases"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(full)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/owner/app/releases"))
            .and(query_param("page", "2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!([release_json("old", false, 1)])),
            )
            .mount(&server)
            .await;

        let mut config =
            LauncherConfig::new("owner/app", &server.uri(), Some(tmp.path().into()), None).unwrap();
        config.pages = 5;
        let releases = ReleaseClient::new(&config).fetch_all_releases().await.unwrap();
        assert_eq!(releases.len(), PER_PAGE as usize + 1);
        assert_eq!(releases.last().unwrap().tag, "old");
    }

    #[tokio::test]
    async fn sends_bearer_token_when_configured() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        Mock::given(method("GET"))
            .and(path("/repos/owner/app/releases/latest"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(release_json("v1", false, 1)))
            .mount(&server)
            .await;

        let mut config =
            LauncherConfig::new("owner/app", &server.uri(), Some(tmp.path().into()), None).unwrap();
        config.token = Some("secret".into());
        let latest = ReleaseClient::new(&config).fetch_latest_release().await.unwrap();
        assert_eq!(latest.tag, "v1");
    }

    #[tokio::test]
    async fn download_streams_body_to_disk() {
        let server = MockServer::start().await;
        let tmp = TempDir::new().unwrap();
        Mock::given(method("GET"))
            .and(path("/asset.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 4096]))
            .mount(&server)
            .await;
        let (client, _) = client_for(&server, &tmp);
        let dest = tmp.path().join("asset.bin");

        let mut last = (0, None);
        let received = client
            .download_to_path(&format!("{}/asset.bin", server.uri()), &dest, None, |done, total, _| {
                last = (done, total);
            })
            .await
            .unwrap();
        assert_eq!(received, 4096);
        assert_eq!(last, (4096, Some(4096)));
        assert_eq!(std::fs::read(&dest).unwrap().len(), 4096);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        use crate::engine::models::fixtures::release;
        let mut pointer = release("v2", 2, false, &[]);
        pointer.assets.clear();
        let list = dedup_by_tag(vec![
            pointer.clone(),
            release("v3", 3, true, &["x"]),
            release("v2", 2, false, &["y"]),
        ]);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], pointer);
    }
}
