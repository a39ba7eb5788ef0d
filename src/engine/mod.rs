use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::LauncherConfig;
use crate::engine::models::{Release, Settings};
use crate::engine::state::{ChoiceSet, RefreshMessage};
use crate::error::{FetchError, LauncherError};
use crate::install::Installer;
use crate::networking::ReleaseClient;
use crate::process::ProcessLauncher;
use crate::storage::CacheStore;
use crate::ui::{Controller, Outcome, Prompt};

pub mod models;
pub mod state;

const REFRESH_GRACE: Duration = Duration::from_secs(10);

/// Everything the picker needs for one run, plus the in-flight refresh.
pub struct Session {
    choices: ChoiceSet,
    settings: Settings,
    refresh: Option<oneshot::Receiver<RefreshMessage>>,
    refresh_task: Option<JoinHandle<()>>,
}

impl Session {
    pub fn choices(&self) -> &ChoiceSet {
        &self.choices
    }

    pub fn refreshing(&self) -> bool {
        self.refresh_task.is_some()
    }
}

pub struct LauncherEngine {
    config: LauncherConfig,
    networking: ReleaseClient,
    storage: CacheStore,
    process: ProcessLauncher,
    draw_progress: bool,
}

impl LauncherEngine {
    pub fn new(config: LauncherConfig) -> Self {
        let networking = ReleaseClient::new(&config);
        let storage = CacheStore::new(config.cache_dir.clone());
        let process = ProcessLauncher::new(config.exec.clone());
        Self {
            config,
            networking,
            storage,
            process,
            draw_progress: true,
        }
    }

    /// Hides install progress bars.
    pub fn quiet(mut self) -> Self {
        self.draw_progress = false;
        self
    }

    pub fn storage(&self) -> &CacheStore {
        &self.storage
    }

    /// Loads the cache and decides how the release index is obtained: a
    /// previous snapshot is shown at once while a refresh runs behind it,
    /// otherwise the first fetch is awaited.
    pub async fn bootstrap(&self) -> Result<Session, LauncherError> {
        info!(
            "bootstrap: {} cached in {}",
            self.config.repo_label(),
            self.storage.base_dir().display()
        );
        let swept = self.storage.sweep_workspaces().await;
        if swept > 0 {
            info!("bootstrap: removed {swept} abandoned install workspaces");
        }
        let installs = self.storage.list_cached_installs().await;
        let settings = self.storage.read_settings().await;
        let snapshot = self.storage.read_snapshot().await;
        let pattern = self.config.asset_pattern.clone();
        debug!(
            "bootstrap: {} cached installs, snapshot {}",
            installs.len(),
            if snapshot.is_some() { "present" } else { "absent" }
        );

        if self.config.offline {
            info!("bootstrap: offline, skipping refresh");
            let releases = snapshot.unwrap_or_default();
            if releases.is_empty() && installs.is_empty() {
                return Err(LauncherError::NothingToShow(FetchError::Offline));
            }
            let choices = ChoiceSet::build(releases, installs, &settings, pattern, false);
            return Ok(Session::settled(choices, settings));
        }

        match snapshot {
            Some(snapshot) => {
                let (refresh, task) = self.spawn_refresh();
                let choices = ChoiceSet::build(snapshot, installs, &settings, pattern, true);
                Ok(Session {
                    choices,
                    settings,
                    refresh: Some(refresh),
                    refresh_task: Some(task),
                })
            }
            None => {
                let releases = match self.networking.refresh(&self.storage).await {
                    Ok(releases) => releases,
                    Err(err) if installs.is_empty() => {
                        error!("bootstrap: first fetch failed with an empty cache: {err}");
                        return Err(LauncherError::NothingToShow(err));
                    }
                    Err(err) => {
                        warn!("bootstrap: fetch failed, showing cached installs only: {err}");
                        Vec::new()
                    }
                };
                let choices = ChoiceSet::build(releases, installs, &settings, pattern, false);
                Ok(Session::settled(choices, settings))
            }
        }
    }

    /// Refreshes in the background. The snapshot is written whether or not
    /// anyone is still listening for the result.
    fn spawn_refresh(&self) -> (oneshot::Receiver<RefreshMessage>, JoinHandle<()>) {
        let (tx, rx) = oneshot::channel();
        let networking = self.networking.clone();
        let storage = self.storage.clone();
        let task = tokio::spawn(async move {
            let message = match networking.refresh(&storage).await {
                Ok(releases) => RefreshMessage::Resolved(releases),
                Err(err) => {
                    warn!("refresh: {err}; keeping the cached snapshot");
                    RefreshMessage::Failed
                }
            };
            if tx.send(message).is_err() {
                debug!("refresh: selection already made, result kept for the next run");
            }
        });
        (rx, task)
    }

    pub async fn select<P: Prompt>(
        &self,
        session: &mut Session,
        prompt: &mut P,
    ) -> Result<Outcome, LauncherError> {
        let refresh = match session.refresh.take() {
            Some(refresh) => refresh,
            None => oneshot::channel().1,
        };
        Controller::new(prompt, &self.storage)
            .run(&mut session.choices, refresh)
            .await
    }

    /// Returns the install directory for `release`, installing it first when
    /// it is not cached yet.
    pub async fn prepare(&self, session: &Session, release: &Release) -> Result<PathBuf, LauncherError> {
        if let Some(install) = session.choices.cached_install(&release.tag) {
            info!("prepare: {} already cached", release.tag);
            return Ok(install.path.clone());
        }
        let installer = Installer::new(&self.networking, &self.storage, &self.config.asset_pattern);
        let installer = if self.draw_progress { installer } else { installer.quiet() };
        let install = installer.install(release).await?;
        Ok(install.path)
    }

    /// Records `tag` as the last launched version. Returns whether the
    /// settings file was written.
    pub async fn remember(&self, session: &Session, tag: &str) -> bool {
        if session.settings.last_version.as_deref() == Some(tag) {
            return false;
        }
        let settings = Settings {
            last_version: Some(tag.to_owned()),
        };
        match self.storage.write_settings(&settings).await {
            Ok(()) => true,
            Err(err) => {
                warn!("settings: failed to record {tag}: {err}");
                false
            }
        }
    }

    pub fn launch(&self, install_dir: &Path, args: &[OsString]) -> Result<(), LauncherError> {
        self.process.launch(install_dir, args)
    }

    /// Gives a still-running refresh a bounded amount of time to persist.
    /// Ctrl-C ends the wait early; once an install has registered a SIGINT
    /// listener the default handler no longer terminates the process.
    pub async fn wait_for_refresh(&self, session: Session) {
        let Some(task) = session.refresh_task else {
            return;
        };
        if task.is_finished() {
            return;
        }
        debug!("refresh: waiting for the snapshot write");
        tokio::select! {
            waited = tokio::time::timeout(REFRESH_GRACE, task) => match waited {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("refresh: task failed: {err}"),
                Err(_) => warn!(
                    "refresh: still running after {}s, giving up",
                    REFRESH_GRACE.as_secs()
                ),
            },
            Ok(()) = tokio::signal::ctrl_c() => warn!("refresh: interrupted, snapshot not updated"),
        }
    }
}

impl Session {
    fn settled(choices: ChoiceSet, settings: Settings) -> Self {
        Self {
            choices,
            settings,
            refresh: None,
            refresh_task: None,
        }
    }
}
