use std::io;

use log::{debug, info, warn};
use tokio::sync::oneshot;

use crate::engine::models::Release;
use crate::engine::state::{ChoiceSet, RefreshMessage};
use crate::error::LauncherError;
use crate::storage::CacheStore;

#[cfg(test)]
pub(crate) mod scripted;
mod terminal;

pub use self::terminal::Terminal;

/// Input decoded by the terminal collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Input {
    Up,
    Down,
    First,
    Last,
    Submit,
    Delete,
    Cancel,
    Redraw,
}

/// The interactive widget the controller drives.
#[allow(async_fn_in_trait)]
pub trait Prompt {
    fn render(&mut self, choices: &ChoiceSet) -> io::Result<()>;

    /// Must be cancel-safe: the controller drops it when the refresh lands first.
    async fn next_input(&mut self) -> io::Result<Input>;

    async fn confirm(&mut self, question: &str) -> io::Result<bool>;

    /// Tears the widget down, leaving `summary` on screen when given.
    fn finish(&mut self, summary: Option<&str>) -> io::Result<()>;
}

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Selected(Release),
    Cancelled,
}

/// Runs the picker against `prompt` while the background refresh is in flight.
pub struct Controller<'a, P: Prompt> {
    prompt: &'a mut P,
    store: &'a CacheStore,
}

impl<'a, P: Prompt> Controller<'a, P> {
    pub fn new(prompt: &'a mut P, store: &'a CacheStore) -> Self {
        Self { prompt, store }
    }

    /// Loops until the user commits or cancels. A refresh result arriving
    /// before the commit is applied in place; after it, the receiver is
    /// dropped and the result goes nowhere.
    pub async fn run(
        &mut self,
        choices: &mut ChoiceSet,
        mut refresh: oneshot::Receiver<RefreshMessage>,
    ) -> Result<Outcome, LauncherError> {
        let mut refresh_done = false;
        loop {
            if choices.is_empty() {
                self.prompt.finish(Some("nothing left to launch")).map_err(LauncherError::Terminal)?;
                return Ok(Outcome::Cancelled);
            }
            self.prompt.render(choices).map_err(LauncherError::Terminal)?;

            tokio::select! {
                biased;
                message = &mut refresh, if !refresh_done => {
                    refresh_done = true;
                    let message = message.unwrap_or(RefreshMessage::Failed);
                    if choices.apply_refresh(message) {
                        debug!("ui: refreshed experimental entry");
                    }
                }
                input = self.prompt.next_input() => {
                    let input = input.map_err(LauncherError::Terminal)?;
                    if let Some(outcome) = self.handle(choices, input).await? {
                        return Ok(outcome);
                    }
                }
            }
        }
    }

    async fn handle(
        &mut self,
        choices: &mut ChoiceSet,
        input: Input,
    ) -> Result<Option<Outcome>, LauncherError> {
        match input {
            Input::Up => choices.move_up(),
            Input::Down => choices.move_down(),
            Input::First => choices.move_first(),
            Input::Last => choices.move_last(),
            Input::Redraw => {}
            Input::Submit => {
                if let Some(release) = choices.commit() {
                    let summary = format!("selected {}", release.tag);
                    self.prompt.finish(Some(&summary)).map_err(LauncherError::Terminal)?;
                    info!("ui: {summary}");
                    return Ok(Some(Outcome::Selected(release)));
                }
            }
            Input::Delete => self.delete_current(choices).await?,
            Input::Cancel => {
                self.prompt.finish(None).map_err(LauncherError::Terminal)?;
                return Ok(Some(Outcome::Cancelled));
            }
        }
        Ok(None)
    }

    async fn delete_current(&mut self, choices: &mut ChoiceSet) -> Result<(), LauncherError> {
        let Some(tag) = choices
            .current()
            .filter(|choice| choice.cached)
            .and_then(|choice| choice.tag())
            .map(str::to_owned)
        else {
            return Ok(());
        };

        let confirmed = self
            .prompt
            .confirm(&format!("Delete {tag}? [y/N]"))
            .await
            .map_err(LauncherError::Terminal)?;
        if !confirmed {
            debug!("ui: kept {tag}");
            return Ok(());
        }

        if let Err(err) = self.store.delete_install(&tag).await {
            warn!("ui: failed to delete {tag}: {err}");
            return Err(LauncherError::Cache(err));
        }
        choices.mark_deleted(&tag);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use regex::Regex;
    use tempfile::TempDir;

    use super::scripted::ScriptedPrompt;
    use super::*;
    use crate::engine::models::fixtures::release;
    use crate::engine::models::{CachedInstall, Settings};
    use crate::engine::state::SelectionChoice;

    const ASSET: &str = "app-linux-x86_64.tar.gz";

    fn pattern() -> Regex {
        Regex::new(r"linux-x86_64\.tar\.gz$").unwrap()
    }

    fn remote() -> Vec<Release> {
        vec![
            release("nightly", 10, true, &[ASSET]),
            release("v2", 9, false, &[ASSET]),
            release("v1", 5, false, &[ASSET]),
        ]
    }

    async fn seed(store: &CacheStore, tag: &str, day: u32) -> CachedInstall {
        let payload = store.base_dir().join(format!(".seed-{tag}"));
        std::fs::create_dir_all(&payload).unwrap();
        std::fs::write(payload.join("app"), b"bin").unwrap();
        store
            .commit_install(tag, &payload, &release(tag, day, false, &[ASSET]))
            .await
            .unwrap()
    }

    fn no_refresh() -> oneshot::Receiver<RefreshMessage> {
        let (_tx, rx) = oneshot::channel();
        rx
    }

    fn tags(choices: &ChoiceSet) -> Vec<Option<&str>> {
        choices.choices().iter().map(SelectionChoice::tag).collect()
    }

    #[tokio::test]
    async fn enter_selects_focused_release() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let mut choices =
            ChoiceSet::build(remote(), vec![], &Settings::default(), pattern(), false);
        let mut prompt = ScriptedPrompt::new(&[Input::Down, Input::Submit], &[]);

        let outcome = Controller::new(&mut prompt, &store)
            .run(&mut choices, no_refresh())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Selected(remote()[0].clone()));
        assert_eq!(prompt.finished, Some(Some("selected nightly".into())));
    }

    #[tokio::test]
    async fn submit_on_pending_row_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let mut choices = ChoiceSet::build(remote(), vec![], &Settings::default(), pattern(), true);
        let (_tx, rx) = oneshot::channel();
        let mut prompt =
            ScriptedPrompt::new(&[Input::Down, Input::Submit, Input::Up, Input::Submit], &[]);

        let outcome = Controller::new(&mut prompt, &store).run(&mut choices, rx).await.unwrap();
        assert_eq!(outcome, Outcome::Selected(remote()[1].clone()));
    }

    #[tokio::test]
    async fn refresh_before_commit_updates_list_in_place() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let mut choices = ChoiceSet::build(remote(), vec![], &Settings::default(), pattern(), true);
        let (tx, rx) = oneshot::channel();
        let mut fresh = remote();
        fresh.insert(0, release("nightly-2", 11, true, &[ASSET]));
        tx.send(RefreshMessage::Resolved(fresh)).unwrap();

        let mut prompt = ScriptedPrompt::new(&[Input::Down, Input::Submit], &[]);
        let outcome = Controller::new(&mut prompt, &store).run(&mut choices, rx).await.unwrap();

        match outcome {
            Outcome::Selected(release) => assert_eq!(release.tag, "nightly-2"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(prompt.frames[0], [Some("v2".to_owned()), None]);
        assert_eq!(
            prompt.frames.last().unwrap(),
            &[Some("v2".to_owned()), Some("nightly-2".to_owned())]
        );
    }

    #[tokio::test]
    async fn refresh_after_commit_is_discarded() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let mut choices = ChoiceSet::build(remote(), vec![], &Settings::default(), pattern(), true);
        let (tx, rx) = oneshot::channel();
        let mut prompt = ScriptedPrompt::new(&[Input::Submit], &[]);

        let outcome = Controller::new(&mut prompt, &store).run(&mut choices, rx).await.unwrap();
        assert_eq!(outcome, Outcome::Selected(remote()[1].clone()));

        assert!(tx.send(RefreshMessage::Resolved(remote())).is_err());
        assert!(!choices.apply_refresh(RefreshMessage::Resolved(remote())));
        assert_eq!(tags(&choices), [Some("v2"), None]);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_offline_list_usable() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let cached = seed(&store, "v1", 5).await;
        let mut choices =
            ChoiceSet::build(remote(), vec![cached], &Settings::default(), pattern(), true);
        let (tx, rx) = oneshot::channel();
        drop(tx);

        let mut prompt = ScriptedPrompt::new(&[Input::Last, Input::Submit], &[]);
        let outcome = Controller::new(&mut prompt, &store).run(&mut choices, rx).await.unwrap();
        assert_eq!(tags(&choices), [Some("v2"), Some("nightly"), Some("v1")]);
        match outcome {
            Outcome::Selected(release) => assert_eq!(release.tag, "v1"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn confirmed_delete_removes_entry_from_disk_and_list() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let v1 = seed(&store, "v1", 5).await;
        let v0 = seed(&store, "v0", 1).await;
        let mut choices =
            ChoiceSet::build(remote(), vec![v1, v0], &Settings::default(), pattern(), false);

        let mut prompt =
            ScriptedPrompt::new(&[Input::Last, Input::Delete, Input::Cancel], &[true]);
        let outcome = Controller::new(&mut prompt, &store)
            .run(&mut choices, no_refresh())
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(prompt.questions, ["Delete v0? [y/N]"]);
        assert!(!store.install_dir("v0").exists());
        assert_eq!(tags(&choices), [Some("v2"), Some("nightly"), Some("v1")]);
        let remaining: Vec<_> = store
            .list_cached_installs()
            .await
            .into_iter()
            .map(|i| i.release.tag)
            .collect();
        assert_eq!(remaining, ["v1"]);
    }

    #[tokio::test]
    async fn declined_delete_keeps_entry() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let v1 = seed(&store, "v1", 5).await;
        let mut choices =
            ChoiceSet::build(remote(), vec![v1], &Settings::default(), pattern(), false);

        let mut prompt =
            ScriptedPrompt::new(&[Input::Last, Input::Delete, Input::Cancel], &[false]);
        Controller::new(&mut prompt, &store)
            .run(&mut choices, no_refresh())
            .await
            .unwrap();

        assert!(store.install_dir("v1").join(crate::storage::MANIFEST_FILE).exists());
        assert_eq!(tags(&choices), [Some("v2"), Some("nightly"), Some("v1")]);
    }

    #[tokio::test]
    async fn delete_on_uncached_row_asks_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let mut choices =
            ChoiceSet::build(remote(), vec![], &Settings::default(), pattern(), false);
        let mut prompt = ScriptedPrompt::new(&[Input::Delete, Input::Cancel], &[true]);
        Controller::new(&mut prompt, &store)
            .run(&mut choices, no_refresh())
            .await
            .unwrap();
        assert!(prompt.questions.is_empty());
        assert_eq!(choices.choices().len(), 2);
    }

    #[tokio::test]
    async fn deleting_last_entry_ends_the_run() {
        let tmp = TempDir::new().unwrap();
        let store = CacheStore::new(tmp.path());
        let only = seed(&store, "v1", 5).await;
        let mut choices =
            ChoiceSet::build(vec![], vec![only], &Settings::default(), pattern(), false);
        let mut prompt = ScriptedPrompt::new(&[Input::Delete], &[true]);

        let outcome = Controller::new(&mut prompt, &store)
            .run(&mut choices, no_refresh())
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(prompt.finished, Some(Some("nothing left to launch".into())));
    }
}
