use std::collections::HashMap;

use regex::Regex;

use crate::engine::models::{CachedInstall, Release, Settings};
use crate::platform;
use crate::util::format_size;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChoiceKind {
    Stable,
    Experimental,
    Cached,
}

/// One row of the version picker.
#[derive(Clone, Debug)]
pub struct SelectionChoice {
    pub label: String,
    /// `None` only for the experimental row while the refresh is in flight.
    pub value: Option<Release>,
    pub kind: ChoiceKind,
    pub cached: bool,
    pub disabled: bool,
    download_size: Option<u64>,
}

impl SelectionChoice {
    fn stable(release: &Release, cached: bool, pattern: &Regex) -> Self {
        Self::for_release(ChoiceKind::Stable, release, cached, pattern)
    }

    fn experimental(release: &Release, cached: bool, pattern: &Regex) -> Self {
        Self::for_release(ChoiceKind::Experimental, release, cached, pattern)
    }

    fn cached(release: &Release, pattern: &Regex) -> Self {
        Self::for_release(ChoiceKind::Cached, release, true, pattern)
    }

    fn pending() -> Self {
        Self {
            label: "latest experimental".into(),
            value: None,
            kind: ChoiceKind::Experimental,
            cached: false,
            disabled: true,
            download_size: None,
        }
    }

    fn for_release(kind: ChoiceKind, release: &Release, cached: bool, pattern: &Regex) -> Self {
        let label = match kind {
            ChoiceKind::Stable => format!("{}  latest stable", release.tag),
            ChoiceKind::Experimental => format!("{}  latest experimental", release.tag),
            ChoiceKind::Cached => release.tag.clone(),
        };
        Self {
            label,
            value: Some(release.clone()),
            kind,
            cached,
            disabled: false,
            download_size: platform::platform_asset(release, pattern).map(|a| a.size_bytes),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        self.value.as_ref().map(|release| release.tag.as_str())
    }

    pub fn is_pending(&self) -> bool {
        self.value.is_none()
    }

    /// Secondary text for the focused row. Computed on demand.
    pub fn hint(&self) -> String {
        let Some(release) = &self.value else {
            return "fetching…".into();
        };
        let published = release
            .published_at
            .map(|at| format!("published {}", at.format("%Y-%m-%d")))
            .unwrap_or_else(|| "unpublished".into());
        if self.cached {
            format!("cached · {published}")
        } else {
            match self.download_size {
                Some(size) => format!("download {} · {published}", format_size(size)),
                None => format!("no build for this platform · {published}"),
            }
        }
    }
}

/// Result of the background refresh, delivered once to [`ChoiceSet::apply_refresh`].
#[derive(Debug)]
pub enum RefreshMessage {
    Resolved(Vec<Release>),
    /// The refresh failed; resolve from the releases the set was built with.
    Failed,
}

/// The ordered choice list: stable, experimental, then cached installs by recency.
#[derive(Debug)]
pub struct ChoiceSet {
    choices: Vec<SelectionChoice>,
    cursor: usize,
    cached: HashMap<String, CachedInstall>,
    pattern: Regex,
    fallback: Vec<Release>,
    committed: bool,
    refresh_applied: bool,
}

impl ChoiceSet {
    /// Builds the initial list. With `experimental_pending` the experimental
    /// row is a disabled placeholder until [`ChoiceSet::apply_refresh`].
    pub fn build(
        releases: Vec<Release>,
        installs: Vec<CachedInstall>,
        settings: &Settings,
        pattern: Regex,
        experimental_pending: bool,
    ) -> Self {
        let cached: HashMap<String, CachedInstall> = installs
            .into_iter()
            .map(|install| (install.tag().to_owned(), install))
            .collect();

        let mut choices = Vec::new();
        if let Some(stable) = latest_stable(&releases) {
            choices.push(SelectionChoice::stable(
                stable,
                cached.contains_key(&stable.tag),
                &pattern,
            ));
        }
        if experimental_pending {
            choices.push(SelectionChoice::pending());
        } else if let Some(experimental) = latest_experimental(&releases, &pattern) {
            choices.push(SelectionChoice::experimental(
                experimental,
                cached.contains_key(&experimental.tag),
                &pattern,
            ));
        }

        let mut tail: Vec<&CachedInstall> = cached
            .values()
            .filter(|install| !choices.iter().any(|c| c.tag() == Some(install.tag())))
            .collect();
        tail.sort_by(|a, b| {
            Release::by_recency(&a.release, &b.release).then_with(|| b.tag().cmp(a.tag()))
        });
        choices.extend(
            tail.into_iter()
                .map(|install| SelectionChoice::cached(&install.release, &pattern)),
        );

        let cursor = settings
            .last_version
            .as_deref()
            .filter(|tag| cached.contains_key(*tag))
            .and_then(|tag| choices.iter().position(|c| c.tag() == Some(tag)))
            .unwrap_or(0);

        Self {
            choices,
            cursor,
            cached,
            pattern,
            fallback: releases,
            committed: false,
            refresh_applied: false,
        }
    }

    pub fn choices(&self) -> &[SelectionChoice] {
        &self.choices
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> Option<&SelectionChoice> {
        self.choices.get(self.cursor)
    }

    #[cfg(test)]
    pub fn is_committed(&self) -> bool {
        self.committed
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    pub fn cached_install(&self, tag: &str) -> Option<&CachedInstall> {
        self.cached.get(tag)
    }

    pub fn move_up(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_down(&mut self) {
        if self.cursor + 1 < self.choices.len() {
            self.cursor += 1;
        }
    }

    pub fn move_first(&mut self) {
        self.cursor = 0;
    }

    pub fn move_last(&mut self) {
        self.cursor = self.choices.len().saturating_sub(1);
    }

    /// Locks the set and returns the focused release. Disabled rows cannot
    /// be committed.
    pub fn commit(&mut self) -> Option<Release> {
        if self.committed {
            return None;
        }
        let choice = self.current().filter(|c| !c.disabled)?;
        let release = choice.value.clone()?;
        self.committed = true;
        Some(release)
    }

    /// The single permitted in-place update. Returns whether the list changed;
    /// a committed set is never touched.
    pub fn apply_refresh(&mut self, message: RefreshMessage) -> bool {
        if self.committed || self.refresh_applied {
            return false;
        }
        self.refresh_applied = true;

        let Some(slot) = self.choices.iter().position(SelectionChoice::is_pending) else {
            return false;
        };
        let focused = self.current().and_then(|c| c.tag()).map(str::to_owned);
        let releases = match message {
            RefreshMessage::Resolved(releases) => releases,
            RefreshMessage::Failed => std::mem::take(&mut self.fallback),
        };

        match latest_experimental(&releases, &self.pattern) {
            Some(release) => {
                let cached = self.cached.contains_key(&release.tag);
                let tag = release.tag.clone();
                self.choices[slot] = SelectionChoice::experimental(release, cached, &self.pattern);
                let mut index = 0;
                self.choices.retain(|choice| {
                    let keep = index == slot
                        || !(choice.kind == ChoiceKind::Cached && choice.tag() == Some(tag.as_str()));
                    index += 1;
                    keep
                });
            }
            None => {
                self.choices.remove(slot);
            }
        }

        match focused {
            Some(tag) => {
                if let Some(index) = self.choices.iter().position(|c| c.tag() == Some(tag.as_str())) {
                    self.cursor = index;
                }
            }
            None => self.clamp_cursor(),
        }
        true
    }

    /// Forgets a deleted install for the rest of the run. Pinned rows stay
    /// (they can be downloaded again); cached-only rows disappear.
    pub fn mark_deleted(&mut self, tag: &str) {
        if self.cached.remove(tag).is_none() {
            return;
        }
        self.choices.retain_mut(|choice| {
            if choice.tag() != Some(tag) {
                return true;
            }
            if choice.kind == ChoiceKind::Cached {
                return false;
            }
            choice.cached = false;
            true
        });
        self.clamp_cursor();
    }

    fn clamp_cursor(&mut self) {
        if self.cursor >= self.choices.len() {
            self.cursor = self.choices.len().saturating_sub(1);
        }
    }
}

/// The first release not flagged as a prerelease; the list is newest first.
pub fn latest_stable(releases: &[Release]) -> Option<&Release> {
    releases.iter().find(|release| release.is_stable())
}

/// The first prerelease carrying an asset for this platform.
pub fn latest_experimental<'a>(releases: &'a [Release], pattern: &Regex) -> Option<&'a Release> {
    releases.iter().find(|release| {
        release.is_prerelease && platform::platform_asset(release, pattern).is_some()
    })
}
