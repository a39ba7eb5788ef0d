use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use env_logger::Env;
use log::{debug, error, warn};
use tokio::runtime::{Builder, Runtime};

use crate::config::{DEFAULT_API_URL, DEFAULT_REPO, LauncherConfig};
use crate::engine::LauncherEngine;
use crate::error::LauncherError;
use crate::ui::{Outcome, Terminal};

mod config;
mod engine;
mod env;
mod error;
mod install;
mod networking;
mod platform;
mod process;
mod storage;
mod ui;
mod util;

#[derive(Parser, Debug)]
#[command(
    name = "rl",
    author,
    version,
    about = "Pick, install and launch builds published as GitHub releases"
)]
struct Cli {
    /// Repository publishing the builds, as owner/name.
    #[arg(long, env = "RL_REPO", default_value = DEFAULT_REPO)]
    repo: String,

    #[arg(long, env = "RL_API_URL", default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Where builds, the release snapshot and settings are kept.
    #[arg(long, env = "RL_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Regex selecting this platform's asset by file name.
    #[arg(long, env = "RL_ASSET_PATTERN")]
    asset_pattern: Option<String>,

    /// Executable to start, relative to the install directory.
    #[arg(long, env = "RL_EXEC")]
    exec: Option<PathBuf>,

    /// Pages of the release list to fetch (100 releases each).
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pages: u32,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Use only the cached snapshot and installs.
    #[arg(long)]
    offline: bool,

    /// Print the install directory instead of launching.
    #[arg(long)]
    print_path: bool,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Arguments passed through to the launched program.
    #[arg(last = true)]
    args: Vec<OsString>,
}

impl Cli {
    fn config(&self) -> Result<LauncherConfig, LauncherError> {
        let mut config = LauncherConfig::new(
            &self.repo,
            &self.api_url,
            self.cache_dir.clone(),
            self.asset_pattern.as_deref(),
        )?;
        config.token = self.token.clone().filter(|token| !token.is_empty());
        config.pages = self.pages;
        config.exec = self.exec.clone();
        config.offline = self.offline;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let runtime = build_runtime();
    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("launcher: {err}");
            eprintln!("rl: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), LauncherError> {
    let config = cli.config()?;
    let title = format!("Select a {} build", config.repo_label());
    let engine = LauncherEngine::new(config);

    let mut session = engine.bootstrap().await?;
    debug!(
        "launcher: {} choices, background refresh {}",
        session.choices().choices().len(),
        if session.refreshing() { "running" } else { "skipped" }
    );
    let outcome = {
        let mut terminal = Terminal::new(title).map_err(LauncherError::Terminal)?;
        engine.select(&mut session, &mut terminal).await?
    };
    let release = match outcome {
        Outcome::Selected(release) => release,
        Outcome::Cancelled => {
            engine.wait_for_refresh(session).await;
            return Ok(());
        }
    };

    let launched = async {
        let dir = engine.prepare(&session, &release).await?;
        engine.remember(&session, &release.tag).await;
        if cli.print_path {
            println!("{}", dir.display());
            return Ok(());
        }
        engine.launch(&dir, &cli.args)
    }
    .await;
    engine.wait_for_refresh(session).await;
    launched
}

fn build_runtime() -> Runtime {
    match Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            warn!("launcher: failed to create multithreaded runtime ({err}); trying single-threaded runtime");
            match Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(fallback_err) => {
                    error!("launcher: failed to create any Tokio runtime ({fallback_err})");
                    std::process::exit(1);
                }
            }
        }
    }
}
