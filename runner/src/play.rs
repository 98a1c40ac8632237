//! Scripted replay of candidate actions for `runner play`.
//!
//! A script is TOML:
//!
//! ```toml
//! execution = "exec-1"
//! user = "user-1"
//!
//! [[actions]]
//! action = "init"
//!
//! [[actions]]
//! action = "respond"
//! responses = { RESPONSE = { base = { identifier = "A" } } }
//!
//! [[actions]]
//! action = "wait"
//! secs = 30
//!
//! [[actions]]
//! action = "move"
//! direction = "next"
//! ```
//!
//! Each action runs in its own service context, as one client request would,
//! against a file-backed store so a later invocation resumes the session.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info};

use crate::adaptive::SequentialSelector;
use crate::core::types::{Direction, MoveOutcome, NavScope, TimeScope};
use crate::io::clock::ManualClock;
use crate::io::compilation::DirectoryCompilation;
use crate::io::config::RunnerConfig;
use crate::io::delivery::MemoryDeliveryExecutions;
use crate::io::events::TracingEventSink;
use crate::io::results::MemoryResultStore;
use crate::io::storage::FileStore;
use crate::scoring::MatchCorrect;
use crate::service::{RunnerDeps, RunnerService};
use crate::views::TestContext;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Script {
    pub execution: String,
    #[serde(default)]
    pub user: Option<String>,
    /// Candidate data language, tried before the configured default.
    #[serde(default)]
    pub language: Option<String>,
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Init,
    Respond {
        #[serde(default)]
        item: Option<String>,
        responses: Json,
    },
    Move {
        direction: Direction,
        #[serde(default = "default_scope")]
        scope: NavScope,
        #[serde(default)]
        target: Option<String>,
    },
    Skip {
        #[serde(default = "default_scope")]
        scope: NavScope,
    },
    Timeout {
        scope: String,
        reference: String,
        #[serde(default)]
        late: bool,
    },
    Pause,
    Resume,
    Exit,
    Flag {
        position: usize,
        #[serde(default = "default_true")]
        flagged: bool,
    },
    Comment {
        text: String,
    },
    /// Advance the replay clock.
    Wait {
        secs: i64,
    },
}

fn default_scope() -> NavScope {
    NavScope::Item
}

fn default_true() -> bool {
    true
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Respond { .. } => "respond",
            Self::Move { .. } => "move",
            Self::Skip { .. } => "skip",
            Self::Timeout { .. } => "timeout",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Exit => "exit",
            Self::Flag { .. } => "flag",
            Self::Comment { .. } => "comment",
            Self::Wait { .. } => "wait",
        }
    }
}

pub fn load_script(path: &Path) -> Result<Script> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

#[derive(Debug, Clone)]
pub struct PlayOptions {
    pub definition: PathBuf,
    pub script: PathBuf,
    pub store: PathBuf,
    pub config: RunnerConfig,
}

/// What one replayed action did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayStep {
    pub index: usize,
    pub action: &'static str,
    /// `ok`, `overflow:<scope>` or `refused:<reason>`.
    pub outcome: String,
    pub context: TestContext,
}

impl PlayStep {
    pub fn refused(&self) -> bool {
        self.outcome.starts_with("refused:")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayOutcome {
    pub steps: usize,
    pub refused: usize,
    pub terminated: bool,
}

/// Replay the script of `options`, calling `on_step` after every action.
///
/// Stops at the first hard error; refused moves and attempts are reported
/// through the step outcome and replay continues.
pub fn run_play<F: FnMut(&PlayStep)>(options: &PlayOptions, mut on_step: F) -> Result<PlayOutcome> {
    let script = load_script(&options.script)?;
    let root = options
        .definition
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let definition_uri = options
        .definition
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            anyhow!(
                "definition path {} has no file name",
                options.definition.display()
            )
        })?
        .to_string();

    let store = Arc::new(
        FileStore::open(&options.store)
            .with_context(|| format!("open store {}", options.store.display()))?,
    );
    let deliveries = Arc::new(MemoryDeliveryExecutions::new());
    deliveries.register(&script.execution, script.user.as_deref());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let service = RunnerService::new(RunnerDeps {
        config: options.config.clone(),
        store,
        compilation: Arc::new(DirectoryCompilation::new(root)),
        results: Arc::new(MemoryResultStore::new()),
        deliveries,
        events: Arc::new(TracingEventSink),
        scoring: Arc::new(MatchCorrect),
        selector: Arc::new(SequentialSelector),
        clock: clock.clone(),
    });

    let mut refused = 0;
    let mut terminated = false;
    for (index, action) in script.actions.iter().enumerate() {
        let mut ctx = service
            .get_service_context(
                &definition_uri,
                &definition_uri,
                &script.execution,
                script.user.as_deref(),
            )
            .with_context(|| format!("load session for action {index}"))?;
        ctx.set_language(script.language.as_deref());
        debug!(index, action = action.name(), "replaying action");

        let outcome = match action {
            Action::Init => service.init(&mut ctx).map(|_| "ok".to_string()),
            Action::Respond { item, responses } => {
                match service.store_item_response(&mut ctx, item.as_deref(), responses) {
                    Ok(true) => Ok("ok".to_string()),
                    Ok(false) => Ok("refused:time limit exceeded".to_string()),
                    Err(err) if err.is_domain() => Ok(format!("refused:{err}")),
                    Err(err) => Err(err),
                }
            }
            Action::Move {
                direction,
                scope,
                target,
            } => service
                .move_to(&mut ctx, *direction, *scope, target.as_deref())
                .map(describe_move),
            Action::Skip { scope } => service.skip(&mut ctx, *scope, None).map(describe_move),
            Action::Timeout {
                scope,
                reference,
                late,
            } => service
                .timeout(&mut ctx, TimeScope::from_client(scope), reference, *late)
                .map(|_| "ok".to_string()),
            Action::Pause => service.pause(&mut ctx).map(|_| "ok".to_string()),
            Action::Resume => service.resume(&mut ctx).map(|_| "ok".to_string()),
            Action::Exit => service.exit_test(&mut ctx).map(|finished| {
                if finished {
                    "ok".to_string()
                } else {
                    "refused:not the owner of the delivery execution".to_string()
                }
            }),
            Action::Flag { position, flagged } => service
                .set_item_flag(&mut ctx, *position, *flagged)
                .map(|_| "ok".to_string()),
            Action::Comment { text } => service.comment(&ctx, text).map(|_| "ok".to_string()),
            Action::Wait { secs } => {
                clock.advance_secs(*secs);
                Ok("ok".to_string())
            }
        }
        .with_context(|| format!("action {index} ({})", action.name()))?;

        let step = PlayStep {
            index,
            action: action.name(),
            outcome,
            context: service.get_test_context(&mut ctx)?,
        };
        if step.refused() {
            refused += 1;
        }
        terminated = service.is_terminated(&ctx);
        on_step(&step);
    }
    info!(steps = script.actions.len(), refused, terminated, "script replayed");
    Ok(PlayOutcome {
        steps: script.actions.len(),
        refused,
        terminated,
    })
}

fn describe_move(outcome: MoveOutcome) -> String {
    match outcome {
        MoveOutcome::Advanced => "ok".to_string(),
        MoveOutcome::OverflowHandled(scope) => format!("overflow:{scope}"),
        MoveOutcome::Failed(reason) => format!("refused:{reason}"),
    }
}
