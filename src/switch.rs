// src/switch.rs

//! Switch engine
//!
//! Reconciles the live system with a target generation. Handlers are
//! processed one after another in configuration order, each through the same
//! fixed sequence:
//!
//! 1. setup (once per store, or again when forced by a repair)
//! 2. pre-switch hook
//! 3. sync
//! 4. diff between the source and target generations
//! 5. remove
//! 6. add
//! 7. post-switch hook
//!
//! The first failing command aborts the whole switch. Handlers that already
//! finished keep their changes and `current` stays where it was; it only moves
//! once every handler has completed.

use crate::config::Config;
use crate::diff::{self, EntryDiff};
use crate::error::{Error, Result};
use crate::handler::{
    Action, CommandEnv, CommandRunner, ENV_FROM, ENV_HANDLER, ENV_TARGET, HandlerRuntime, Step,
};
use crate::store::{EMPTY_GENERATION, GenerationId, Store};
use tracing::info;

/// Parameters of one reconciliation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchOptions {
    /// Generation the live system is assumed to match
    pub from: GenerationId,
    pub target: GenerationId,
    pub dry_run: bool,
    /// Re-run setup even where it already ran
    pub force_setup: bool,
}

/// What happened to one handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerReport {
    pub handler: String,
    /// `run_if` kept the handler out of the switch
    pub skipped: bool,
    pub diff: EntryDiff,
}

/// Outcome of a completed switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchReport {
    pub from: GenerationId,
    pub target: GenerationId,
    pub dry_run: bool,
    pub handlers: Vec<HandlerReport>,
    /// Every command run, or that would have run in a dry run
    pub actions: Vec<Action>,
}

/// Drives switches, rollbacks and repairs against one store
pub struct SwitchEngine<'a> {
    config: &'a Config,
    store: &'a Store,
    runner: &'a mut dyn CommandRunner,
    env: CommandEnv,
}

impl<'a> SwitchEngine<'a> {
    pub fn new(config: &'a Config, store: &'a Store, runner: &'a mut dyn CommandRunner) -> Self {
        Self {
            config,
            store,
            runner,
            env: CommandEnv::new(),
        }
    }

    /// Extra variables passed to every command, e.g. repository paths
    pub fn with_env(mut self, env: CommandEnv) -> Self {
        self.env = env;
        self
    }

    /// Switch from the current generation to `target`
    pub fn switch_to(&mut self, target: GenerationId, dry_run: bool) -> Result<SwitchReport> {
        let current = self.store.current()?;
        if target == current {
            return Err(Error::AlreadyCurrent(target));
        }
        self.run(SwitchOptions {
            from: current,
            target,
            dry_run,
            force_setup: false,
        })
    }

    /// Switch to the generation `depth` steps older than current
    pub fn rollback(&mut self, depth: usize, dry_run: bool) -> Result<SwitchReport> {
        let ids = self.store.list()?;
        let target = rollback_target(&ids, self.store.current()?, depth)?;
        info!("Rolling back to generation {}", target);
        self.switch_to(target, dry_run)
    }

    /// Reassert the current generation from the empty baseline
    ///
    /// Setup runs again for every handler and every entry of the current
    /// generation is added, which repairs drift without changing the declared
    /// state.
    pub fn repair(&mut self, dry_run: bool) -> Result<SwitchReport> {
        let current = self.store.current()?;
        info!("Repairing generation {}", current);
        self.run(SwitchOptions {
            from: EMPTY_GENERATION,
            target: current,
            dry_run,
            force_setup: true,
        })
    }

    /// Run the reconciliation state machine
    pub fn run(&mut self, options: SwitchOptions) -> Result<SwitchReport> {
        let SwitchOptions {
            from,
            target,
            dry_run,
            force_setup,
        } = options;
        for id in [from, target] {
            if !self.store.exists(id) {
                return Err(Error::GenerationNotFound(id));
            }
        }

        let base_env = self
            .env
            .clone()
            .with(ENV_FROM, from.to_string())
            .with(ENV_TARGET, target.to_string());

        let mut runtime = HandlerRuntime::new(&mut *self.runner, dry_run);
        let mut handlers = Vec::new();

        for handler in &self.config.handlers {
            let env = base_env.clone().with(ENV_HANDLER, handler.name.as_str());

            if !runtime.participates(handler, &env)? {
                handlers.push(HandlerReport {
                    handler: handler.name.clone(),
                    skipped: true,
                    diff: EntryDiff::default(),
                });
                continue;
            }

            runtime.setup(handler, self.store, force_setup, &env)?;
            runtime.hook(handler, Step::PreSwitch, &env)?;
            runtime.sync(handler, &env)?;
            let diff = diff::diff(self.store, from, target, &handler.name)?;
            runtime.remove(handler, &diff.to_remove, &env)?;
            runtime.add(handler, &diff.to_add, &env)?;
            runtime.hook(handler, Step::PostSwitch, &env)?;

            handlers.push(HandlerReport {
                handler: handler.name.clone(),
                skipped: false,
                diff,
            });
        }

        if dry_run {
            info!("Switched to generation {} (dry run)", target);
        } else {
            self.store.set_current(target)?;
            info!("Switched to generation {}", target);
        }

        Ok(SwitchReport {
            from,
            target,
            dry_run,
            handlers,
            actions: runtime.into_actions(),
        })
    }
}

/// Generation `depth` steps older than `current`
///
/// `ids` are sorted newest first and the target is the id `depth` positions
/// after `current`.
pub fn rollback_target(
    ids: &[GenerationId],
    current: GenerationId,
    depth: usize,
) -> Result<GenerationId> {
    let mut newest_first = ids.to_vec();
    newest_first.sort_unstable_by(|a, b| b.cmp(a));

    let index = newest_first
        .iter()
        .position(|id| *id == current)
        .ok_or(Error::GenerationNotFound(current))?;

    index
        .checked_add(depth)
        .and_then(|i| newest_first.get(i))
        .copied()
        .ok_or(Error::RollbackOutOfRange { depth })
}
