// src/handler/mod.rs

//! Handler runtime
//!
//! Runs the shell-level operations of a handler (setup, sync, add, remove,
//! hooks, upgrade). In dry-run mode commands are logged and recorded but not
//! executed, and count as successful. Guard commands (`run_if` and setup
//! `if`) are read-only probes and run in both modes, so a dry run takes the
//! same decisions a real run would.

pub mod runner;

pub use runner::{
    CommandEnv, CommandRunner, CommandStatus, ENV_FROM, ENV_HANDLER, ENV_TARGET, ShellRunner,
};

use crate::config::{Config, Handler};
use crate::error::{Error, Result};
use crate::store::Store;
use std::fmt;
use tracing::{debug, info};

/// Lifecycle step a command belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Setup,
    PreSwitch,
    Sync,
    Remove,
    Add,
    PostSwitch,
    Upgrade,
}

impl Step {
    pub fn as_str(&self) -> &str {
        match self {
            Step::Setup => "setup",
            Step::PreSwitch => "run_before_switch",
            Step::Sync => "sync",
            Step::Remove => "remove",
            Step::Add => "add",
            Step::PostSwitch => "run_after_switch",
            Step::Upgrade => "upgrade",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command the runtime ran, or would have run in a dry run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    pub handler: String,
    pub step: Step,
    pub command: String,
}

/// Executes handler operations and records every action taken
pub struct HandlerRuntime<'a> {
    runner: &'a mut dyn CommandRunner,
    dry_run: bool,
    actions: Vec<Action>,
}

impl<'a> HandlerRuntime<'a> {
    pub fn new(runner: &'a mut dyn CommandRunner, dry_run: bool) -> Self {
        Self {
            runner,
            dry_run,
            actions: Vec::new(),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Actions recorded so far, in execution order
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn into_actions(self) -> Vec<Action> {
        self.actions
    }

    fn exec(&mut self, handler: &Handler, step: Step, command: &str, env: &CommandEnv) -> Result<()> {
        self.actions.push(Action {
            handler: handler.name.clone(),
            step,
            command: command.to_string(),
        });

        if self.dry_run {
            info!("$ {} (dry run)", command);
            return Ok(());
        }

        info!("$ {}", command);
        let status = self.runner.run(command, env)?;
        if !status.success() {
            return Err(Error::CommandFailed {
                handler: handler.name.clone(),
                step: step.to_string(),
                command: command.to_string(),
                status: status.to_string(),
            });
        }
        Ok(())
    }

    /// Run a guard command; true when it exits zero
    fn probe(&mut self, command: &str, env: &CommandEnv) -> Result<bool> {
        let status = self.runner.run(command, env)?;
        debug!("Guard `{}` -> {}", command, status);
        Ok(status.success())
    }

    /// Whether the handler's `run_if` predicate lets it take part
    pub fn participates(&mut self, handler: &Handler, env: &CommandEnv) -> Result<bool> {
        match &handler.run_if {
            None => Ok(true),
            Some(predicate) => {
                let ok = self.probe(predicate, env)?;
                if !ok {
                    info!("Handler {} :: skipped, run_if did not succeed", handler.name);
                }
                Ok(ok)
            }
        }
    }

    /// Run `template` for `entries`, batched or one entry at a time
    pub fn exec_entries(
        &mut self,
        handler: &Handler,
        step: Step,
        entries: &[String],
        template: Option<&str>,
        env: &CommandEnv,
    ) -> Result<()> {
        if entries.is_empty() {
            info!("Nothing to do");
            return Ok(());
        }
        let Some(template) = template else {
            info!("Command undefined");
            return Ok(());
        };

        if handler.multiple {
            let command = Handler::render(template, &entries.join(" "));
            self.exec(handler, step, &command, env)
        } else {
            for entry in entries {
                let command = Handler::render(template, entry);
                self.exec(handler, step, &command, env)?;
            }
            Ok(())
        }
    }

    /// Run the handler's one-time setup
    ///
    /// Skipped when setup already ran against `store`, unless `force` is set.
    /// The first step whose guard succeeds runs; when steps exist but none
    /// matches, the handler fails.
    pub fn setup(
        &mut self,
        handler: &Handler,
        store: &Store,
        force: bool,
        env: &CommandEnv,
    ) -> Result<()> {
        if handler.setup.is_empty() {
            return Ok(());
        }
        if !force && store.is_setup_done(&handler.name) {
            debug!("Handler {} already set up", handler.name);
            return Ok(());
        }

        info!("Handler {} :: setup", handler.name);
        for step in &handler.setup {
            let matched = match &step.guard {
                None => true,
                Some(guard) => self.probe(guard, env)?,
            };
            if !matched {
                continue;
            }

            self.exec(handler, Step::Setup, &step.run, env)?;
            if !self.dry_run {
                store.mark_setup_done(&handler.name)?;
            }
            return Ok(());
        }

        Err(Error::NoSetupMatch(handler.name.clone()))
    }

    /// Run the pre- or post-switch hook, if defined
    pub fn hook(&mut self, handler: &Handler, step: Step, env: &CommandEnv) -> Result<()> {
        let command = match step {
            Step::PreSwitch => handler.pre_switch.as_deref(),
            Step::PostSwitch => handler.post_switch.as_deref(),
            _ => None,
        };
        match command {
            Some(command) => {
                info!("Running hook {} for handler {}", step, handler.name);
                self.exec(handler, step, command, env)
            }
            None => Ok(()),
        }
    }

    /// Refresh the handler's package index; no sync command is a no-op
    pub fn sync(&mut self, handler: &Handler, env: &CommandEnv) -> Result<()> {
        info!("Handler {} :: sync", handler.name);
        match handler.sync.as_deref() {
            Some(command) => self.exec(handler, Step::Sync, command, env),
            None => {
                info!("Command undefined");
                Ok(())
            }
        }
    }

    pub fn remove(&mut self, handler: &Handler, entries: &[String], env: &CommandEnv) -> Result<()> {
        info!("Handler {} :: remove", handler.name);
        self.exec_entries(handler, Step::Remove, entries, handler.remove.as_deref(), env)
    }

    pub fn add(&mut self, handler: &Handler, entries: &[String], env: &CommandEnv) -> Result<()> {
        info!("Handler {} :: add", handler.name);
        self.exec_entries(handler, Step::Add, entries, handler.add.as_deref(), env)
    }

    pub fn upgrade(&mut self, handler: &Handler, env: &CommandEnv) -> Result<()> {
        info!("Handler {} :: upgrade", handler.name);
        match handler.upgrade.as_deref() {
            Some(command) => self.exec(handler, Step::Upgrade, command, env),
            None => {
                info!("Command undefined");
                Ok(())
            }
        }
    }
}

/// Run every participating handler's upgrade command, stopping at the first failure
pub fn upgrade_all(
    config: &Config,
    runner: &mut dyn CommandRunner,
    base_env: &CommandEnv,
    dry_run: bool,
) -> Result<Vec<Action>> {
    info!("Running upgrade");
    let mut runtime = HandlerRuntime::new(runner, dry_run);
    for handler in &config.handlers {
        let env = base_env.clone().with(ENV_HANDLER, handler.name.as_str());
        if !runtime.participates(handler, &env)? {
            continue;
        }
        runtime.upgrade(handler, &env)?;
    }
    Ok(runtime.into_actions())
}
