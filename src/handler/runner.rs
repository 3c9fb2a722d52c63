// src/handler/runner.rs

//! Shell command execution
//!
//! The switch engine and handler runtime never spawn processes directly; they
//! go through a [`CommandRunner`] so a different executor can be plugged in.

use crate::error::Result;
use std::fmt;
use std::process::{Command, ExitStatus};

/// Environment variable holding the generation a switch starts from
pub const ENV_FROM: &str = "GENSYNC_FROM";
/// Environment variable holding the generation a switch goes to
pub const ENV_TARGET: &str = "GENSYNC_TARGET";
/// Environment variable holding the handler being processed
pub const ENV_HANDLER: &str = "GENSYNC_HANDLER";

/// Variables added to the environment of one command invocation
///
/// The child inherits the process environment; these are layered on top of it
/// without modifying the parent process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandEnv {
    vars: Vec<(String, String)>,
}

impl CommandEnv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key`, replacing any earlier value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.vars.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.vars.push((key, value)),
        }
    }

    /// Builder form of [`CommandEnv::set`]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }
}

/// Exit status of a finished command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandStatus {
    /// Exit code, `None` when the process was killed by a signal
    pub code: Option<i32>,
}

impl CommandStatus {
    pub const SUCCESS: CommandStatus = CommandStatus { code: Some(0) };

    pub fn exited(code: i32) -> Self {
        Self { code: Some(code) }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for CommandStatus {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit status: {}", code),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// Executes shell command lines
pub trait CommandRunner {
    /// Run `command` to completion with `env` added to its environment
    fn run(&mut self, command: &str, env: &CommandEnv) -> Result<CommandStatus>;
}

/// Runs commands as `sh -c <command>` with inherited standard streams
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&mut self, command: &str, env: &CommandEnv) -> Result<CommandStatus> {
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .envs(env.vars().iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .status()?;
        Ok(status.into())
    }
}
