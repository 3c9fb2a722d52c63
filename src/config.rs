// src/config.rs

//! Handler configuration
//!
//! Handlers are declared in `gensync.yml` at the repository root. Declaration
//! order matters: builds, switches and upgrades visit handlers in the order
//! they appear in the file.

use crate::error::{Error, Result};
use crate::store::STORAGE_DIR;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Name of the configuration file inside the repository
pub const CONFIG_FILE_NAME: &str = "gensync.yml";

/// Placeholder replaced by the entries in add/remove templates
pub const ENTRIES_PLACEHOLDER: &str = "%s";

/// Sample configuration written by `gensync init`
pub const DEFAULT_CONFIG: &str = r#"# gensync sample configuration file
handlers:
  - name: apt_pkgs
    sync: sudo apt update
    # in add and remove commands, %s is replaced with the entries handled by the handler
    add: sudo apt install %s
    remove: sudo apt purge --autoremove %s
    upgrade: sudo apt full-upgrade
    # if multiple, add and remove commands run once with every entry (eg. apt install vim jq curl)
    # else, one command runs for each entry (eg. apt install vim, apt install jq, apt install curl)
    multiple: true
    # GENSYNC_FROM, GENSYNC_TARGET and GENSYNC_HANDLER are available to every command
    run_before_switch: echo "$(dpkg -l | wc -l) packages on system"
    run_after_switch: echo "now $(dpkg -l | wc -l) packages on system"
    # the handler only participates in switches and upgrades when this succeeds
    run_if: command -v apt
  - name: flatpak
    # commands run as sh -c "$cmd", so && ; || $() all work
    # the first step whose `if` succeeds runs, once per store
    setup:
      - if: "! command -v flatpak"
        run: sudo apt install flatpak && flatpak remote-add --if-not-exists flathub https://dl.flathub.org/repo/flathub.flatpakrepo
      - run: flatpak remote-add --if-not-exists flathub https://dl.flathub.org/repo/flathub.flatpakrepo
    add: flatpak install flathub --noninteractive %s
    remove: flatpak uninstall --noninteractive %s; flatpak uninstall --unused --noninteractive
    multiple: false
"#;

/// One conditional setup step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupStep {
    /// Guard command; the step matches when it exits zero. No guard always matches.
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
    /// Command run when the step matches
    pub run: String,
}

/// `setup` accepts either a bare command or a list of steps
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
enum SetupSpec {
    Command(String),
    Steps(Vec<SetupStep>),
}

fn deserialize_setup<'de, D>(deserializer: D) -> std::result::Result<Vec<SetupStep>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let spec = Option::<SetupSpec>::deserialize(deserializer)?;
    Ok(match spec {
        None => Vec::new(),
        Some(SetupSpec::Command(run)) => vec![SetupStep { guard: None, run }],
        Some(SetupSpec::Steps(steps)) => steps,
    })
}

/// A resource-type adapter, e.g. one package manager
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handler {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remove: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<String>,
    #[serde(rename = "run_before_switch", default, skip_serializing_if = "Option::is_none")]
    pub pre_switch: Option<String>,
    #[serde(rename = "run_after_switch", default, skip_serializing_if = "Option::is_none")]
    pub post_switch: Option<String>,
    #[serde(default, deserialize_with = "deserialize_setup")]
    pub setup: Vec<SetupStep>,
    /// Batch all entries into a single add/remove invocation
    #[serde(default)]
    pub multiple: bool,
    /// Predicate gating participation in switches and upgrades
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_if: Option<String>,
}

impl Handler {
    /// Create a handler with only a name set
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Instantiate an add/remove template with the given entries
    pub fn render(template: &str, entries: &str) -> String {
        if template.contains(ENTRIES_PLACEHOLDER) {
            template.replace(ENTRIES_PLACEHOLDER, entries)
        } else {
            format!("{} {}", template, entries)
        }
    }
}

/// Parsed `gensync.yml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub handlers: Vec<Handler>,
}

impl Config {
    /// Parse and validate a configuration from YAML text
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Config =
            serde_yaml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration file at `path`
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "Configuration file {} not found",
                path.display()
            )));
        }
        debug!("Loading configuration from {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Look up a handler by name
    pub fn handler(&self, name: &str) -> Result<&Handler> {
        self.handlers
            .iter()
            .find(|h| h.name == name)
            .ok_or_else(|| Error::UnknownHandler(name.to_string()))
    }

    /// Handlers selected by an optional name filter, in declaration order
    pub fn select(&self, name: Option<&str>) -> Result<Vec<&Handler>> {
        match name {
            Some(name) => Ok(vec![self.handler(name)?]),
            None => Ok(self.handlers.iter().collect()),
        }
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for handler in &self.handlers {
            let name = handler.name.as_str();
            if name.is_empty() {
                return Err(Error::Config("handler with an empty name".to_string()));
            }
            // Handler names become file names in every generation
            if name.contains('/')
                || name.contains('\\')
                || name.starts_with('.')
                || name.starts_with('_')
                || name == STORAGE_DIR
            {
                return Err(Error::Config(format!("invalid handler name '{}'", name)));
            }
            if !seen.insert(name) {
                return Err(Error::Config(format!("duplicate handler '{}'", name)));
            }
        }
        Ok(())
    }
}
