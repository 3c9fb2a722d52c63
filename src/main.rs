// src/main.rs

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use gensync::builder::{self, BuildOutcome};
use gensync::config::{CONFIG_FILE_NAME, Config, DEFAULT_CONFIG};
use gensync::diff;
use gensync::handler::{self, Action, CommandEnv, ShellRunner};
use gensync::store::{GenerationId, LockMode, Store, StoreLock};
use gensync::switch::{SwitchEngine, SwitchReport};
use gensync::{Error, ErrorKind};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};

const ENV_REPO: &str = "GENSYNC_REPO";
const ENV_GENS: &str = "GENSYNC_GENS";
const ENV_HOOKS: &str = "GENSYNC_HOOKS";

#[derive(Parser)]
#[command(name = "gensync")]
#[command(author, version, about = "Declarative system state with generations and rollback", long_about = None)]
struct Cli {
    /// Repository holding gensync.yml and the entry files (default: ~/.gensync)
    #[arg(short, long, global = true, env = ENV_REPO)]
    repo: Option<PathBuf>,

    /// Generations directory (default: <repo>/.gens)
    #[arg(short, long, global = true, env = ENV_GENS)]
    gens: Option<PathBuf>,

    /// Hooks directory exported to handler commands (default: <repo>/hooks)
    #[arg(long, global = true, env = ENV_HOOKS)]
    hooks: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the repository with a sample configuration, and the store
    Init,
    /// List generations
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show the entries of a generation
    Show {
        /// Generation id, `current` or `latest`
        generation: String,
        /// Only show this handler
        handler: Option<String>,
    },
    /// Build a new generation from the repository
    Build {
        /// Comment stored with the generation
        comment: Vec<String>,
    },
    /// Show what differs between two generations
    Diff {
        /// Source generation
        from: String,
        /// Target generation
        to: String,
        /// Only diff this handler
        handler: Option<String>,
    },
    /// Switch the system to a generation
    Switch {
        /// Generation id, `current` or `latest`
        target: String,
        /// Print the commands without running them
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Delete generations
    Delete {
        /// Generation ids, `current` or `latest`
        #[arg(required = true)]
        generations: Vec<String>,
    },
    /// Switch to an older generation
    Rollback {
        /// How many generations to go back
        #[arg(default_value_t = 1)]
        steps: usize,
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Re-run setup and re-add every entry of the current generation
    Repair {
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Renumber generations to close gaps
    Align {
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Delete generations whose content duplicates an older one
    DeleteDups {
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Run every handler's upgrade command
    Upgrade {
        #[arg(short = 'n', long)]
        dry_run: bool,
    },
    /// Per-generation key/value storage for hooks
    Storage {
        #[command(subcommand)]
        command: StorageCommands,
    },
    /// Generate shell completions
    Completions {
        shell: Shell,
    },
}

impl Commands {
    /// How the command locks the store; read-only commands share it
    fn lock_mode(&self) -> LockMode {
        match self {
            Commands::List { .. }
            | Commands::Show { .. }
            | Commands::Diff { .. }
            | Commands::Completions { .. }
            | Commands::Storage {
                command: StorageCommands::Get { .. },
            } => LockMode::Shared,
            _ => LockMode::Exclusive,
        }
    }
}

#[derive(Subcommand)]
enum StorageCommands {
    /// Set a key; an empty value removes it
    Put {
        generation: String,
        namespace: String,
        key: String,
        value: Vec<String>,
    },
    /// Print a key
    Get {
        generation: String,
        namespace: String,
        key: String,
    },
}

/// Resolved directories of one invocation
struct Paths {
    repo: PathBuf,
    gens: PathBuf,
    hooks: PathBuf,
}

impl Paths {
    fn resolve(cli: &Cli) -> Result<Self> {
        let repo = match &cli.repo {
            Some(repo) => repo.clone(),
            None => dirs::home_dir()
                .ok_or_else(|| Error::Config("cannot determine the home directory".to_string()))?
                .join(".gensync"),
        };
        let gens = cli.gens.clone().unwrap_or_else(|| repo.join(".gens"));
        let hooks = cli.hooks.clone().unwrap_or_else(|| repo.join("hooks"));
        Ok(Self { repo, gens, hooks })
    }

    fn config(&self) -> Result<Config> {
        Ok(Config::load(&self.repo.join(CONFIG_FILE_NAME))?)
    }

    /// Variables every handler command sees
    fn env(&self) -> CommandEnv {
        CommandEnv::new()
            .with(ENV_REPO, self.repo.to_string_lossy())
            .with(ENV_GENS, self.gens.to_string_lossy())
            .with(ENV_HOOKS, self.hooks.to_string_lossy())
    }

    /// Lock the store and open it, creating it on first use
    fn open_store(&self, mode: LockMode) -> Result<(Store, StoreLock)> {
        fs::create_dir_all(&self.gens)?;
        let lock = StoreLock::acquire(&self.gens, mode)?;
        let store = Store::open_or_init(&self.gens)?;
        Ok((store, lock))
    }
}

fn exit_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::Configuration => 2,
        ErrorKind::Consistency => 3,
        ErrorKind::Command => 4,
        ErrorKind::Io => 5,
    }
}

fn print_actions(actions: &[Action]) {
    for action in actions {
        println!("  [{}] {}: {}", action.handler, action.step, action.command);
    }
}

fn print_switch_report(report: &SwitchReport) {
    for handler in &report.handlers {
        if handler.skipped {
            println!("{}: skipped", handler.handler);
            continue;
        }
        println!(
            "{}: {} added, {} removed",
            handler.handler,
            handler.diff.to_add.len(),
            handler.diff.to_remove.len()
        );
    }
    if report.dry_run {
        println!("Would switch {} -> {}, running:", report.from, report.target);
        print_actions(&report.actions);
    } else {
        println!("Switched {} -> {}", report.from, report.target);
    }
}

fn main() -> ExitCode {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<Error>()
                .map(|e| exit_code(e.kind()))
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let paths = Paths::resolve(&cli)?;
    let mode = cli.command.lock_mode();

    match cli.command {
        Commands::Init => {
            fs::create_dir_all(&paths.repo)?;
            let config_path = paths.repo.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                info!("Keeping existing {}", config_path.display());
            } else {
                fs::write(&config_path, DEFAULT_CONFIG)?;
                info!("Sample configuration written to {}", config_path.display());
            }
            let _ = paths.open_store(mode)?;
            println!("Initialized {} with store {}", paths.repo.display(), paths.gens.display());
        }
        Commands::List { json } => {
            let (store, _lock) = paths.open_store(mode)?;
            let summaries = store.summaries()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                for summary in &summaries {
                    let mut markers = Vec::new();
                    if summary.current {
                        markers.push("current");
                    }
                    if summary.latest {
                        markers.push("latest");
                    }
                    let markers = if markers.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", markers.join(", "))
                    };
                    println!(
                        "{:>4}{}  {}  {}",
                        summary.id,
                        markers,
                        summary.created.as_deref().unwrap_or("-"),
                        summary.comment.as_deref().unwrap_or("(no comment)")
                    );
                }
            }
        }
        Commands::Show {
            generation,
            handler,
        } => {
            let config = paths.config()?;
            let (store, _lock) = paths.open_store(mode)?;
            let id = store.resolve(&generation)?;
            println!("Generation {}: {}", id, store.comment(id)?);
            for h in config.select(handler.as_deref())? {
                let entries = store.entries(id, &h.name)?;
                if entries.is_empty() {
                    continue;
                }
                println!("[{}]", h.name);
                for entry in entries {
                    println!("  {}", entry);
                }
            }
        }
        Commands::Build { comment } => {
            let config = paths.config()?;
            let (store, _lock) = paths.open_store(mode)?;
            let hostname = hostname::get()?.to_string_lossy().into_owned();
            match builder::build(&store, &config, &paths.repo, &hostname, &comment.join(" "))? {
                BuildOutcome::Created { id, .. } => println!("Built generation {}", id),
                BuildOutcome::Unchanged { latest } => {
                    println!("Nothing changed since generation {}", latest)
                }
            }
        }
        Commands::Diff { from, to, handler } => {
            let config = paths.config()?;
            let (store, _lock) = paths.open_store(mode)?;
            let from = store.resolve(&from)?;
            let to = store.resolve(&to)?;

            let mut differs = false;
            for h in config.select(handler.as_deref())? {
                let d = diff::diff(&store, from, to, &h.name)?;
                if d.is_empty() {
                    continue;
                }
                differs = true;
                println!("[{}]", h.name);
                for entry in &d.to_remove {
                    println!("- {}", entry);
                }
                for entry in &d.to_add {
                    println!("+ {}", entry);
                }
            }
            if differs {
                return Ok(ExitCode::from(1));
            }
        }
        Commands::Switch { target, dry_run } => {
            let config = paths.config()?;
            let (store, _lock) = paths.open_store(mode)?;
            let target = store.resolve(&target)?;
            let mut runner = ShellRunner;
            let report = SwitchEngine::new(&config, &store, &mut runner)
                .with_env(paths.env())
                .switch_to(target, dry_run)?;
            print_switch_report(&report);
        }
        Commands::Delete { generations } => {
            let (store, _lock) = paths.open_store(mode)?;
            let mut ids: Vec<GenerationId> = generations
                .iter()
                .map(|g| store.resolve(g))
                .collect::<gensync::Result<_>>()?;
            ids.sort_unstable();
            ids.dedup();
            for id in ids {
                store.delete(id)?;
                println!("Deleted generation {}", id);
            }
        }
        Commands::Rollback { steps, dry_run } => {
            let config = paths.config()?;
            let (store, _lock) = paths.open_store(mode)?;
            let mut runner = ShellRunner;
            let report = SwitchEngine::new(&config, &store, &mut runner)
                .with_env(paths.env())
                .rollback(steps, dry_run)?;
            print_switch_report(&report);
        }
        Commands::Repair { dry_run } => {
            let config = paths.config()?;
            let (store, _lock) = paths.open_store(mode)?;
            let mut runner = ShellRunner;
            let report = SwitchEngine::new(&config, &store, &mut runner)
                .with_env(paths.env())
                .repair(dry_run)?;
            print_switch_report(&report);
        }
        Commands::Align { dry_run } => {
            let (store, _lock) = paths.open_store(mode)?;
            let moves = store.align(dry_run)?;
            if moves.is_empty() {
                println!("Generations already aligned");
            }
            for m in &moves {
                println!("{} -> {}", m.from, m.to);
            }
        }
        Commands::DeleteDups { dry_run } => {
            let (store, _lock) = paths.open_store(mode)?;
            let deleted = store.delete_dups(dry_run)?;
            if deleted.is_empty() {
                println!("No duplicate generations");
            }
            for d in &deleted {
                println!("Deleted generation {} (same as {})", d.deleted, d.kept);
            }
        }
        Commands::Upgrade { dry_run } => {
            let config = paths.config()?;
            let (_store, _lock) = paths.open_store(mode)?;
            let mut runner = ShellRunner;
            let actions = handler::upgrade_all(&config, &mut runner, &paths.env(), dry_run)?;
            if dry_run {
                print_actions(&actions);
            }
        }
        Commands::Storage { command } => match command {
            StorageCommands::Put {
                generation,
                namespace,
                key,
                value,
            } => {
                let (store, _lock) = paths.open_store(mode)?;
                let id = store.resolve(&generation)?;
                store.storage_put(id, &namespace, &key, &value)?;
            }
            StorageCommands::Get {
                generation,
                namespace,
                key,
            } => {
                let (store, _lock) = paths.open_store(mode)?;
                let id = store.resolve(&generation)?;
                match store.storage_get(id, &namespace, &key)? {
                    Some(lines) => {
                        for line in lines {
                            println!("{}", line);
                        }
                    }
                    None => warn!("{}/{} is not set in generation {}", namespace, key, id),
                }
            }
        },
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "gensync", &mut io::stdout());
        }
    }

    Ok(ExitCode::SUCCESS)
}
