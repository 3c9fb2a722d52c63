// tests/integration_test.rs

//! Integration tests for gensync
//!
//! These tests drive the build, switch, rollback, repair and housekeeping
//! paths together against temporary repositories and stores.

use gensync::builder::{self, BuildOutcome};
use gensync::config::Config;
use gensync::handler::{CommandEnv, CommandRunner, CommandStatus, ShellRunner, Step};
use gensync::store::Store;
use gensync::switch::SwitchEngine;
use gensync::Error;
use std::fs;
use std::path::Path;

const CONFIG: &str = r#"
handlers:
  - name: pkgs
    sync: pkgs-sync
    add: pkgs-add %s
    remove: pkgs-remove %s
    multiple: true
    run_before_switch: before $GENSYNC_FROM $GENSYNC_TARGET
  - name: flatpak
    setup: flatpak-setup
    add: flatpak-install %s
    remove: flatpak-uninstall %s
"#;

/// Records commands together with the handler binding they ran under
#[derive(Default)]
struct RecordingRunner {
    commands: Vec<String>,
    fail_on: Option<String>,
}

impl CommandRunner for RecordingRunner {
    fn run(&mut self, command: &str, env: &CommandEnv) -> gensync::Result<CommandStatus> {
        let handler = env.get("GENSYNC_HANDLER").unwrap_or("-");
        self.commands.push(format!("{}: {}", handler, command));
        if self.fail_on.as_deref() == Some(command) {
            return Ok(CommandStatus::exited(1));
        }
        Ok(CommandStatus::SUCCESS)
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    repo: std::path::PathBuf,
    store: Store,
    config: Config,
}

impl Fixture {
    fn new(config: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("repo");
        fs::create_dir(&repo).unwrap();
        let store = Store::init(&dir.path().join("gens")).unwrap();
        Fixture {
            _dir: dir,
            repo,
            store,
            config: Config::from_yaml(config).unwrap(),
        }
    }

    fn write(&self, name: &str, content: &str) {
        fs::write(self.repo.join(name), content).unwrap();
    }

    fn build(&self, comment: &str) -> BuildOutcome {
        builder::build(&self.store, &self.config, &self.repo, "testhost", comment).unwrap()
    }
}

fn created_id(outcome: BuildOutcome) -> u32 {
    match outcome {
        BuildOutcome::Created { id, .. } => id,
        other => panic!("expected a new generation, got {:?}", other),
    }
}

#[test]
fn test_build_switch_rollback_repair() {
    let fx = Fixture::new(CONFIG);
    fx.write("pkgs", "git\nvim\n");
    fx.write("flatpak", "org.gimp.GIMP\n");
    let first = created_id(fx.build("first"));
    assert_eq!(first, 1);

    fx.write("pkgs", "curl\nvim\n");
    let second = created_id(fx.build("second"));
    assert_eq!(second, 2);
    assert_eq!(fx.store.latest().unwrap(), 2);
    assert_eq!(fx.store.current().unwrap(), 0);

    let mut runner = RecordingRunner::default();
    let report = SwitchEngine::new(&fx.config, &fx.store, &mut runner)
        .switch_to(first, false)
        .unwrap();
    assert_eq!(report.handlers.len(), 2);
    assert_eq!(
        runner.commands,
        vec![
            "pkgs: before $GENSYNC_FROM $GENSYNC_TARGET",
            "pkgs: pkgs-sync",
            "pkgs: pkgs-add git vim",
            "flatpak: flatpak-setup",
            "flatpak: flatpak-install org.gimp.GIMP",
        ]
    );
    assert_eq!(fx.store.current().unwrap(), 1);
    assert!(fx.store.is_setup_done("flatpak"));

    let mut runner = RecordingRunner::default();
    SwitchEngine::new(&fx.config, &fx.store, &mut runner)
        .switch_to(second, false)
        .unwrap();
    assert_eq!(
        runner.commands,
        vec![
            "pkgs: before $GENSYNC_FROM $GENSYNC_TARGET",
            "pkgs: pkgs-sync",
            "pkgs: pkgs-remove git",
            "pkgs: pkgs-add curl",
        ]
    );
    assert_eq!(fx.store.current().unwrap(), 2);

    let mut runner = RecordingRunner::default();
    let report = SwitchEngine::new(&fx.config, &fx.store, &mut runner)
        .rollback(1, false)
        .unwrap();
    assert_eq!((report.from, report.target), (2, 1));
    assert!(runner.commands.contains(&"pkgs: pkgs-remove curl".to_string()));
    assert!(runner.commands.contains(&"pkgs: pkgs-add git".to_string()));
    assert_eq!(fx.store.current().unwrap(), 1);

    let mut runner = RecordingRunner::default();
    let report = SwitchEngine::new(&fx.config, &fx.store, &mut runner)
        .repair(false)
        .unwrap();
    assert_eq!((report.from, report.target), (0, 1));
    assert_eq!(
        runner.commands,
        vec![
            "pkgs: before $GENSYNC_FROM $GENSYNC_TARGET",
            "pkgs: pkgs-sync",
            "pkgs: pkgs-add git vim",
            "flatpak: flatpak-setup",
            "flatpak: flatpak-install org.gimp.GIMP",
        ]
    );
    assert_eq!(fx.store.current().unwrap(), 1);
}

#[test]
fn test_switch_to_current_is_rejected() {
    let fx = Fixture::new(CONFIG);
    let mut runner = RecordingRunner::default();
    let result = SwitchEngine::new(&fx.config, &fx.store, &mut runner).switch_to(0, false);
    assert!(matches!(result, Err(Error::AlreadyCurrent(0))));
    assert!(runner.commands.is_empty());
}

#[test]
fn test_rollback_past_oldest() {
    let fx = Fixture::new(CONFIG);
    fx.write("pkgs", "vim\n");
    created_id(fx.build(""));

    let mut runner = RecordingRunner::default();
    let result = SwitchEngine::new(&fx.config, &fx.store, &mut runner).rollback(1, false);
    assert!(matches!(result, Err(Error::RollbackOutOfRange { depth: 1 })));
}

#[test]
fn test_failed_command_aborts_and_keeps_current() {
    let fx = Fixture::new(CONFIG);
    fx.write("pkgs", "vim\n");
    fx.write("flatpak", "org.gimp.GIMP\n");
    let id = created_id(fx.build(""));

    let mut runner = RecordingRunner {
        fail_on: Some("flatpak-install org.gimp.GIMP".to_string()),
        ..Default::default()
    };
    let result = SwitchEngine::new(&fx.config, &fx.store, &mut runner).switch_to(id, false);

    match result {
        Err(Error::CommandFailed { handler, step, .. }) => {
            assert_eq!(handler, "flatpak");
            assert_eq!(step, Step::Add.to_string());
        }
        other => panic!("expected a command failure, got {:?}", other),
    }
    // The first handler already ran; current still names the old generation
    assert!(runner.commands.contains(&"pkgs: pkgs-add vim".to_string()));
    assert_eq!(fx.store.current().unwrap(), 0);
}

#[test]
fn test_failed_pre_switch_hook_stops_before_sync() {
    let fx = Fixture::new(CONFIG);
    fx.write("pkgs", "vim\n");
    fx.write("flatpak", "org.gimp.GIMP\n");
    let id = created_id(fx.build(""));

    let mut runner = RecordingRunner {
        fail_on: Some("before $GENSYNC_FROM $GENSYNC_TARGET".to_string()),
        ..Default::default()
    };
    let result = SwitchEngine::new(&fx.config, &fx.store, &mut runner).switch_to(id, false);

    match result {
        Err(Error::CommandFailed { handler, step, .. }) => {
            assert_eq!(handler, "pkgs");
            assert_eq!(step, Step::PreSwitch.to_string());
        }
        other => panic!("expected a command failure, got {:?}", other),
    }
    assert_eq!(runner.commands, vec!["pkgs: before $GENSYNC_FROM $GENSYNC_TARGET"]);
    assert_eq!(fx.store.current().unwrap(), 0);
    assert!(!fx.store.is_setup_done("flatpak"));
}

#[test]
fn test_run_if_skips_handler_during_switch() {
    let config = format!("{}    run_if: has-flatpak\n", CONFIG);
    let fx = Fixture::new(&config);
    fx.write("pkgs", "vim\n");
    fx.write("flatpak", "org.gimp.GIMP\n");
    let id = created_id(fx.build(""));

    let mut runner = RecordingRunner {
        fail_on: Some("has-flatpak".to_string()),
        ..Default::default()
    };
    let report = SwitchEngine::new(&fx.config, &fx.store, &mut runner)
        .switch_to(id, false)
        .unwrap();

    assert!(!report.handlers[0].skipped);
    assert!(report.handlers[1].skipped);
    assert!(report.handlers[1].diff.is_empty());
    assert_eq!(
        runner.commands,
        vec![
            "pkgs: before $GENSYNC_FROM $GENSYNC_TARGET",
            "pkgs: pkgs-sync",
            "pkgs: pkgs-add vim",
            "flatpak: has-flatpak",
        ]
    );
    assert!(report.actions.iter().all(|a| a.handler == "pkgs"));
    assert_eq!(fx.store.current().unwrap(), id);
}

#[test]
fn test_dry_run_changes_nothing() {
    let fx = Fixture::new(CONFIG);
    fx.write("pkgs", "vim\n");
    fx.write("flatpak", "org.gimp.GIMP\n");
    let id = created_id(fx.build(""));

    let mut runner = RecordingRunner::default();
    let report = SwitchEngine::new(&fx.config, &fx.store, &mut runner)
        .switch_to(id, true)
        .unwrap();

    assert!(report.dry_run);
    assert!(runner.commands.is_empty());
    let planned: Vec<&str> = report.actions.iter().map(|a| a.command.as_str()).collect();
    assert_eq!(
        planned,
        vec![
            "before $GENSYNC_FROM $GENSYNC_TARGET",
            "pkgs-sync",
            "pkgs-add vim",
            "flatpak-setup",
            "flatpak-install org.gimp.GIMP",
        ]
    );
    assert_eq!(fx.store.current().unwrap(), 0);
    assert!(!fx.store.is_setup_done("flatpak"));
}

#[test]
fn test_unchanged_build_is_discarded() {
    let fx = Fixture::new(CONFIG);
    fx.write("pkgs", "vim\ngit\n");
    let id = created_id(fx.build("one"));

    fx.write("pkgs", "git\n# comment\nvim\n\n");
    assert_eq!(fx.build("two"), BuildOutcome::Unchanged { latest: id });
    assert_eq!(fx.store.list().unwrap(), vec![0, id]);
}

#[test]
fn test_align_and_delete_dups() {
    let fx = Fixture::new(CONFIG);
    fx.write("pkgs", "vim\n");
    let a = created_id(fx.build("a"));
    fx.write("pkgs", "git\n");
    let b = created_id(fx.build("b"));
    fx.write("pkgs", "vim\n");
    let c = created_id(fx.build("c"));
    assert_eq!((a, b, c), (1, 2, 3));

    let mut runner = RecordingRunner::default();
    SwitchEngine::new(&fx.config, &fx.store, &mut runner)
        .switch_to(a, false)
        .unwrap();

    let deleted = fx.store.delete_dups(false).unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!((deleted[0].deleted, deleted[0].kept), (1, 3));
    assert!(deleted[0].current);
    assert_eq!(fx.store.current().unwrap(), 3);
    assert_eq!(fx.store.list().unwrap(), vec![0, 2, 3]);

    let moves = fx.store.align(false).unwrap();
    let pairs: Vec<(u32, u32)> = moves.iter().map(|m| (m.from, m.to)).collect();
    assert_eq!(pairs, vec![(2, 1), (3, 2)]);
    assert!(moves[1].current && moves[1].latest);
    assert_eq!(fx.store.current().unwrap(), 2);
    assert_eq!(fx.store.latest().unwrap(), 2);
    assert_eq!(fx.store.entries(2, "pkgs").unwrap(), vec!["vim"]);

    fx.store.delete(2).unwrap_err();
    assert!(fx.store.align(false).unwrap().is_empty());
}

#[test]
fn test_align_closes_gaps() {
    let fx = Fixture::new(CONFIG);
    for content in ["a\n", "b\n", "c\n"] {
        fx.write("pkgs", content);
        created_id(fx.build(""));
    }
    fx.store.delete(1).unwrap();
    fx.store.delete(2).unwrap();

    let moves = fx.store.align(false).unwrap();
    assert_eq!(moves.len(), 1);
    assert_eq!((moves[0].from, moves[0].to), (3, 1));
    assert!(moves[0].latest);
    assert_eq!(fx.store.list().unwrap(), vec![0, 1]);
    assert_eq!(fx.store.latest().unwrap(), 1);
    assert_eq!(fx.store.entries(1, "pkgs").unwrap(), vec!["c"]);
}

#[test]
fn test_shell_handlers_apply_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("log");
    let config = format!(
        r#"
handlers:
  - name: first
    run_before_switch: echo "before $GENSYNC_FROM $GENSYNC_TARGET $GENSYNC_HANDLER" >> '{log}'
    add: echo "add $GENSYNC_HANDLER %s $GENSYNC_FROM->$GENSYNC_TARGET" >> '{log}'
  - name: second
    add: "false"
  - name: third
    add: echo "add third %s" >> '{log}'
"#,
        log = log.display()
    );
    let fx = Fixture::new(&config);
    fx.write("first", "alpha\n");
    fx.write("second", "beta\n");
    fx.write("third", "gamma\n");
    let id = created_id(fx.build(""));

    let mut runner = ShellRunner;
    let result = SwitchEngine::new(&fx.config, &fx.store, &mut runner).switch_to(id, false);

    assert!(matches!(result, Err(Error::CommandFailed { ref handler, .. }) if handler == "second"));
    assert_eq!(read(&log), "before 0 1 first\nadd first alpha 0->1\n");
    assert_eq!(fx.store.current().unwrap(), 0);
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap_or_default()
}
