// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn dry_run() -> Arg {
    Arg::new("dry_run")
        .short('n')
        .long("dry-run")
        .action(ArgAction::SetTrue)
        .help("Print the commands without running them")
}

fn build_cli() -> Command {
    Command::new("gensync")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Declarative system state with generations and rollback")
        .subcommand_required(true)
        .arg(
            Arg::new("repo")
                .short('r')
                .long("repo")
                .global(true)
                .value_name("PATH")
                .help("Repository holding gensync.yml and the entry files (env: GENSYNC_REPO)"),
        )
        .arg(
            Arg::new("gens")
                .short('g')
                .long("gens")
                .global(true)
                .value_name("PATH")
                .help("Generations directory (env: GENSYNC_GENS)"),
        )
        .arg(
            Arg::new("hooks")
                .long("hooks")
                .global(true)
                .value_name("PATH")
                .help("Hooks directory exported to handler commands (env: GENSYNC_HOOKS)"),
        )
        .subcommand(Command::new("init").about("Create the repository with a sample configuration, and the store"))
        .subcommand(
            Command::new("list").about("List generations").arg(
                Arg::new("json")
                    .long("json")
                    .action(ArgAction::SetTrue)
                    .help("Print JSON instead of a table"),
            ),
        )
        .subcommand(
            Command::new("show")
                .about("Show the entries of a generation")
                .arg(Arg::new("generation").required(true))
                .arg(Arg::new("handler")),
        )
        .subcommand(
            Command::new("build")
                .about("Build a new generation from the repository")
                .arg(Arg::new("comment").num_args(0..)),
        )
        .subcommand(
            Command::new("diff")
                .about("Show what differs between two generations")
                .arg(Arg::new("from").required(true))
                .arg(Arg::new("to").required(true))
                .arg(Arg::new("handler")),
        )
        .subcommand(
            Command::new("switch")
                .about("Switch the system to a generation")
                .arg(Arg::new("target").required(true))
                .arg(dry_run()),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete generations")
                .arg(Arg::new("generations").required(true).num_args(1..)),
        )
        .subcommand(
            Command::new("rollback")
                .about("Switch to an older generation")
                .arg(Arg::new("steps").default_value("1"))
                .arg(dry_run()),
        )
        .subcommand(
            Command::new("repair")
                .about("Re-run setup and re-add every entry of the current generation")
                .arg(dry_run()),
        )
        .subcommand(
            Command::new("align")
                .about("Renumber generations to close gaps")
                .arg(dry_run()),
        )
        .subcommand(
            Command::new("delete-dups")
                .about("Delete generations whose content duplicates an older one")
                .arg(dry_run()),
        )
        .subcommand(
            Command::new("upgrade")
                .about("Run every handler's upgrade command")
                .arg(dry_run()),
        )
        .subcommand(
            Command::new("storage")
                .about("Per-generation key/value storage for hooks")
                .subcommand(
                    Command::new("put")
                        .about("Set a key; an empty value removes it")
                        .arg(Arg::new("generation").required(true))
                        .arg(Arg::new("namespace").required(true))
                        .arg(Arg::new("key").required(true))
                        .arg(Arg::new("value").num_args(0..)),
                )
                .subcommand(
                    Command::new("get")
                        .about("Print a key")
                        .arg(Arg::new("generation").required(true))
                        .arg(Arg::new("namespace").required(true))
                        .arg(Arg::new("key").required(true)),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(Arg::new("shell").required(true)),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("gensync.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
