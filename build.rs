// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("kbgraph")
        .version(env!("CARGO_PKG_VERSION"))
        .author("kbgraph Contributors")
        .about("Embedded storage engine for a personal knowledge graph")
        .subcommand_required(true)
        .subcommand(
            Command::new("init")
                .about("Open (creating if necessary) a store and bring its schema to the latest version")
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .value_name("PATH")
                        .default_value("kbgraph.db")
                        .help("Database path (use `:memory:` for a throwaway store)"),
                )
                .arg(
                    Arg::new("preset")
                        .long("preset")
                        .default_value("development")
                        .help("Named default bundle to start from"),
                ),
        )
        .subcommand(
            Command::new("migrate")
                .about("Apply pending schema migrations, or roll back to a given version")
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .default_value("kbgraph.db"),
                )
                .arg(
                    Arg::new("rollback_to")
                        .long("rollback-to")
                        .value_name("VERSION")
                        .help("Roll back to this schema version instead of migrating forward"),
                ),
        )
        .subcommand(
            Command::new("status")
                .about("Print schema version, integrity check results, and recorder metrics")
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .default_value("kbgraph.db"),
                ),
        )
        .subcommand(
            Command::new("import")
                .about("Bulk-import a JSON array of source records")
                .arg(Arg::new("file").required(true).help("Path to a JSON file containing an array of source records"))
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .default_value("kbgraph.db"),
                )
                .arg(
                    Arg::new("batch_size")
                        .long("batch-size")
                        .value_name("N")
                        .help("Records per batch"),
                )
                .arg(
                    Arg::new("abort_on_error")
                        .long("abort-on-error")
                        .action(clap::ArgAction::SetTrue)
                        .help("Abort the whole run on the first constraint violation instead of skipping the row"),
                ),
        )
        .subcommand(
            Command::new("backup")
                .about("Snapshot the store to another file using SQLite's own backup API")
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .default_value("kbgraph.db"),
                )
                .arg(Arg::new("dest").required(true).help("Destination path for the backup copy")),
        )
        .subcommand(
            Command::new("stats")
                .about("Print page accounting and per-table row counts")
                .arg(
                    Arg::new("db_path")
                        .short('d')
                        .long("db-path")
                        .default_value("kbgraph.db"),
                ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)
        .expect("Failed to render man page");

    let man_path = man_dir.join("kbgraph.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
