//! repoledger - versioned content membership on top of git
//!
//! This is the main entry point for the repoledger command-line interface.

use std::path::PathBuf;
use std::process::ExitCode;

use repoledger::db::{Command, CommandOutput, Database, DatabaseConfig, Repl};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    // Parse simple command line args.
    let mut path = PathBuf::from(".repoledger");
    let mut verbose = false;
    let mut execute: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-d" | "--database" => {
                i += 1;
                if i < args.len() {
                    path = PathBuf::from(&args[i]);
                }
            }
            "-v" | "--verbose" => {
                verbose = true;
            }
            "-e" | "--execute" => {
                i += 1;
                if i < args.len() {
                    execute = Some(args[i].clone());
                }
            }
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("repoledger v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            arg => {
                // Treat as database path if no flag.
                if !arg.starts_with('-') {
                    path = PathBuf::from(arg);
                } else {
                    eprintln!("Unknown option: {}", arg);
                    return ExitCode::FAILURE;
                }
            }
        }
        i += 1;
    }

    init_tracing(verbose);

    let config = DatabaseConfig::new(&path)
        .create_if_missing(true)
        .verbose(verbose);

    let db = match Database::open_with_config(config) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error opening database: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match execute {
        Some(line) => execute_command(&db, &line),
        None => run_repl(db),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Log to stderr. `RUST_LOG` wins over the default level.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_help() {
    println!("repoledger - versioned content membership on top of git");
    println!();
    println!("Usage: repoledger [OPTIONS] [DATABASE]");
    println!();
    println!("Options:");
    println!("  -d, --database PATH    Path to database directory (default: .repoledger)");
    println!("  -e, --execute CMD      Execute one command and exit");
    println!("  -v, --verbose          Enable debug logging and timings");
    println!("  -h, --help             Show this help message");
    println!("  --version              Show version");
    println!();
    println!("Examples:");
    println!("  repoledger                                   Start the shell on .repoledger");
    println!("  repoledger -e 'repo create acme'             Create a repository and exit");
    println!("  repoledger -e 'version create acme --add a'  Build a new version");
}

fn execute_command(db: &Database, line: &str) -> Result<(), Box<dyn std::error::Error>> {
    match Command::parse(line)?.execute(db)? {
        CommandOutput::Text(text) if !text.is_empty() => println!("{}", text),
        _ => {}
    }
    Ok(())
}

fn run_repl(db: Database) -> Result<(), Box<dyn std::error::Error>> {
    let mut repl = Repl::new(db);
    repl.run()?;
    Ok(())
}
