//! Interactive shell for repoledger.

use std::io::{self, BufRead, Write};
use std::time::Instant;

use super::api::{Database, DatabaseResult};
use super::command::{Command, CommandOutput};

/// REPL configuration.
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// Prompt string.
    pub prompt: String,
    /// Show timing information.
    pub timing: bool,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            prompt: "repoledger> ".into(),
            timing: false,
        }
    }
}

/// The interactive REPL.
pub struct Repl {
    db: Database,
    config: ReplConfig,
}

impl Repl {
    /// Create a new REPL with the given database.
    pub fn new(db: Database) -> Self {
        let timing = db.config().verbose;
        Self {
            db,
            config: ReplConfig {
                timing,
                ..ReplConfig::default()
            },
        }
    }

    /// Create a REPL with custom configuration.
    pub fn with_config(db: Database, config: ReplConfig) -> Self {
        Self { db, config }
    }

    /// Run the REPL on stdin and stdout.
    pub fn run(&mut self) -> DatabaseResult<()> {
        self.print_banner();
        let stdin = io::stdin();
        let stdout = io::stdout();
        self.run_with(stdin.lock(), &mut stdout.lock())
    }

    /// Run the REPL over arbitrary input and output.
    pub fn run_with<R: BufRead, W: Write>(&mut self, mut input: R, out: &mut W) -> DatabaseResult<()> {
        loop {
            write!(out, "{}", self.config.prompt)?;
            out.flush()?;

            let mut line = String::new();
            if input.read_line(&mut line)? == 0 {
                // EOF.
                writeln!(out)?;
                break;
            }

            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let start = Instant::now();
            match Command::parse(line).and_then(|command| command.execute(&self.db)) {
                Ok(CommandOutput::Quit) => break,
                Ok(CommandOutput::Text(text)) => {
                    if !text.is_empty() {
                        writeln!(out, "{}", text)?;
                    }
                    if self.config.timing {
                        writeln!(out, "Time: {:.3}ms", start.elapsed().as_secs_f64() * 1000.0)?;
                    }
                }
                Err(e) => writeln!(out, "Error: {}", e)?,
            }
        }
        Ok(())
    }

    fn print_banner(&self) {
        println!("repoledger {}", env!("CARGO_PKG_VERSION"));
        println!("Type 'help' for commands, 'quit' to exit.");
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_session() {
        let db = Database::in_memory().unwrap();
        let script = "\
repo create acme
# comment lines are skipped
content register a rpm
version create acme --add a
bogus
quit
stats
";
        let mut out = Vec::new();
        Repl::new(db.clone())
            .run_with(script.as_bytes(), &mut out)
            .unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.contains("created repository acme"));
        assert!(out.contains("created version 1 of acme"));
        assert!(out.contains("Error: invalid command: unknown command 'bogus'"));
        // nothing after quit runs
        assert!(!out.contains("repositories:"));
        assert_eq!(db.list_repositories().len(), 1);
    }
}
