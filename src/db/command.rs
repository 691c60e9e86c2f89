//! Operator commands understood by the shell and by `repoledger -e`.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use super::api::{Database, DatabaseError, DatabaseResult};
use crate::catalog::{ContentId, ContentType};
use crate::ledger::SquashOutcome;
use crate::version::VersionHandle;

/// A parsed command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateRepository {
        name: String,
        description: Option<String>,
    },
    ListRepositories,
    RegisterContent {
        id: ContentId,
        content_type: ContentType,
    },
    CreateVersion {
        repository: String,
        base: Option<u64>,
        add: BTreeSet<ContentId>,
        remove: BTreeSet<ContentId>,
    },
    ListVersions {
        repository: String,
    },
    ShowVersion {
        repository: String,
        number: u64,
    },
    DeleteVersion {
        repository: String,
        number: u64,
    },
    Counts {
        repository: String,
        number: u64,
    },
    History {
        limit: Option<usize>,
    },
    Stats,
    Help,
    Quit,
}

/// What running a command produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    Text(String),
    Quit,
}

pub const HELP: &str = "\
Commands:
  repo create NAME [DESCRIPTION...]     Create a repository
  repo list                             List repositories
  content register ID TYPE              Register a content unit
  version create REPO [--base N] [--add IDS] [--remove IDS]
                                        Build and finalize a new version
  version list REPO                     List versions of a repository
  version show REPO N                   Show the content of a version
  version delete REPO N                 Delete a version, squashing it into its successor
  counts REPO N                         Show the content counts of a version
  history [LIMIT]                       Show the commit log
  stats                                 Show ledger statistics
  help                                  Show this help message
  quit                                  Exit the shell

IDS is a comma-separated list of content ids.";

impl Command {
    /// Parse one command line.
    pub fn parse(line: &str) -> DatabaseResult<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let lowered: Vec<String> = words.iter().take(2).map(|w| w.to_lowercase()).collect();
        let head: Vec<&str> = lowered.iter().map(String::as_str).collect();

        match head.as_slice() {
            ["repo", "create", ..] => {
                let name = argument(&words, 2, "repository name")?.to_string();
                let description = (words.len() > 3).then(|| words[3..].join(" "));
                Ok(Command::CreateRepository { name, description })
            }
            ["repo", "list", ..] => Ok(Command::ListRepositories),
            ["content", "register", ..] => {
                let id = ContentId::new(argument(&words, 2, "content id")?)
                    .map_err(|e| DatabaseError::Command(format!("bad content id: {}", e)))?;
                let content_type = ContentType::new(argument(&words, 3, "content type")?)
                    .map_err(|e| DatabaseError::Command(format!("bad content type: {}", e)))?;
                Ok(Command::RegisterContent { id, content_type })
            }
            ["version", "create", ..] => parse_create_version(&words),
            ["version", "list", ..] => Ok(Command::ListVersions {
                repository: argument(&words, 2, "repository name")?.to_string(),
            }),
            ["version", "show", ..] => {
                let (repository, number) = repository_and_number(&words, 2)?;
                Ok(Command::ShowVersion { repository, number })
            }
            ["version", "delete", ..] => {
                let (repository, number) = repository_and_number(&words, 2)?;
                Ok(Command::DeleteVersion { repository, number })
            }
            ["counts", ..] => {
                let (repository, number) = repository_and_number(&words, 1)?;
                Ok(Command::Counts { repository, number })
            }
            ["history", ..] => {
                let limit = match words.get(1) {
                    Some(raw) => Some(number(raw, "limit")?),
                    None => None,
                };
                Ok(Command::History { limit })
            }
            ["stats", ..] => Ok(Command::Stats),
            ["help", ..] | ["?", ..] => Ok(Command::Help),
            ["quit", ..] | ["exit", ..] => Ok(Command::Quit),
            [] => Err(DatabaseError::Command("empty command".into())),
            _ => Err(DatabaseError::Command(format!(
                "unknown command '{}', type 'help' for a list",
                line.trim()
            ))),
        }
    }

    /// Run the command against `db`.
    pub fn execute(&self, db: &Database) -> DatabaseResult<CommandOutput> {
        let mut out = String::new();
        match self {
            Command::CreateRepository { name, description } => {
                let record = db.create_repository(name, description.as_deref())?;
                let _ = write!(out, "created repository {} ({})", record.name, record.id);
            }
            Command::ListRepositories => {
                let repositories = db.list_repositories();
                if repositories.is_empty() {
                    out.push_str("no repositories");
                }
                for record in repositories {
                    let _ = writeln!(
                        out,
                        "{:<24} last version {:<6} {}",
                        record.name,
                        record.last_version,
                        record.description.as_deref().unwrap_or("")
                    );
                }
            }
            Command::RegisterContent { id, content_type } => {
                let unit = db.register_content(id.clone(), content_type.clone())?;
                let _ = write!(out, "registered {} as {}", unit.id, unit.content_type);
            }
            Command::CreateVersion {
                repository,
                base,
                add,
                remove,
            } => {
                let repository = db.repository_by_name(repository)?;
                let base = match base {
                    Some(n) => Some(db.version_by_number(&repository.id, *n)?.id().clone()),
                    None => None,
                };
                let (version, _) = db.with_new_version(&repository.id, base.as_ref(), |v| {
                    v.remove_content(remove)?;
                    v.add_content(add).map_err(DatabaseError::from)
                })?;
                let _ = write!(
                    out,
                    "created version {} of {} with {} content units",
                    version.number(),
                    repository.name,
                    version.content()?.len()
                );
            }
            Command::ListVersions { repository } => {
                let repository = db.repository_by_name(repository)?;
                let versions = db.versions(&repository.id)?;
                if versions.is_empty() {
                    out.push_str("no versions");
                }
                for record in versions {
                    let _ = writeln!(
                        out,
                        "{:>6}  {:<9} {}  {}",
                        record.number,
                        record.state_label(),
                        record.created_at.format("%Y-%m-%d %H:%M:%S"),
                        record.id
                    );
                }
            }
            Command::ShowVersion { repository, number } => {
                let version = lookup(db, repository, *number)?;
                render_version(&mut out, &version)?;
            }
            Command::DeleteVersion { repository, number } => {
                let version = lookup(db, repository, *number)?;
                let outcome = version.delete()?;
                let _ = match outcome {
                    SquashOutcome::Discarded => write!(out, "discarded building version {}", number),
                    SquashOutcome::MergedInto(successor) => write!(
                        out,
                        "deleted version {}, squashed into version {}",
                        number, successor.number
                    ),
                    SquashOutcome::DroppedLatest => write!(out, "deleted latest version {}", number),
                };
            }
            Command::Counts { repository, number } => {
                let version = lookup(db, repository, *number)?;
                let counts = version.counts()?;
                if counts.is_empty() {
                    out.push_str("no counts (version is still building)");
                }
                for summary in counts {
                    let _ = writeln!(out, "{}", summary);
                }
            }
            Command::History { limit } => {
                for commit in db.history(*limit)? {
                    let _ = writeln!(
                        out,
                        "{} {} {}",
                        commit.id.short(),
                        commit.timestamp.format("%Y-%m-%d %H:%M:%S"),
                        commit.summary()
                    );
                }
            }
            Command::Stats => {
                let _ = write!(out, "{}", db.stats()?);
            }
            Command::Help => out.push_str(HELP),
            Command::Quit => return Ok(CommandOutput::Quit),
        }
        Ok(CommandOutput::Text(out.trim_end().to_string()))
    }
}

fn render_version(out: &mut String, version: &VersionHandle) -> DatabaseResult<()> {
    let record = version.record()?;
    let content = version.content()?;
    let _ = writeln!(out, "version {} ({})", record.number, record.state_label());
    let _ = writeln!(out, "id:      {}", record.id);
    if let Some(base) = &record.base_version_id {
        let _ = writeln!(out, "base:    {}", base);
    }
    let _ = writeln!(out, "added:   {}", join(&version.added()?));
    let _ = writeln!(out, "removed: {}", join(&version.removed()?));
    let _ = writeln!(out, "content: {} units", content.len());
    for id in content {
        let _ = writeln!(out, "  {}", id);
    }
    Ok(())
}

fn join(ids: &BTreeSet<ContentId>) -> String {
    if ids.is_empty() {
        return "-".to_string();
    }
    ids.iter().map(ContentId::as_str).collect::<Vec<_>>().join(", ")
}

fn lookup(db: &Database, repository: &str, number: u64) -> DatabaseResult<VersionHandle> {
    let repository = db.repository_by_name(repository)?;
    db.version_by_number(&repository.id, number)
}

fn parse_create_version(words: &[&str]) -> DatabaseResult<Command> {
    let repository = argument(words, 2, "repository name")?.to_string();
    let mut base = None;
    let mut add = BTreeSet::new();
    let mut remove = BTreeSet::new();

    let mut i = 3;
    while i < words.len() {
        let flag = words[i];
        let value = argument(words, i + 1, flag)?;
        match flag {
            "--base" => base = Some(number(value, "base version")?),
            "--add" => add.extend(content_ids(value)?),
            "--remove" => remove.extend(content_ids(value)?),
            other => {
                return Err(DatabaseError::Command(format!("unknown option '{}'", other)));
            }
        }
        i += 2;
    }

    Ok(Command::CreateVersion {
        repository,
        base,
        add,
        remove,
    })
}

fn content_ids(list: &str) -> DatabaseResult<Vec<ContentId>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            ContentId::new(s)
                .map_err(|e| DatabaseError::Command(format!("bad content id '{}': {}", s, e)))
        })
        .collect()
}

fn repository_and_number(words: &[&str], at: usize) -> DatabaseResult<(String, u64)> {
    let repository = argument(words, at, "repository name")?.to_string();
    let number = number(argument(words, at + 1, "version number")?, "version number")?;
    Ok((repository, number))
}

fn argument<'a>(words: &[&'a str], index: usize, what: &str) -> DatabaseResult<&'a str> {
    words
        .get(index)
        .copied()
        .ok_or_else(|| DatabaseError::Command(format!("missing {}", what)))
}

fn number<T: std::str::FromStr>(raw: &str, what: &str) -> DatabaseResult<T> {
    raw.parse()
        .map_err(|_| DatabaseError::Command(format!("{} must be a number, got '{}'", what, raw)))
}
