//! Append-only, branchable conversation log.
//!
//! A log directory holds `conversation.jsonl` (the primary branch), any
//! `branches/<name>.jsonl`, the chat `config.toml` and an optional
//! `workspace` symlink. Messages are appended one JSON object per line with
//! deterministic field ordering; reads are robust to a trailing garbage line
//! from an interrupted writer.

mod lock;
pub mod prepare;

pub use lock::LogLock;
pub use prepare::{prepare_messages, trim_messages, PrepareOptions, Summarizer};

use chrono::{DateTime, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::message::Message;

pub const LOG_FILENAME: &str = "conversation.jsonl";
pub const BRANCHES_DIRNAME: &str = "branches";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("log not found: {0}")]
    NotFound(PathBuf),
    #[error("another writer holds the lock on {path}")]
    Locked { path: PathBuf },
    #[error("corrupt log line {line}: {source}")]
    Corrupt {
        line: usize,
        source: serde_json::Error,
    },
    #[error("branch {0} does not exist")]
    UnknownBranch(String),
    #[error("serialize message: {0}")]
    Serialize(serde_json::Error),
}

/// Options for opening a log.
#[derive(Clone, Debug, Default)]
pub struct LogOptions {
    /// Branch to read; `None` is the primary branch.
    pub branch: Option<String>,
    /// Take the exclusive writer lock (CLI exclusive mode). The server reads
    /// unlocked and tolerates stale reads.
    pub lock: bool,
    /// Create the directory and an empty log if missing.
    pub create: bool,
}

/// An open conversation log: in-memory messages plus the backing file.
#[derive(Debug)]
pub struct ConversationLog {
    dir: PathBuf,
    branch: Option<String>,
    messages: Vec<Message>,
    _lock: Option<LogLock>,
}

impl ConversationLog {
    /// Opens (or creates) the log in `dir`.
    pub fn open(dir: impl Into<PathBuf>, opts: LogOptions) -> Result<Self, StoreError> {
        let dir = dir.into();
        let path = log_path(&dir, opts.branch.as_deref());
        if !path.exists() {
            if !opts.create {
                return Err(if opts.branch.is_some() {
                    StoreError::UnknownBranch(opts.branch.unwrap_or_default())
                } else {
                    StoreError::NotFound(path)
                });
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, "")?;
        }

        let lock = if opts.lock {
            Some(LogLock::acquire(&path)?)
        } else {
            None
        };

        let messages = read_jsonl(&path)?;
        Ok(Self {
            dir,
            branch: opts.branch,
            messages,
            _lock: lock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn branch_name(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn path(&self) -> PathBuf {
        log_path(&self.dir, self.branch.as_deref())
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Appends one message and persists it before returning. The line lands
    /// with a flush so a late subscriber reading the file sees at least what
    /// the corresponding event described.
    pub fn append(&mut self, message: Message) -> Result<(), StoreError> {
        let line = message.to_json_line().map_err(StoreError::Serialize)?;
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.path())?;
        writeln!(file, "{line}")?;
        file.sync_data()?;
        self.messages.push(message);
        Ok(())
    }

    /// Truncates the conversation to its first `n` messages (for `/undo`).
    /// Rewrites the whole file through a temp-and-rename.
    pub fn truncate_to(&mut self, n: usize) -> Result<(), StoreError> {
        self.messages.truncate(n);
        self.persist()
    }

    /// Replaces the message at `index` with a new value (messages are
    /// immutable; this swaps in a fresh one) and rewrites the file.
    pub fn replace(&mut self, index: usize, message: Message) -> Result<(), StoreError> {
        if index >= self.messages.len() {
            return Ok(());
        }
        self.messages[index] = message;
        self.persist()
    }

    /// Rewrites the backing file from memory, atomically.
    pub fn persist(&self) -> Result<(), StoreError> {
        let path = self.path();
        let tmp = path.with_extension("jsonl.tmp");
        let mut out = String::new();
        for m in &self.messages {
            out.push_str(&m.to_json_line().map_err(StoreError::Serialize)?);
            out.push('\n');
        }
        fs::write(&tmp, out)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Creates (if needed) and switches to a named branch. A new branch starts
    /// from the current messages, sharing the whole prefix.
    pub fn switch_branch(&mut self, name: &str) -> Result<(), StoreError> {
        let branch_path = log_path(&self.dir, Some(name));
        if !branch_path.exists() {
            if let Some(parent) = branch_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(self.path(), &branch_path)?;
        }
        self.branch = Some(name.to_string());
        self.messages = read_jsonl(&branch_path)?;
        Ok(())
    }

    /// Forks the whole conversation into a new log directory.
    pub fn fork(&self, new_dir: impl Into<PathBuf>) -> Result<ConversationLog, StoreError> {
        let new_dir = new_dir.into();
        fs::create_dir_all(&new_dir)?;
        fs::copy(self.path(), new_dir.join(LOG_FILENAME))?;
        let config = self.dir.join(env_config::CHAT_CONFIG_FILENAME);
        if config.exists() {
            fs::copy(&config, new_dir.join(env_config::CHAT_CONFIG_FILENAME))?;
        }
        ConversationLog::open(
            new_dir,
            LogOptions {
                create: false,
                ..LogOptions::default()
            },
        )
    }

    /// Lists branch names present in this log directory.
    pub fn branches(&self) -> Vec<String> {
        let mut names = Vec::new();
        if let Ok(entries) = fs::read_dir(self.dir.join(BRANCHES_DIRNAME)) {
            for entry in entries.flatten() {
                if let Some(name) = entry
                    .file_name()
                    .to_str()
                    .and_then(|n| n.strip_suffix(".jsonl"))
                {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        names
    }
}

fn log_path(dir: &Path, branch: Option<&str>) -> PathBuf {
    match branch {
        Some(name) => dir.join(BRANCHES_DIRNAME).join(format!("{name}.jsonl")),
        None => dir.join(LOG_FILENAME),
    }
}

/// Reads a JSONL log. A final unparseable line is tolerated (interrupted
/// writer); garbage in the middle is a hard error.
fn read_jsonl(path: &Path) -> Result<Vec<Message>, StoreError> {
    let content = fs::read_to_string(path)?;
    let lines: Vec<&str> = content
        .split('\n')
        .filter(|l| !l.trim().is_empty())
        .collect();
    let mut messages = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_str::<Message>(line) {
            Ok(m) => messages.push(m),
            Err(source) if i + 1 == lines.len() => {
                tracing::warn!(
                    "dropping trailing garbage line in {}: {}",
                    path.display(),
                    source
                );
            }
            Err(source) => return Err(StoreError::Corrupt { line: i + 1, source }),
        }
    }
    Ok(messages)
}

/// Conversation listing entry (server index view).
#[derive(Clone, Debug, serde::Serialize)]
pub struct ConversationMeta {
    pub id: String,
    pub name: Option<String>,
    pub messages: usize,
    pub modified: DateTime<Utc>,
}

/// Root directory for conversation logs:
/// `WEFT_LOGS_HOME`, else `XDG_DATA_HOME/weft/logs`, else the platform data dir.
pub fn logs_home() -> PathBuf {
    if let Ok(dir) = std::env::var("WEFT_LOGS_HOME") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        if !xdg.is_empty() {
            return PathBuf::from(xdg).join("weft").join("logs");
        }
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("weft")
        .join("logs")
}

/// Lists conversations under `logs_home`, newest first.
pub fn list_conversations(
    logs_home: &Path,
    limit: usize,
) -> Result<Vec<ConversationMeta>, StoreError> {
    let mut out = Vec::new();
    let entries = match fs::read_dir(logs_home) {
        Ok(e) => e,
        Err(_) => return Ok(out), // no logs yet
    };
    for entry in entries.flatten() {
        let dir = entry.path();
        let log = dir.join(LOG_FILENAME);
        if !log.is_file() {
            continue;
        }
        let id = match dir.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        let modified = log
            .metadata()
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let count = fs::read_to_string(&log)
            .map(|c| c.lines().filter(|l| !l.trim().is_empty()).count())
            .unwrap_or(0);
        let name = env_config::ChatConfig::load(&dir)
            .ok()
            .and_then(|c| c.name);
        out.push(ConversationMeta {
            id,
            name,
            messages: count,
            modified,
        });
    }
    out.sort_by(|a, b| b.modified.cmp(&a.modified));
    out.truncate(limit);
    Ok(out)
}
