//! Message types: the atomic unit of a conversation.
//!
//! A [`Message`] is immutable once constructed; edits produce a new value.
//! Attached files are [`FileRef`]s: either local paths or URIs, distinguished
//! by a `scheme://` prefix so a URI is never treated as a filesystem path.
//!
//! # Main types
//!
//! - [`Role`]: semantic source of a message (system / user / assistant / tool).
//! - [`Message`]: role + content + timestamp + flags; one JSONL line on disk.
//! - [`FileRef`]: path-or-URI attachment.
//! - [`UsageMetadata`]: token counts and cost attached to assistant messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Semantic source of a message.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        f.write_str(s)
    }
}

/// An attached file: a local filesystem path or a URI.
///
/// Serialized as a plain string; a `scheme://` prefix makes it a URI on read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileRef {
    Path(PathBuf),
    Uri(String),
}

impl FileRef {
    /// Parses a string: anything with a `scheme://` prefix is a URI.
    pub fn parse(s: &str) -> Self {
        if is_uri(s) {
            FileRef::Uri(s.to_string())
        } else {
            FileRef::Path(PathBuf::from(s))
        }
    }

    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        match self {
            FileRef::Path(p) => p.to_string_lossy(),
            FileRef::Uri(u) => std::borrow::Cow::Borrowed(u.as_str()),
        }
    }

    pub fn is_uri(&self) -> bool {
        matches!(self, FileRef::Uri(_))
    }
}

/// True when the string has a URI scheme prefix like `https://` or `file://`.
fn is_uri(s: &str) -> bool {
    match s.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
                && scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        }
        None => false,
    }
}

impl Serialize for FileRef {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_str())
    }
}

impl<'de> Deserialize<'de> for FileRef {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(FileRef::parse(&s))
    }
}

/// Token counts and cost for one completed provider request.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageMetadata {
    pub model: String,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
    /// Provider-reported total, when it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default)]
    pub cost: f64,
}

/// One conversation message. Content is never mutated in place.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRef>,
    /// Survives context trimming.
    #[serde(default, skip_serializing_if = "is_false")]
    pub pinned: bool,
    /// Omitted from terminal display but still sent to the model.
    #[serde(default, skip_serializing_if = "is_false")]
    pub hide: bool,
    /// On a tool-result message: binds it to the assistant invocation with the same id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<UsageMetadata>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            files: Vec::new(),
            pinned: false,
            hide: false,
            call_id: None,
            metadata: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_files(mut self, files: Vec<FileRef>) -> Self {
        self.files = files;
        self
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: UsageMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hide = true;
        self
    }

    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    /// Returns a copy with different content; the original is untouched.
    pub fn replace_content(&self, content: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.content = content.into();
        next
    }

    /// Serializes to one JSON line (field order is the declaration order above).
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
