use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::fusion::FusionMode;

/// Something that happened to a fusion workflow. Raw provider and I/O
/// details are kept here instead of in user-facing messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    ImagesAdded {
        ids: Vec<String>,
        total: usize,
    },
    ImagesRejected {
        detail: String,
    },
    ImageRemoved {
        id: String,
        total: usize,
    },
    WorkflowReset,
    SubmissionStarted {
        generation: u64,
        image_count: usize,
        mode: FusionMode,
    },
    FusionResulted {
        generation: u64,
        image_url: String,
    },
    FusionFailed {
        generation: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

/// One line of a session log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub ts: String,
    #[serde(flatten)]
    pub event: WorkflowEvent,
}

/// Append-only JSON-lines file of [`SessionRecord`]s.
///
/// The file and its parent directories are created on the first append and
/// the handle is kept open afterwards.
#[derive(Debug)]
pub struct SessionLog {
    path: PathBuf,
    file: Option<File>,
}

impl SessionLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, session_id: &str, event: WorkflowEvent) -> anyhow::Result<()> {
        let record = SessionRecord {
            session_id: session_id.to_string(),
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            event,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        if self.file.is_none() {
            self.file = Some(self.open()?);
        }
        let Some(file) = self.file.as_mut() else {
            anyhow::bail!("session log {} is not open", self.path.display());
        };
        file.write_all(&line)
            .with_context(|| format!("writing {}", self.path.display()))
    }

    fn open(&self) -> anyhow::Result<File> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))
    }
}

/// Reads a session log back. Lines that do not parse as a record are
/// skipped.
pub fn read_session(path: &Path) -> anyhow::Result<Vec<SessionRecord>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .filter_map(|line| serde_json::from_str::<SessionRecord>(line).ok())
        .collect())
}
