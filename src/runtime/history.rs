//! Append-only instance history.
//!
//! Every decision point of an orchestration (activity scheduled, activity
//! finished, timer armed, wait finished) is written here before the
//! orchestration moves on. Replaying the log rebuilds the orchestration's
//! local state without re-running completed activities.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::warn;

use crate::activity::{ActivityResult, Failure};
use crate::error::HistoryError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HistoryEvent {
    OrchestrationStarted {
        orchestration: String,
        input: Value,
        at: DateTime<Utc>,
    },
    ActivityScheduled {
        seq: u64,
        name: String,
    },
    ActivityCompleted {
        seq: u64,
        output: Value,
    },
    ActivityFailed {
        seq: u64,
        failure: Failure,
    },
    TimerCreated {
        seq: u64,
        signal: String,
        fire_at: DateTime<Utc>,
    },
    SignalReceived {
        name: String,
    },
    WaitCompleted {
        seq: u64,
        signal: String,
        signalled: bool,
    },
    OrchestrationCompleted {
        terminal: Terminal,
    },
}

/// Final outcome of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Terminal {
    Completed { result: ActivityResult },
    Cancelled { reason: String },
}

/// The terminal event of a history, if the instance has finished.
pub fn terminal_of(events: &[HistoryEvent]) -> Option<&Terminal> {
    events.iter().rev().find_map(|event| match event {
        HistoryEvent::OrchestrationCompleted { terminal } => Some(terminal),
        _ => None,
    })
}

/// Orchestration name and input recorded by the first event.
pub fn started_of(events: &[HistoryEvent]) -> Option<(&str, &Value)> {
    match events.first() {
        Some(HistoryEvent::OrchestrationStarted {
            orchestration,
            input,
            ..
        }) => Some((orchestration.as_str(), input)),
        _ => None,
    }
}

/// Durable storage for instance histories.
pub trait HistoryStore: Send + Sync {
    /// Events of `instance` in append order; empty when the instance is unknown.
    fn load<'a>(&'a self, instance: &'a str) -> BoxFuture<'a, Result<Vec<HistoryEvent>, HistoryError>>;

    /// Start a fresh history for `instance`, discarding any previous one.
    fn create<'a>(
        &'a self,
        instance: &'a str,
        started: HistoryEvent,
    ) -> BoxFuture<'a, Result<(), HistoryError>>;

    fn append<'a>(
        &'a self,
        instance: &'a str,
        event: HistoryEvent,
    ) -> BoxFuture<'a, Result<(), HistoryError>>;

    /// Every instance with a stored history.
    fn instances(&self) -> BoxFuture<'_, Result<Vec<String>, HistoryError>>;
}

#[derive(Debug, Default)]
pub struct MemoryHistoryStore {
    histories: Mutex<HashMap<String, Vec<HistoryEvent>>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn load<'a>(&'a self, instance: &'a str) -> BoxFuture<'a, Result<Vec<HistoryEvent>, HistoryError>> {
        Box::pin(async move {
            let histories = self.histories.lock().expect("history lock poisoned");
            Ok(histories.get(instance).cloned().unwrap_or_default())
        })
    }

    fn create<'a>(
        &'a self,
        instance: &'a str,
        started: HistoryEvent,
    ) -> BoxFuture<'a, Result<(), HistoryError>> {
        Box::pin(async move {
            let mut histories = self.histories.lock().expect("history lock poisoned");
            histories.insert(instance.to_string(), vec![started]);
            Ok(())
        })
    }

    fn append<'a>(
        &'a self,
        instance: &'a str,
        event: HistoryEvent,
    ) -> BoxFuture<'a, Result<(), HistoryError>> {
        Box::pin(async move {
            let mut histories = self.histories.lock().expect("history lock poisoned");
            let events = histories
                .get_mut(instance)
                .ok_or_else(|| HistoryError::Empty(instance.to_string()))?;
            events.push(event);
            Ok(())
        })
    }

    fn instances(&self) -> BoxFuture<'_, Result<Vec<String>, HistoryError>> {
        Box::pin(async move {
            let histories = self.histories.lock().expect("history lock poisoned");
            let mut ids: Vec<String> = histories.keys().cloned().collect();
            ids.sort();
            Ok(ids)
        })
    }
}

/// One JSON-lines file per instance under `dir`.
#[derive(Debug)]
pub struct FileHistoryStore {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

const EXTENSION: &str = "jsonl";

impl FileHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn path_for(&self, instance: &str) -> PathBuf {
        let file: String = instance
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.{EXTENSION}"))
    }

    async fn write_line(&self, path: &Path, event: &HistoryEvent, truncate: bool) -> Result<(), HistoryError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut options = tokio::fs::OpenOptions::new();
        options.create(true);
        if truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let mut file = options.open(path).await?;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }
}

/// Cut a partial last line left by a crash, so the next event starts on a line of its own.
async fn discard_torn_tail(path: &Path) -> Result<(), HistoryError> {
    let mut file = tokio::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .await?;
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(());
    }
    file.seek(std::io::SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    if last[0] == b'\n' {
        return Ok(());
    }

    file.seek(std::io::SeekFrom::Start(0)).await?;
    let mut content = Vec::with_capacity(len as usize);
    file.read_to_end(&mut content).await?;
    let keep = content
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i + 1);
    file.set_len(keep as u64).await?;
    file.sync_data().await?;
    warn!(discarded_bytes = content.len() - keep, "truncated torn history tail");
    Ok(())
}

fn parse_lines(instance: &str, content: &str) -> Result<Vec<HistoryEvent>, HistoryError> {
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    let mut events = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_str(line) {
            Ok(event) => events.push(event),
            // A crash mid-append can leave a torn last line; the event was never acknowledged.
            Err(err) if i + 1 == lines.len() => {
                warn!(error = %err, "ignoring torn history tail");
            }
            Err(err) => return Err(err.into()),
        }
    }
    if events.is_empty() && !lines.is_empty() {
        return Err(HistoryError::Empty(instance.to_string()));
    }
    Ok(events)
}

impl HistoryStore for FileHistoryStore {
    fn load<'a>(&'a self, instance: &'a str) -> BoxFuture<'a, Result<Vec<HistoryEvent>, HistoryError>> {
        Box::pin(async move {
            match tokio::fs::read_to_string(self.path_for(instance)).await {
                Ok(content) => parse_lines(instance, &content),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
                Err(err) => Err(err.into()),
            }
        })
    }

    fn create<'a>(
        &'a self,
        instance: &'a str,
        started: HistoryEvent,
    ) -> BoxFuture<'a, Result<(), HistoryError>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            tokio::fs::create_dir_all(&self.dir).await?;
            self.write_line(&self.path_for(instance), &started, true).await
        })
    }

    fn append<'a>(
        &'a self,
        instance: &'a str,
        event: HistoryEvent,
    ) -> BoxFuture<'a, Result<(), HistoryError>> {
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let path = self.path_for(instance);
            if !tokio::fs::try_exists(&path).await? {
                return Err(HistoryError::Empty(instance.to_string()));
            }
            discard_torn_tail(&path).await?;
            self.write_line(&path, &event, false).await
        })
    }

    fn instances(&self) -> BoxFuture<'_, Result<Vec<String>, HistoryError>> {
        Box::pin(async move {
            let mut entries = match tokio::fs::read_dir(&self.dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(err) => return Err(err.into()),
            };
            let mut ids = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    ids.push(stem.to_string());
                }
            }
            ids.sort();
            Ok(ids)
        })
    }
}
