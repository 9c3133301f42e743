//! Local thread registry: an ordered list of conversations persisted as JSON
//! under a single namespaced file. Rewritten on every mutation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Namespace key; the registry file is `<data dir>/<THREADS_KEY>.json`.
pub const THREADS_KEY: &str = "news_chat_threads";

pub const NEW_THREAD_TITLE: &str = "New Chat";
pub const UNTITLED: &str = "Untitled";

const AUTO_TITLE_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub title: String,
    /// Milliseconds since the Unix epoch.
    pub updated_at: i64,
}

/// On-disk entry; older files may omit fields or store fractional timestamps.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredThread {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    updated_at: Option<f64>,
}

impl From<StoredThread> for Thread {
    fn from(t: StoredThread) -> Self {
        Thread {
            id: t.id,
            title: t.title.unwrap_or_else(|| NEW_THREAD_TITLE.to_string()),
            updated_at: t.updated_at.map(|ms| ms as i64).unwrap_or_default(),
        }
    }
}

/// Normalize each entry on its own; unreadable entries are skipped.
fn decode_threads(raw: &str) -> Result<Vec<Thread>, serde_json::Error> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(raw)?;
    Ok(entries
        .into_iter()
        .filter_map(|entry| match serde_json::from_value::<StoredThread>(entry) {
            Ok(stored) => Some(Thread::from(stored)),
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable thread entry");
                None
            }
        })
        .collect())
}

/// Title derived from the first user message of a thread.
pub fn title_from_message(text: &str) -> String {
    let text = text.trim();
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(AUTO_TITLE_CHARS).collect();
    if chars.next().is_some() {
        format!("{}…", head)
    } else {
        head
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct ThreadStore {
    path: PathBuf,
    threads: Vec<Thread>,
}

impl ThreadStore {
    /// Registry file inside `dir`.
    pub fn path_in(dir: &Path) -> PathBuf {
        dir.join(format!("{}.json", THREADS_KEY))
    }

    /// Read the registry at `path`. Missing or corrupt data yields an empty list.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let threads = match std::fs::read_to_string(&path) {
            Ok(raw) => match decode_threads(&raw) {
                Ok(threads) => threads,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring corrupt thread registry");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cannot read thread registry");
                Vec::new()
            }
        };
        Self { path, threads }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Threads, newest first.
    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub fn get(&self, id: &str) -> Option<&Thread> {
        self.threads.iter().find(|t| t.id == id)
    }

    /// Create a thread and return its id.
    pub fn create(&mut self) -> Result<String, ClientError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.insert_front(id.clone());
        self.save()?;
        Ok(id)
    }

    /// Register `id` if it is not known yet.
    pub fn ensure(&mut self, id: &str) -> Result<(), ClientError> {
        if id.is_empty() || self.get(id).is_some() {
            return Ok(());
        }
        self.insert_front(id.to_string());
        self.save()
    }

    /// Rename a thread; a blank title becomes `Untitled`. Unknown ids are ignored.
    pub fn rename(&mut self, id: &str, title: &str) -> Result<(), ClientError> {
        let Some(thread) = self.threads.iter_mut().find(|t| t.id == id) else {
            return Ok(());
        };
        let title = title.trim();
        thread.title = if title.is_empty() {
            UNTITLED.to_string()
        } else {
            title.to_string()
        };
        thread.updated_at = now_millis();
        self.save()
    }

    /// Title a thread after its first user message while it still has the
    /// placeholder title. Returns true if the title changed.
    pub fn auto_title(&mut self, id: &str, first_user_message: &str) -> Result<bool, ClientError> {
        let untouched = self
            .get(id)
            .map(|t| t.title == NEW_THREAD_TITLE)
            .unwrap_or(false);
        let title = title_from_message(first_user_message);
        if !untouched || title.is_empty() {
            return Ok(false);
        }
        self.rename(id, &title)?;
        Ok(true)
    }

    pub fn remove(&mut self, id: &str) -> Result<(), ClientError> {
        self.threads.retain(|t| t.id != id);
        self.save()
    }

    fn insert_front(&mut self, id: String) {
        self.threads.insert(
            0,
            Thread {
                id,
                title: NEW_THREAD_TITLE.to_string(),
                updated_at: now_millis(),
            },
        );
    }

    fn save(&self) -> Result<(), ClientError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(&self.threads)?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }
}
