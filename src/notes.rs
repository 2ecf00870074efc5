//! Notes collaborator: a scratchpad the model can append to and read back.

use crate::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

#[async_trait]
pub trait NoteStore: Send + Sync {
    async fn add(&self, note: &str) -> Result<()>;

    /// All notes, one per line, oldest first.
    async fn read(&self) -> Result<String>;
}

/// Notes appended to a text file, one per line.
#[derive(Debug, Clone)]
pub struct FileNoteStore {
    path: PathBuf,
}

impl FileNoteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl NoteStore for FileNoteStore {
    async fn add(&self, note: &str) -> Result<()> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let line = format!("{}\n", note.replace('\n', " "));
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn read(&self) -> Result<String> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => Ok(s.trim_end().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryNoteStore {
    notes: Mutex<Vec<String>>,
}

impl MemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NoteStore for MemoryNoteStore {
    async fn add(&self, note: &str) -> Result<()> {
        if let Ok(mut notes) = self.notes.lock() {
            notes.push(note.replace('\n', " "));
        }
        Ok(())
    }

    async fn read(&self) -> Result<String> {
        Ok(self.notes.lock().map(|n| n.join("\n")).unwrap_or_default())
    }
}
