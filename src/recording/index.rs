use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Index file kept next to the recordings
pub const INDEX_FILE_NAME: &str = "recordings.json";

/// One recorded file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingEntry {
    pub filename: String,
    /// Covered frame time in seconds
    pub length_secs: u32,
    pub started: DateTime<Local>,
    /// False while the file is still being written
    pub finished: bool,
}

/// `recordings.json` listing of the files in a save directory
#[derive(Debug)]
pub struct RecordingIndex {
    path: PathBuf,
    entries: Vec<RecordingEntry>,
}

impl RecordingIndex {
    /// Load the index in `directory`, starting empty if it is missing or
    /// unreadable
    pub fn load(directory: &Path) -> Self {
        let path = directory.join(INDEX_FILE_NAME);
        let entries = match std::fs::read(&path) {
            Ok(data) => match serde_json::from_slice::<Vec<RecordingEntry>>(&data) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Ignoring unreadable index {}: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("Failed to read index {}: {}", path.display(), e);
                Vec::new()
            }
        };

        debug!("Loaded {} recording entries from {}", entries.len(), path.display());
        Self { path, entries }
    }

    pub fn entries(&self) -> &[RecordingEntry] {
        &self.entries
    }

    /// Record a newly opened file and return its row
    pub fn add(&mut self, filename: String, started: DateTime<Local>) -> std::io::Result<usize> {
        self.entries.push(RecordingEntry {
            filename,
            length_secs: 0,
            started,
            finished: false,
        });
        self.save()?;
        Ok(self.entries.len() - 1)
    }

    /// Mark row `row` finished with its final length
    pub fn finish(&mut self, row: usize, length_secs: u32) -> std::io::Result<()> {
        if let Some(entry) = self.entries.get_mut(row) {
            entry.length_secs = length_secs;
            entry.finished = true;
        }
        self.save()
    }

    fn save(&self) -> std::io::Result<()> {
        let data = serde_json::to_vec_pretty(&self.entries)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &self.path)
    }
}
