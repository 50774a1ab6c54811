// =============================================================================
// Decision history journal (C11) — file-backed rolling log, single writer
// =============================================================================
//
// Loaded once at startup, appended after every LLM response. The in-memory
// tail and the file rewrite are both owned by one background task reached
// through an unbounded channel, so truncation and persistence can never
// interleave across concurrent append callers (§5 "Decision journaling is
// serialized per process").
// =============================================================================

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

const MAX_ENTRIES: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub content: String,
    pub timestamp_str: String,
}

pub struct Journal {
    entries: parking_lot::RwLock<VecDeque<JournalEntry>>,
    writer_tx: mpsc::UnboundedSender<JournalEntry>,
}

impl Journal {
    /// Load existing entries from `path` (missing or malformed file just
    /// means "start empty") and spawn the single serialized writer task.
    pub fn load(path: impl Into<PathBuf>) -> Arc<Self> {
        let path = path.into();
        let loaded: Vec<JournalEntry> = std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        let mut entries: VecDeque<JournalEntry> = loaded.into();
        while entries.len() > MAX_ENTRIES {
            entries.pop_front();
        }
        info!(path = %path.display(), count = entries.len(), "decision history journal loaded");

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<JournalEntry>();
        let journal = Arc::new(Self {
            entries: parking_lot::RwLock::new(entries),
            writer_tx,
        });

        let write_path = path.clone();
        let journal_for_writer = journal.clone();
        tokio::spawn(async move {
            while let Some(entry) = writer_rx.recv().await {
                let snapshot = {
                    let mut entries = journal_for_writer.entries.write();
                    entries.push_back(entry);
                    while entries.len() > MAX_ENTRIES {
                        entries.pop_front();
                    }
                    entries.iter().cloned().collect::<Vec<_>>()
                };
                if let Err(e) = save(&write_path, &snapshot) {
                    warn!(error = %e, "failed to persist decision history journal");
                }
            }
        });

        journal
    }

    /// Enqueue one entry for the writer task. Returns immediately; the
    /// append and resave happen asynchronously, in submission order.
    pub fn append(&self, content: String, timestamp_str: String) {
        let _ = self.writer_tx.send(JournalEntry { content, timestamp_str });
    }

    /// Compacted context for the next prompt: newest-first entry contents.
    pub fn recent_summaries(&self) -> Vec<String> {
        self.entries.read().iter().rev().map(|e| e.content.clone()).collect()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

fn save(path: &Path, entries: &[JournalEntry]) -> anyhow::Result<()> {
    use anyhow::Context;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context("create journal directory")?;
    }
    let body = serde_json::to_string_pretty(entries).context("serialize journal")?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body).context("write journal tmp file")?;
    std::fs::rename(&tmp, path).context("rename journal tmp file")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_empty_when_file_missing() {
        let journal = Journal::load("/tmp/okx-swap-agent-test-journal-missing.json");
        assert_eq!(journal.len(), 0);
        assert!(journal.recent_summaries().is_empty());
    }

    #[tokio::test]
    async fn append_caps_at_ten_entries() {
        let path = "/tmp/okx-swap-agent-test-journal-cap.json";
        let _ = std::fs::remove_file(path);
        let journal = Journal::load(path);
        for i in 0..15 {
            journal.append(format!("entry-{i}"), "2026-01-01 00:00:00".to_string());
        }
        // give the background writer a chance to drain the channel
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(journal.len(), MAX_ENTRIES);
        let summaries = journal.recent_summaries();
        assert_eq!(summaries[0], "entry-14");
        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn reloads_persisted_entries() {
        let path = "/tmp/okx-swap-agent-test-journal-reload.json";
        let _ = std::fs::remove_file(path);
        {
            let journal = Journal::load(path);
            journal.append("first".to_string(), "2026-01-01 00:00:00".to_string());
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        let reloaded = Journal::load(path);
        assert_eq!(reloaded.recent_summaries(), vec!["first".to_string()]);
        let _ = std::fs::remove_file(path);
    }
}
