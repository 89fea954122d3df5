//! Per-note transcript persistence
//!
//! Appends snippets and final transcripts to `<noteId>.snippet` and
//! `<noteId>.transcription`, each entry under a timestamp header. This is a
//! best-effort side channel, not a source of truth; failures are logged and
//! never fail the session.

use chrono::Utc;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct TranscriptStore {
    dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn append_snippet(&self, note_id: &str, text: &str) -> io::Result<()> {
        self.append(&self.snippet_path(note_id), text)
    }

    pub fn append_transcript(&self, note_id: &str, text: &str) -> io::Result<()> {
        self.append(&self.transcript_path(note_id), text)
    }

    pub fn snippet_path(&self, note_id: &str) -> PathBuf {
        self.dir.join(format!("{note_id}.snippet"))
    }

    pub fn transcript_path(&self, note_id: &str) -> PathBuf {
        self.dir.join(format!("{note_id}.transcription"))
    }

    fn append(&self, path: &Path, text: &str) -> io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "[{}]", Utc::now().to_rfc3339())?;
        writeln!(file, "{text}")?;
        writeln!(file)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_accumulate_with_timestamp_headers() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path());

        store.append_snippet("note-1", "hello").unwrap();
        store.append_snippet("note-1", "hello world").unwrap();

        let contents = std::fs::read_to_string(store.snippet_path("note-1")).unwrap();
        assert_eq!(contents.matches("hello").count(), 3);
        // One header per append.
        assert_eq!(contents.matches('[').count(), 2);
    }

    #[test]
    fn snippet_and_transcript_files_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let store = TranscriptStore::new(dir.path());

        store.append_snippet("note-2", "interim").unwrap();
        store.append_transcript("note-2", "final text").unwrap();

        assert!(store.snippet_path("note-2").exists());
        assert!(store.transcript_path("note-2").exists());
        let transcript = std::fs::read_to_string(store.transcript_path("note-2")).unwrap();
        assert!(transcript.contains("final text"));
        assert!(!transcript.contains("interim"));
    }

    #[test]
    fn directory_is_created_on_first_append() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("notes");
        let store = TranscriptStore::new(&nested);
        store.append_transcript("n", "text").unwrap();
        assert!(nested.exists());
    }
}
