//! Session transcript recorder.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::debug;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Ordered `(request, response)` transcript of a session.
///
/// Entries stay in memory until [`save`](Self::save) writes the whole
/// transcript as one pretty-printed JSON array.
#[derive(Debug)]
pub struct Recorder {
    path: PathBuf,
    entries: Vec<(String, Value)>,
}

impl Recorder {
    /// Create a recorder that saves to `path`, made absolute against the
    /// current directory.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            path: std::path::absolute(path)?,
            entries: Vec::new(),
        })
    }

    /// Append an entry.
    pub fn add<T: Serialize + ?Sized>(&mut self, request: &str, response: &T) -> Result<()> {
        let value = serde_json::to_value(response)?;
        self.entries.push((request.to_string(), value));
        Ok(())
    }

    /// Remove the transcript file. A missing file is not an error.
    pub fn erase(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write the transcript and return its path.
    pub fn save(&self) -> Result<PathBuf> {
        let mut writer = io::BufWriter::new(fs::File::create(&self.path)?);
        serde_json::to_writer_pretty(&mut writer, &self.entries)?;
        writer.flush()?;
        debug!(
            "recorder: saved {} entries to {}",
            self.entries.len(),
            self.path.display()
        );
        Ok(self.path.clone())
    }

    /// Recorded entries in order.
    pub fn entries(&self) -> &[(String, Value)] {
        &self.entries
    }

    /// Where the transcript is saved.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.log");
        let mut recorder = Recorder::new(&path).unwrap();

        recorder
            .add("uname -a", &Some(vec!["Linux buildroot".to_string()]))
            .unwrap();
        recorder.add("Iteration", "1: Sleep 600s").unwrap();
        assert_eq!(recorder.save().unwrap(), path);

        let saved: Vec<(String, Value)> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].0, "uname -a");
        assert_eq!(saved[0].1, serde_json::json!(["Linux buildroot"]));
        assert_eq!(saved[1].1, serde_json::json!("1: Sleep 600s"));
    }

    #[test]
    fn test_timeout_recorded_as_null() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder = Recorder::new(dir.path().join("t.json")).unwrap();
        recorder.add("sleep 100", &None::<Vec<String>>).unwrap();
        assert_eq!(recorder.entries()[0].1, Value::Null);
    }

    #[test]
    fn test_erase_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new(dir.path().join("absent.log")).unwrap();
        recorder.erase().unwrap();
    }

    #[test]
    fn test_relative_path_made_absolute() {
        let recorder = Recorder::new("transcript.json").unwrap();
        assert!(recorder.path().is_absolute());
    }
}
