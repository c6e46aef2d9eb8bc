//! Output sink for enhanced audio
//!
//! A sink may target a file, an in-memory buffer, or both. The encoded bytes
//! are produced in full before anything is written. The file is written to a
//! sibling temporary, flushed to disk and renamed into place. The buffer is
//! cleared when a write starts and only filled once every requested target
//! succeeded.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{EnhanceError, EnhanceResult};

/// Destination(s) for one encoded waveform
#[derive(Debug, Default)]
pub struct OutputSink {
    path: Option<PathBuf>,
    want_buffer: bool,
    buffer: Option<Vec<u8>>,
}

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the WAV file to `path`
    pub fn to_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Keep the WAV bytes in memory
    pub fn to_buffer(mut self) -> Self {
        self.want_buffer = true;
        self
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn has_target(&self) -> bool {
        self.path.is_some() || self.want_buffer
    }

    /// Bytes written by the last successful [`OutputSink::write`]
    pub fn buffer(&self) -> Option<&[u8]> {
        self.buffer.as_deref()
    }

    pub fn take_bytes(&mut self) -> Option<Vec<u8>> {
        self.buffer.take()
    }

    /// Deliver `data` to every target, or to none
    pub fn write(&mut self, data: &[u8]) -> EnhanceResult<()> {
        if !self.has_target() {
            return Err(EnhanceError::Config("output sink has no target".into()));
        }
        self.buffer = None;

        if let Some(path) = &self.path {
            write_atomic(path, data)?;
            log::debug!("Wrote {} bytes to {}", data.len(), path.display());
        }

        if self.want_buffer {
            self.buffer = Some(data.to_vec());
        }

        Ok(())
    }
}

/// Write to `<name>.tmp` next to `path`, then rename over it
fn write_atomic(path: &Path, data: &[u8]) -> EnhanceResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| EnhanceError::Config(format!("invalid output path: {}", path.display())))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    if let Err(e) = write_synced(&tmp_path, data) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }

    Ok(())
}

fn write_synced(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut file = std::fs::File::create(path)?;
    file.write_all(data)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_and_buffer_both_receive_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/enhanced.wav");

        let mut sink = OutputSink::new().to_path(&path).to_buffer();
        sink.write(b"RIFFdata").unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"RIFFdata");
        assert_eq!(sink.buffer(), Some(&b"RIFFdata"[..]));
        assert_eq!(sink.take_bytes().unwrap(), b"RIFFdata");
        assert!(sink.buffer().is_none());
        assert!(!dir.path().join("out/enhanced.wav.tmp").exists());
    }

    #[test]
    fn test_no_target_rejected() {
        let mut sink = OutputSink::new();
        assert!(sink.write(b"x").is_err());
    }

    #[test]
    fn test_failed_file_write_leaves_buffer_empty() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should go makes the rename fail
        let path = dir.path().join("taken");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("child"), b"x").unwrap();

        let mut sink = OutputSink::new().to_path(&path).to_buffer();
        assert!(sink.write(b"RIFF").is_err());
        assert!(sink.buffer().is_none());
        assert!(!dir.path().join("taken.tmp").exists());
    }

    #[test]
    fn test_failed_rewrite_drops_previous_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enhanced.wav");

        let mut sink = OutputSink::new().to_path(&path).to_buffer();
        sink.write(b"first").unwrap();
        assert_eq!(sink.buffer(), Some(&b"first"[..]));

        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("child"), b"x").unwrap();

        assert!(sink.write(b"second").is_err());
        assert!(sink.buffer().is_none());
    }

    #[test]
    fn test_large_write_lands_complete() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enhanced.wav");
        let data: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();

        let mut sink = OutputSink::new().to_path(&path);
        sink.write(&data).unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), data);
        assert!(!dir.path().join("enhanced.wav.tmp").exists());
    }

    #[test]
    fn test_overwrite_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("enhanced.wav");
        std::fs::write(&path, b"old").unwrap();

        let mut sink = OutputSink::new().to_path(&path);
        sink.write(b"new").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }
}
