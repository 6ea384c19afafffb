//! Guarded output files and per-command log files.
//!
//! Every command writes its outputs through an [`OutputGuard`]: the
//! file is deleted again unless the command commits it, so a fatal
//! error never leaves partial outputs behind. Commands also refuse to
//! overwrite existing files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::warn;

// ---------------------------------------------------------------------------
// OutputGuard
// ---------------------------------------------------------------------------

/// A buffered output file that is deleted on drop unless committed.
pub struct OutputGuard {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    committed: bool,
}

impl OutputGuard {
    /// Create the output file. Refuses to clobber an existing file.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            bail!("output file already exists: {}", path.display());
        }
        let file = File::create(path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            committed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying writer.
    pub fn writer(&mut self) -> &mut BufWriter<File> {
        self.writer.as_mut().expect("writer taken")
    }

    /// Take the writer out to hand to an encoder; the guard still
    /// deletes the file on drop unless committed.
    pub fn take_writer(&mut self) -> BufWriter<File> {
        self.writer.take().expect("writer already taken")
    }

    /// Flush and keep the file.
    pub fn commit(mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        self.committed = true;
        Ok(())
    }

    /// Keep the file without touching a taken writer.
    pub fn commit_external(mut self) {
        self.committed = true;
    }
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if !self.committed {
            drop(self.writer.take());
            if self.path.exists() {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    warn!("cannot delete partial output {}: {e}", self.path.display());
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Log files
// ---------------------------------------------------------------------------

/// Write `<output>.log` next to an output file: the one-line summary
/// plus a JSON stats blob.
pub fn write_log(output: &Path, summary: &str, stats: &serde_json::Value) -> Result<()> {
    let mut log_path = output.as_os_str().to_owned();
    log_path.push(".log");
    let log_path = PathBuf::from(log_path);
    let mut out = BufWriter::new(File::create(&log_path)?);
    writeln!(out, "{summary}")?;
    writeln!(out, "{}", serde_json::to_string_pretty(stats)?)?;
    out.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_committed_file_survives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let mut guard = OutputGuard::create(&path).unwrap();
        writeln!(guard.writer(), "hello").unwrap();
        guard.commit().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }

    #[test]
    fn test_uncommitted_file_is_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        {
            let mut guard = OutputGuard::create(&path).unwrap();
            writeln!(guard.writer(), "partial").unwrap();
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_refuses_to_clobber() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        std::fs::write(&path, "precious").unwrap();
        assert!(OutputGuard::create(&path).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "precious");
    }

    #[test]
    fn test_write_log() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("result.ctx");
        write_log(&out, "done", &serde_json::json!({"kmers": 42})).unwrap();
        let text = std::fs::read_to_string(dir.path().join("result.ctx.log")).unwrap();
        assert!(text.starts_with("done\n"));
        assert!(text.contains("\"kmers\": 42"));
    }
}
