//! Rejection and failure reporting
//!
//! Lines reported here are the operator-facing error stream, separate
//! from tracing diagnostics. They go to stdout, or to the file named by
//! `--log`, one line per event.

use crate::domain::error::SetupError;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub trait ErrorSink: Send {
    fn report(&mut self, line: &str);
}

impl<K: ErrorSink + ?Sized> ErrorSink for Box<K> {
    fn report(&mut self, line: &str) {
        (**self).report(line);
    }
}

/// Collects lines in memory
impl ErrorSink for Vec<String> {
    fn report(&mut self, line: &str) {
        self.push(line.to_string());
    }
}

/// Prints each line to stdout
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ErrorSink for ConsoleSink {
    fn report(&mut self, line: &str) {
        println!("{line}");
    }
}

/// Appends each line to a file, flushing after every write
pub struct FileSink {
    path: PathBuf,
    file: File,
}

impl FileSink {
    pub fn open(path: &Path) -> io::Result<Self> {
        // Create parent directories if they don't exist
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!(path = %path.display(), "rejection_log_opened");
        Ok(Self { path: path.to_path_buf(), file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.file, "{line}")?;
        self.file.flush()
    }
}

impl ErrorSink for FileSink {
    fn report(&mut self, line: &str) {
        if let Err(e) = self.append_line(line) {
            error!(path = %self.path.display(), error = %e, "rejection_log_write_failed");
        }
    }
}

/// Build the sink selected by `--log`; no path means the console
pub fn open_sink(log: Option<&Path>) -> Result<Box<dyn ErrorSink>, SetupError> {
    match log {
        Some(path) => {
            let sink = FileSink::open(path)
                .map_err(|source| SetupError::Sink { path: path.display().to_string(), source })?;
            Ok(Box::new(sink))
        }
        None => Ok(Box::new(ConsoleSink)),
    }
}

/// Empty the rejection log, creating it if missing
pub fn truncate_log(path: &Path) -> io::Result<()> {
    OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
    Ok(())
}
