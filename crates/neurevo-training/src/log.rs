//! Human-readable experiment log (`_log.txt`).
//!
//! Log text is appended as fragments so a single generation reads as one line
//! (`Generation 3: Creating - Evaluating: Best Fitness = 12.50 - Saving`).
//! Every fragment is flushed immediately; a crash leaves the log showing how
//! far the last generation got.

use std::{
    fs::{File, OpenOptions},
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};

use crate::persistence::PersistenceError;

const RULE: &str = "========================================";
const TIMESTAMP_FORMAT: &str = "%m/%d/%Y %H:%M";

#[derive(Debug)]
pub struct ExperimentLog {
    path: PathBuf,
    file: File,
    echo: bool,
}

impl ExperimentLog {
    /// Creates a new log file, failing if one already exists.
    pub fn create(path: &Path, echo: bool) -> Result<Self, PersistenceError> {
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| io_error(path, source))?;
        Ok(Self {
            path: path.to_owned(),
            file,
            echo,
        })
    }

    /// Opens an existing log file for appending, creating it if missing.
    pub fn open_append(path: &Path, echo: bool) -> Result<Self, PersistenceError> {
        let file = OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .map_err(|source| io_error(path, source))?;
        Ok(Self {
            path: path.to_owned(),
            file,
            echo,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `text`, mirroring it to stderr when echo is enabled.
    pub fn write(&mut self, text: &str) -> Result<(), PersistenceError> {
        self.write_inner(text, self.echo)
    }

    /// Appends `text` and always mirrors it to stderr.
    pub fn write_echoed(&mut self, text: &str) -> Result<(), PersistenceError> {
        self.write_inner(text, true)
    }

    fn write_inner(&mut self, text: &str, echo: bool) -> Result<(), PersistenceError> {
        if echo {
            eprint!("{text}");
        }
        self.file
            .write_all(text.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|source| io_error(&self.path, source))
    }

    pub fn started(&mut self, now: DateTime<Local>) -> Result<(), PersistenceError> {
        self.write(&format!(
            "{RULE}\n=     STARTED ON {}\n{RULE}\n",
            now.format(TIMESTAMP_FORMAT)
        ))
    }

    pub fn continued(&mut self, now: DateTime<Local>) -> Result<(), PersistenceError> {
        self.write(&format!(
            "\n{RULE}\n=     CONTINUED ON {}\n{RULE}\n",
            now.format(TIMESTAMP_FORMAT)
        ))
    }

    pub fn merged(&mut self, now: DateTime<Local>, parents: &[PathBuf]) -> Result<(), PersistenceError> {
        let mut banner = format!(
            "{RULE}\n=     STARTED ON {}\n=\n=     MERGED FROM:\n",
            now.format(TIMESTAMP_FORMAT)
        );
        for parent in parents {
            banner.push_str(&format!("=     {}\n", parent.display()));
        }
        banner.push_str(RULE);
        banner.push('\n');
        self.write(&banner)
    }
}

fn io_error(path: &Path, source: io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.to_owned(),
        source,
    }
}
