//! Append-only registry of already processed post identifiers.
//!
//! The ledger file is plain UTF-8 text with one identifier per line. It is read
//! once when the extractor is built and only ever appended to afterwards;
//! previously written lines are never rewritten.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::{Result, StackpullError};

/// In-memory view of the ledger file.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
    entries: HashSet<String>,
}

impl Ledger {
    /// Loads the ledger at `path`.
    ///
    /// A missing file yields an empty ledger. Any other read failure is fatal.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => HashSet::new(),
            Err(source) => return Err(StackpullError::Ledger { path, source }),
        };

        debug!(path = %path.display(), entries = entries.len(), "Loaded ledger");
        Ok(Self { path, entries })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains(id)
    }

    /// Adds `id` in memory only. Returns true if it was not present yet.
    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        self.entries.insert(id.into())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Marks `ids` as processed and appends the new ones to the ledger file.
    ///
    /// Identifiers already present are neither duplicated in memory nor
    /// written again. Returns the number of lines appended.
    pub fn record<I, S>(&mut self, ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut fresh = Vec::new();
        for id in ids {
            let id = id.into();
            if !id.is_empty() && self.entries.insert(id.clone()) {
                fresh.push(id);
            }
        }

        append_new(&self.path, &fresh)?;
        Ok(fresh.len())
    }
}

/// Appends `ids` to the ledger file at `path`, one per line.
///
/// The file is created if needed. An empty slice writes nothing.
pub fn append_new(path: &Path, ids: &[String]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }

    let to_ledger_error = |source| StackpullError::Ledger { path: path.to_path_buf(), source };

    let file = OpenOptions::new().append(true).create(true).open(path).map_err(to_ledger_error)?;
    let mut writer = BufWriter::new(file);
    for id in ids {
        writeln!(writer, "{id}").map_err(to_ledger_error)?;
    }
    writer.flush().map_err(to_ledger_error)?;

    debug!(path = %path.display(), appended = ids.len(), "Appended to ledger");
    Ok(())
}
