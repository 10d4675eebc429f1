//! File-backed credential table.
//!
//! Records are stored one per line as `(username, password)`. The table is
//! append-only: records are never rewritten, removed or compacted.
//!
//! Fields are written verbatim, so only values without whitespace or the
//! delimiters `,` `(` `)` can be stored; [`is_storable`] tells them apart.
//!
//! The store itself does not enforce unique usernames; that is the job of
//! [`AuthService`](crate::auth::AuthService), which serializes registration.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Characters the line format uses as delimiters
const RESERVED: [char; 3] = [',', '(', ')'];

/// Whether `field` reads back unchanged once written to the table.
pub fn is_storable(field: &str) -> bool {
    !field.is_empty()
        && !field
            .chars()
            .any(|c| c.is_whitespace() || RESERVED.contains(&c))
}

/// A single (username, password) record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    /// Parse one stored line. Malformed lines yield `None`.
    fn parse_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let line = line.strip_prefix('(').unwrap_or(line);
        let line = line.strip_suffix(')').unwrap_or(line);

        let mut fields = line.split(',');
        let username = fields.next()?.trim();
        let password = fields.next()?.trim();

        Some(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }

    /// Canonical on-disk encoding, without line separator.
    fn encode(&self) -> String {
        format!("({}, {})", self.username, self.password)
    }
}

/// Credential table errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential table {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{field} cannot be stored: it is empty or contains whitespace, ',', '(' or ')'")]
    Unstorable { field: &'static str },
}

/// Durable credential table backed by a plain text file
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Open the table at `path`, creating an empty file if it does not exist.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if !path.exists() {
            File::create(&path).map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?;
            info!(path = %path.display(), "Created credential table");
        }
        Ok(Self { path })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored password for `username`, if any record matches exactly.
    pub fn lookup(&self, username: &str) -> Result<Option<String>, StoreError> {
        Ok(self.find(username)?.map(|record| record.password))
    }

    /// Whether any record carries `username`.
    pub fn exists(&self, username: &str) -> Result<bool, StoreError> {
        Ok(self.find(username)?.is_some())
    }

    /// Append a record. A separator is written first only if the table is
    /// already non-empty, so the file never starts with a blank line.
    ///
    /// Values that would not read back unchanged are refused with
    /// [`StoreError::Unstorable`] and nothing is written.
    pub fn append(&mut self, username: &str, password: &str) -> Result<(), StoreError> {
        for (field, value) in [("username", username), ("password", password)] {
            if !is_storable(value) {
                return Err(StoreError::Unstorable { field });
            }
        }

        let record = Credential {
            username: username.to_string(),
            password: password.to_string(),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;

        let len = file.metadata().map_err(|e| self.io_error(e))?.len();
        let prefix = if len > 0 { "\n" } else { "" };

        file.write_all(format!("{prefix}{}", record.encode()).as_bytes())
            .map_err(|e| self.io_error(e))?;
        file.flush().map_err(|e| self.io_error(e))?;

        debug!(username, "Appended credential record");
        Ok(())
    }

    /// All well-formed records in file order.
    pub fn records(&self) -> Result<Vec<Credential>, StoreError> {
        let mut records = Vec::new();
        self.scan(|record| {
            records.push(record);
            false
        })?;
        Ok(records)
    }

    /// First record whose username matches exactly.
    fn find(&self, username: &str) -> Result<Option<Credential>, StoreError> {
        let mut found = None;
        self.scan(|record| {
            if record.username == username {
                found = Some(record);
                true
            } else {
                false
            }
        })?;
        Ok(found)
    }

    /// Linear scan over parsed records. Stops early once `visit` returns true.
    fn scan<F>(&self, mut visit: F) -> Result<(), StoreError>
    where
        F: FnMut(Credential) -> bool,
    {
        let file = File::open(&self.path).map_err(|e| self.io_error(e))?;

        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| self.io_error(e))?;
            match Credential::parse_line(&line) {
                Some(record) => {
                    if visit(record) {
                        break;
                    }
                }
                None => trace!(line = %line, "Skipping malformed credential line"),
            }
        }
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
