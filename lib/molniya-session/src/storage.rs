// Copyright 2024 - developers of the `molniya` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Places a [`Session`] can be persisted to.
//!
//! The core only touches storage at well-defined checkpoints (startup
//! load, graceful shutdown, and after update-state advances), so the
//! interface is deliberately a plain load/save pair.
use crate::session::{ImportError, Session};
use snafu::{ResultExt, Snafu};
use std::fs;
use std::path::{Path, PathBuf};

/// Errors that can occur while loading or saving a session.
#[derive(Debug, Snafu)]
pub enum Error {
    /// Reading or writing the backing file failed.
    #[snafu(display("failed to access session file {}: {source}", path.display()))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The stored data could not be understood.
    #[snafu(display("failed to parse stored session: {source}"))]
    Parse { source: ImportError },
}

/// The trait session storages implement.
pub trait Storage {
    /// Load the previously-saved session, or `None` on first use.
    fn load(&mut self) -> Result<Option<Session>, Error>;

    /// Persist the session.
    fn save(&mut self, session: &Session) -> Result<(), Error>;
}

/// A storage that keeps the serialized session in memory. Useful for
/// tests and for callers that persist the bytes through other means.
#[derive(Default)]
pub struct MemoryStorage {
    data: Option<Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// The serialized session bytes, if any were saved.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }
}

impl Storage for MemoryStorage {
    fn load(&mut self) -> Result<Option<Session>, Error> {
        match &self.data {
            Some(data) => Ok(Some(Session::load(data).context(ParseSnafu)?)),
            None => Ok(None),
        }
    }

    fn save(&mut self, session: &Session) -> Result<(), Error> {
        self.data = Some(session.save());
        Ok(())
    }
}

/// A storage backed by a single binary file.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl Storage for FileStorage {
    fn load(&mut self) -> Result<Option<Session>, Error> {
        if !self.path.exists() {
            return Ok(None);
        }

        let data = fs::read(&self.path).context(IoSnafu {
            path: self.path.clone(),
        })?;
        Ok(Some(Session::load(&data).context(ParseSnafu)?))
    }

    fn save(&mut self, session: &Session) -> Result<(), Error> {
        fs::write(&self.path, session.save()).context(IoSnafu {
            path: self.path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_round_trip() {
        let mut storage = MemoryStorage::new();
        assert!(storage.load().unwrap().is_none());

        let mut session = Session::new();
        session.set_user(1, 2, false);
        storage.save(&session).unwrap();

        let reloaded = storage.load().unwrap().unwrap();
        assert_eq!(reloaded.user(), Some((1, 2, false)));
    }

    #[test]
    fn corrupt_data_is_a_parse_error() {
        let mut storage = MemoryStorage {
            data: Some(vec![1, 2, 3]),
        };
        assert!(matches!(storage.load(), Err(Error::Parse { .. })));
    }
}
