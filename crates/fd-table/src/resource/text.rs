// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: File-backed text resource returned for the `text` type tag.
// Author: Lukas Bower

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};

use super::{lock, Resource, ResourceContext, ResourceError, TEXT_TYPE_TAG};

/// Text resource stored in a single flat file under a root directory.
///
/// The file is created (or truncated) when the entry is opened, writes are
/// appended, and reads return the complete contents.
#[derive(Debug)]
pub struct TextResource {
    name: String,
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl TextResource {
    /// Create or truncate the backing file for `ctx.name` under `root`.
    pub fn open(root: &Path, ctx: ResourceContext<'_>) -> Result<Self, ResourceError> {
        validate_name(ctx.name)?;
        let path = root.join(ctx.name);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        debug!("text resource fd {} backed by {}", ctx.fd, path.display());
        Ok(Self {
            name: ctx.name.to_owned(),
            path,
            file: Mutex::new(Some(file)),
        })
    }

    /// Location of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Resource for TextResource {
    fn type_tag(&self) -> &'static str {
        TEXT_TYPE_TAG
    }

    fn read(&self) -> Result<String, ResourceError> {
        let mut guard = lock(&self.file);
        let file = guard
            .as_mut()
            .ok_or_else(|| ResourceError::Closed(self.name.clone()))?;
        file.seek(SeekFrom::Start(0))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        Ok(contents)
    }

    fn write(&self, value: &str) -> Result<(), ResourceError> {
        let mut guard = lock(&self.file);
        let file = guard
            .as_mut()
            .ok_or_else(|| ResourceError::Closed(self.name.clone()))?;
        file.seek(SeekFrom::End(0))?;
        file.write_all(value.as_bytes())?;
        Ok(())
    }

    fn close(&self) {
        let Some(mut file) = lock(&self.file).take() else {
            return;
        };
        if let Err(err) = file.flush().and_then(|()| file.sync_all()) {
            warn!("failed to sync {}: {err}", self.path.display());
        }
    }
}

fn validate_name(name: &str) -> Result<(), ResourceError> {
    let reason = if name.is_empty() {
        Some("name is empty")
    } else if name == "." || name == ".." {
        Some("name refers to a directory")
    } else if name.contains(['/', '\\']) {
        Some("path separators are not supported")
    } else if name.contains('\0') {
        Some("name contains NUL")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(ResourceError::InvalidName {
            name: name.to_owned(),
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(name: &str) -> ResourceContext<'_> {
        ResourceContext { name, fd: 3 }
    }

    #[test]
    fn appends_and_reads_back() {
        let dir = TempDir::new().unwrap();
        let res = TextResource::open(dir.path(), ctx("out.txt")).unwrap();
        assert_eq!(res.read().unwrap(), "");
        res.write("Hello, World!").unwrap();
        assert_eq!(res.read().unwrap(), "Hello, World!");
        res.write("next line?").unwrap();
        assert_eq!(res.read().unwrap(), "Hello, World!next line?");
        res.close();
        let on_disk = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(on_disk, "Hello, World!next line?");
    }

    #[test]
    fn reopening_truncates() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("log"), "stale").unwrap();
        let res = TextResource::open(dir.path(), ctx("log")).unwrap();
        assert_eq!(res.read().unwrap(), "");
    }

    #[test]
    fn rejects_hierarchical_names() {
        let dir = TempDir::new().unwrap();
        for name in ["a/b", "..", "c\\d", "nul\0"] {
            let err = TextResource::open(dir.path(), ctx(name)).unwrap_err();
            assert!(matches!(err, ResourceError::InvalidName { .. }), "{name}");
        }
    }

    #[test]
    fn close_is_final() {
        let dir = TempDir::new().unwrap();
        let res = TextResource::open(dir.path(), ctx("done")).unwrap();
        res.close();
        res.close();
        assert!(matches!(res.read(), Err(ResourceError::Closed(_))));
        assert!(matches!(res.write("x"), Err(ResourceError::Closed(_))));
    }
}
