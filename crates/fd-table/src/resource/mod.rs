// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Define the resource capability implemented by every handle type.
// Author: Lukas Bower

//! Resource capability consumed by the handle table.
//!
//! A resource is constructed from `(name, fd)`, serves `read`/`write`, and has
//! its `close` hook invoked exactly once when the owning entry's reference
//! count reaches zero. The table does not hold its own lock across `read` and
//! `write`, so implementations serialise their internal state themselves.

use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use fd_wire::Fd;
use thiserror::Error;

mod memory;
mod text;

pub use memory::MemoryResource;
pub use text::TextResource;

/// Registry tag of the in-memory resource.
pub const DEFAULT_TYPE_TAG: &str = "default";

/// Registry tag of the file-backed text resource.
pub const TEXT_TYPE_TAG: &str = "text";

/// Constructor input for a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceContext<'a> {
    /// Name the entry was opened under.
    pub name: &'a str,
    /// Descriptor the entry will occupy.
    pub fd: Fd,
}

/// Capability every concrete handle type implements.
pub trait Resource: Send + Sync {
    /// Registry tag this resource was constructed for.
    fn type_tag(&self) -> &'static str;

    /// Return the current value.
    fn read(&self) -> Result<String, ResourceError>;

    /// Store a value.
    fn write(&self, value: &str) -> Result<(), ResourceError>;

    /// Release backing state; invoked exactly once by the table.
    fn close(&self);
}

/// Errors surfaced by resource implementations.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// Backing storage failed.
    #[error("resource i/o failed: {0}")]
    Io(#[from] io::Error),
    /// The resource refuses the requested name.
    #[error("invalid resource name {name:?}: {reason}")]
    InvalidName {
        /// Rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// The close hook already ran.
    #[error("resource {0:?} is closed")]
    Closed(String),
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
