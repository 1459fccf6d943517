// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Allocate, share, and recycle descriptors for named resources.
// Author: Lukas Bower

//! Descriptor table with name deduplication, explicit reference counts and
//! FIFO descriptor reuse.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use fd_wire::{ErrorKind, Fd};
use log::{debug, info, warn};
use thiserror::Error;

use crate::registry::ResourceRegistry;
use crate::resource::{Resource, ResourceContext, ResourceError};

/// Descriptor space size used when none is configured.
pub const DEFAULT_MAX_DESCRIPTORS: u32 = 128;

/// Errors surfaced by table operations.
#[derive(Debug, Error)]
pub enum TableError {
    /// Names are deduplication keys and may not be empty.
    #[error("resource name must not be empty")]
    EmptyName,
    /// No entry exists for the descriptor.
    #[error("fd {0} is not open")]
    NotFound(Fd),
    /// The type tag is not registered.
    #[error("unknown resource type {0:?}")]
    UnknownType(String),
    /// Every descriptor in `[0, max)` is in use.
    #[error("descriptor limit reached: {max}")]
    Exhausted {
        /// Size of the descriptor space.
        max: u32,
    },
    /// The resource failed to construct or to serve a request.
    #[error(transparent)]
    Resource(#[from] ResourceError),
}

impl TableError {
    /// Wire category for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TableError::EmptyName => ErrorKind::InvalidArgument,
            TableError::NotFound(_) => ErrorKind::NotFound,
            TableError::UnknownType(_) => ErrorKind::UnknownType,
            TableError::Exhausted { .. } => ErrorKind::ResourceExhausted,
            TableError::Resource(ResourceError::InvalidName { .. }) => ErrorKind::InvalidArgument,
            TableError::Resource(ResourceError::Closed(_)) => ErrorKind::NotFound,
            TableError::Resource(ResourceError::Io(_)) => ErrorKind::ResourceFailure,
        }
    }
}

/// Descriptor plus the generation of the entry it was issued for.
///
/// Generations are unique per table, so a stale handle never matches an
/// entry that later reused the same descriptor value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle {
    /// Descriptor value.
    pub fd: Fd,
    /// Entry generation.
    pub generation: u64,
}

/// Result of dropping one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReport {
    /// Entry the reference belonged to.
    pub handle: Handle,
    /// References still outstanding; zero once the entry is released.
    pub remaining: u32,
}

impl CloseReport {
    /// True when this close destroyed the entry.
    pub fn released(&self) -> bool {
        self.remaining == 0
    }
}

/// Snapshot of one open entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySummary {
    /// Descriptor value.
    pub fd: Fd,
    /// Name the entry was opened under.
    pub name: String,
    /// Registry tag of the resource.
    pub type_tag: &'static str,
    /// Outstanding opens.
    pub refcount: u32,
}

struct Entry {
    name: String,
    refcount: u32,
    generation: u64,
    resource: Arc<dyn Resource>,
}

#[derive(Default)]
struct TableState {
    entries: BTreeMap<Fd, Entry>,
    reusable: VecDeque<Fd>,
    next_fresh: Fd,
    next_generation: u64,
}

impl TableState {
    fn candidate_fd(&self, max: u32) -> Option<Fd> {
        self.reusable
            .front()
            .copied()
            .or_else(|| (self.next_fresh < max).then_some(self.next_fresh))
    }

    fn commit_fd(&mut self, fd: Fd) {
        if self.reusable.front() == Some(&fd) {
            self.reusable.pop_front();
        } else {
            self.next_fresh += 1;
        }
    }

    /// Drop one reference. The resource of a destroyed entry is handed back
    /// so its close hook can run after the lock is released.
    fn drop_reference(
        &mut self,
        fd: Fd,
        generation: Option<u64>,
    ) -> Result<(CloseReport, Option<Arc<dyn Resource>>), TableError> {
        let entry = match self.entries.get_mut(&fd) {
            Some(entry) if generation.map_or(true, |g| g == entry.generation) => entry,
            _ => return Err(TableError::NotFound(fd)),
        };
        entry.refcount -= 1;
        let handle = Handle {
            fd,
            generation: entry.generation,
        };
        let remaining = entry.refcount;
        let mut released = None;
        if remaining == 0 {
            if let Some(entry) = self.entries.remove(&fd) {
                debug!("released fd {fd} ({})", entry.name);
                released = Some(entry.resource);
            }
            self.reusable.push_back(fd);
        }
        Ok((CloseReport { handle, remaining }, released))
    }
}

/// Process-wide descriptor table.
///
/// `open` and `close` mutate the table under a single lock. `read` and
/// `write` only hold it long enough to clone the resource handle.
///
/// Resource constructors run under the lock, so concurrent opens of one name
/// never build two resources; a slow constructor (the `text` file create)
/// delays other opens and closes. Close hooks run after the entry has been
/// removed and the lock released.
pub struct HandleTable {
    registry: ResourceRegistry,
    max_descriptors: u32,
    state: Mutex<TableState>,
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("registry", &self.registry)
            .field("max_descriptors", &self.max_descriptors)
            .field("open", &self.len())
            .finish()
    }
}

impl HandleTable {
    /// Create a table over `[0, max_descriptors)` backed by `registry`.
    pub fn new(registry: ResourceRegistry, max_descriptors: u32) -> Self {
        Self {
            registry,
            max_descriptors,
            state: Mutex::new(TableState::default()),
        }
    }

    /// In-memory table with [`DEFAULT_MAX_DESCRIPTORS`] slots.
    pub fn with_defaults() -> Self {
        Self::new(ResourceRegistry::in_memory(), DEFAULT_MAX_DESCRIPTORS)
    }

    fn lock_state(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open `name` with the resource registered under `type_tag`.
    pub fn open(&self, name: &str, type_tag: &str) -> Result<Fd, TableError> {
        self.open_handle(name, type_tag).map(|handle| handle.fd)
    }

    /// Open `name`, returning the descriptor together with its generation.
    ///
    /// An already-open name is shared regardless of the requested tag.
    pub fn open_handle(&self, name: &str, type_tag: &str) -> Result<Handle, TableError> {
        if name.is_empty() {
            return Err(TableError::EmptyName);
        }
        let constructor = self
            .registry
            .resolve(type_tag)
            .ok_or_else(|| TableError::UnknownType(type_tag.to_owned()))?;

        let mut state = self.lock_state();
        if let Some((fd, entry)) = state
            .entries
            .iter_mut()
            .find(|(_, entry)| entry.name == name)
        {
            entry.refcount += 1;
            if entry.resource.type_tag() != type_tag {
                debug!(
                    "fd {fd} ({name}) shared as {} despite requested type {type_tag}",
                    entry.resource.type_tag()
                );
            }
            return Ok(Handle {
                fd: *fd,
                generation: entry.generation,
            });
        }

        let Some(fd) = state.candidate_fd(self.max_descriptors) else {
            warn!(
                "descriptor limit reached ({}) while opening {name}",
                self.max_descriptors
            );
            return Err(TableError::Exhausted {
                max: self.max_descriptors,
            });
        };
        let resource = constructor(ResourceContext { name, fd })?;
        state.commit_fd(fd);
        let generation = state.next_generation;
        state.next_generation += 1;
        state.entries.insert(
            fd,
            Entry {
                name: name.to_owned(),
                refcount: 1,
                generation,
                resource,
            },
        );
        info!("opened fd {fd} for {name} ({type_tag})");
        Ok(Handle { fd, generation })
    }

    /// Drop one reference to `fd`, releasing the entry at zero.
    ///
    /// Closing a descriptor that is not open fails with
    /// [`TableError::NotFound`] and leaves the table untouched.
    pub fn close(&self, fd: Fd) -> Result<CloseReport, TableError> {
        let (report, released) = self.lock_state().drop_reference(fd, None)?;
        Self::run_close_hook(released);
        Ok(report)
    }

    /// Drop one reference held through `handle`.
    ///
    /// Fails with [`TableError::NotFound`] if `handle.fd` is closed or now
    /// belongs to a newer entry.
    pub fn release(&self, handle: Handle) -> Result<CloseReport, TableError> {
        let (report, released) = self
            .lock_state()
            .drop_reference(handle.fd, Some(handle.generation))?;
        Self::run_close_hook(released);
        Ok(report)
    }

    fn run_close_hook(released: Option<Arc<dyn Resource>>) {
        if let Some(resource) = released {
            resource.close();
        }
    }

    fn resource(&self, fd: Fd) -> Result<Arc<dyn Resource>, TableError> {
        self.lock_state()
            .entries
            .get(&fd)
            .map(|entry| Arc::clone(&entry.resource))
            .ok_or(TableError::NotFound(fd))
    }

    /// Read the resource behind `fd`.
    pub fn read(&self, fd: Fd) -> Result<String, TableError> {
        Ok(self.resource(fd)?.read()?)
    }

    /// Write `value` to the resource behind `fd`.
    pub fn write(&self, fd: Fd, value: &str) -> Result<(), TableError> {
        Ok(self.resource(fd)?.write(value)?)
    }

    /// Outstanding opens of `fd`, if it is open.
    pub fn refcount(&self, fd: Fd) -> Option<u32> {
        self.lock_state().entries.get(&fd).map(|entry| entry.refcount)
    }

    /// Number of open entries.
    pub fn len(&self) -> usize {
        self.lock_state().entries.len()
    }

    /// True when no entry is open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the descriptor space.
    pub fn max_descriptors(&self) -> u32 {
        self.max_descriptors
    }

    /// Registry backing this table.
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Snapshot of every open entry, ordered by descriptor.
    pub fn entries(&self) -> Vec<EntrySummary> {
        self.lock_state()
            .entries
            .iter()
            .map(|(fd, entry)| EntrySummary {
                fd: *fd,
                name: entry.name.clone(),
                type_tag: entry.resource.type_tag(),
                refcount: entry.refcount,
            })
            .collect()
    }
}
