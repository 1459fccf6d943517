// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Expose the reference-counted handle table and its resource plugins.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Reference-counted descriptor table.
//!
//! Callers open named resources and receive small integer descriptors from a
//! bounded space. Opening a name that is already open shares the existing
//! entry and bumps its reference count; the entry (and its resource) is torn
//! down once every open has been matched by a close. Released descriptors are
//! handed out again in FIFO order before any never-issued value.

mod registry;
pub mod resource;
mod table;

pub use fd_wire::Fd;
pub use registry::{Constructor, RegistryBuilder, ResourceRegistry};
pub use resource::{Resource, ResourceContext, ResourceError, DEFAULT_TYPE_TAG, TEXT_TYPE_TAG};
pub use table::{
    CloseReport, EntrySummary, Handle, HandleTable, TableError, DEFAULT_MAX_DESCRIPTORS,
};
