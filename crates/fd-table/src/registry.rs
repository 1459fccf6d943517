// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Closed mapping from resource type tags to constructors.
// Author: Lukas Bower

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::resource::{
    MemoryResource, Resource, ResourceContext, ResourceError, TextResource, DEFAULT_TYPE_TAG,
    TEXT_TYPE_TAG,
};

/// Constructor stored in the registry.
pub type Constructor =
    Box<dyn Fn(ResourceContext<'_>) -> Result<Arc<dyn Resource>, ResourceError> + Send + Sync>;

/// Fixed set of resource constructors, populated once at startup.
///
/// There is no fallback loader: a tag that was not registered simply does
/// not resolve.
pub struct ResourceRegistry {
    constructors: BTreeMap<String, Constructor>,
}

impl ResourceRegistry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Registry with the built-in `default` and `text` resources.
    pub fn builtin(text_root: impl Into<PathBuf>) -> Self {
        let text_root = text_root.into();
        Self::builder()
            .register(DEFAULT_TYPE_TAG, |ctx| Ok(Arc::new(MemoryResource::new(ctx))))
            .register(TEXT_TYPE_TAG, move |ctx| {
                Ok(Arc::new(TextResource::open(&text_root, ctx)?))
            })
            .build()
    }

    /// Registry containing only the in-memory `default` resource.
    pub fn in_memory() -> Self {
        Self::builder()
            .register(DEFAULT_TYPE_TAG, |ctx| Ok(Arc::new(MemoryResource::new(ctx))))
            .build()
    }

    /// Look up the constructor for `tag`.
    pub fn resolve(&self, tag: &str) -> Option<&Constructor> {
        self.constructors.get(tag)
    }

    /// True if `tag` is registered.
    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    /// Registered tags in sorted order.
    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("tags", &self.tags().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder used while the registry is still mutable.
#[derive(Default)]
pub struct RegistryBuilder {
    constructors: BTreeMap<String, Constructor>,
}

impl RegistryBuilder {
    /// Register (or replace) the constructor for `tag`.
    #[must_use]
    pub fn register<F>(mut self, tag: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(ResourceContext<'_>) -> Result<Arc<dyn Resource>, ResourceError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors.insert(tag.into(), Box::new(constructor));
        self
    }

    /// Freeze the registry.
    pub fn build(self) -> ResourceRegistry {
        ResourceRegistry {
            constructors: self.constructors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_tags_resolve() {
        let registry = ResourceRegistry::builtin(std::env::temp_dir());
        assert_eq!(
            registry.tags().collect::<Vec<_>>(),
            vec![DEFAULT_TYPE_TAG, TEXT_TYPE_TAG]
        );
        assert!(registry.resolve("default").is_some());
        assert!(registry.resolve("TextFile").is_none());
        assert!(registry.resolve("filetypes.File").is_none());
    }

    #[test]
    fn constructor_receives_context() {
        let registry = ResourceRegistry::in_memory();
        let ctor = registry.resolve(DEFAULT_TYPE_TAG).unwrap();
        let resource = ctor(ResourceContext { name: "b", fd: 5 }).unwrap();
        assert_eq!(resource.type_tag(), DEFAULT_TYPE_TAG);
        assert_eq!(resource.read().unwrap(), "b");
    }
}
