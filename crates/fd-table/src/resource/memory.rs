// Author: Lukas Bower
// Purpose: In-memory resource returned for the `default` type tag.

use std::sync::Mutex;

use super::{lock, Resource, ResourceContext, ResourceError, DEFAULT_TYPE_TAG};

#[derive(Debug, Default)]
struct MemoryState {
    value: Option<String>,
    closed: bool,
}

/// Volatile resource; reads yield its own name until the first write.
#[derive(Debug)]
pub struct MemoryResource {
    name: String,
    state: Mutex<MemoryState>,
}

impl MemoryResource {
    /// Construct the resource for a new table entry.
    pub fn new(ctx: ResourceContext<'_>) -> Self {
        Self {
            name: ctx.name.to_owned(),
            state: Mutex::new(MemoryState::default()),
        }
    }
}

impl Resource for MemoryResource {
    fn type_tag(&self) -> &'static str {
        DEFAULT_TYPE_TAG
    }

    fn read(&self) -> Result<String, ResourceError> {
        let state = lock(&self.state);
        if state.closed {
            return Err(ResourceError::Closed(self.name.clone()));
        }
        Ok(state.value.clone().unwrap_or_else(|| self.name.clone()))
    }

    fn write(&self, value: &str) -> Result<(), ResourceError> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(ResourceError::Closed(self.name.clone()));
        }
        state.value = Some(value.to_owned());
        Ok(())
    }

    fn close(&self) {
        let mut state = lock(&self.state);
        state.closed = true;
        state.value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource(name: &str) -> MemoryResource {
        MemoryResource::new(ResourceContext { name, fd: 0 })
    }

    #[test]
    fn reads_name_until_written() {
        let res = resource("b");
        assert_eq!(res.read().unwrap(), "b");
        res.write("hello").unwrap();
        assert_eq!(res.read().unwrap(), "hello");
        res.write("again").unwrap();
        assert_eq!(res.read().unwrap(), "again");
    }

    #[test]
    fn closed_resource_rejects_io() {
        let res = resource("gone");
        res.close();
        assert!(matches!(res.read(), Err(ResourceError::Closed(name)) if name == "gone"));
        assert!(res.write("x").is_err());
    }
}
