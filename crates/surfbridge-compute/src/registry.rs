//! Per-environment cache of imported surface planes.
//!
//! Importing a texture plane is expensive and the compute runtime hands out a
//! new memory object every time, so each (surface, plane) is imported at most
//! once per environment. The access mode is fixed by the first import; a
//! later request with a different mode gets the cached object.

use std::collections::HashMap;

use surfbridge_core::{MemAccess, SharedSurfaceKey};
use tracing::{debug, warn};

use crate::backend::MemId;
use crate::ComputeResult;

/// A cached import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryEntry {
    pub mem: MemId,
    pub access: MemAccess,
}

#[derive(Debug, Default)]
pub struct SurfaceRegistry {
    entries: HashMap<SharedSurfaceKey, RegistryEntry>,
}

impl SurfaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &SharedSurfaceKey) -> Option<RegistryEntry> {
        self.entries.get(key).copied()
    }

    /// Cached memory object for `key`, or the result of `import`.
    ///
    /// A failed import leaves the registry unchanged.
    pub fn get_or_import<F>(
        &mut self,
        key: SharedSurfaceKey,
        access: MemAccess,
        import: F,
    ) -> ComputeResult<MemId>
    where
        F: FnOnce() -> ComputeResult<MemId>,
    {
        if let Some(entry) = self.entries.get(&key) {
            if entry.access != access {
                warn!(
                    surface = %key,
                    cached = ?entry.access,
                    requested = ?access,
                    "surface already imported with another access mode"
                );
            }
            return Ok(entry.mem);
        }
        let mem = import()?;
        debug!(surface = %key, ?access, "imported shared surface");
        self.entries.insert(key, RegistryEntry { mem, access });
        Ok(mem)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry, yielding the memory objects to release.
    pub fn drain(&mut self) -> Vec<MemId> {
        self.entries.drain().map(|(_, e)| e.mem).collect()
    }
}
