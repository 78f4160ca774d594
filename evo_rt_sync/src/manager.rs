//! Segment ownership and descriptor export.
//!
//! The [`SharedMemoryManager`] of the process that creates segments keeps one
//! owning descriptor per name. Peers receive a [`SegmentFdMap`] (typically by
//! passing the descriptors over a Unix domain socket) and attach by name.

use crate::error::{ShmError, ShmResult};
use crate::segment::{SegmentRole, SegmentUsage, ShmPayload, ShmSegment, probe_header};
use std::collections::HashMap;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::Arc;
use tracing::{debug, info};

/// Name to descriptor map used to attach to segments created elsewhere.
///
/// Cloning shares the descriptors; they are closed when the last map holding
/// them is dropped.
#[derive(Debug, Clone, Default)]
pub struct SegmentFdMap {
    fds: HashMap<String, Arc<OwnedFd>>,
}

impl SegmentFdMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a received descriptor under `name`, replacing any previous one.
    pub fn insert(&mut self, name: impl Into<String>, fd: OwnedFd) {
        self.fds.insert(name.into(), Arc::new(fd));
    }

    /// Descriptor registered under `name`.
    pub fn get(&self, name: &str) -> Option<BorrowedFd<'_>> {
        self.fds.get(name).map(|fd| fd.as_fd())
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.fds.contains_key(name)
    }

    /// Registered names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fds.keys().map(String::as_str)
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.fds.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    /// Attach to the segment registered under `name`.
    pub fn attach<T: ShmPayload>(&self, name: &str, role: SegmentRole) -> ShmResult<ShmSegment<T>> {
        let fd = self.get(name).ok_or_else(|| ShmError::NotFound {
            name: name.to_string(),
        })?;
        ShmSegment::attach(name, fd, role)
    }
}

/// Creates segments and keeps their owning descriptors.
#[derive(Debug, Default)]
pub struct SharedMemoryManager {
    segments: HashMap<String, Arc<OwnedFd>>,
}

impl SharedMemoryManager {
    /// Manager without segments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a segment holding `T::initial()` and attach to it as writer.
    ///
    /// A name may be reused once nothing maps the previous segment any more;
    /// otherwise `AlreadyExists`.
    pub fn add_segment<T: ShmPayload>(&mut self, name: &str) -> ShmResult<ShmSegment<T>> {
        if let Some(existing) = self.segments.get(name) {
            let mapping = probe_header(existing.as_fd())?;
            if mapping.usage().in_use() {
                return Err(ShmError::AlreadyExists {
                    name: name.to_string(),
                });
            }
            mapping.retire();
            debug!(segment = name, "replacing unused segment");
        }
        let (segment, fd) = ShmSegment::<T>::create(name)?;
        self.segments.insert(name.to_string(), Arc::new(fd));
        info!(segment = name, kind = T::TYPE_TAG, "added shared memory segment");
        Ok(segment)
    }

    /// Attach to a segment owned by this manager.
    pub fn attach<T: ShmPayload>(&self, name: &str, role: SegmentRole) -> ShmResult<ShmSegment<T>> {
        let fd = self.segments.get(name).ok_or_else(|| ShmError::NotFound {
            name: name.to_string(),
        })?;
        ShmSegment::attach(name, fd.as_fd(), role)
    }

    /// Attachment counts of a segment.
    pub fn usage(&self, name: &str) -> ShmResult<SegmentUsage> {
        let fd = self.segments.get(name).ok_or_else(|| ShmError::NotFound {
            name: name.to_string(),
        })?;
        Ok(probe_header(fd.as_fd())?.usage())
    }

    /// Retire a segment and close the manager's descriptor. Existing
    /// mappings stay valid; new attachments are refused.
    pub fn remove_segment(&mut self, name: &str) -> ShmResult<()> {
        let fd = self.segments.remove(name).ok_or_else(|| ShmError::NotFound {
            name: name.to_string(),
        })?;
        probe_header(fd.as_fd())?.retire();
        info!(segment = name, "retired shared memory segment");
        Ok(())
    }

    /// Names of all owned segments.
    pub fn segment_names(&self) -> impl Iterator<Item = &str> {
        self.segments.keys().map(String::as_str)
    }

    /// Export every owned descriptor for handing to peers.
    pub fn fd_map(&self) -> SegmentFdMap {
        SegmentFdMap {
            fds: self.segments.clone(),
        }
    }
}
