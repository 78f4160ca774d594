//! Typed shared memory segments.
//!
//! Layout of every segment:
//!
//! ```text
//! ┌──────────────────────────────┬───────────────────────────┐
//! │ SegmentHeader (192 B, al 64) │ payload T (al <= 64)      │
//! └──────────────────────────────┴───────────────────────────┘
//! ```
//!
//! Segments are anonymous `memfd` files. Other processes map them from a
//! descriptor received out of band; names exist only to look descriptors up
//! in a [`SegmentFdMap`](crate::manager::SegmentFdMap).
//!
//! The reader/writer counts in the header are maintained by hand because the
//! mapping is shared with processes that know nothing about Rust ownership.

use crate::error::{ShmError, ShmResult};
use crate::platform::memfd_create;
use bitflags::bitflags;
use evo_common::consts::{CACHE_LINE_SIZE, MAX_SEGMENT_NAME_LEN, SEGMENT_TYPE_TAG_LEN};
use evo_common::time::monotonic_ns;
use memmap2::{MmapMut, MmapOptions};
use static_assertions::{const_assert, const_assert_eq};
use std::fmt;
use std::fs::File;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::os::fd::{BorrowedFd, OwnedFd};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use tracing::{debug, warn};

/// Magic bytes at offset 0 of every segment.
pub const SEGMENT_MAGIC: [u8; 8] = *b"EVO_RTS\0";

/// Header layout version. Bump on any change to [`SegmentHeader`].
pub const SEGMENT_LAYOUT_VERSION: u32 = 1;

/// Size of the header, and offset of the payload.
pub const SEGMENT_HEADER_SIZE: usize = size_of::<SegmentHeader>();

bitflags! {
    /// State bits stored in [`SegmentHeader::flags`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        /// Payload has been constructed.
        const INITIALIZED = 1 << 0;
        /// Removed from its manager; no new attachments.
        const RETIRED = 1 << 1;
    }
}

/// Which count an attachment contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentRole {
    /// Counted in `reader_count`.
    Reader,
    /// Counted in `writer_count`.
    Writer,
}

/// Header at the start of every segment.
#[repr(C, align(64))]
pub struct SegmentHeader {
    magic: [u8; 8],
    version: u32,
    flags: AtomicU32,
    reader_count: AtomicU32,
    writer_count: AtomicU32,
    payload_size: u32,
    payload_align: u32,
    type_tag: [u8; SEGMENT_TYPE_TAG_LEN],
    _pad: [u8; 4],
    last_update_ns: AtomicI64,
    last_update_cycle: AtomicU64,
    update_counter: AtomicU64,
}

const_assert_eq!(size_of::<SegmentHeader>(), 192);
const_assert_eq!(align_of::<SegmentHeader>(), CACHE_LINE_SIZE);
const_assert!(SEGMENT_HEADER_SIZE % CACHE_LINE_SIZE == 0);

impl SegmentHeader {
    fn new<T: ShmPayload>() -> Self {
        let mut type_tag = [0u8; SEGMENT_TYPE_TAG_LEN];
        let tag = T::TYPE_TAG.as_bytes();
        let len = tag.len().min(SEGMENT_TYPE_TAG_LEN - 1);
        type_tag[..len].copy_from_slice(&tag[..len]);
        Self {
            magic: SEGMENT_MAGIC,
            version: SEGMENT_LAYOUT_VERSION,
            flags: AtomicU32::new(0),
            reader_count: AtomicU32::new(0),
            writer_count: AtomicU32::new(0),
            payload_size: size_of::<T>() as u32,
            payload_align: align_of::<T>() as u32,
            type_tag,
            _pad: [0; 4],
            last_update_ns: AtomicI64::new(monotonic_ns()),
            last_update_cycle: AtomicU64::new(0),
            update_counter: AtomicU64::new(0),
        }
    }

    fn validate<T: ShmPayload>(&self, name: &str) -> ShmResult<()> {
        if self.magic != SEGMENT_MAGIC {
            return Err(ShmError::InvalidMagic {
                name: name.to_string(),
            });
        }
        if self.version != SEGMENT_LAYOUT_VERSION {
            return Err(ShmError::VersionMismatch {
                name: name.to_string(),
                expected: SEGMENT_LAYOUT_VERSION,
                found: self.version,
            });
        }
        if self.flags().contains(SegmentFlags::RETIRED) {
            return Err(ShmError::Retired {
                name: name.to_string(),
            });
        }
        let expected_tag = &T::TYPE_TAG[..T::TYPE_TAG.len().min(SEGMENT_TYPE_TAG_LEN - 1)];
        if self.type_tag() != expected_tag
            || self.payload_size as usize != size_of::<T>()
            || self.payload_align as usize != align_of::<T>()
        {
            return Err(ShmError::TypeMismatch {
                name: name.to_string(),
                expected: T::TYPE_TAG,
                found: self.type_tag().to_string(),
            });
        }
        Ok(())
    }

    /// Type tag written by the creator.
    pub fn type_tag(&self) -> &str {
        let end = self
            .type_tag
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(SEGMENT_TYPE_TAG_LEN);
        std::str::from_utf8(&self.type_tag[..end]).unwrap_or("<invalid utf-8>")
    }

    /// Layout version written by the creator.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Current flag bits.
    pub fn flags(&self) -> SegmentFlags {
        SegmentFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    fn set_flags(&self, flags: SegmentFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Number of live reader attachments across all processes.
    pub fn reader_count(&self) -> u32 {
        self.reader_count.load(Ordering::Acquire)
    }

    /// Number of live writer attachments across all processes.
    pub fn writer_count(&self) -> u32 {
        self.writer_count.load(Ordering::Acquire)
    }

    /// Whether any process still maps the segment.
    pub fn in_use(&self) -> bool {
        self.reader_count() > 0 || self.writer_count() > 0
    }

    fn count(&self, role: SegmentRole) -> &AtomicU32 {
        match role {
            SegmentRole::Reader => &self.reader_count,
            SegmentRole::Writer => &self.writer_count,
        }
    }

    /// Stamp an update: monotonic time, cycle number, counter increment.
    pub fn touch(&self, cycle: u64) {
        self.last_update_ns.store(monotonic_ns(), Ordering::Release);
        self.last_update_cycle.store(cycle, Ordering::Release);
        self.update_counter.fetch_add(1, Ordering::AcqRel);
    }

    /// Monotonic timestamp of the last [`touch`](Self::touch).
    pub fn last_update_ns(&self) -> i64 {
        self.last_update_ns.load(Ordering::Acquire)
    }

    /// Cycle number of the last [`touch`](Self::touch).
    pub fn last_update_cycle(&self) -> u64 {
        self.last_update_cycle.load(Ordering::Acquire)
    }

    /// Number of [`touch`](Self::touch) calls.
    pub fn update_counter(&self) -> u64 {
        self.update_counter.load(Ordering::Acquire)
    }
}

/// Snapshot of a segment's attachment counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentUsage {
    /// Live readers.
    pub readers: u32,
    /// Live writers.
    pub writers: u32,
    /// Flag bits.
    pub flags: SegmentFlags,
}

impl SegmentUsage {
    /// Whether any attachment is live.
    pub fn in_use(&self) -> bool {
        self.readers > 0 || self.writers > 0
    }
}

/// Map only the header of the segment behind `fd`.
pub(crate) fn probe_header(fd: BorrowedFd<'_>) -> ShmResult<HeaderMapping> {
    let file = File::from(fd.try_clone_to_owned()?);
    let len = file.metadata()?.len() as usize;
    if len < SEGMENT_HEADER_SIZE {
        return Err(ShmError::InvalidSize {
            expected: SEGMENT_HEADER_SIZE,
            actual: len,
        });
    }
    // SAFETY: the file is a live memfd at least one header long; the header
    // is only accessed through atomics and immutable fields.
    let mmap = unsafe { MmapOptions::new().len(SEGMENT_HEADER_SIZE).map_mut(&file)? };
    Ok(HeaderMapping { mmap })
}

/// Header-only view used by the manager for usage checks and retirement.
pub(crate) struct HeaderMapping {
    mmap: MmapMut,
}

impl HeaderMapping {
    pub(crate) fn header(&self) -> &SegmentHeader {
        // SAFETY: the mapping is page aligned and at least one header long.
        unsafe { &*(self.mmap.as_ptr() as *const SegmentHeader) }
    }

    pub(crate) fn usage(&self) -> SegmentUsage {
        let header = self.header();
        SegmentUsage {
            readers: header.reader_count(),
            writers: header.writer_count(),
            flags: header.flags(),
        }
    }

    pub(crate) fn retire(&self) {
        self.header().set_flags(SegmentFlags::RETIRED);
    }
}

/// Plain data that may be placed in a shared memory segment.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, contain no pointers or references,
/// keep all mutable state in atomics (every process sees the same bytes
/// through a shared reference), and have an alignment of at most 64.
pub unsafe trait ShmPayload: Send + Sync + 'static {
    /// Identifies the payload type across processes. At most 99 bytes are
    /// stored.
    const TYPE_TAG: &'static str;

    /// Initial payload value written by the creator.
    fn initial() -> Self;
}

/// A mapped segment holding a `T`.
pub struct ShmSegment<T: ShmPayload> {
    name: String,
    role: SegmentRole,
    mmap: MmapMut,
    _payload: PhantomData<T>,
}

impl<T: ShmPayload> ShmSegment<T> {
    /// Header plus payload, in bytes.
    pub const fn total_size() -> usize {
        SEGMENT_HEADER_SIZE + size_of::<T>()
    }

    /// Create a fresh memfd-backed segment and attach to it as writer.
    ///
    /// Returns the mapping and the owning descriptor.
    pub fn create(name: &str) -> ShmResult<(Self, OwnedFd)> {
        validate_name(name)?;
        const { assert!(align_of::<T>() <= CACHE_LINE_SIZE) };

        let fd = memfd_create(name)?;
        let file = File::from(fd.try_clone()?);
        file.set_len(Self::total_size() as u64)?;
        // SAFETY: the file was just sized to hold header and payload; no
        // other process knows the descriptor yet.
        let mut mmap = unsafe { MmapOptions::new().len(Self::total_size()).map_mut(&file)? };
        validate_alignment(mmap.as_ptr() as usize)?;

        let base = mmap.as_mut_ptr();
        // SAFETY: `base` is page aligned, the mapping covers header and
        // payload, and both regions are freshly zeroed and unshared.
        unsafe {
            std::ptr::write(base as *mut SegmentHeader, SegmentHeader::new::<T>());
            std::ptr::write(base.add(SEGMENT_HEADER_SIZE) as *mut T, T::initial());
        }

        let segment = Self {
            name: name.to_string(),
            role: SegmentRole::Writer,
            mmap,
            _payload: PhantomData,
        };
        segment.header().set_flags(SegmentFlags::INITIALIZED);
        segment.header().writer_count.fetch_add(1, Ordering::AcqRel);
        debug!(segment = name, size = Self::total_size(), "created segment");
        Ok((segment, fd))
    }

    /// Map an existing segment from its descriptor and validate its header.
    pub fn attach(name: &str, fd: BorrowedFd<'_>, role: SegmentRole) -> ShmResult<Self> {
        let file = File::from(fd.try_clone_to_owned()?);
        let actual = file.metadata()?.len() as usize;
        if actual < Self::total_size() {
            return Err(ShmError::InvalidSize {
                expected: Self::total_size(),
                actual,
            });
        }
        // SAFETY: the file is at least header plus payload long; payload
        // state is only touched through atomics.
        let mmap = unsafe { MmapOptions::new().len(Self::total_size()).map_mut(&file)? };
        validate_alignment(mmap.as_ptr() as usize)?;

        let segment = Self {
            name: name.to_string(),
            role,
            mmap,
            _payload: PhantomData,
        };
        segment.header().validate::<T>(name).inspect_err(|err| {
            warn!(segment = name, "rejected attach: {}", err);
        })?;
        if !segment.header().flags().contains(SegmentFlags::INITIALIZED) {
            return Err(ShmError::InvalidMagic {
                name: name.to_string(),
            });
        }
        segment.header().count(role).fetch_add(1, Ordering::AcqRel);
        debug!(segment = name, ?role, "attached segment");
        Ok(segment)
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Role this mapping is counted as.
    pub fn role(&self) -> SegmentRole {
        self.role
    }

    /// Segment header.
    pub fn header(&self) -> &SegmentHeader {
        // SAFETY: the mapping starts with an initialized, validated header.
        unsafe { &*(self.mmap.as_ptr() as *const SegmentHeader) }
    }

    /// Shared payload.
    pub fn get(&self) -> &T {
        // SAFETY: the payload was constructed by the creator at this offset,
        // the offset is 64-aligned, and `ShmPayload` guarantees all mutation
        // goes through atomics.
        unsafe { &*(self.mmap.as_ptr().add(SEGMENT_HEADER_SIZE) as *const T) }
    }
}

impl<T: ShmPayload> Drop for ShmSegment<T> {
    fn drop(&mut self) {
        self.header()
            .count(self.role)
            .fetch_sub(1, Ordering::AcqRel);
    }
}

impl<T: ShmPayload> fmt::Debug for ShmSegment<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShmSegment")
            .field("name", &self.name)
            .field("type", &T::TYPE_TAG)
            .field("role", &self.role)
            .field("readers", &self.header().reader_count())
            .field("writers", &self.header().writer_count())
            .finish()
    }
}

/// Reject names that cannot be used as memfd labels.
pub fn validate_name(name: &str) -> ShmResult<()> {
    let reason = if name.is_empty() {
        "empty"
    } else if name.len() > MAX_SEGMENT_NAME_LEN {
        "too long"
    } else if name.contains(['/', '\0']) {
        "contains '/' or NUL"
    } else {
        return Ok(());
    };
    Err(ShmError::InvalidName {
        name: name.to_string(),
        reason,
    })
}

fn validate_alignment(address: usize) -> ShmResult<()> {
    if address % CACHE_LINE_SIZE != 0 {
        return Err(ShmError::AlignmentError {
            address,
            alignment: CACHE_LINE_SIZE,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsFd;

    #[repr(C)]
    struct Counter {
        value: AtomicU64,
    }

    unsafe impl ShmPayload for Counter {
        const TYPE_TAG: &'static str = "evo::test::Counter";
        fn initial() -> Self {
            Self {
                value: AtomicU64::new(41),
            }
        }
    }

    #[repr(C)]
    struct Other {
        value: AtomicU64,
    }

    unsafe impl ShmPayload for Other {
        const TYPE_TAG: &'static str = "evo::test::Other";
        fn initial() -> Self {
            Self {
                value: AtomicU64::new(0),
            }
        }
    }

    #[test]
    fn create_and_attach_share_payload() {
        let (writer, fd) = ShmSegment::<Counter>::create("segment_share").unwrap();
        let reader = ShmSegment::<Counter>::attach("segment_share", fd.as_fd(), SegmentRole::Reader)
            .unwrap();
        writer.get().value.fetch_add(1, Ordering::AcqRel);
        assert_eq!(reader.get().value.load(Ordering::Acquire), 42);
        assert_eq!(writer.header().reader_count(), 1);
        assert_eq!(writer.header().writer_count(), 1);
        drop(reader);
        assert_eq!(writer.header().reader_count(), 0);
        assert_eq!(writer.header().type_tag(), "evo::test::Counter");
    }

    #[test]
    fn attach_rejects_other_type() {
        let (_writer, fd) = ShmSegment::<Counter>::create("segment_type").unwrap();
        let result = ShmSegment::<Other>::attach("segment_type", fd.as_fd(), SegmentRole::Reader);
        assert!(matches!(result, Err(ShmError::TypeMismatch { .. })));
    }

    #[test]
    fn attach_rejects_version_mismatch() {
        let (writer, fd) = ShmSegment::<Counter>::create("segment_version").unwrap();
        // SAFETY: test-only corruption of the version field; no other
        // mapping reads it concurrently.
        unsafe {
            let header = writer.mmap.as_ptr() as *mut SegmentHeader;
            (*header).version = SEGMENT_LAYOUT_VERSION + 1;
        }
        let result = ShmSegment::<Counter>::attach("segment_version", fd.as_fd(), SegmentRole::Reader);
        assert!(matches!(
            result,
            Err(ShmError::VersionMismatch { found, .. }) if found == SEGMENT_LAYOUT_VERSION + 1
        ));
    }

    #[test]
    fn touch_updates_metadata() {
        let (writer, _fd) = ShmSegment::<Counter>::create("segment_touch").unwrap();
        let before = writer.header().last_update_ns();
        writer.header().touch(17);
        assert_eq!(writer.header().last_update_cycle(), 17);
        assert_eq!(writer.header().update_counter(), 1);
        assert!(writer.header().last_update_ns() >= before);
    }

    #[test]
    fn names_are_validated() {
        assert!(validate_name("ok_name").is_ok());
        for bad in ["", "a/b", "nul\0"] {
            assert!(matches!(validate_name(bad), Err(ShmError::InvalidName { .. })));
        }
        assert!(validate_name(&"x".repeat(MAX_SEGMENT_NAME_LEN + 1)).is_err());
    }
}
