//! Page-backed pixel buffers: locally allocated or imported.
//!
//! A [`PixelBuffer`] owns a page-granular byte region plus its pixel
//! layout. The backing is a tagged variant: either a [`PageRegion`] this
//! crate committed page by page and must release, or an
//! [`ExternalMapping`] owned by an outside producer that must never be
//! freed here. Both expose one stable CPU base pointer for the buffer's
//! whole lifetime, so producers and the frame worker share pixel bytes
//! without copies.
//!
//! Page operations go through the [`PageMapper`] seam. The default
//! [`SystemMapper`] reserves a contiguous anonymous range inaccessible
//! and then commits readable/writable pages into it one at a time, so a
//! mid-allocation failure can release exactly the pages acquired so far.

use std::ptr::NonNull;
use std::sync::{Arc, Mutex};

use crate::error::BeamError;
use crate::format::PixelFormat;

/// Backing-page granularity. Buffer sizes are always rounded up to a
/// multiple of this.
pub const PAGE_SIZE: usize = 4096;

// ── PageMapper ───────────────────────────────────────────────────

/// Low-level page operations behind buffer allocation.
///
/// `reserve` claims a contiguous, inaccessible address range; `commit`
/// installs one zeroed readable/writable page at a page index inside it;
/// `decommit` releases that page's memory while keeping the range
/// reserved; `unreserve` returns the whole range.
pub trait PageMapper: Send + Sync + 'static {
    fn reserve(&self, len: usize) -> Result<NonNull<u8>, BeamError>;
    fn commit(&self, base: NonNull<u8>, index: usize) -> Result<(), BeamError>;
    fn decommit(&self, base: NonNull<u8>, index: usize);
    fn unreserve(&self, base: NonNull<u8>, len: usize);
}

// ── SystemMapper ─────────────────────────────────────────────────

/// [`PageMapper`] over anonymous `mmap`.
pub struct SystemMapper;

impl PageMapper for SystemMapper {
    fn reserve(&self, len: usize) -> Result<NonNull<u8>, BeamError> {
        // SAFETY: anonymous PROT_NONE mapping; no existing memory touched.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(BeamError::Allocation("address range reservation failed"));
        }
        NonNull::new(ptr as *mut u8).ok_or(BeamError::Allocation("null mapping"))
    }

    fn commit(&self, base: NonNull<u8>, index: usize) -> Result<(), BeamError> {
        // SAFETY: `base + index * PAGE_SIZE` lies inside a range this
        // mapper previously reserved; MAP_FIXED replaces one page of it.
        let ptr = unsafe {
            libc::mmap(
                base.as_ptr().add(index * PAGE_SIZE) as *mut libc::c_void,
                PAGE_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(BeamError::Allocation("page commit failed"));
        }
        Ok(())
    }

    fn decommit(&self, base: NonNull<u8>, index: usize) {
        // Replace the page with an inaccessible one, giving its memory
        // back while the range stays reserved.
        // SAFETY: same range argument as `commit`.
        unsafe {
            libc::mmap(
                base.as_ptr().add(index * PAGE_SIZE) as *mut libc::c_void,
                PAGE_SIZE,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_FIXED | libc::MAP_NORESERVE,
                -1,
                0,
            );
        }
    }

    fn unreserve(&self, base: NonNull<u8>, len: usize) {
        // SAFETY: `base..base+len` is exactly the range `reserve` returned.
        unsafe {
            libc::munmap(base.as_ptr() as *mut libc::c_void, len);
        }
    }
}

// ── PageRegion ───────────────────────────────────────────────────

/// Outcome of servicing a page fault inside a mapped region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultStatus {
    /// The backing page is installed; the access can be retried.
    Retry,
    /// No backing page could be obtained.
    OutOfMemory,
    /// The faulting offset lies outside the mapping.
    AccessViolation,
}

/// A contiguous range of locally committed pages.
///
/// Releases everything it holds on drop, on every exit path: a failure
/// while committing page `k` releases the `k − 1` pages already
/// committed before the error surfaces.
pub struct PageRegion {
    base: NonNull<u8>,
    len: usize,
    committed: Mutex<Vec<bool>>,
    mapper: Arc<dyn PageMapper>,
}

// SAFETY: the region exclusively owns its mapping; the raw base pointer
// is only dereferenced through the byte accessors below.
unsafe impl Send for PageRegion {}
unsafe impl Sync for PageRegion {}

impl PageRegion {
    /// Reserve and commit `len` bytes (rounded up to the page size),
    /// page by page.
    pub fn allocate(mapper: Arc<dyn PageMapper>, len: usize) -> Result<Self, BeamError> {
        let len = Self::round_to_pages(len)?;
        let base = mapper.reserve(len)?;
        let pages = len / PAGE_SIZE;

        let mut committed = vec![false; pages];
        for i in 0..pages {
            if let Err(e) = mapper.commit(base, i) {
                // Release the prefix before surfacing the failure.
                for j in (0..i).rev() {
                    mapper.decommit(base, j);
                }
                mapper.unreserve(base, len);
                return Err(e);
            }
            committed[i] = true;
        }

        Ok(Self {
            base,
            len,
            committed: Mutex::new(committed),
            mapper,
        })
    }

    /// Reserve `len` bytes without committing any page. Accesses must be
    /// preceded by [`resolve_fault`](Self::resolve_fault); only useful
    /// when the region is exposed to a demand-paged caller.
    pub fn reserve(mapper: Arc<dyn PageMapper>, len: usize) -> Result<Self, BeamError> {
        let len = Self::round_to_pages(len)?;
        let base = mapper.reserve(len)?;
        let pages = len / PAGE_SIZE;
        Ok(Self {
            base,
            len,
            committed: Mutex::new(vec![false; pages]),
            mapper,
        })
    }

    fn round_to_pages(len: usize) -> Result<usize, BeamError> {
        if len == 0 {
            return Err(BeamError::Configuration("zero-sized buffer"));
        }
        Ok(len.div_ceil(PAGE_SIZE) * PAGE_SIZE)
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Resolve a CPU access fault at `offset`: install the backing page
    /// if it is missing.
    pub fn resolve_fault(&self, offset: usize) -> FaultStatus {
        if offset >= self.len {
            return FaultStatus::AccessViolation;
        }
        let index = offset / PAGE_SIZE;
        let mut committed = self.committed.lock().unwrap();
        if committed[index] {
            return FaultStatus::Retry;
        }
        match self.mapper.commit(self.base, index) {
            Ok(()) => {
                committed[index] = true;
                FaultStatus::Retry
            }
            Err(_) => FaultStatus::OutOfMemory,
        }
    }
}

impl Drop for PageRegion {
    fn drop(&mut self) {
        let committed = self.committed.get_mut().unwrap();
        for (i, page) in committed.iter().enumerate() {
            if *page {
                self.mapper.decommit(self.base, i);
            }
        }
        self.mapper.unreserve(self.base, self.len);
    }
}

// ── ExternalMapping ──────────────────────────────────────────────

/// CPU-visible memory owned by an external producer (compositor, capture
/// layer, …). This crate only borrows it; dropping the buffer detaches
/// the mapping and never frees the memory behind it.
pub trait ExternalMapping: Send + Sync + 'static {
    /// Base address, valid and stable for the mapping's whole lifetime.
    fn as_ptr(&self) -> NonNull<u8>;
    /// Length in bytes.
    fn len(&self) -> usize;
}

// ── PixelBuffer ──────────────────────────────────────────────────

enum BackingStore {
    /// Pages committed by this crate, released on drop.
    Owned(PageRegion),
    /// Borrowed mapping, only detached on drop.
    Imported(Arc<dyn ExternalMapping>),
}

/// A pixel buffer with page-backed storage and a fixed layout.
///
/// Shared between producers and the frame worker via `Arc`; the bytes
/// are plain pixel data, and writers are ordered against the worker by
/// the `mark_dirty` hand-off rather than by a lock around the memory.
pub struct PixelBuffer {
    store: BackingStore,
    len: usize,
    width: u32,
    height: u32,
    stride: u32,
    format: PixelFormat,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("len", &self.len)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl PixelBuffer {
    fn base(&self) -> NonNull<u8> {
        match &self.store {
            BackingStore::Owned(region) => region.base(),
            BackingStore::Imported(mapping) => mapping.as_ptr(),
        }
    }

    /// The stable CPU address of the mapped bytes.
    pub fn cpu_ptr(&self) -> NonNull<u8> {
        self.base()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row, including any producer-side padding.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Whether the backing memory belongs to an external producer.
    pub fn is_imported(&self) -> bool {
        matches!(self.store, BackingStore::Imported(_))
    }

    /// Copy bytes out of the buffer.
    ///
    /// # Panics
    ///
    /// Panics if `offset + dst.len()` exceeds the buffer.
    pub fn read_bytes(&self, offset: usize, dst: &mut [u8]) {
        assert!(offset + dst.len() <= self.len, "read past buffer end");
        // SAFETY: in-bounds per the assert; the region holds plain bytes,
        // so a racing producer write can only yield stale pixels.
        unsafe {
            std::ptr::copy_nonoverlapping(self.base().as_ptr().add(offset), dst.as_mut_ptr(), dst.len());
        }
    }

    /// Copy bytes into the buffer.
    ///
    /// # Panics
    ///
    /// Panics if `offset + src.len()` exceeds the buffer.
    pub fn write_bytes(&self, offset: usize, src: &[u8]) {
        assert!(offset + src.len() <= self.len, "write past buffer end");
        // SAFETY: see `read_bytes`.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.base().as_ptr().add(offset), src.len());
        }
    }

    /// Service a CPU access fault at `offset` (demand-paged callers
    /// only). Imported mappings are backed by their exporter, so any
    /// in-range fault is retryable.
    pub fn resolve_fault(&self, offset: usize) -> FaultStatus {
        match &self.store {
            BackingStore::Owned(region) => region.resolve_fault(offset),
            BackingStore::Imported(mapping) => {
                if offset < mapping.len() {
                    FaultStatus::Retry
                } else {
                    FaultStatus::AccessViolation
                }
            }
        }
    }
}

// ── BufferManager ────────────────────────────────────────────────

/// Allocates, imports, and releases pixel buffers.
pub struct BufferManager {
    mapper: Arc<dyn PageMapper>,
}

impl BufferManager {
    /// Manager backed by the system's anonymous page mappings.
    pub fn new() -> Self {
        Self::with_mapper(Arc::new(SystemMapper))
    }

    /// Manager with an explicit page mapper (tests, custom backends).
    pub fn with_mapper(mapper: Arc<dyn PageMapper>) -> Self {
        Self { mapper }
    }

    /// Allocate a zeroed buffer for `width × height` pixels of `format`.
    /// The byte size is rounded up to the page size.
    pub fn allocate(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<Arc<PixelBuffer>, BeamError> {
        if width == 0 || height == 0 {
            return Err(BeamError::Configuration("zero-sized buffer"));
        }
        let stride = width * format.bytes_per_pixel() as u32;
        let region =
            PageRegion::allocate(Arc::clone(&self.mapper), stride as usize * height as usize)?;
        let len = region.len();

        Ok(Arc::new(PixelBuffer {
            store: BackingStore::Owned(region),
            len,
            width,
            height,
            stride,
            format,
        }))
    }

    /// Wrap an externally owned mapping. No pages are allocated, and
    /// none will be freed when the buffer goes away.
    pub fn import(
        &self,
        mapping: Arc<dyn ExternalMapping>,
        width: u32,
        height: u32,
        stride: u32,
        format: PixelFormat,
    ) -> Result<Arc<PixelBuffer>, BeamError> {
        if width == 0 || height == 0 {
            return Err(BeamError::Configuration("zero-sized buffer"));
        }
        if stride < width * format.bytes_per_pixel() as u32 {
            return Err(BeamError::Configuration("stride smaller than row width"));
        }
        let needed = stride as usize * height as usize;
        let len = mapping.len();
        if len < needed {
            return Err(BeamError::BufferTooSmall {
                needed,
                actual: len,
            });
        }
        // Buffer sizes are page-granular on both paths; exporters hand
        // out page-multiple regions.
        if len % PAGE_SIZE != 0 {
            return Err(BeamError::Configuration(
                "imported mapping is not a page multiple",
            ));
        }

        Ok(Arc::new(PixelBuffer {
            store: BackingStore::Imported(mapping),
            len,
            width,
            height,
            stride,
            format,
        }))
    }

    /// The buffer's mapped address (valid for the buffer's lifetime).
    pub fn cpu_pointer(&self, buffer: &PixelBuffer) -> NonNull<u8> {
        buffer.cpu_ptr()
    }

    /// Drop this handle to the buffer. Owned pages are freed once the
    /// last handle goes away; imported mappings are merely detached.
    pub fn release(&self, buffer: Arc<PixelBuffer>) {
        drop(buffer);
    }
}

impl Default for BufferManager {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────
