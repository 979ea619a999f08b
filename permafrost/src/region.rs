//! The output buffer and the regions carved out of it.
//!
//! # Layout of the output buffer
//!
//! The output buffer is a single zero-initialized reservation
//! sized by the [size estimate][`crate::estimate::SizeEstimate`].
//! It is split into two regions that are filled one after the other:
//! the mutable region starts at the bottom of the buffer,
//! and the read-only region starts where the mutable region was packed.
//!
//! ```text
//!  bottom                                                         len
//!  | pad | mutable objects ... |    | read-only objects ... |    ....|
//!                                ^                              ^
//!                   mutable region packed       read-only region packed
//! ```
//!
//! Allocation proceeds by bumping the top of the current region,
//! in multiples of [`OBJECT_ALIGN`].
//! Packing a region rounds its top up to the region alignment
//! and fixes its end there, so the offset of the next region is known.

use {
    crate::{
        address::{Addr, AddrRange, Buffer, WORD, align_up, is_aligned},
        error::{BuildError, InvariantViolation, Result},
    },
    serde::Serialize,
    std::{
        alloc::{Layout, alloc_zeroed, dealloc},
        fmt,
        ptr::NonNull,
        slice,
    },
};

/// Alignment of every object in the output buffer.
pub const OBJECT_ALIGN: usize = 8;

/// Bytes allocated at the bottom of the first region,
/// so that no object ever lives at the very bottom of the buffer.
pub const BOTTOM_PADDING: usize = 16;

/// Which region an object is copied into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum RegionKind
{
    /// Objects that remain writable after restore.
    Mutable,

    /// Objects that are frozen right after they are copied.
    ReadOnly,
}

impl RegionKind
{
    /// Short name of the region, as used in the archive map.
    pub fn short_name(self) -> &'static str
    {
        match self {
            Self::Mutable  => "rw",
            Self::ReadOnly => "ro",
        }
    }

    #[allow(missing_docs)]
    pub fn for_read_only(read_only: bool) -> Self
    {
        if read_only { Self::ReadOnly } else { Self::Mutable }
    }
}

impl fmt::Display for RegionKind
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        match self {
            Self::Mutable  => f.write_str("mutable"),
            Self::ReadOnly => f.write_str("read-only"),
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                Output buffer                               */
/* -------------------------------------------------------------------------- */

/// Owning pointer to a zero-initialized, aligned output buffer.
pub struct OutputBuffer
{
    ptr: NonNull<u8>,

    /// The number of bytes in the buffer. Never zero.
    len: usize,

    /// The alignment of the buffer.
    align: usize,
}

impl OutputBuffer
{
    /// Reserve a buffer of `len` bytes, aligned to `align` bytes.
    ///
    /// A zero `len` is rounded up to `align`.
    /// Fails if no such buffer can be allocated.
    pub fn new(len: usize, align: usize) -> Result<Self>
    {
        let len = len.max(align);
        let failed = || BuildError::ReservationFailed{bytes: len, align};

        let layout = Layout::from_size_align(len, align)
            .map_err(|_| failed())?;

        // SAFETY: len is non-zero.
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(failed)?;

        Ok(Self{ptr, len, align})
    }

    /// The address of the bottom of the buffer.
    pub fn bottom(&self) -> Addr<Buffer>
    {
        Addr::new(self.ptr.as_ptr() as usize)
    }

    /// The number of bytes in the buffer.
    pub fn len(&self) -> usize
    {
        self.len
    }

    /// Buffers are never empty.
    pub fn is_empty(&self) -> bool
    {
        false
    }

    /// The addresses covered by the buffer.
    pub fn range(&self) -> AddrRange<Buffer>
    {
        AddrRange::from_len(self.bottom(), self.len)
            .expect("Allocation cannot wrap around the address space")
    }

    /// The offset of `addr` from the bottom, if it lies within the buffer.
    pub fn offset_of(&self, addr: usize) -> Option<usize>
    {
        self.range().contains(addr).then(|| addr - self.bottom().get())
    }

    /// The contents of the buffer.
    pub fn as_slice(&self) -> &[u8]
    {
        // SAFETY: The memory is allocated and initialized.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// The contents of the buffer.
    pub fn as_mut_slice(&mut self) -> &mut [u8]
    {
        // SAFETY: The memory is allocated and initialized,
        //         and we have exclusive access to it.
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Read the word at the word-aligned byte `offset`.
    pub fn read_word(&self, offset: usize) -> usize
    {
        debug_assert!(is_aligned(offset, WORD));
        let bytes = &self.as_slice()[offset .. offset + WORD];
        usize::from_ne_bytes(bytes.try_into().expect("Slice is one word"))
    }

    /// Write the word at the word-aligned byte `offset`.
    pub fn write_word(&mut self, offset: usize, value: usize)
    {
        debug_assert!(is_aligned(offset, WORD));
        self.as_mut_slice()[offset .. offset + WORD]
            .copy_from_slice(&value.to_ne_bytes());
    }
}

impl Drop for OutputBuffer
{
    fn drop(&mut self)
    {
        // SAFETY: This matches OutputBuffer::new.
        let layout = unsafe {
            Layout::from_size_align_unchecked(self.len, self.align)
        };

        // SAFETY: ptr and layout come from new.
        unsafe { dealloc(self.ptr.as_ptr(), layout) }
    }
}

/* -------------------------------------------------------------------------- */
/*                                   Regions                                  */
/* -------------------------------------------------------------------------- */

/// Append-only range of the output buffer.
///
/// All offsets are in bytes from the bottom of the output buffer.
#[derive(Clone, Debug)]
pub struct Region
{
    kind: RegionKind,
    base: usize,
    top: usize,
    end: usize,
    packed: bool,
}

impl Region
{
    fn new(kind: RegionKind, base: usize, end: usize) -> Self
    {
        Self{kind, base, top: base, end, packed: false}
    }

    #[allow(missing_docs)]
    pub fn kind(&self) -> RegionKind { self.kind }

    /// Offset of the first byte of the region.
    pub fn base(&self) -> usize { self.base }

    /// Offset just past the last allocated byte.
    pub fn top(&self) -> usize { self.top }

    /// Offset just past the last byte the region may grow into.
    pub fn end(&self) -> usize { self.end }

    /// Whether the region was packed and can no longer grow.
    pub fn is_packed(&self) -> bool { self.packed }

    /// The number of allocated bytes.
    pub fn used(&self) -> usize
    {
        self.top - self.base
    }

    /// The number of bytes the region may grow to.
    pub fn reserved(&self) -> usize
    {
        self.end - self.base
    }
}

/// Bump allocator over the two regions of the output buffer.
pub struct RegionAllocator
{
    buffer: OutputBuffer,
    mutable: Region,
    read_only: Region,
    current: RegionKind,
    region_alignment: usize,
}

impl RegionAllocator
{
    /// Start allocating into the mutable region of `buffer`.
    ///
    /// The first [`BOTTOM_PADDING`] bytes are allocated right away.
    pub fn new(buffer: OutputBuffer, region_alignment: usize) -> Result<Self>
    {
        debug_assert!(is_aligned(buffer.len(), region_alignment));
        let len = buffer.len();
        let mut this = Self{
            buffer,
            mutable: Region::new(RegionKind::Mutable, 0, len),
            read_only: Region::new(RegionKind::ReadOnly, len, len),
            current: RegionKind::Mutable,
            region_alignment,
        };
        this.allocate(BOTTOM_PADDING)?;
        Ok(this)
    }

    /// The region that allocations currently go to.
    pub fn current(&self) -> RegionKind
    {
        self.current
    }

    #[allow(missing_docs)]
    pub fn region(&self, kind: RegionKind) -> &Region
    {
        match kind {
            RegionKind::Mutable  => &self.mutable,
            RegionKind::ReadOnly => &self.read_only,
        }
    }

    fn region_mut(&mut self, kind: RegionKind) -> &mut Region
    {
        match kind {
            RegionKind::Mutable  => &mut self.mutable,
            RegionKind::ReadOnly => &mut self.read_only,
        }
    }

    #[allow(missing_docs)]
    pub fn buffer(&self) -> &OutputBuffer
    {
        &self.buffer
    }

    #[allow(missing_docs)]
    pub fn buffer_mut(&mut self) -> &mut OutputBuffer
    {
        &mut self.buffer
    }

    /// Offset just past the last allocated byte of the current region.
    pub fn top(&self) -> usize
    {
        self.region(self.current).top
    }

    /// Allocate `bytes` bytes from the current region.
    ///
    /// Returns the offset of the allocation from the bottom of the buffer.
    /// The allocated memory is zero.
    pub fn allocate(&mut self, bytes: usize) -> Result<usize>
    {
        let kind = self.current;
        let region = self.region_mut(kind);
        debug_assert!(!region.packed);

        let available = region.end - region.top;
        let out_of_space =
            || BuildError::OutOfSpace{region: kind, requested: bytes, available};

        // Make sure the *next* allocation will also be aligned.
        let size = align_up(bytes, OBJECT_ALIGN).ok_or_else(out_of_space)?;
        if size > available {
            return Err(out_of_space());
        }

        let offset = region.top;
        region.top += size;
        Ok(offset)
    }

    /// Stop allocating into the current region.
    ///
    /// Its top is rounded up to the region alignment,
    /// and it may no longer grow past that.
    pub fn pack(&mut self)
    {
        let alignment = self.region_alignment;
        let len = self.buffer.len();
        let region = self.region_mut(self.current);
        if region.packed {
            return;
        }
        let top = align_up(region.top, alignment).unwrap_or(len);
        debug_assert!(top <= len, "Buffer length is aligned to regions");
        region.top = top.min(len);
        region.end = region.top;
        region.packed = true;
    }

    /// Pack the mutable region and switch allocation to the read-only region.
    pub fn start_next_region(&mut self) -> Result<()>
    {
        if self.current != RegionKind::Mutable {
            return Err(InvariantViolation::OutOfOrder{
                step: "start_next_region",
            }.into());
        }
        self.pack();
        let base = self.mutable.end;
        self.read_only = Region::new(RegionKind::ReadOnly, base, self.buffer.len());
        self.current = RegionKind::ReadOnly;
        Ok(())
    }

    /// Offset just past the last byte of the archive,
    /// once the read-only region is packed.
    pub fn archive_top(&self) -> usize
    {
        match self.current {
            RegionKind::Mutable  => self.mutable.top,
            RegionKind::ReadOnly => self.read_only.top,
        }
    }
}

#[cfg(test)]
mod tests
{
    use {super::*, proptest::{self as p, proptest}};

    const ALIGN: usize = 4096;

    fn allocator(len: usize) -> RegionAllocator
    {
        RegionAllocator::new(OutputBuffer::new(len, ALIGN).unwrap(), ALIGN).unwrap()
    }

    #[test]
    fn output_buffer_is_aligned_and_zeroed()
    {
        let buffer = OutputBuffer::new(3 * ALIGN, ALIGN).unwrap();
        assert!(is_aligned(buffer.bottom().get(), ALIGN));
        assert!(buffer.as_slice().iter().all(|b| *b == 0));
        assert_eq!(buffer.offset_of(buffer.bottom().get() + 8), Some(8));
        assert_eq!(buffer.offset_of(buffer.range().top().get()), None);
    }

    #[test]
    fn oversized_output_buffer_is_an_error()
    {
        let len = usize::MAX & !(ALIGN - 1);
        match OutputBuffer::new(len, ALIGN) {
            Err(BuildError::ReservationFailed{bytes, align}) => {
                assert_eq!(bytes, len);
                assert_eq!(align, ALIGN);
            },
            Err(other) => panic!("Expected ReservationFailed, got {other:?}"),
            Ok(_) => panic!("Expected ReservationFailed"),
        }
    }

    #[test]
    fn first_allocation_skips_bottom_padding()
    {
        let mut allocator = allocator(ALIGN);
        assert_eq!(allocator.allocate(24).unwrap(), BOTTOM_PADDING);
        assert_eq!(allocator.allocate(1).unwrap(), BOTTOM_PADDING + 24);
        assert_eq!(allocator.top(), BOTTOM_PADDING + 32);
    }

    #[test]
    fn running_out_of_space_names_the_region()
    {
        let mut allocator = allocator(ALIGN);
        allocator.start_next_region().unwrap();
        // The mutable region took the first ALIGN bytes.
        match allocator.allocate(8) {
            Err(BuildError::OutOfSpace{region, requested, available}) => {
                assert_eq!(region, RegionKind::ReadOnly);
                assert_eq!(requested, 8);
                assert_eq!(available, 0);
            },
            other => panic!("Expected OutOfSpace, got {other:?}"),
        }
    }

    #[test]
    fn regions_are_packed_in_order()
    {
        let mut allocator = allocator(4 * ALIGN);
        allocator.allocate(100).unwrap();
        allocator.start_next_region().unwrap();
        assert!(allocator.start_next_region().is_err());

        let rw = allocator.region(RegionKind::Mutable);
        assert!(rw.is_packed());
        assert_eq!(rw.top(), ALIGN);
        assert_eq!(rw.end(), ALIGN);

        assert_eq!(allocator.allocate(10).unwrap(), ALIGN);
        allocator.pack();
        let ro = allocator.region(RegionKind::ReadOnly);
        assert_eq!((ro.base(), ro.top()), (ALIGN, 2 * ALIGN));
        assert_eq!(allocator.archive_top(), 2 * ALIGN);
    }

    proptest!
    {
        #[test]
        fn allocations_are_aligned_and_disjoint(
            sizes in p::collection::vec(0usize .. 300, 0 .. 40),
        )
        {
            let mut allocator = allocator(4 * ALIGN);
            let mut last_end = BOTTOM_PADDING;
            for size in sizes {
                let offset = allocator.allocate(size).unwrap();
                assert!(is_aligned(offset, OBJECT_ALIGN));
                assert!(offset >= last_end);
                last_end = offset + size;
            }
        }
    }
}
