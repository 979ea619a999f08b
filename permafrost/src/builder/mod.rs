//! Archive build sessions.
//!
//! An [`ArchiveBuilder`] runs the pipeline that turns a live object graph
//! into a relocatable archive. The steps must be run in this order:
//!
//!  1. [`gather_source_objs`] discovers and classifies objects.
//!  2. [`reserve_buffer`] sizes and reserves the output buffer.
//!  3. [`dump_mutable`] and [`dump_read_only`] copy objects.
//!  4. [`relocate_embedded_pointers`] wires pointers within the buffer.
//!  5. The host freezes the copies (not part of this crate).
//!  6. [`relocate_to_requested`] shifts pointers to requested addresses.
//!
//! Hand-assembled data can be allocated with [`allocate_other`]
//! between steps 2 and 4, and its pointers recorded with
//! [`write_pointer_in_buffer`] and friends until step 6.
//!
//! [`gather_source_objs`]: `ArchiveBuilder::gather_source_objs`
//! [`reserve_buffer`]: `ArchiveBuilder::reserve_buffer`
//! [`dump_mutable`]: `ArchiveBuilder::dump_mutable`
//! [`dump_read_only`]: `ArchiveBuilder::dump_read_only`
//! [`relocate_embedded_pointers`]: `ArchiveBuilder::relocate_embedded_pointers`
//! [`relocate_to_requested`]: `ArchiveBuilder::relocate_to_requested`
//! [`allocate_other`]: `ArchiveBuilder::allocate_other`
//! [`write_pointer_in_buffer`]: `ArchiveBuilder::write_pointer_in_buffer`

use {
    crate::{
        address::{
            Addr, AddrRange, Buffer, Delta, Mapped, Requested, WORD,
            align_up, is_aligned,
        },
        config::BuildConfig,
        dispatch::{DispatchTables, DispatchTemplate},
        error::{BuildError, InvariantViolation, Result},
        estimate::{SizeEstimate, UsageTracker},
        host::{DispatchTableProvider, Host, SizeAdvisories},
        ledger::PointerLedger,
        object::ObjectKind,
        region::{OutputBuffer, Region, RegionAllocator, RegionKind},
        registry::{ObjectId, Registry, Resolution, SourceObjList},
        stats::AllocStats,
    },
    std::{
        collections::HashSet,
        marker::PhantomData,
        slice,
        sync::atomic::{AtomicBool, Ordering},
    },
    tracing::{debug, info, trace},
};

mod gather;
mod map;
mod relocate;

/// Whether a build session is alive anywhere in the process.
static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Marks the one build session of the process as active.
///
/// Not [`Send`], so the session stays on the thread that began it.
struct Session
{
    _not_send: PhantomData<*const ()>,
}

impl Session
{
    fn begin() -> Result<Self>
    {
        SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| BuildError::SessionActive)?;
        Ok(Self{_not_send: PhantomData})
    }
}

impl Drop for Session
{
    fn drop(&mut self)
    {
        SESSION_ACTIVE.store(false, Ordering::Release);
    }
}

/// Serializes tests that start build sessions.
#[cfg(test)]
pub (crate) fn session_lock() -> std::sync::MutexGuard<'static, ()>
{
    use std::sync::{Mutex, PoisonError};
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Where the dependency archive is, and where it is requested.
#[derive(Clone, Copy, Debug)]
struct DependencyLayout
{
    mapped: AddrRange<Mapped>,
    requested: AddrRange<Requested>,
    mapped_to_requested: Delta<Mapped, Requested>,
}

/// The dependency archive that an incremental build extends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DependencyArchive
{
    /// Where the dependency archive is mapped in this process.
    pub mapped: AddrRange<Mapped>,
}

/// The output buffer with everything that describes its contents.
struct Output
{
    allocator: RegionAllocator,

    /// Slots that hold pointers, by word offset from the buffer bottom.
    ptrmap: PointerLedger,

    usage: UsageTracker,
    advisories: SizeAdvisories,

    buffer_to_requested: Delta<Buffer, Requested>,
    requested_bottom: Addr<Requested>,

    /// Set once the read-only region is packed.
    requested_top: Option<Addr<Requested>>,
}

impl Output
{
    fn buffer(&self) -> &OutputBuffer
    {
        self.allocator.buffer()
    }

    /// Byte offset of a word-sized slot in the buffer.
    fn slot_offset(&self, slot: Addr<Buffer>)
        -> Result<usize, InvariantViolation>
    {
        let buffer = self.buffer();
        buffer.offset_of(slot.get())
            .filter(|o| is_aligned(*o, WORD))
            .filter(|o| o + WORD <= buffer.len())
            .ok_or(InvariantViolation::SlotOutsideBuffer(slot.get()))
    }

    /// Record the slot at `offset` if it holds a pointer.
    fn mark(&mut self, offset: usize)
    {
        if self.buffer().read_word(offset) != 0 {
            let index = offset / WORD;
            self.ptrmap.reserve_bit(index);
            self.ptrmap.set(index);
        }
    }

    fn set_and_mark(&mut self, offset: usize, value: usize)
    {
        self.allocator.buffer_mut().write_word(offset, value);
        self.mark(offset);
    }

    fn clear(&mut self, offset: usize) -> Result<(), InvariantViolation>
    {
        let value = self.buffer().read_word(offset);
        if value != 0 {
            let slot = self.buffer().bottom().get() + offset;
            return Err(InvariantViolation::ClearingLivePointer(slot));
        }
        let index = offset / WORD;
        if index < self.ptrmap.len() {
            self.ptrmap.clear(index);
        }
        Ok(())
    }
}

/// Progress of a build session through the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Stage
{
    New,
    Gathered,
    Reserved,
    MutableCopied,
    ReadOnlyCopied,
    Wired,
    Relocated,
}

/// The finished archive, in requested coordinates.
#[derive(Clone, Copy, Debug)]
pub struct Archive<'b>
{
    /// Contents of the mutable region.
    pub mutable: &'b [u8],

    /// Contents of the read-only region, which follows the mutable region.
    pub read_only: &'b [u8],

    /// Slots to relocate if the archive is not mapped at `requested`,
    /// by word offset from the bottom of the mutable region.
    pub ptrmap: &'b PointerLedger,

    /// Where the archive is designed to be mapped.
    pub requested: AddrRange<Requested>,
}

/// Build session for one archive.
///
/// At most one session exists in the process at a time.
/// The session borrows the host for its entire lifetime,
/// because objects are copied from host memory.
pub struct ArchiveBuilder<'h>
{
    _session: Session,

    host: Host<'h>,
    config: BuildConfig,
    dependency: Option<DependencyLayout>,
    stage: Stage,

    registry: Registry,
    mutable_objs: SourceObjList,
    read_only_objs: SourceObjList,

    /// Sorted by name once gathered.
    type_descriptors: Vec<usize>,

    /// Sorted by address once gathered.
    interned_strings: Vec<usize>,

    /// Objects that were replaced by a substitute, in discovery order.
    regenerated: Vec<usize>,
    regenerated_seen: HashSet<usize>,

    estimate: SizeEstimate,
    output: Option<Output>,
    stats: AllocStats,
}

impl<'h> ArchiveBuilder<'h>
{
    /// Start a build session.
    ///
    /// Fails if another session is active on this thread,
    /// or if the configuration is invalid.
    pub fn new(
        config: BuildConfig,
        dependency: Option<DependencyArchive>,
        host: Host<'h>,
    ) -> Result<Self>
    {
        config.validate()?;
        let session = Session::begin()?;

        let dependency = dependency
            .map(|dependency| Self::dependency_layout(&config, dependency))
            .transpose()?;

        Ok(Self{
            _session: session,
            host,
            config,
            dependency,
            stage: Stage::New,
            registry: Registry::new(),
            mutable_objs: SourceObjList::new(),
            read_only_objs: SourceObjList::new(),
            type_descriptors: Vec::new(),
            interned_strings: Vec::new(),
            regenerated: Vec::new(),
            regenerated_seen: HashSet::new(),
            estimate: SizeEstimate::new(),
            output: None,
            stats: AllocStats::new(),
        })
    }

    /// The dependency is requested at the configured base address.
    fn dependency_layout(config: &BuildConfig, dependency: DependencyArchive)
        -> Result<DependencyLayout>
    {
        let mapped = dependency.mapped;
        let base = config.requested_base_address;
        let requested = AddrRange::from_len(Addr::new(base), mapped.len())
            .ok_or(BuildError::BaseAddressTooHigh{
                requested_base: base,
                bottom: base,
                top: usize::MAX,
            })?;
        let mapped_to_requested = Delta::between(mapped.bottom(), requested.bottom());
        Ok(DependencyLayout{mapped, requested, mapped_to_requested})
    }

    fn expect_stage(&self, stage: Stage, step: &'static str) -> Result<()>
    {
        if self.stage != stage {
            return Err(InvariantViolation::OutOfOrder{step}.into());
        }
        Ok(())
    }

    /// The output buffer, while its contents may still change.
    fn output_mut(&mut self, step: &'static str) -> Result<&mut Output>
    {
        match &mut self.output {
            Some(output) if self.stage < Stage::Relocated => Ok(output),
            _ => Err(InvariantViolation::OutOfOrder{step}.into()),
        }
    }

    fn output(&self, step: &'static str) -> Result<&Output>
    {
        self.output.as_ref()
            .ok_or_else(|| InvariantViolation::OutOfOrder{step}.into())
    }

    /// Whether this archive extends a dependency archive.
    pub fn is_incremental(&self) -> bool
    {
        self.dependency.is_some()
    }

    #[allow(missing_docs)]
    pub fn config(&self) -> &BuildConfig
    {
        &self.config
    }

    /// Objects registered so far, substitute aliases included.
    pub fn registry(&self) -> &Registry
    {
        &self.registry
    }

    /// Type descriptors to archive, sorted by name.
    pub fn type_descriptors(&self) -> &[usize]
    {
        &self.type_descriptors
    }

    /// Interned strings to archive, sorted by address.
    pub fn interned_strings(&self) -> &[usize]
    {
        &self.interned_strings
    }

    /// The running size estimate.
    pub fn estimate(&self) -> &SizeEstimate
    {
        &self.estimate
    }

    /// The objects accepted into a region, in copy order.
    pub fn source_objs(&self, kind: RegionKind) -> &SourceObjList
    {
        match kind {
            RegionKind::Mutable  => &self.mutable_objs,
            RegionKind::ReadOnly => &self.read_only_objs,
        }
    }

    #[allow(missing_docs)]
    pub fn stats(&self) -> &AllocStats
    {
        &self.stats
    }

    /// The output buffer, once reserved.
    pub fn buffer(&self) -> Option<&OutputBuffer>
    {
        self.output.as_ref().map(Output::buffer)
    }

    /// A region of the output buffer, once reserved.
    pub fn region(&self, kind: RegionKind) -> Option<&Region>
    {
        self.output.as_ref().map(|o| o.allocator.region(kind))
    }

    /// Slots of the output buffer that hold pointers,
    /// by word offset from the bottom of the buffer.
    pub fn ptrmap(&self) -> Option<&PointerLedger>
    {
        self.output.as_ref().map(|o| &o.ptrmap)
    }

    /// The finished archive.
    ///
    /// Returns [`None`] until [`relocate_to_requested`] succeeds.
    ///
    /// [`relocate_to_requested`]: `Self::relocate_to_requested`
    pub fn archive(&self) -> Option<Archive>
    {
        if self.stage != Stage::Relocated {
            return None;
        }
        let output = self.output.as_ref()?;
        let bytes = output.buffer().as_slice();
        let rw = output.allocator.region(RegionKind::Mutable);
        let ro = output.allocator.region(RegionKind::ReadOnly);
        let requested = AddrRange::new(output.requested_bottom, output.requested_top?)?;
        Some(Archive{
            mutable: &bytes[rw.base() .. rw.top()],
            read_only: &bytes[ro.base() .. ro.top()],
            ptrmap: &output.ptrmap,
            requested,
        })
    }

    /* ---------------------------------------------------------------------- */
    /*                              Reservation                               */
    /* ---------------------------------------------------------------------- */

    /// Size the output buffer and reserve it.
    ///
    /// The requested address range of the archive is fixed here.
    /// It must lie above the requested range of the dependency archive,
    /// otherwise the configured base address is too high.
    pub fn reserve_buffer(&mut self, advisories: SizeAdvisories) -> Result<()>
    {
        self.expect_stage(Stage::Gathered, "reserve_buffer")?;

        let alignment = self.config.region_alignment;
        let base = self.config.requested_base_address;
        let buffer_size = self.estimate.total(&advisories, alignment);

        let my_bottom = match &self.dependency {
            None => Some(base),
            Some(dependency) =>
                align_up(dependency.requested.top().get(), alignment),
        };
        let my_top = my_bottom.and_then(|b| b.checked_add(buffer_size));

        match (my_bottom, my_top) {
            (Some(bottom), Some(top)) if bottom >= base && top > base => (),
            _ => {
                let bottom = my_bottom.unwrap_or(usize::MAX);
                let top = my_top.unwrap_or(usize::MAX);
                tracing::error!("Requested archive bottom = {:#x}", bottom);
                tracing::error!("Requested archive top    = {:#x}", top);
                return Err(BuildError::BaseAddressTooHigh{
                    requested_base: base,
                    bottom,
                    top,
                });
            },
        }
        let my_bottom = Addr::<Requested>::new(my_bottom.unwrap_or(base));

        let buffer = OutputBuffer::new(buffer_size, alignment)?;
        info!("Reserved output buffer {} - {} ({} bytes)",
              buffer.bottom(), buffer.range().top(), buffer.len());

        let buffer_to_requested = Delta::between(buffer.bottom(), my_bottom);
        let ptrmap = PointerLedger::with_len(buffer.len() / WORD);
        let allocator = RegionAllocator::new(buffer, alignment)?;
        let usage = UsageTracker::new(allocator.top());

        self.output = Some(Output{
            allocator,
            ptrmap,
            usage,
            advisories,
            buffer_to_requested,
            requested_bottom: my_bottom,
            requested_top: None,
        });
        self.stage = Stage::Reserved;
        Ok(())
    }

    /// Allocate hand-assembled data from the current region.
    ///
    /// The memory is zero. It is accounted as "other" in the statistics.
    pub fn allocate_other(&mut self, bytes: usize) -> Result<Addr<Buffer>>
    {
        if self.stage >= Stage::Wired {
            return Err(InvariantViolation::OutOfOrder{step: "allocate_other"}.into());
        }
        let output = self.output_mut("allocate_other")?;
        let region = output.allocator.current();
        let old_top = output.allocator.top();
        let offset = output.allocator.allocate(bytes)?;
        let used = output.allocator.top() - old_top;
        let addr = Addr::new(output.buffer().bottom().get() + offset);
        self.stats.record_other(used, region);
        Ok(addr)
    }

    /// Store a plain value in the buffer.
    ///
    /// The slot is not relocated, so the value must not be an address
    /// in the buffer or in the dependency archive.
    pub fn write_word(&mut self, slot: Addr<Buffer>, value: usize) -> Result<()>
    {
        let output = self.output_mut("write_word")?;
        let offset = output.slot_offset(slot)?;
        output.allocator.buffer_mut().write_word(offset, value);
        Ok(())
    }

    /// Check that no more than `estimate` bytes were allocated
    /// since the previous check, or since the buffer was reserved.
    pub fn verify_estimate(&mut self, estimate: usize, label: &'static str)
        -> Result<()>
    {
        let output = self.output_mut("verify_estimate")?;
        let top = output.allocator.top();
        output.usage.verify(top, estimate, label)?;
        Ok(())
    }

    /* ---------------------------------------------------------------------- */
    /*                                 Copying                                */
    /* ---------------------------------------------------------------------- */

    /// Copy the objects of the mutable region.
    pub fn dump_mutable(&mut self, tables: &dyn DispatchTableProvider)
        -> Result<()>
    {
        self.expect_stage(Stage::Reserved, "dump_mutable")?;
        info!("Allocating RW objects ... ");
        let objs = self.mutable_objs.objs().to_vec();
        self.make_shallow_copies(&objs, tables)?;
        self.stage = Stage::MutableCopied;
        Ok(())
    }

    /// Pack the mutable region and copy the objects of the read-only region.
    ///
    /// Afterwards the objects that were replaced by substitutes
    /// resolve to the copies of their substitutes,
    /// and the object estimate is verified.
    pub fn dump_read_only(&mut self, tables: &dyn DispatchTableProvider)
        -> Result<()>
    {
        self.expect_stage(Stage::MutableCopied, "dump_read_only")?;
        info!("Allocating RO objects ... ");

        let output = self.output_mut("dump_read_only")?;
        let old_top = output.allocator.top();
        output.allocator.start_next_region()?;
        let new_top = output.allocator.top();
        output.usage.switch_region(old_top, new_top);

        let objs = self.read_only_objs.objs().to_vec();
        self.make_shallow_copies(&objs, tables)?;

        self.record_regenerated_objects()?;

        let other = self.output("dump_read_only")?.advisories.other;
        let estimate = self.estimate.object_bytes().saturating_add(other);
        self.verify_estimate(estimate, "Objects")?;

        self.stage = Stage::ReadOnlyCopied;
        Ok(())
    }

    fn make_shallow_copies(
        &mut self,
        objs: &[ObjectId],
        tables: &dyn DispatchTableProvider,
    ) -> Result<()>
    {
        for &id in objs {
            self.make_shallow_copy(id, tables)?;
        }
        info!("done ({} objects)", objs.len());
        Ok(())
    }

    fn make_shallow_copy(
        &mut self,
        id: ObjectId,
        tables: &dyn DispatchTableProvider,
    ) -> Result<()>
    {
        let info = self.registry.info(id);
        let (source, size, kind) = (info.source_addr(), info.size(), info.kind());
        let region = RegionKind::for_read_only(info.read_only());

        let output = self.output_mut("make_shallow_copy")?;
        debug_assert_eq!(output.allocator.current(), region);
        let old_top = output.allocator.top();

        // A word in front of each type descriptor
        // holds its lookup record, which is filled in later.
        if kind == ObjectKind::TypeDescriptor {
            output.allocator.allocate(WORD)?;
        }
        let offset = output.allocator.allocate(size)?;
        let new_top = output.allocator.top();

        // SAFETY: The object model guarantees that the source object
        //         is readable for size bytes and does not change
        //         for as long as the host is borrowed by this session.
        let bytes = unsafe { slice::from_raw_parts(source as *const u8, size) };
        output.allocator.buffer_mut().as_mut_slice()[offset .. offset + size]
            .copy_from_slice(bytes);

        let dest = Addr::<Buffer>::new(output.buffer().bottom().get() + offset);

        if let Some(table) = tables.prepared_table_for(kind, dest) {
            let offset = output.slot_offset(dest)?;
            output.slot_offset(table)?;
            output.set_and_mark(offset, table.get());
        }

        self.registry.set_output_addr(id, dest)?;
        trace!("Copy: {:#x} ==> {} {}", source, dest, size);
        self.stats.record(kind, new_top - old_top, region);
        Ok(())
    }

    /// Make the objects that were replaced by substitutes
    /// resolve to their substitutes.
    fn record_regenerated_objects(&mut self) -> Result<()>
    {
        let substitutes = self.host.substitutes;
        for &original in &self.regenerated {
            let substitute = substitutes.lookup(original)
                .ok_or(InvariantViolation::UnresolvedPointer(original))?;
            self.registry.record_alias(original, substitute)?;
            debug!("Regenerated {:#x} -> {:#x}", original, substitute);
        }
        Ok(())
    }

    /// Make `original` resolve to wherever `substitute` resolves.
    ///
    /// This is for objects that the host replaced
    /// without the traversal ever reporting them.
    pub fn record_regenerated_object(&mut self, original: usize, substitute: usize)
        -> Result<()>
    {
        if self.stage < Stage::ReadOnlyCopied {
            return Err(InvariantViolation::OutOfOrder{
                step: "record_regenerated_object",
            }.into());
        }
        self.registry.record_alias(original, substitute)?;
        Ok(())
    }

    /* ---------------------------------------------------------------------- */
    /*                             Pointer marking                            */
    /* ---------------------------------------------------------------------- */

    /// Record that `slot` holds a pointer, unless it holds null.
    pub fn mark_pointer(&mut self, slot: Addr<Buffer>) -> Result<()>
    {
        let output = self.output_mut("mark_pointer")?;
        let offset = output.slot_offset(slot)?;
        output.mark(offset);
        Ok(())
    }

    /// Store a pointer into the buffer in `slot` and record it.
    pub fn set_and_mark_pointer(&mut self, slot: Addr<Buffer>, value: Addr<Buffer>)
        -> Result<()>
    {
        let output = self.output_mut("set_and_mark_pointer")?;
        let offset = output.slot_offset(slot)?;
        output.set_and_mark(offset, value.get());
        Ok(())
    }

    /// Record that `slot`, which must hold null, holds no pointer.
    pub fn clear_pointer(&mut self, slot: Addr<Buffer>) -> Result<()>
    {
        let output = self.output_mut("clear_pointer")?;
        let offset = output.slot_offset(slot)?;
        output.clear(offset)?;
        Ok(())
    }

    /// Store a pointer to the archived copy of `source` in `slot`.
    ///
    /// This is for hand-assembled data that the traversal does not see.
    /// With [`None`], or a source object whose pointers are nulled out,
    /// the slot is set to null and is not relocated.
    pub fn write_pointer_in_buffer(&mut self, slot: Addr<Buffer>, source: Option<usize>)
        -> Result<()>
    {
        if self.stage < Stage::ReadOnlyCopied {
            return Err(InvariantViolation::OutOfOrder{
                step: "write_pointer_in_buffer",
            }.into());
        }
        let value = match source {
            None => 0,
            Some(source) => match self.registry.resolve(source)? {
                Resolution::Output(addr)   => addr.get(),
                Resolution::Existing(addr) => addr.get(),
                Resolution::Null           => 0,
            },
        };
        let output = self.output_mut("write_pointer_in_buffer")?;
        let offset = output.slot_offset(slot)?;
        if value == 0 {
            output.allocator.buffer_mut().write_word(offset, 0);
            output.clear(offset)?;
        } else {
            output.set_and_mark(offset, value);
        }
        Ok(())
    }

    /* ---------------------------------------------------------------------- */
    /*                           Address conversions                          */
    /* ---------------------------------------------------------------------- */

    /// Where the archived copy of a source object is in the buffer.
    pub fn get_output_addr(&self, source: usize) -> Result<Addr<Buffer>>
    {
        Ok(self.registry.output_addr(source)?)
    }

    /// Which source object was copied to `output`.
    pub fn get_source_addr(&self, output: Addr<Buffer>) -> Result<usize>
    {
        self.registry.source_addr(output)
            .ok_or_else(|| InvariantViolation::UnknownOutput(output.get()).into())
    }

    /// Where an address in the buffer will be once the archive is mapped.
    pub fn to_requested(&self, addr: Addr<Buffer>) -> Result<Addr<Requested>>
    {
        let output = self.output("to_requested")?;
        output.buffer().offset_of(addr.get())
            .ok_or(InvariantViolation::SlotOutsideBuffer(addr.get()))?;
        output.buffer_to_requested.apply(addr)
            .map_err(|err| InvariantViolation::RelocatedOutOfRange{
                value: err.addr,
                relocated: usize::MAX,
            }.into())
    }

    /// Offset of an address in the buffer from the requested bottom
    /// of the first archive in the chain.
    pub fn buffer_to_offset(&self, addr: Addr<Buffer>) -> Result<usize>
    {
        let requested = self.to_requested(addr)?;
        let base = self.config.requested_base_address;
        requested.get().checked_sub(base)
            .ok_or_else(|| InvariantViolation::RelocatedOutOfRange{
                value: addr.get(),
                relocated: requested.get(),
            }.into())
    }

    /// Offset from the requested bottom of the first archive in the chain
    /// of an address in the dependency archive, in the buffer,
    /// or of an archived source object.
    pub fn any_to_offset(&self, addr: usize) -> Result<usize>
    {
        if let Some(dependency) = &self.dependency {
            if let Some(mapped) = dependency.mapped.addr_of(addr) {
                let offset = mapped.offset_from(dependency.mapped.bottom());
                return Ok(offset.unwrap_or(0));
            }
        }
        let in_buffer = self.buffer()
            .map_or(false, |b| b.range().contains(addr));
        let addr = if in_buffer { Addr::new(addr) }
                   else { self.get_output_addr(addr)? };
        self.buffer_to_offset(addr)
    }

    /* ---------------------------------------------------------------------- */
    /*                               Statistics                               */
    /* ---------------------------------------------------------------------- */

    /// Log the allocation statistics.
    pub fn print_stats(&self)
    {
        let used = |kind| self.region(kind).map_or(0, Region::used);
        self.stats.print(used(RegionKind::Mutable), used(RegionKind::ReadOnly));
    }

    /* ---------------------------------------------------------------------- */
    /*                              Whole pipeline                            */
    /* ---------------------------------------------------------------------- */

    /// Run the whole pipeline.
    ///
    /// Dispatch tables are prepared from `templates` right after the
    /// buffer is reserved. `freeze` runs between the two relocation passes.
    pub fn build<F>(
        &mut self,
        roots: &[usize],
        advisories: SizeAdvisories,
        templates: &[DispatchTemplate],
        freeze: F,
    ) -> Result<()>
        where F: FnOnce(&mut Self) -> Result<()>
    {
        self.gather_source_objs(roots)?;

        let other = DispatchTables::estimate(templates);
        let advisories = SizeAdvisories{
            other: advisories.other.saturating_add(other),
            ..advisories
        };
        self.reserve_buffer(advisories)?;

        let tables = DispatchTables::prepare(self, templates)?;
        self.dump_mutable(&tables)?;
        self.dump_read_only(&tables)?;
        self.relocate_embedded_pointers()?;
        freeze(self)?;
        self.relocate_to_requested()
    }
}
