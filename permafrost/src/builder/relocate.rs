//! The two relocation passes.
//!
//! Right after copying, every recorded slot still holds the source
//! address it had in the host. The first pass rewires these to output
//! addresses, so that the archive is consistent within the buffer.
//! After the host has frozen the copies, the second pass shifts every
//! pointer to where its target will be once the archive is mapped.

use {
    super::{ArchiveBuilder, Output, Stage},
    crate::{
        address::{AddrRange, Buffer, WORD},
        error::{InvariantViolation, Result},
        registry::{Registry, Resolution, SourceObjList},
    },
    tracing::{debug, info, trace},
};

impl<'h> ArchiveBuilder<'h>
{
    /// Point every recorded slot at the archived copy of its target.
    ///
    /// Slots that point at objects in the dependency archive keep
    /// their value, and slots that point at nulled-out objects
    /// become null and are not recorded in the archive's ledger.
    pub fn relocate_embedded_pointers(&mut self) -> Result<()>
    {
        self.expect_stage(Stage::ReadOnlyCopied, "relocate_embedded_pointers")?;
        info!("Relocating embedded pointers in core regions ... ");

        let output = self.output.as_mut()
            .ok_or(InvariantViolation::OutOfOrder{step: "relocate_embedded_pointers"})?;
        relocate_list(&self.registry, &self.mutable_objs, output)?;
        relocate_list(&self.registry, &self.read_only_objs, output)?;

        self.stage = Stage::Wired;
        Ok(())
    }

    /// Pack the read-only region and shift every recorded pointer
    /// to its requested address.
    ///
    /// Null slots are dropped from the ledger,
    /// and the ledger is truncated after its last set bit.
    pub fn relocate_to_requested(&mut self) -> Result<()>
    {
        self.expect_stage(Stage::Wired, "relocate_to_requested")?;

        let dependency = self.dependency;
        let output = self.output.as_mut()
            .ok_or(InvariantViolation::OutOfOrder{step: "relocate_to_requested"})?;
        output.allocator.pack();

        let bottom = output.buffer().bottom();
        let used = AddrRange::<Buffer>::from_len(bottom, output.allocator.archive_top())
            .ok_or(InvariantViolation::SlotOutsideBuffer(bottom.get()))?;
        let delta = output.buffer_to_requested;
        let requested = delta.apply_range(used)
            .map_err(|err| InvariantViolation::RelocatedOutOfRange{
                value: err.addr,
                relocated: usize::MAX,
            })?;
        output.requested_top = Some(requested.top());

        debug!("Relocating archive from {:?} to {:?}", used, requested);

        let Output{allocator, ptrmap, ..} = output;
        let buffer = allocator.buffer_mut();
        let mut max_non_null = None;

        ptrmap.try_retain(|index| {
            let offset = index * WORD;
            let value = buffer.read_word(offset);
            if value == 0 {
                return Ok(false);
            }

            let out_of_range = InvariantViolation::PointerOutOfRange{offset, value};
            let relocated =
                if let Some(addr) = used.addr_of(value) {
                    let relocated = delta.apply(addr)
                        .map_err(|_| out_of_range.clone())?;
                    requested.contains(relocated.get()).then(|| relocated.get())
                } else if let Some(dependency) = &dependency {
                    let addr = dependency.mapped.addr_of(value)
                        .ok_or_else(|| out_of_range.clone())?;
                    let relocated = dependency.mapped_to_requested.apply(addr)
                        .map_err(|_| out_of_range.clone())?;
                    dependency.requested.contains(relocated.get())
                        .then(|| relocated.get())
                } else {
                    return Err(out_of_range);
                };

            let relocated = relocated.ok_or(
                InvariantViolation::RelocatedOutOfRange{value, relocated: 0}
            )?;
            trace!(target: "permafrost::reloc",
                   "Final: [{:#x}] {:#x} => {:#x}", offset, value, relocated);
            buffer.write_word(offset, relocated);
            max_non_null = Some(index);
            Ok(true)
        })?;

        ptrmap.compact(max_non_null);
        info!("Archive has {} pointers to relocate", ptrmap.count_ones());

        self.stage = Stage::Relocated;

        if self.config.log_map {
            self.log_map();
        }
        Ok(())
    }
}

/// Rewire the recorded slots of the objects in one region.
fn relocate_list(registry: &Registry, list: &SourceObjList, output: &mut Output)
    -> Result<()>
{
    for &id in list.objs() {
        let info = registry.info(id);
        let dest = info.output_addr()
            .ok_or(InvariantViolation::UnresolvedPointer(info.source_addr()))?;
        let base = output.slot_offset(dest)?;

        for field_offset in list.pointer_offsets(info) {
            let offset = base + field_offset;
            let old = output.buffer().read_word(offset);
            let new = match registry.resolve(old)? {
                Resolution::Output(addr)   => addr.get(),
                Resolution::Existing(addr) => addr.get(),
                Resolution::Null           => 0,
            };
            trace!(target: "permafrost::reloc",
                   "Ref: [{:#x}] -> {:#x} => {:#x}",
                   dest.get() + field_offset, old, new);
            output.set_and_mark(offset, new);
        }
    }
    Ok(())
}
