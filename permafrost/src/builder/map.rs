//! Human-readable map of the archive.
//!
//! Everything is logged in requested coordinates, so that maps of
//! repeated builds from the same input can be compared line by line.

use {
    super::{ArchiveBuilder, Output},
    crate::{address::{Addr, WORD}, region::RegionKind, registry::SourceObjList},
    tracing::{Level, enabled, info, trace},
};

const TARGET: &str = "permafrost::map";
const BYTES_PER_LINE: usize = 32;

impl<'h> ArchiveBuilder<'h>
{
    /// Log the regions of the archive and the objects in them.
    ///
    /// Object contents are dumped at trace level.
    pub fn log_map(&self)
    {
        let Some(output) = &self.output else { return };

        let flavor = if self.is_incremental() { "Incremental" } else { "Full" };
        info!(target: TARGET, "{} archive map", flavor);

        self.log_region(output, RegionKind::Mutable, &self.mutable_objs);
        self.log_region(output, RegionKind::ReadOnly, &self.read_only_objs);

        let bitmap = output.ptrmap.to_bytes();
        info!(target: TARGET, "[{:<18} {:>9} bytes]", "bitmap", bitmap.len());
        log_data(&bitmap, 0);

        info!(target: TARGET, "[End of archive map]");
    }

    fn log_region(&self, output: &Output, kind: RegionKind, objs: &SourceObjList)
    {
        let region = output.allocator.region(kind);
        let requested = |offset: usize| requested_of(output, offset);

        info!(target: TARGET, "[{:<18} {:#018x} - {:#018x} {:>9} bytes]",
              format!("{} region", kind.short_name()),
              requested(region.base()), requested(region.top()), region.used());

        let bytes = output.buffer().as_slice();
        let bottom = output.buffer().bottom().get();
        let mut last_obj_base = region.base();
        let mut last_obj_end = region.base();

        for &id in objs.objs() {
            let info = self.registry.info(id);
            let Some(dest) = info.output_addr() else { continue };
            let dest = dest.get() - bottom;

            log_data(&bytes[last_obj_base .. dest], requested(last_obj_base));

            let name = self.host.model.describe(info.source_addr(), info.kind());
            info!(target: TARGET, "{:#018x}: @@ {:<17} {} {}",
                  requested(dest), info.kind(), info.size(),
                  name.as_deref().unwrap_or(""));

            last_obj_base = dest;
            last_obj_end = dest + info.size();
        }

        log_data(&bytes[last_obj_base .. last_obj_end], requested(last_obj_base));
        if last_obj_end < region.end() {
            info!(target: TARGET, "{:#018x}: @@ Misc data {} bytes",
                  requested(last_obj_end), region.end() - last_obj_end);
            log_data(&bytes[last_obj_end .. region.end()], requested(last_obj_end));
        }
    }
}

/// Requested address of a buffer offset.
fn requested_of(output: &Output, offset: usize) -> usize
{
    let addr = Addr::new(output.buffer().bottom().get() + offset);
    output.buffer_to_requested.apply(addr).map_or(0, Addr::get)
}

/// Hex dump of `bytes`, pretending they live at `requested`.
fn log_data(bytes: &[u8], requested: usize)
{
    if !enabled!(target: TARGET, Level::TRACE) {
        return;
    }
    for (i, line) in bytes.chunks(BYTES_PER_LINE).enumerate() {
        let words: Vec<String> =
            line.chunks(WORD)
            .map(|chunk| {
                let mut word = [0; WORD];
                word[.. chunk.len()].copy_from_slice(chunk);
                format!("{:016x}", usize::from_ne_bytes(word))
            })
            .collect();
        trace!(target: TARGET, "{:#018x}: {}",
               requested + i * BYTES_PER_LINE, words.join(" "));
    }
}
