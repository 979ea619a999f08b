//! Archive-local dispatch tables.
//!
//! Some objects start with a pointer to a table of entry points shared
//! by all objects of their kind. The traversal does not report these
//! pointers, so the builder overwrites them with pointers to copies
//! of the tables that live in the archive itself.

use {
    crate::{
        address::{Addr, Buffer, WORD},
        builder::ArchiveBuilder,
        error::Result,
        host::DispatchTableProvider,
        object::ObjectKind,
    },
    std::collections::BTreeMap,
    tracing::debug,
};

/// Entries of the dispatch table shared by objects of one kind.
#[derive(Clone, Copy, Debug)]
pub struct DispatchTemplate<'a>
{
    /// Objects of this kind point at the table.
    pub kind: ObjectKind,

    /// The entries, which are copied verbatim.
    pub entries: &'a [usize],
}

/// Dispatch tables prepared in the mutable region.
#[derive(Debug, Default)]
pub struct DispatchTables
{
    tables: BTreeMap<ObjectKind, Addr<Buffer>>,
}

impl DispatchTables
{
    /// Bytes needed for the tables.
    pub fn estimate(templates: &[DispatchTemplate]) -> usize
    {
        templates.iter().map(|t| t.entries.len() * WORD).sum()
    }

    /// Copy the tables into the current region of the builder.
    ///
    /// This must be done after the buffer is reserved
    /// and before any object that points at a table is copied.
    pub fn prepare(builder: &mut ArchiveBuilder, templates: &[DispatchTemplate])
        -> Result<Self>
    {
        let mut tables = BTreeMap::new();
        for template in templates {
            let bytes = template.entries.len() * WORD;
            let table = builder.allocate_other(bytes)?;
            for (i, &entry) in template.entries.iter().enumerate() {
                let slot = Addr::new(table.get() + i * WORD);
                builder.write_word(slot, entry)?;
            }
            debug!("Prepared {} dispatch table at {} ({} entries)",
                   template.kind, table, template.entries.len());
            tables.insert(template.kind, table);
        }
        Ok(Self{tables})
    }

    /// Where the table for objects of a kind was prepared.
    pub fn get(&self, kind: ObjectKind) -> Option<Addr<Buffer>>
    {
        self.tables.get(&kind).copied()
    }
}

impl DispatchTableProvider for DispatchTables
{
    fn prepared_table_for(&self, kind: ObjectKind, _output: Addr<Buffer>)
        -> Option<Addr<Buffer>>
    {
        self.get(kind)
    }
}

#[cfg(test)]
mod tests
{
    use {
        super::*,
        crate::{
            builder::session_lock,
            config::BuildConfig,
            heap::Heap,
            host::SizeAdvisories,
            region::RegionKind,
        },
    };

    #[test]
    fn tables_are_prepared_and_installed()
    {
        let _lock = session_lock();
        Heap::with(|heap| {
            let descriptor = heap.alloc_named(ObjectKind::TypeDescriptor, 3, "T");
            let entries = [0x1111, 0x2222, 0x3333];
            let templates = [DispatchTemplate{
                kind: ObjectKind::TypeDescriptor,
                entries: &entries,
            }];

            let mut builder =
                ArchiveBuilder::new(BuildConfig::default(), None, heap.host())
                .unwrap();
            builder.gather_source_objs(&[descriptor.addr()]).unwrap();
            let advisories = SizeAdvisories{
                other: DispatchTables::estimate(&templates),
                ..SizeAdvisories::default()
            };
            assert_eq!(advisories.other, 24);
            builder.reserve_buffer(advisories).unwrap();

            let tables = DispatchTables::prepare(&mut builder, &templates).unwrap();
            let table = tables.get(ObjectKind::TypeDescriptor).unwrap();
            assert!(tables.get(ObjectKind::Procedure).is_none());
            assert_eq!(builder.stats().mutable.other.bytes, 24);

            builder.dump_mutable(&tables).unwrap();
            builder.dump_read_only(&tables).unwrap();

            let buffer = builder.buffer().unwrap();
            let table_offset = buffer.offset_of(table.get()).unwrap();
            assert_eq!(buffer.read_word(table_offset + WORD), 0x2222);

            // The first word of the copy points at the table, and is marked.
            let dest = builder.get_output_addr(descriptor.addr()).unwrap();
            let dest_offset = buffer.offset_of(dest.get()).unwrap();
            assert_eq!(buffer.read_word(dest_offset), table.get());
            assert!(builder.ptrmap().unwrap().get(dest_offset / WORD));
            // Table entries are not relocated.
            assert!(!builder.ptrmap().unwrap().get(table_offset / WORD));
            assert_eq!(builder.region(RegionKind::Mutable).unwrap().kind(),
                       RegionKind::Mutable);
        });
    }
}
