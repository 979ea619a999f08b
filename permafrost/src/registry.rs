//! Registration of source objects.
//!
//! Every object discovered while gathering gets one [`SourceObjInfo`]
//! in the [`Registry`], keyed by its source address.
//! Objects that are copied are additionally appended to the
//! [`SourceObjList`] of their region, which assigns each of them
//! a range of bits in the region's [pointer ledger][`PointerLedger`].

use {
    crate::{
        address::{Addr, Buffer, Mapped, WORD, align_up, is_aligned},
        error::InvariantViolation,
        ledger::PointerLedger,
        object::{Disposition, ObjectKind},
    },
    bitflags::bitflags,
    std::{collections::HashMap, ops::Range},
};

bitflags!
{
    /// Properties of a registered source object.
    pub struct SourceFlags: u8
    {
        /// The object belongs in the read-only region.
        const READ_ONLY            = 1 << 0;

        /// At least one ledger bit is set for the object.
        const HAS_EMBEDDED_POINTER = 1 << 1;

        /// The entry stands in for an object replaced by a substitute.
        const REGENERATED_ALIAS    = 1 << 2;
    }
}

/// Index of an entry in the [`Registry`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectId(usize);

/// Bookkeeping for one source object.
#[derive(Clone, Debug)]
pub struct SourceObjInfo
{
    source_addr: usize,
    disposition: Disposition,
    kind: ObjectKind,
    size: usize,
    flags: SourceFlags,

    /// Set once, when the object is copied.
    output_addr: Option<Addr<Buffer>>,

    /// Word offsets into the region's ledger; only for copied objects.
    ledger_range: Option<Range<usize>>,
}

/// Where pointers to a source object end up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolution
{
    /// The copy of the object in the output buffer.
    Output(Addr<Buffer>),

    /// The object in the mapped dependency archive.
    Existing(Addr<Mapped>),

    /// Nothing; the pointer becomes null.
    Null,
}

impl SourceObjInfo
{
    /// Describe a newly discovered object.
    pub fn new(
        source_addr: usize,
        disposition: Disposition,
        kind: ObjectKind,
        size: usize,
        read_only: bool,
    ) -> Self
    {
        let mut flags = SourceFlags::empty();
        flags.set(SourceFlags::READ_ONLY, read_only);
        Self{
            source_addr,
            disposition,
            kind,
            size,
            flags,
            output_addr: None,
            ledger_range: None,
        }
    }

    #[allow(missing_docs)]
    pub fn source_addr(&self) -> usize { self.source_addr }

    #[allow(missing_docs)]
    pub fn disposition(&self) -> Disposition { self.disposition }

    #[allow(missing_docs)]
    pub fn kind(&self) -> ObjectKind { self.kind }

    /// Size of the object in bytes.
    pub fn size(&self) -> usize { self.size }

    #[allow(missing_docs)]
    pub fn flags(&self) -> SourceFlags { self.flags }

    #[allow(missing_docs)]
    pub fn read_only(&self) -> bool
    {
        self.flags.contains(SourceFlags::READ_ONLY)
    }

    #[allow(missing_docs)]
    pub fn should_copy(&self) -> bool
    {
        self.disposition == Disposition::Copy
    }

    /// Where the object was copied to, if it was.
    pub fn output_addr(&self) -> Option<Addr<Buffer>>
    {
        self.output_addr
    }

    /// The object's bits in its region's ledger.
    pub fn ledger_range(&self) -> Option<Range<usize>>
    {
        self.ledger_range.clone()
    }

    /// Where pointers to this object end up.
    ///
    /// Returns [`None`] for an object that is copied
    /// but whose copy has not been made yet.
    pub fn resolution(&self) -> Option<Resolution>
    {
        match self.disposition {
            Disposition::Copy =>
                self.output_addr.map(Resolution::Output),
            Disposition::AliasToExisting =>
                Some(Resolution::Existing(Addr::new(self.source_addr))),
            Disposition::NullOut =>
                Some(Resolution::Null),
        }
    }
}

/* -------------------------------------------------------------------------- */
/*                                  Registry                                  */
/* -------------------------------------------------------------------------- */

/// Mapping from source addresses to their bookkeeping,
/// and from output addresses back to source addresses.
#[derive(Default)]
pub struct Registry
{
    objects: Vec<SourceObjInfo>,
    by_source: HashMap<usize, ObjectId>,
    by_output: HashMap<Addr<Buffer>, usize>,
}

impl Registry
{
    /// Create an empty registry.
    pub fn new() -> Self
    {
        Self::default()
    }

    /// The number of registered source addresses, aliases included.
    pub fn len(&self) -> usize
    {
        self.objects.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool
    {
        self.objects.is_empty()
    }

    /// Register `info` unless its source address is already registered.
    ///
    /// Returns the entry for the source address,
    /// and whether it was newly created.
    pub fn put_if_absent(&mut self, info: SourceObjInfo) -> (ObjectId, bool)
    {
        if let Some(id) = self.by_source.get(&info.source_addr) {
            return (*id, false);
        }
        let id = ObjectId(self.objects.len());
        self.by_source.insert(info.source_addr, id);
        self.objects.push(info);
        (id, true)
    }

    /// The entry for a source address.
    pub fn id_of(&self, source_addr: usize) -> Option<ObjectId>
    {
        self.by_source.get(&source_addr).copied()
    }

    /// The bookkeeping for a source address.
    pub fn get(&self, source_addr: usize) -> Option<&SourceObjInfo>
    {
        self.id_of(source_addr).map(|id| &self.objects[id.0])
    }

    #[allow(missing_docs)]
    pub fn info(&self, id: ObjectId) -> &SourceObjInfo
    {
        &self.objects[id.0]
    }

    #[allow(missing_docs)]
    pub fn info_mut(&mut self, id: ObjectId) -> &mut SourceObjInfo
    {
        &mut self.objects[id.0]
    }

    /// Record that a copied object now lives at `output`.
    pub fn set_output_addr(&mut self, id: ObjectId, output: Addr<Buffer>)
        -> Result<(), InvariantViolation>
    {
        let info = &mut self.objects[id.0];
        if !info.should_copy() || info.output_addr.is_some() {
            return Err(InvariantViolation::CopiedTwice{
                kind: info.kind,
                object: info.source_addr,
            });
        }
        if self.by_output.insert(output, info.source_addr).is_some() {
            return Err(InvariantViolation::DuplicateOutput(output.get()));
        }
        info.output_addr = Some(output);
        Ok(())
    }

    /// Record that `original` was replaced by `substitute`.
    ///
    /// Afterwards both addresses resolve to the same location.
    /// The substitute must already be registered,
    /// and the original must not be.
    pub fn record_alias(&mut self, original: usize, substitute: usize)
        -> Result<(), InvariantViolation>
    {
        let info = self.get(substitute)
            .filter(|info| info.resolution().is_some())
            .ok_or(InvariantViolation::SubstituteNotArchived{
                original,
                substitute,
            })?;

        let alias = SourceObjInfo{
            source_addr: original,
            flags: (info.flags & SourceFlags::READ_ONLY)
                | SourceFlags::REGENERATED_ALIAS,
            ledger_range: None,
            ..info.clone()
        };

        match self.put_if_absent(alias) {
            (_, true)  => Ok(()),
            (_, false) => Err(InvariantViolation::DuplicateRegistration(original)),
        }
    }

    /// Where pointers to a source address end up.
    pub fn resolve(&self, source_addr: usize)
        -> Result<Resolution, InvariantViolation>
    {
        self.get(source_addr)
            .and_then(SourceObjInfo::resolution)
            .ok_or(InvariantViolation::UnresolvedPointer(source_addr))
    }

    /// The output address of a copied source object.
    pub fn output_addr(&self, source_addr: usize)
        -> Result<Addr<Buffer>, InvariantViolation>
    {
        self.get(source_addr)
            .and_then(SourceObjInfo::output_addr)
            .ok_or(InvariantViolation::UnresolvedPointer(source_addr))
    }

    /// The source address of the object copied to `output`.
    pub fn source_addr(&self, output: Addr<Buffer>) -> Option<usize>
    {
        self.by_output.get(&output).copied()
    }
}

/* -------------------------------------------------------------------------- */
/*                             Source object lists                            */
/* -------------------------------------------------------------------------- */

/// The objects accepted into one region, in discovery order.
///
/// The same order drives both copying and relocation.
#[derive(Default)]
pub struct SourceObjList
{
    objs: Vec<ObjectId>,

    /// One bit per word of the accepted objects, laid out back to back.
    ledger: PointerLedger,

    /// Word-aligned size of the accepted objects laid out back to back.
    total_bytes: usize,
}

impl SourceObjList
{
    #[allow(missing_docs)]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// The accepted objects, in discovery order.
    pub fn objs(&self) -> &[ObjectId]
    {
        &self.objs
    }

    #[allow(missing_docs)]
    pub fn ledger(&self) -> &PointerLedger
    {
        &self.ledger
    }

    #[allow(missing_docs)]
    pub fn total_bytes(&self) -> usize
    {
        self.total_bytes
    }

    /// Accept an object and assign it a range of ledger bits.
    pub fn append(&mut self, id: ObjectId, info: &mut SourceObjInfo)
    {
        debug_assert!(is_aligned(self.total_bytes, WORD));
        debug_assert!(info.ledger_range.is_none());

        let start = self.total_bytes / WORD;
        // There is no need to check for overflow here,
        // because the objects exist in memory side by side.
        self.total_bytes = align_up(self.total_bytes + info.size, WORD)
            .unwrap_or(usize::MAX);
        let end = self.total_bytes / WORD;

        info.ledger_range = Some(start .. end);
        self.ledger.reserve_bit(end);
        self.objs.push(id);
    }

    /// Remember that the accepted object `info` holds a pointer at `field`.
    pub fn remember_embedded_pointer(
        &mut self,
        info: &mut SourceObjInfo,
        field: usize,
    ) -> Result<(), InvariantViolation>
    {
        let bad_field = || InvariantViolation::BadField{
            object: info.source_addr,
            field,
            size: info.size,
        };

        let range = info.ledger_range.clone().ok_or_else(bad_field)?;
        let offset = field.checked_sub(info.source_addr)
            .filter(|o| is_aligned(*o, WORD))
            .filter(|o| o.checked_add(WORD).map_or(false, |e| e <= info.size))
            .ok_or_else(bad_field)?;

        let index = range.start + offset / WORD;
        debug_assert!(index < range.end);
        self.ledger.set(index);
        info.flags.insert(SourceFlags::HAS_EMBEDDED_POINTER);
        Ok(())
    }

    /// Byte offsets, within the object, of the pointers it holds.
    pub fn pointer_offsets<'a>(&'a self, info: &SourceObjInfo)
        -> impl Iterator<Item=usize> + 'a
    {
        let range = info.ledger_range.clone().unwrap_or(0 .. 0);
        let start = range.start;
        self.ledger.ones_in(range).map(move |bit| (bit - start) * WORD)
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn copy_info(addr: usize, size: usize) -> SourceObjInfo
    {
        SourceObjInfo::new(addr, Disposition::Copy, ObjectKind::Other, size, false)
    }

    #[test]
    fn ledger_ranges_are_word_aligned_and_disjoint()
    {
        let mut registry = Registry::new();
        let mut list = SourceObjList::new();
        for (addr, size) in [(0x1000, 12), (0x2000, 8), (0x3000, 1), (0x4000, 40)] {
            let (id, created) = registry.put_if_absent(copy_info(addr, size));
            assert!(created);
            list.append(id, registry.info_mut(id));
        }

        let ranges: Vec<_> =
            list.objs().iter()
            .map(|id| registry.info(*id).ledger_range().unwrap())
            .collect();
        assert_eq!(ranges, [0 .. 2, 2 .. 3, 3 .. 4, 4 .. 9]);
        assert_eq!(list.total_bytes(), 72);
        assert!(list.ledger().len() > 9);
    }

    #[test]
    fn remember_embedded_pointer_checks_field_bounds()
    {
        let mut registry = Registry::new();
        let mut list = SourceObjList::new();
        let (id, _) = registry.put_if_absent(copy_info(0x1000, 24));
        list.append(id, registry.info_mut(id));

        let info = registry.info_mut(id);
        list.remember_embedded_pointer(info, 0x1008).unwrap();
        list.remember_embedded_pointer(info, 0x1010).unwrap();
        assert!(list.remember_embedded_pointer(info, 0x1018).is_err());
        assert!(list.remember_embedded_pointer(info, 0x1004).is_err());
        assert!(list.remember_embedded_pointer(info, 0x0ff8).is_err());
        assert!(info.flags().contains(SourceFlags::HAS_EMBEDDED_POINTER));

        let info = registry.info(id);
        assert_eq!(list.pointer_offsets(info).collect::<Vec<_>>(), [8, 16]);
    }

    #[test]
    fn aliases_resolve_like_their_substitute()
    {
        let mut registry = Registry::new();
        let (id, _) = registry.put_if_absent(copy_info(0x2000, 16));
        let output = Addr::new(0x7000);
        registry.set_output_addr(id, output).unwrap();

        registry.record_alias(0x1000, 0x2000).unwrap();
        assert_eq!(registry.output_addr(0x1000), Ok(output));
        assert_eq!(registry.output_addr(0x2000), Ok(output));
        assert_eq!(registry.source_addr(output), Some(0x2000));
        assert!(registry.get(0x1000).unwrap().flags()
            .contains(SourceFlags::REGENERATED_ALIAS));

        assert_eq!(
            registry.record_alias(0x1000, 0x2000),
            Err(InvariantViolation::DuplicateRegistration(0x1000)),
        );
        assert_eq!(
            registry.record_alias(0x3000, 0x4000),
            Err(InvariantViolation::SubstituteNotArchived{
                original: 0x3000,
                substitute: 0x4000,
            }),
        );
    }

    #[test]
    fn outputs_are_set_once()
    {
        let mut registry = Registry::new();
        let (id, _) = registry.put_if_absent(copy_info(0x2000, 16));
        registry.set_output_addr(id, Addr::new(0x7000)).unwrap();
        assert!(registry.set_output_addr(id, Addr::new(0x8000)).is_err());

        let null = SourceObjInfo::new(
            0x3000, Disposition::NullOut, ObjectKind::ProfileData, 8, false);
        let (id, _) = registry.put_if_absent(null);
        assert!(registry.set_output_addr(id, Addr::new(0x9000)).is_err());
        assert_eq!(registry.resolve(0x3000), Ok(Resolution::Null));
        assert_eq!(
            registry.resolve(0x5000),
            Err(InvariantViolation::UnresolvedPointer(0x5000)),
        );
    }
}
