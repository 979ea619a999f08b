use {
    permafrost::{
        address::{Addr, WORD},
        builder::{Archive, ArchiveBuilder, DependencyArchive},
        config::BuildConfig,
        dispatch::{DispatchTables, DispatchTemplate},
        error::{BuildError, InvariantViolation},
        heap::{Heap, Object},
        host::{NoDispatchTables, SizeAdvisories},
        object::{Disposition, ObjectKind},
        region::RegionKind,
    },
    proptest::{self as p, proptest},
    std::{
        collections::BTreeMap,
        sync::{Mutex, MutexGuard, PoisonError},
    },
};

const BASE: usize = 0x8_0000_0000;
const ALIGN: usize = 4096;

/// Only one build session may exist in the process at a time.
fn session_lock() -> MutexGuard<'static, ()>
{
    static LOCK: Mutex<()> = Mutex::new(());
    LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

fn config() -> BuildConfig
{
    BuildConfig{
        requested_base_address: BASE,
        region_alignment: ALIGN,
        ..BuildConfig::default()
    }
}

/// Run every step up to and including the intra-archive pass.
fn wire(builder: &mut ArchiveBuilder, roots: &[usize])
{
    builder.gather_source_objs(roots).unwrap();
    builder.reserve_buffer(SizeAdvisories::default()).unwrap();
    builder.dump_mutable(&NoDispatchTables).unwrap();
    builder.dump_read_only(&NoDispatchTables).unwrap();
    builder.relocate_embedded_pointers().unwrap();
}

/// Word `index` of a finished archive.
fn archive_word(archive: &Archive, index: usize) -> usize
{
    let offset = index * WORD;
    let rw = archive.mutable.len();
    let bytes = if offset < rw { &archive.mutable[offset .. offset + WORD] }
                else { &archive.read_only[offset - rw .. offset - rw + WORD] };
    usize::from_ne_bytes(bytes.try_into().unwrap())
}

/// Word `index` of the archive that holds the pointer at `field`
/// of the archived copy of `object`.
fn archive_index(builder: &ArchiveBuilder, archive: &Archive, object: Object, field: usize)
    -> usize
{
    let output = builder.get_output_addr(object.addr()).unwrap();
    let requested = builder.to_requested(output).unwrap().get();
    (requested - archive.requested.bottom().get()) / WORD + field
}

#[test]
fn cycle_is_archived_once()
{
    let _lock = session_lock();
    Heap::with(|heap| {
        let a = heap.alloc(ObjectKind::Other, 2);
        let b = heap.alloc(ObjectKind::Other, 2);
        let c = heap.alloc(ObjectKind::Other, 2);
        heap.set_pointer(a, 1, Some(b));
        heap.set_pointer(b, 1, Some(c));
        heap.set_pointer(c, 1, Some(a));
        a.set_word(0, 0xaaaa);

        let mut builder = ArchiveBuilder::new(config(), None, heap.host()).unwrap();
        wire(&mut builder, &[a.addr()]);
        assert_eq!(builder.registry().len(), 3);

        let [oa, ob, oc] = [a, b, c].map(|o| builder.get_output_addr(o.addr()).unwrap());
        {
            let buffer = builder.buffer().unwrap();
            let ptrmap = builder.ptrmap().unwrap();
            for (from, to) in [(oa, ob), (ob, oc), (oc, oa)] {
                let slot = buffer.offset_of(from.get() + WORD).unwrap();
                assert_eq!(buffer.read_word(slot), to.get());
                assert!(ptrmap.get(slot / WORD));
            }
            assert_eq!(buffer.read_word(buffer.offset_of(oa.get()).unwrap()), 0xaaaa);
            assert_eq!(ptrmap.count_ones(), 3);
        }

        builder.relocate_to_requested().unwrap();
        let archive = builder.archive().unwrap();
        assert_eq!(archive.requested.bottom().get(), BASE);
        assert_eq!(archive.ptrmap.count_ones(), 3);

        // The first object follows the bottom padding.
        assert_eq!(builder.to_requested(oa).unwrap().get(), BASE + 16);

        let index = archive_index(&builder, &archive, c, 1);
        assert_eq!(archive_word(&archive, index), BASE + 16);
        for index in archive.ptrmap.ones() {
            assert!(archive.requested.contains(archive_word(&archive, index)));
        }
    });
}

#[test]
fn nulled_out_objects_leave_null_slots()
{
    let _lock = session_lock();
    Heap::with(|heap| {
        let d = heap.alloc(ObjectKind::ProfileData, 2);
        let h = heap.alloc(ObjectKind::Procedure, 2);
        let kept = heap.alloc(ObjectKind::Other, 1);
        heap.set_pointer(h, 0, Some(d));
        heap.set_pointer(h, 1, Some(kept));

        let mut builder = ArchiveBuilder::new(config(), None, heap.host()).unwrap();
        wire(&mut builder, &[h.addr()]);

        let registry = builder.registry();
        assert_eq!(registry.get(d.addr()).unwrap().disposition(), Disposition::NullOut);
        assert!(builder.get_output_addr(d.addr()).is_err());

        let output = builder.get_output_addr(h.addr()).unwrap();
        let buffer = builder.buffer().unwrap();
        let slot = buffer.offset_of(output.get()).unwrap();
        assert_eq!(buffer.read_word(slot), 0);
        assert!(!builder.ptrmap().unwrap().get(slot / WORD));
        assert!(builder.ptrmap().unwrap().get(slot / WORD + 1));

        builder.relocate_to_requested().unwrap();
        let archive = builder.archive().unwrap();
        let index = archive_index(&builder, &archive, h, 0);
        assert_eq!(archive_word(&archive, index), 0);
        assert!(!archive.ptrmap.get(index));
        assert_eq!(archive.ptrmap.len(), index + 2);
    });
}

#[test]
fn base_address_too_high()
{
    let _lock = session_lock();
    let high = usize::MAX & !(ALIGN - 1);

    Heap::with(|heap| {
        let a = heap.alloc(ObjectKind::Other, 1);
        let config = BuildConfig{requested_base_address: high, ..config()};
        let mut builder = ArchiveBuilder::new(config, None, heap.host()).unwrap();
        builder.gather_source_objs(&[a.addr()]).unwrap();
        let err = builder.reserve_buffer(SizeAdvisories::default()).unwrap_err();
        assert!(matches!(
            err,
            BuildError::BaseAddressTooHigh{requested_base, ..} if requested_base == high
        ));
        assert!(err.to_string().contains("lower requested_base_address"));
    });

    // The archive would start past the end of the address space.
    Heap::with_dependency(8, |heap| {
        let a = heap.alloc(ObjectKind::Other, 1);
        let dependency = DependencyArchive{mapped: heap.dependency_range().unwrap()};
        let config = BuildConfig{requested_base_address: high, ..config()};
        let mut builder =
            ArchiveBuilder::new(config, Some(dependency), heap.host()).unwrap();
        builder.gather_source_objs(&[a.addr()]).unwrap();
        assert!(matches!(
            builder.reserve_buffer(SizeAdvisories::default()),
            Err(BuildError::BaseAddressTooHigh{..}),
        ));
    });

    // The dependency itself would not fit.
    Heap::with_dependency(1024, |heap| {
        let dependency = DependencyArchive{mapped: heap.dependency_range().unwrap()};
        let config = BuildConfig{requested_base_address: high, ..config()};
        assert!(matches!(
            ArchiveBuilder::new(config, Some(dependency), heap.host()),
            Err(BuildError::BaseAddressTooHigh{..}),
        ));
    });
}

#[test]
fn capacity_exhaustion_names_the_region()
{
    let _lock = session_lock();
    Heap::with(|heap| {
        let a = heap.alloc(ObjectKind::Other, 1);
        let mut builder = ArchiveBuilder::new(config(), None, heap.host()).unwrap();
        builder.gather_source_objs(&[a.addr()]).unwrap();
        builder.reserve_buffer(SizeAdvisories::default()).unwrap();
        match builder.allocate_other(1 << 30) {
            Err(BuildError::OutOfSpace{region, requested, ..}) => {
                assert_eq!(region, RegionKind::Mutable);
                assert_eq!(requested, 1 << 30);
            },
            other => panic!("Expected OutOfSpace, got {other:?}"),
        }
    });
}

#[test]
fn oversized_reservations_are_reported()
{
    let _lock = session_lock();
    Heap::with(|heap| {
        let a = heap.alloc(ObjectKind::Other, 1);
        let mut builder = ArchiveBuilder::new(config(), None, heap.host()).unwrap();
        builder.gather_source_objs(&[a.addr()]).unwrap();
        let advisories = SizeAdvisories{
            string_table: usize::MAX / 2,
            ..SizeAdvisories::default()
        };
        let err = builder.reserve_buffer(advisories).unwrap_err();
        assert!(matches!(err, BuildError::ReservationFailed{align: ALIGN, ..}));
        assert!(builder.buffer().is_none());
    });
}

#[test]
fn pointers_outside_both_archives_abort_relocation()
{
    let _lock = session_lock();
    Heap::with(|heap| {
        let a = heap.alloc(ObjectKind::Other, 2);
        let mut builder = ArchiveBuilder::new(config(), None, heap.host()).unwrap();
        wire(&mut builder, &[a.addr()]);

        let output = builder.get_output_addr(a.addr()).unwrap();
        let slot = Addr::new(output.get() + WORD);
        builder.set_and_mark_pointer(slot, Addr::new(16)).unwrap();
        let slot_offset = builder.buffer().unwrap().offset_of(slot.get()).unwrap();

        match builder.relocate_to_requested() {
            Err(BuildError::Invariant(
                InvariantViolation::PointerOutOfRange{offset, value},
            )) => {
                assert_eq!(offset, slot_offset);
                assert_eq!(value, 16);
            },
            other => panic!("Expected PointerOutOfRange, got {other:?}"),
        }
        assert!(builder.archive().is_none());
    });
}

#[test]
fn pointers_into_the_unused_buffer_tail_abort_relocation()
{
    let _lock = session_lock();
    Heap::with_dependency(4, |heap| {
        let existing = heap.alloc_in_dependency(ObjectKind::Other, 2).unwrap();
        let procedure = heap.alloc(ObjectKind::Procedure, 2);
        heap.set_pointer(procedure, 0, Some(existing));

        let dependency = DependencyArchive{mapped: heap.dependency_range().unwrap()};
        let mut builder =
            ArchiveBuilder::new(config(), Some(dependency), heap.host()).unwrap();
        wire(&mut builder, &[procedure.addr()]);

        // Past everything that will be packed, so neither
        // in this archive nor in the dependency.
        let tail = builder.buffer().unwrap().range().top().get() - WORD;
        let output = builder.get_output_addr(procedure.addr()).unwrap();
        let slot = Addr::new(output.get() + WORD);
        builder.set_and_mark_pointer(slot, Addr::new(tail)).unwrap();

        assert!(matches!(
            builder.relocate_to_requested(),
            Err(BuildError::Invariant(
                InvariantViolation::PointerOutOfRange{value, ..},
            )) if value == tail
        ));
        assert!(builder.archive().is_none());
    });
}

#[test]
fn estimate_undershoot_is_fatal()
{
    let _lock = session_lock();
    Heap::with(|heap| {
        let a = heap.alloc(ObjectKind::Other, 1);
        let mut builder = ArchiveBuilder::new(config(), None, heap.host()).unwrap();
        builder.gather_source_objs(&[a.addr()]).unwrap();
        builder.reserve_buffer(SizeAdvisories::default()).unwrap();

        builder.allocate_other(64).unwrap();
        match builder.verify_estimate(0, "Other") {
            Err(BuildError::Invariant(
                InvariantViolation::EstimateTooSmall{label, estimate, used},
            )) => {
                assert_eq!(label, "Other");
                assert_eq!(estimate, 0);
                assert_eq!(used, 64);
            },
            other => panic!("Expected EstimateTooSmall, got {other:?}"),
        }
    });

    // Dispatch tables that were not announced in the advisories.
    Heap::with(|heap| {
        let descriptor = heap.alloc_named(ObjectKind::TypeDescriptor, 2, "T");
        let entries = [0x1000, 0x2000];
        let templates = [DispatchTemplate{
            kind: ObjectKind::TypeDescriptor,
            entries: &entries,
        }];

        let mut builder = ArchiveBuilder::new(config(), None, heap.host()).unwrap();
        builder.gather_source_objs(&[descriptor.addr()]).unwrap();
        builder.reserve_buffer(SizeAdvisories::default()).unwrap();
        let tables = DispatchTables::prepare(&mut builder, &templates).unwrap();
        builder.dump_mutable(&tables).unwrap();
        assert!(matches!(
            builder.dump_read_only(&tables),
            Err(BuildError::Invariant(
                InvariantViolation::EstimateTooSmall{label: "Objects", ..},
            ))
        ));
    });
}

/// Build an archive from a small but varied graph.
fn build_sample_archive() -> (Vec<u8>, Vec<u8>, Vec<u8>)
{
    Heap::with(|heap| {
        let names = ["lang/Thread", "lang/Object", "lang/String"];
        let descriptors: Vec<_> =
            names.iter()
            .map(|name| heap.alloc_named(ObjectKind::TypeDescriptor, 4, name))
            .collect();

        let strings: Vec<_> =
            ["main", "run", "<init>"].iter()
            .map(|s| {
                let string = heap.alloc_named(ObjectKind::InternedString, 2, s);
                string.set_word(0, s.len());
                string
            })
            .collect();

        let root = heap.alloc(ObjectKind::Array, descriptors.len());
        for (i, &descriptor) in descriptors.iter().enumerate() {
            let procedure = heap.alloc(ObjectKind::Procedure, 3);
            let body = heap.alloc(ObjectKind::ProcedureBody, 4);
            let profile = heap.alloc(ObjectKind::ProfileData, 2);
            heap.set_pointer(root, i, Some(descriptor));
            heap.set_pointer(descriptor, 1, Some(procedure));
            heap.set_pointer(descriptor, 2, Some(strings[(i + 1) % strings.len()]));
            heap.set_pointer(procedure, 0, Some(descriptor));
            heap.set_pointer(procedure, 1, Some(body));
            heap.set_pointer(procedure, 2, Some(profile));
            heap.set_pointer(body, 0, Some(strings[i]));
            body.set_word(3, 0xc0de + i);
        }

        let entries = [0x1000, 0x2000];
        let templates = [DispatchTemplate{
            kind: ObjectKind::TypeDescriptor,
            entries: &entries,
        }];

        let config = BuildConfig{log_map: true, ..config()};
        let mut builder = ArchiveBuilder::new(config, None, heap.host()).unwrap();
        builder.build(&[root.addr()], SizeAdvisories::default(), &templates, |_| Ok(()))
            .unwrap();
        builder.print_stats();

        let archive = builder.archive().unwrap();
        (archive.mutable.to_vec(), archive.read_only.to_vec(), archive.ptrmap.to_bytes())
    })
}

#[test]
fn builds_are_deterministic()
{
    let _lock = session_lock();
    let first = build_sample_archive();
    let second = build_sample_archive();
    assert_eq!(first, second);
    assert!(!first.1.is_empty());
    assert!(first.2.iter().any(|b| *b != 0));
}

#[test]
fn dependency_pointers_shift_to_the_requested_dependency()
{
    let _lock = session_lock();
    Heap::with_dependency(8, |heap| {
        let existing = heap.alloc_in_dependency(ObjectKind::TypeDescriptor, 3).unwrap();
        let mapped = heap.dependency_range().unwrap();
        assert!(heap.alloc_in_dependency(ObjectKind::Other, 6).is_none());

        let procedure = heap.alloc(ObjectKind::Procedure, 3);
        let body = heap.alloc(ObjectKind::ProcedureBody, 2);
        heap.set_pointer(procedure, 0, Some(existing));
        heap.set_pointer(procedure, 1, Some(body));
        heap.set_pointer(body, 0, Some(procedure));

        let dependency = DependencyArchive{mapped};
        let mut builder =
            ArchiveBuilder::new(config(), Some(dependency), heap.host()).unwrap();
        assert!(builder.is_incremental());
        builder.build(&[procedure.addr()], SizeAdvisories::default(), &[], |_| Ok(()))
            .unwrap();

        let info = builder.registry().get(existing.addr()).unwrap();
        assert_eq!(info.disposition(), Disposition::AliasToExisting);

        let archive = builder.archive().unwrap();
        // The dependency occupies 64 bytes; the archive starts at the next region.
        assert_eq!(archive.requested.bottom().get(), BASE + ALIGN);

        let dependency_requested = BASE .. BASE + mapped.len();
        assert_eq!(archive.ptrmap.count_ones(), 3);
        for index in archive.ptrmap.ones() {
            let value = archive_word(&archive, index);
            assert!(archive.requested.contains(value)
                    || dependency_requested.contains(&value));
        }

        let existing_offset = existing.addr() - mapped.bottom().get();
        let index = archive_index(&builder, &archive, procedure, 0);
        assert_eq!(archive_word(&archive, index), BASE + existing_offset);
        assert_eq!(builder.any_to_offset(existing.addr()).unwrap(), existing_offset);

        let output = builder.get_output_addr(procedure.addr()).unwrap();
        let requested = builder.to_requested(output).unwrap().get();
        assert_eq!(builder.any_to_offset(procedure.addr()).unwrap(), requested - BASE);
        assert_eq!(builder.buffer_to_offset(output).unwrap(), requested - BASE);
    });
}

#[test]
fn array_descriptors_are_left_out_of_incremental_archives()
{
    let _lock = session_lock();
    Heap::with_dependency(4, |heap| {
        let array = heap.alloc(ObjectKind::ArrayDescriptor, 2);
        let holder = heap.alloc(ObjectKind::Other, 1);
        heap.set_pointer(holder, 0, Some(array));

        let dependency = DependencyArchive{mapped: heap.dependency_range().unwrap()};
        let mut builder =
            ArchiveBuilder::new(config(), Some(dependency), heap.host()).unwrap();
        builder.gather_source_objs(&[holder.addr()]).unwrap();
        let info = builder.registry().get(array.addr()).unwrap();
        assert_eq!(info.disposition(), Disposition::NullOut);
    });
}

#[test]
fn regenerated_objects_alias_their_substitutes()
{
    let _lock = session_lock();
    Heap::with(|heap| {
        let original = heap.alloc(ObjectKind::Procedure, 2);
        let substitute = heap.alloc(ObjectKind::Procedure, 2);
        heap.substitute(original, substitute);

        let holder = heap.alloc(ObjectKind::Other, 2);
        heap.set_pointer(holder, 0, Some(original));
        heap.set_pointer(holder, 1, Some(substitute));

        let mut builder = ArchiveBuilder::new(config(), None, heap.host()).unwrap();
        builder.build(&[holder.addr()], SizeAdvisories::default(), &[], |builder| {
            let copy = builder.get_output_addr(substitute.addr())?;
            assert_eq!(builder.get_output_addr(original.addr())?, copy);
            assert_eq!(builder.get_source_addr(copy)?, substitute.addr());

            let again = builder.record_regenerated_object(original.addr(), substitute.addr());
            assert!(matches!(
                again,
                Err(BuildError::Invariant(InvariantViolation::DuplicateRegistration(a)))
                    if a == original.addr()
            ));
            Ok(())
        }).unwrap();

        assert_eq!(builder.registry().len(), 3);
        let archive = builder.archive().unwrap();
        let index = archive_index(&builder, &archive, holder, 0);
        assert_eq!(archive_word(&archive, index), archive_word(&archive, index + 1));
        assert!(archive.ptrmap.get(index));
    });
}

#[test]
fn substitutes_must_be_archived()
{
    let _lock = session_lock();
    Heap::with(|heap| {
        let original = heap.alloc(ObjectKind::Procedure, 2);
        let substitute = heap.alloc(ObjectKind::Procedure, 2);
        heap.substitute(original, substitute);
        let holder = heap.alloc(ObjectKind::Other, 1);
        heap.set_pointer(holder, 0, Some(original));

        let mut builder = ArchiveBuilder::new(config(), None, heap.host()).unwrap();
        let err = builder
            .build(&[holder.addr()], SizeAdvisories::default(), &[], |_| Ok(()))
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::Invariant(InvariantViolation::SubstituteNotArchived{..}),
        ));
        assert!(builder.archive().is_none());
    });
}

#[test]
fn hand_assembled_pointers()
{
    let _lock = session_lock();
    Heap::with(|heap| {
        let pool = heap.alloc(ObjectKind::ConstantPool, 2);
        let profile = heap.alloc(ObjectKind::ProfileData, 1);
        heap.set_pointer(pool, 0, Some(profile));

        let mut builder = ArchiveBuilder::new(config(), None, heap.host()).unwrap();
        builder.gather_source_objs(&[pool.addr()]).unwrap();
        builder.reserve_buffer(SizeAdvisories::default()).unwrap();
        builder.dump_mutable(&NoDispatchTables).unwrap();
        builder.dump_read_only(&NoDispatchTables).unwrap();

        let record = builder.allocate_other(3 * WORD).unwrap();
        let second = Addr::new(record.get() + WORD);
        let third = Addr::new(record.get() + 2 * WORD);
        builder.write_pointer_in_buffer(record, Some(pool.addr())).unwrap();
        builder.write_pointer_in_buffer(second, None).unwrap();
        builder.write_pointer_in_buffer(third, Some(profile.addr())).unwrap();
        assert_eq!(builder.stats().read_only.other.bytes, 3 * WORD);

        let copy = builder.get_output_addr(pool.addr()).unwrap();
        {
            let buffer = builder.buffer().unwrap();
            let ptrmap = builder.ptrmap().unwrap();
            let offset = buffer.offset_of(record.get()).unwrap();
            assert_eq!(buffer.read_word(offset), copy.get());
            assert!(ptrmap.get(offset / WORD));
            assert!(!ptrmap.get(offset / WORD + 1));
            assert_eq!(buffer.read_word(offset + 2 * WORD), 0);
            assert!(!ptrmap.get(offset / WORD + 2));
        }

        assert!(matches!(
            builder.clear_pointer(record),
            Err(BuildError::Invariant(InvariantViolation::ClearingLivePointer(..))),
        ));
        builder.clear_pointer(second).unwrap();

        builder.relocate_embedded_pointers().unwrap();
        builder.relocate_to_requested().unwrap();
        assert!(builder.allocate_other(8).is_err());

        let requested = builder.to_requested(copy).unwrap().get();
        let record_requested = builder.to_requested(record).unwrap().get();
        let archive = builder.archive().unwrap();
        let index = (record_requested - archive.requested.bottom().get()) / WORD;
        assert_eq!(archive_word(&archive, index), requested);
        assert_eq!(builder.any_to_offset(pool.addr()).unwrap(), requested - BASE);
    });
}

#[test]
fn statistics_are_reported_as_json()
{
    let _lock = session_lock();
    Heap::with(|heap| {
        let body = heap.alloc(ObjectKind::ProcedureBody, 3);
        let procedure = heap.alloc(ObjectKind::Procedure, 2);
        heap.set_pointer(procedure, 0, Some(body));

        let mut builder = ArchiveBuilder::new(config(), None, heap.host()).unwrap();
        builder.build(&[procedure.addr()], SizeAdvisories::default(), &[], |_| Ok(()))
            .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&builder.stats().to_json().unwrap()).unwrap();
        assert_eq!(json["mutable"]["objects"]["Procedure"]["bytes"], 16);
        assert_eq!(json["read_only"]["objects"]["ProcedureBody"]["count"], 1);
    });
}

const KINDS: [ObjectKind; 4] = [
    ObjectKind::Other,
    ObjectKind::Procedure,
    ObjectKind::ProcedureBody,
    ObjectKind::ProfileData,
];

proptest!
{
    #[test]
    fn every_recorded_pointer_is_relocated(
        objects in p::collection::vec((0 .. KINDS.len(), 1usize .. 5), 1 .. 24),
        edges in p::collection::vec(
            (p::arbitrary::any::<p::sample::Index>(),
             0usize .. 4,
             p::arbitrary::any::<p::sample::Index>()),
            0 .. 48,
        ),
    )
    {
        let _lock = session_lock();
        Heap::with(|heap| {
            let objs: Vec<Object> =
                objects.iter()
                .map(|&(kind, words)| heap.alloc(KINDS[kind], words))
                .collect();

            // Later writes to a field replace earlier ones.
            let mut fields = BTreeMap::new();
            for (from, field, to) in &edges {
                let from = from.index(objs.len());
                let to = to.index(objs.len());
                let field = field % objs[from].len();
                heap.set_pointer(objs[from], field, Some(objs[to]));
                fields.insert((from, field), to);
            }

            let roots: Vec<usize> = objs.iter().map(|o| o.addr()).collect();
            let mut builder = ArchiveBuilder::new(config(), None, heap.host()).unwrap();
            wire(&mut builder, &roots);

            let copied = |o: Object| o.kind() != ObjectKind::ProfileData;
            let buffer = builder.buffer().unwrap();
            let ptrmap = builder.ptrmap().unwrap();

            // Every recorded slot points at an archived copy.
            for index in ptrmap.ones() {
                let value = buffer.read_word(index * WORD);
                assert!(builder.get_source_addr(Addr::new(value)).is_ok());
            }

            // Every pointer field of a copy was either wired or nulled.
            let mut wired = 0;
            for (&(from, field), &to) in &fields {
                if !copied(objs[from]) {
                    continue;
                }
                let output = builder.get_output_addr(objs[from].addr()).unwrap();
                let slot = buffer.offset_of(output.get()).unwrap() + field * WORD;
                if copied(objs[to]) {
                    let target = builder.get_output_addr(objs[to].addr()).unwrap();
                    assert_eq!(buffer.read_word(slot), target.get());
                    assert!(ptrmap.get(slot / WORD));
                    wired += 1;
                } else {
                    assert_eq!(buffer.read_word(slot), 0);
                    assert!(!ptrmap.get(slot / WORD));
                }
            }
            assert_eq!(ptrmap.count_ones(), wired);

            builder.relocate_to_requested().unwrap();
            let archive = builder.archive().unwrap();
            assert_eq!(archive.ptrmap.count_ones(), wired);
            for index in archive.ptrmap.ones() {
                assert!(archive.requested.contains(archive_word(&archive, index)));
            }
        });
    }
}
