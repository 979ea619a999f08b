//! Reference object model.
//!
//! A [`Heap`] is a small graph of word-sized cells with typed pointer
//! fields. It implements every interface the builder consults, which
//! makes it suitable for exercising a build without a real runtime.
//!
//! Objects are allocated from arenas and never move or die before
//! the heap does. Words of an object may be read or written at any time,
//! except while a build session borrows the heap.

pub use self::object::*;

use {
    self::object::Field,
    crate::{
        address::{Addr, AddrRange, Mapped, WORD},
        host::{Edge, ExclusionOracle, Host, ObjectModel, Substitutes, Visit},
        object::ObjectKind,
    },
    std::{
        cell::{Cell, RefCell},
        collections::{HashMap, HashSet},
        iter,
    },
    typed_arena::Arena,
};

mod object;

/// Words reserved up front, so that objects allocated in order
/// have ascending addresses for all but very large heaps.
const INITIAL_WORDS: usize = 1 << 16;

/// Region of the heap that stands in for a mapped dependency archive.
struct Segment<'h>
{
    words: &'h [Cell<usize>],
    used: Cell<usize>,
}

/// Reference object model.
pub struct Heap<'h>
{
    words: &'h Arena<Cell<usize>>,
    objects: &'h Arena<ObjectData<'h>>,
    by_addr: RefCell<HashMap<usize, Object<'h>>>,
    dependency: Option<Segment<'h>>,
    substitutes: RefCell<HashMap<usize, usize>>,
    excluded: RefCell<HashSet<usize>>,
}

impl<'h> Heap<'h>
{
    /// Create a heap and pass it to the given function.
    pub fn with<F, R>(f: F) -> R
        where F: for<'i> FnOnce(&Heap<'i>) -> R
    {
        Self::with_dependency(0, f)
    }

    /// Create a heap with a dependency segment of `words` words,
    /// and pass it to the given function.
    ///
    /// Objects allocated with [`alloc_in_dependency`] live in the segment,
    /// and are treated as if they were in a mapped dependency archive.
    ///
    /// [`alloc_in_dependency`]: `Self::alloc_in_dependency`
    pub fn with_dependency<F, R>(words: usize, f: F) -> R
        where F: for<'i> FnOnce(&Heap<'i>) -> R
    {
        let word_arena = &Arena::with_capacity(INITIAL_WORDS);
        let object_arena = &Arena::new();

        let dependency = (words != 0).then(|| Segment{
            words: word_arena.alloc_extend(iter::repeat_with(|| Cell::new(0)).take(words)),
            used: Cell::new(0),
        });

        let heap = Heap{
            words: word_arena,
            objects: object_arena,
            by_addr: RefCell::new(HashMap::new()),
            dependency,
            substitutes: RefCell::new(HashMap::new()),
            excluded: RefCell::new(HashSet::new()),
        };
        f(&heap)
    }

    /// The collaborators for a build session over this heap.
    pub fn host(&self) -> Host
    {
        Host{model: self, exclusion: self, substitutes: self}
    }

    fn register(
        &self,
        words: &'h [Cell<usize>],
        kind: ObjectKind,
        name: Option<&str>,
    ) -> Object<'h>
    {
        let read_only = read_only_by_default(kind);
        let name = name.map(str::to_owned);
        let data = self.objects.alloc(ObjectData::new(words, kind, name, read_only));
        let object = Object(data);
        self.by_addr.borrow_mut().insert(object.addr(), object);
        object
    }

    /// Allocate a zeroed object of `words` words.
    ///
    /// # Panics
    ///
    /// If `words` is zero.
    pub fn alloc(&self, kind: ObjectKind, words: usize) -> Object<'h>
    {
        self.alloc_with_name(kind, words, None)
    }

    /// Allocate a zeroed object with a name.
    ///
    /// The name of a type descriptor decides its position in the archive.
    pub fn alloc_named(&self, kind: ObjectKind, words: usize, name: &str)
        -> Object<'h>
    {
        self.alloc_with_name(kind, words, Some(name))
    }

    fn alloc_with_name(&self, kind: ObjectKind, words: usize, name: Option<&str>)
        -> Object<'h>
    {
        assert!(words != 0, "Objects must have at least one word");
        let words = self.words.alloc_extend(iter::repeat_with(|| Cell::new(0)).take(words));
        self.register(words, kind, name)
    }

    /// Allocate a zeroed object in the dependency segment.
    ///
    /// Returns [`None`] if there is no dependency segment,
    /// or if it has no room for the object.
    pub fn alloc_in_dependency(&self, kind: ObjectKind, words: usize)
        -> Option<Object<'h>>
    {
        assert!(words != 0, "Objects must have at least one word");
        let segment = self.dependency.as_ref()?;
        let start = segment.used.get();
        let end = start.checked_add(words)?;
        let words = segment.words.get(start .. end)?;
        segment.used.set(end);
        Some(self.register(words, kind, None))
    }

    /// Where the dependency segment is.
    pub fn dependency_range(&self) -> Option<AddrRange<Mapped>>
    {
        let segment = self.dependency.as_ref()?;
        let bottom = segment.words.as_ptr() as usize;
        AddrRange::from_len(Addr::new(bottom), segment.words.len() * WORD)
    }

    /// The object at an address.
    pub fn get(&self, addr: usize) -> Option<Object<'h>>
    {
        self.by_addr.borrow().get(&addr).copied()
    }

    /// Store a pointer in word `index` of `object`,
    /// which becomes a pointer field.
    ///
    /// The reference places the target in the region the target asks for.
    pub fn set_pointer(&self, object: Object<'h>, index: usize, target: Option<Object<'h>>)
    {
        object.0.set_field(Field{index, read_only: None});
        object.set_word(index, target.map_or(0, Object::addr));
    }

    /// Like [`set_pointer`][`Self::set_pointer`], but the reference
    /// places the target in the read-only region or not as given.
    pub fn set_pointer_as(
        &self,
        object: Object<'h>,
        index: usize,
        target: Option<Object<'h>>,
        read_only: bool,
    )
    {
        object.0.set_field(Field{index, read_only: Some(read_only)});
        object.set_word(index, target.map_or(0, Object::addr));
    }

    /// Record that `original` was regenerated as `substitute`.
    pub fn substitute(&self, original: Object<'h>, substitute: Object<'h>)
    {
        self.substitutes.borrow_mut().insert(original.addr(), substitute.addr());
    }

    /// Leave a type descriptor out of archives.
    pub fn exclude(&self, descriptor: Object<'h>)
    {
        self.excluded.borrow_mut().insert(descriptor.addr());
    }

    fn edge(
        &self,
        enclosing: Option<Object<'h>>,
        field: Option<Field>,
        pointee: Object<'h>,
    ) -> Edge
    {
        Edge{
            enclosing: enclosing.map(Object::addr),
            field: enclosing.zip(field).map(|(e, f)| e.addr() + f.index * WORD),
            pointee: pointee.addr(),
            kind: pointee.kind(),
            size: pointee.size(),
            read_only: field.and_then(|f| f.read_only)
                .unwrap_or_else(|| pointee.read_only()),
        }
    }
}

/// Kinds that are placed in the read-only region unless a reference
/// says otherwise.
fn read_only_by_default(kind: ObjectKind) -> bool
{
    matches!(kind, ObjectKind::InternedString | ObjectKind::ProcedureBody)
}

// SAFETY: Objects are arena-allocated words that live as long as the heap,
//         edges are reported only for registered objects with their
//         actual size, and fields are words within their objects.
//         The memory does not change while a build session borrows
//         the heap, as long as the caller does not write to objects.
unsafe impl<'h> ObjectModel for Heap<'h>
{
    fn visit(&self, root: usize, f: &mut dyn FnMut(&Edge) -> Visit)
    {
        let Some(root) = self.get(root) else { return };

        let mut stack = vec![self.edge(None, None, root)];
        while let Some(edge) = stack.pop() {
            if f(&edge) == Visit::Skip {
                continue;
            }
            let Some(object) = self.get(edge.pointee) else { continue };
            // Reversed, so that fields are reported in ascending order.
            for field in object.0.fields().into_iter().rev() {
                let Some(target) = self.get(object.word(field.index))
                    else { continue };
                stack.push(self.edge(Some(object), Some(field), target));
            }
        }
    }

    fn type_name(&self, descriptor: usize) -> String
    {
        self.get(descriptor)
            .and_then(Object::name)
            .unwrap_or_default()
            .to_owned()
    }

    fn describe(&self, object: usize, _kind: ObjectKind) -> Option<String>
    {
        self.get(object)?.name().map(str::to_owned)
    }
}

impl<'h> ExclusionOracle for Heap<'h>
{
    fn is_excluded(&self, descriptor: usize, _kind: ObjectKind) -> bool
    {
        self.excluded.borrow().contains(&descriptor)
    }
}

impl<'h> Substitutes for Heap<'h>
{
    fn has_substitute(&self, addr: usize) -> bool
    {
        self.substitutes.borrow().contains_key(&addr)
    }

    fn lookup(&self, addr: usize) -> Option<usize>
    {
        self.substitutes.borrow().get(&addr).copied()
    }
}
