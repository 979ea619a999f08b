use {
    crate::{address::WORD, object::ObjectKind},
    smallvec::SmallVec,
    std::{cell::{Cell, RefCell}, fmt},
};

/// Pointer field of an object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub (super) struct Field
{
    /// Index of the word that holds the pointer.
    pub index: usize,

    /// Overrides the mutability of the pointee for this reference.
    pub read_only: Option<bool>,
}

/// Storage for an object on a [`Heap`][`super::Heap`].
pub struct ObjectData<'h>
{
    words: &'h [Cell<usize>],
    kind: ObjectKind,
    name: Option<String>,
    read_only: Cell<bool>,

    /// Sorted by index.
    fields: RefCell<SmallVec<[Field; 4]>>,
}

impl<'h> ObjectData<'h>
{
    pub (super) fn new(
        words: &'h [Cell<usize>],
        kind: ObjectKind,
        name: Option<String>,
        read_only: bool,
    ) -> Self
    {
        Self{
            words,
            kind,
            name,
            read_only: Cell::new(read_only),
            fields: RefCell::new(SmallVec::new()),
        }
    }

    pub (super) fn set_field(&self, field: Field)
    {
        let mut fields = self.fields.borrow_mut();
        match fields.binary_search_by_key(&field.index, |f| f.index) {
            Ok(i)  => fields[i] = field,
            Err(i) => fields.insert(i, field),
        }
    }

    pub (super) fn fields(&self) -> SmallVec<[Field; 4]>
    {
        self.fields.borrow().clone()
    }
}

/// Reference to an object on a [`Heap`][`super::Heap`].
#[derive(Clone, Copy)]
pub struct Object<'h>(pub (super) &'h ObjectData<'h>);

impl<'h> Object<'h>
{
    /// The address of the object.
    pub fn addr(self) -> usize
    {
        self.0.words.as_ptr() as usize
    }

    #[allow(missing_docs)]
    pub fn kind(self) -> ObjectKind
    {
        self.0.kind
    }

    /// The number of words in the object.
    pub fn len(self) -> usize
    {
        self.0.words.len()
    }

    /// Objects always have at least one word.
    pub fn is_empty(self) -> bool
    {
        false
    }

    /// The size of the object in bytes.
    pub fn size(self) -> usize
    {
        self.len() * WORD
    }

    #[allow(missing_docs)]
    pub fn name(self) -> Option<&'h str>
    {
        self.0.name.as_deref()
    }

    /// Whether references to the object place it in the read-only region.
    pub fn read_only(self) -> bool
    {
        self.0.read_only.get()
    }

    #[allow(missing_docs)]
    pub fn set_read_only(self, read_only: bool)
    {
        self.0.read_only.set(read_only);
    }

    /// Read a word of the object.
    pub fn word(self, index: usize) -> usize
    {
        self.0.words[index].get()
    }

    /// Write a word of the object.
    ///
    /// Writing to a pointer field does not stop it from being a pointer field.
    pub fn set_word(self, index: usize, value: usize)
    {
        self.0.words[index].set(value);
    }
}

impl<'h> PartialEq for Object<'h>
{
    fn eq(&self, other: &Self) -> bool
    {
        self.addr() == other.addr()
    }
}

impl<'h> Eq for Object<'h>
{
}

impl<'h> fmt::Debug for Object<'h>
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        write!(f, "{}@{:#x}", self.kind(), self.addr())?;
        if let Some(name) = self.name() {
            write!(f, " {:?}", name)?;
        }
        Ok(())
    }
}
