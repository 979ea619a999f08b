//! Interfaces to the host runtime whose objects are archived.
//!
//! The builder never looks at the layout of host objects.
//! It only consumes the references that the [object model][`ObjectModel`]
//! reports, and asks a few narrow questions of the other collaborators.

use crate::{
    address::{Addr, Buffer},
    object::ObjectKind,
};

/// Reference discovered while traversing the object graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge
{
    /// Object that contains the reference.
    ///
    /// This is [`None`] when the reference is one of the roots.
    pub enclosing: Option<usize>,

    /// Address of the field that holds the reference.
    ///
    /// This is [`None`] when the reference is one of the roots.
    pub field: Option<usize>,

    /// Address of the referenced object. Never null.
    pub pointee: usize,

    /// Kind of the referenced object.
    pub kind: ObjectKind,

    /// Size of the referenced object in bytes.
    pub size: usize,

    /// Whether the reference places its target in the read-only region.
    pub read_only: bool,
}

/// What the traversal should do after reporting a reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Visit
{
    /// Report the references held by the pointee.
    Recurse,

    /// Do not look inside the pointee.
    Skip,
}

/// Traversal primitive of the host object model.
///
/// # Safety
///
/// For every edge reported during a build session:
///
///  - `pointee` must be word-aligned, and readable for `size` bytes,
///    which must not be zero.
///  - `field`, if any, must lie within the `size` bytes of `enclosing`
///    as previously reported, and must hold `pointee`.
///  - The memory must not change until the session is dropped.
pub unsafe trait ObjectModel
{
    /// Report `root` and, as instructed by the callback,
    /// every reference held by objects reachable from it.
    ///
    /// Null references are not reported.
    /// The callback decides whether the traversal looks inside a pointee;
    /// an object may be reported any number of times through different
    /// references, and the traversal must terminate provided that
    /// the callback returns [`Visit::Recurse`] at most once per object.
    fn visit(&self, root: usize, f: &mut dyn FnMut(&Edge) -> Visit);

    /// Stable name of a type descriptor.
    ///
    /// Type descriptors are ordered by name for reproducible archives.
    fn type_name(&self, descriptor: usize) -> String;

    /// Human-readable description of an object, for the archive map.
    fn describe(&self, _object: usize, _kind: ObjectKind) -> Option<String>
    {
        None
    }
}

/// Decides which type descriptors are left out of the archive.
pub trait ExclusionOracle
{
    /// Whether the type descriptor must not be archived.
    fn is_excluded(&self, descriptor: usize, kind: ObjectKind) -> bool;
}

/// Registry of objects that were replaced by regenerated substitutes.
pub trait Substitutes
{
    /// Whether the object at `addr` has been replaced.
    fn has_substitute(&self, addr: usize) -> bool;

    /// The substitute that replaced the object at `addr`.
    fn lookup(&self, addr: usize) -> Option<usize>;
}

/// Supplies archive-local copies of dispatch tables.
pub trait DispatchTableProvider
{
    /// The prepared dispatch table for an object of the given kind
    /// that was copied to `output`, if objects of that kind have one.
    ///
    /// The returned table must lie in the output buffer.
    fn prepared_table_for(&self, kind: ObjectKind, output: Addr<Buffer>)
        -> Option<Addr<Buffer>>;
}

/// Host without regenerated objects.
pub struct NoSubstitutes;

impl Substitutes for NoSubstitutes
{
    fn has_substitute(&self, _addr: usize) -> bool
    {
        false
    }

    fn lookup(&self, _addr: usize) -> Option<usize>
    {
        None
    }
}

/// Host whose objects have no dispatch tables.
pub struct NoDispatchTables;

impl DispatchTableProvider for NoDispatchTables
{
    fn prepared_table_for(&self, _kind: ObjectKind, _output: Addr<Buffer>)
        -> Option<Addr<Buffer>>
    {
        None
    }
}

/// Sizes of archived data structures that are built outside the builder.
///
/// These are folded into the size estimate of the output buffer.
#[derive(Clone, Copy, Debug, Default)]
pub struct SizeAdvisories
{
    /// Estimated size of the interned string table.
    pub string_table: usize,

    /// Estimated size of the type dictionary.
    pub dictionary: usize,

    /// Other hand-assembled data, such as prepared dispatch tables.
    pub other: usize,
}

/// The collaborators consulted while gathering objects.
#[derive(Clone, Copy)]
pub struct Host<'a>
{
    #[allow(missing_docs)]
    pub model: &'a dyn ObjectModel,

    #[allow(missing_docs)]
    pub exclusion: &'a dyn ExclusionOracle,

    #[allow(missing_docs)]
    pub substitutes: &'a dyn Substitutes,
}
