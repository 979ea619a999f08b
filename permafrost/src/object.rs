//! Kinds and dispositions of source objects.

use {serde::Serialize, std::fmt};

/// Kind of a source object, as reported by the object model.
///
/// The kind decides how an object is classified, which extra work
/// is done when it is copied, and how it is named in diagnostics.
#[allow(missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ObjectKind
{
    TypeDescriptor,
    ArrayDescriptor,
    Procedure,
    ProcedureBody,
    ConstantPool,
    InternedString,
    Array,
    ProfileData,
    InvocationCounters,
    Other,
}

impl ObjectKind
{
    /// Every kind, in declaration order.
    pub const ALL: [Self; 10] = [
        Self::TypeDescriptor,
        Self::ArrayDescriptor,
        Self::Procedure,
        Self::ProcedureBody,
        Self::ConstantPool,
        Self::InternedString,
        Self::Array,
        Self::ProfileData,
        Self::InvocationCounters,
        Self::Other,
    ];

    /// Position of the kind in [`ALL`][`Self::ALL`].
    pub fn index(self) -> usize
    {
        self as usize
    }

    /// Name of the kind in diagnostics.
    pub fn name(self) -> &'static str
    {
        match self {
            Self::TypeDescriptor     => "TypeDescriptor",
            Self::ArrayDescriptor    => "ArrayDescriptor",
            Self::Procedure          => "Procedure",
            Self::ProcedureBody      => "ProcedureBody",
            Self::ConstantPool       => "ConstantPool",
            Self::InternedString     => "InternedString",
            Self::Array              => "Array",
            Self::ProfileData        => "ProfileData",
            Self::InvocationCounters => "InvocationCounters",
            Self::Other              => "Other",
        }
    }

    /// Whether objects of this kind describe a type.
    pub fn is_type_descriptor(self) -> bool
    {
        matches!(self, Self::TypeDescriptor | Self::ArrayDescriptor)
    }

    /// Whether objects of this kind can be recomputed after restore,
    /// and are therefore never archived.
    pub fn is_transient(self) -> bool
    {
        matches!(self, Self::ProfileData | Self::InvocationCounters)
    }
}

impl fmt::Display for ObjectKind
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result
    {
        f.write_str(self.name())
    }
}

/// What happens to a discovered object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Disposition
{
    /// Copy the object into the archive and relocate pointers to it.
    Copy,

    /// The object already lives in the mapped dependency archive;
    /// pointers to it are shifted into its requested location.
    AliasToExisting,

    /// Pointers to the object become null in the archive.
    NullOut,
}
